use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The five shapes the LLM Router's decision call may return. Exactly one kind per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentAction {
    Tool {
        tool_name: String,
        tool_input: Value,
        #[serde(default)]
        reasoning: Option<String>,
    },
    Message {
        content: String,
    },
    PhaseComplete,
    TaskComplete {
        #[serde(default)]
        message: Option<String>,
    },
    RequestInput {
        question: String,
    },
}
