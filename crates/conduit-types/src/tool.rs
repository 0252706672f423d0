use crate::error::OrchestratorError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    Browser,
    Shell,
    File,
    Search,
    Document,
    Image,
    Communication,
    Deployment,
    Orchestration,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub per_minute: u32,
    pub per_hour: u32,
    pub concurrent: u32,
}

/// Static catalog entry. The catalog is canonical and drives validation and cost estimation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub category: ToolCategory,
    pub parameters_schema: Value,
    pub required_capabilities: Vec<String>,
    pub timeout_ms: u64,
    pub cost_credits: u64,
    pub rate_limit: RateLimitSpec,
    pub idempotent: bool,
}

/// A single requested invocation, as produced by the Supervisor from an `AgentAction::Tool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    pub input: Value,
    pub tenant_id: String,
    pub run_id: String,
    pub step_id: String,
    pub idempotency_key: String,
    pub timeout_ms: u64,
    pub credit_budget: u64,
}

/// Uniform result envelope every handler returns, and the router returns after wrapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<OrchestratorError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credits_consumed: Option<u64>,
    pub duration_ms: u64,
}

impl ToolResult {
    pub fn ok(output: Value, duration_ms: u64) -> Self {
        Self {
            success: true,
            output: Some(output),
            error: None,
            artifacts: Vec::new(),
            tokens_used: None,
            credits_consumed: None,
            duration_ms,
        }
    }

    pub fn err(error: OrchestratorError, duration_ms: u64) -> Self {
        Self {
            success: false,
            output: None,
            error: Some(error),
            artifacts: Vec::new(),
            tokens_used: None,
            credits_consumed: None,
            duration_ms,
        }
    }
}
