use crate::error::OrchestratorError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// The fixed capability vocabulary phases may be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    WebBrowsing,
    CodeExecution,
    FileOperations,
    DocumentGeneration,
    WebSearch,
    ImageGeneration,
}

impl Capability {
    pub fn as_str(self) -> &'static str {
        match self {
            Capability::WebBrowsing => "web_browsing",
            Capability::CodeExecution => "code_execution",
            Capability::FileOperations => "file_operations",
            Capability::DocumentGeneration => "document_generation",
            Capability::WebSearch => "web_search",
            Capability::ImageGeneration => "image_generation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "web_browsing" => Some(Capability::WebBrowsing),
            "code_execution" => Some(Capability::CodeExecution),
            "file_operations" => Some(Capability::FileOperations),
            "document_generation" => Some(Capability::DocumentGeneration),
            "web_search" => Some(Capability::WebSearch),
            "image_generation" => Some(Capability::ImageGeneration),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    Skipped,
}

impl PhaseStatus {
    pub fn is_settled(self) -> bool {
        matches!(self, PhaseStatus::Completed | PhaseStatus::Skipped)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Phase {
    /// 1-based.
    pub id: u32,
    pub title: String,
    pub description: String,
    pub capabilities: HashSet<Capability>,
    pub estimated_steps: u32,
    pub status: PhaseStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub steps_completed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PlanTokens {
    pub input: u64,
    pub output: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanMetadata {
    pub attempt: u32,
    pub model: String,
    pub tokens: PlanTokens,
    pub generation_time_ms: u64,
}

/// Synthesized by the Planner. Immutable once accepted by the Run (no mutation method on
/// `phases` here beyond what the Supervisor needs, advancing statuses one at a time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub version: u32,
    pub goal: String,
    pub phases: Vec<Phase>,
    pub current_phase_id: u32,
    pub metadata: PlanMetadata,
}

impl Plan {
    pub fn phase(&self, id: u32) -> Option<&Phase> {
        self.phases.iter().find(|p| p.id == id)
    }

    pub fn phase_mut(&mut self, id: u32) -> Option<&mut Phase> {
        self.phases.iter_mut().find(|p| p.id == id)
    }

    /// First phase still `pending` or `executing`, in order.
    pub fn next_active_phase(&self) -> Option<&Phase> {
        self.phases
            .iter()
            .find(|p| matches!(p.status, PhaseStatus::Pending | PhaseStatus::Executing))
    }

    pub fn all_settled(&self) -> bool {
        self.phases.iter().all(|p| p.status.is_settled())
    }

    /// Invariant #2: phases ordered 1..n with no gaps, at most one `executing`.
    pub fn validate_ordering(&self) -> bool {
        if self.phases.len() < 2 || self.phases.len() > 15 {
            return false;
        }
        for (idx, phase) in self.phases.iter().enumerate() {
            if phase.id != (idx as u32) + 1 {
                return false;
            }
        }
        self.phases
            .iter()
            .filter(|p| p.status == PhaseStatus::Executing)
            .count()
            <= 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped | StepStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub run_id: String,
    pub phase_id: u32,
    pub sequence: u32,
    pub tool_name: String,
    pub tool_input: Value,
    pub tool_output: Option<Value>,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub credits_consumed: u64,
    pub tokens_used: u64,
    pub error: Option<OrchestratorError>,
    pub retry_count: u32,
    pub idempotency_key: String,
}

impl Step {
    pub fn new(run_id: &str, phase_id: u32, sequence: u32, tool_name: &str, tool_input: Value) -> Self {
        let idempotency_key = crate::step_idempotency_key(run_id, sequence, tool_name);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            phase_id,
            sequence,
            tool_name: tool_name.to_string(),
            tool_input,
            tool_output: None,
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            credits_consumed: 0,
            tokens_used: 0,
            error: None,
            retry_count: 0,
            idempotency_key,
        }
    }
}
