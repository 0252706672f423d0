use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The caller-visible progress event catalog, in the order §4.8 lists them, plus `dropped`
/// for the drop-oldest overflow marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    TaskStarted,
    PlanCreated,
    PhaseStarted,
    PhaseCompleted,
    ToolStarted,
    ToolOutput,
    ToolCompleted,
    Message,
    Thinking,
    TaskCompleted,
    TaskFailed,
    StreamEnd,
    Dropped,
}

impl EventType {
    pub fn as_str(self) -> &'static str {
        match self {
            EventType::TaskStarted => "task_started",
            EventType::PlanCreated => "plan_created",
            EventType::PhaseStarted => "phase_started",
            EventType::PhaseCompleted => "phase_completed",
            EventType::ToolStarted => "tool_started",
            EventType::ToolOutput => "tool_output",
            EventType::ToolCompleted => "tool_completed",
            EventType::Message => "message",
            EventType::Thinking => "thinking",
            EventType::TaskCompleted => "task_completed",
            EventType::TaskFailed => "task_failed",
            EventType::StreamEnd => "stream_end",
            EventType::Dropped => "dropped",
        }
    }
}

/// `{id, run_id, seq, type, payload, ts}` — the durable, caller-visible progress record.
/// `seq` is strictly increasing per run; consumers are expected to be idempotent on `id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub run_id: String,
    pub seq: u64,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: Value,
    pub ts: DateTime<Utc>,
}

impl Event {
    pub fn new(run_id: &str, seq: u64, event_type: EventType, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            seq,
            event_type,
            payload,
            ts: Utc::now(),
        }
    }
}

/// Internal, logging-only structured record. Never sent to callers; distinct from `Event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityEvent {
    pub event: String,
    pub component: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ObservabilityEvent {
    pub fn new(event: impl Into<String>, component: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            component: component.into(),
            correlation_id: None,
            run_id: None,
            step_id: None,
            provider_id: None,
            model_id: None,
            status: None,
            error_code: None,
            detail: None,
        }
    }

    pub fn run(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn step(mut self, step_id: impl Into<String>) -> Self {
        self.step_id = Some(step_id.into());
        self
    }

    pub fn provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn model(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = Some(model_id.into());
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}
