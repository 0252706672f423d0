use conduit_types::{Event, Run, RunConfig, RunStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct CreateRunRequest {
    pub prompt: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub connector_ids: Vec<String>,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub config: Option<RunConfig>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateRunResponse {
    pub run_id: String,
    pub status: &'static str,
}

impl CreateRunResponse {
    pub fn created(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            status: "created",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct ResumeRunRequest {
    #[serde(default)]
    pub user_input: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionAck {
    pub run_id: String,
    pub status: String,
}

/// `status` response: the Run plus derived progress (fraction of phases settled and the
/// active phase/step pointers), so callers don't have to reconstruct it from the Plan.
#[derive(Debug, Clone, Serialize)]
pub struct WireRun {
    pub id: String,
    pub external_id: Option<String>,
    pub tenant_id: String,
    pub user_id: String,
    pub status: RunStatus,
    pub prompt: String,
    pub current_phase_id: Option<u32>,
    pub current_step_id: Option<String>,
    pub step_count: u32,
    pub credits_reserved: u64,
    pub credits_consumed: u64,
    pub progress: Progress,
    pub error: Option<conduit_types::OrchestratorError>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub completed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Default)]
pub struct Progress {
    pub total_phases: u32,
    pub settled_phases: u32,
}

impl From<&Run> for WireRun {
    fn from(run: &Run) -> Self {
        let progress = match &run.plan {
            Some(plan) => Progress {
                total_phases: plan.phases.len() as u32,
                settled_phases: plan.phases.iter().filter(|p| p.status.is_settled()).count() as u32,
            },
            None => Progress::default(),
        };
        Self {
            id: run.id.clone(),
            external_id: run.external_id.clone(),
            tenant_id: run.tenant_id.clone(),
            user_id: run.user_id.clone(),
            status: run.status,
            prompt: run.prompt.clone(),
            current_phase_id: run.current_phase_id,
            current_step_id: run.current_step_id.clone(),
            step_count: run.step_count,
            credits_reserved: run.credits_reserved,
            credits_consumed: run.credits_consumed,
            progress,
            error: run.error.clone(),
            created_at: run.created_at,
            completed_at: run.completed_at,
            version: run.version,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventFilterQuery {
    #[serde(default)]
    pub since_seq: Option<u64>,
}

/// SSE framing for a single `Event`: `event: <type>` / `data: <json>`.
pub fn sse_frame(event: &Event) -> (String, String) {
    (
        event.event_type.as_str().to_string(),
        serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string()),
    )
}
