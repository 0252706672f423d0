use crate::error::OrchestratorError;
use crate::plan::{Plan, Step};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Queued,
    Planning,
    Executing,
    Paused,
    WaitingUser,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled | RunStatus::Timeout
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Queued => "queued",
            RunStatus::Planning => "planning",
            RunStatus::Executing => "executing",
            RunStatus::Paused => "paused",
            RunStatus::WaitingUser => "waiting_user",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
            RunStatus::Timeout => "timeout",
        }
    }
}

fn default_model() -> String {
    "gemini-2.5-flash".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_steps() -> u32 {
    50
}

fn default_max_duration_seconds() -> u64 {
    3600
}

fn default_max_credits() -> u64 {
    100
}

fn default_checkpoint_interval() -> u32 {
    5
}

/// Caller-supplied bounds. Recognized options exactly as named in the spec; anything else in
/// the caller's JSON is rejected at the ingress boundary rather than silently accepted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    #[serde(default = "default_max_duration_seconds")]
    pub max_duration_seconds: u64,
    #[serde(default = "default_max_credits")]
    pub max_credits: u64,
    #[serde(default)]
    pub tools_enabled: Option<HashSet<String>>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u32,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_duration_seconds: default_max_duration_seconds(),
            max_credits: default_max_credits(),
            tools_enabled: None,
            model: default_model(),
            temperature: default_temperature(),
            checkpoint_interval: default_checkpoint_interval(),
        }
    }
}

impl RunConfig {
    /// `None` means "all tools" per the spec's default.
    pub fn allows_tool(&self, name: &str) -> bool {
        match &self.tools_enabled {
            None => true,
            Some(set) => set.contains(name),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub external_id: Option<String>,
    pub tenant_id: String,
    pub user_id: String,
    pub status: RunStatus,
    pub prompt: String,
    pub prompt_hash: String,
    pub config: RunConfig,
    pub plan: Option<Plan>,
    pub current_phase_id: Option<u32>,
    pub current_step_id: Option<String>,
    pub step_count: u32,
    /// The run's own step log, keyed by `idempotency_key` for replay (§4.3). Lives on
    /// the Run rather than in worker memory so a lease re-acquired by a different
    /// worker after a crash sees exactly the steps the dead worker completed.
    #[serde(default)]
    pub steps: Vec<Step>,
    pub retry_count: u32,
    pub max_retries: u32,
    pub credits_reserved: u64,
    pub credits_consumed: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub timeout_at: Option<DateTime<Utc>>,
    pub error: Option<OrchestratorError>,
    pub version: u64,
    /// Internal scheduling priority; not exposed by the Ingress API in this version, every
    /// caller-created Run has priority 0. Higher runs first.
    pub priority: i32,
    pub worker_id: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
}

impl Run {
    pub fn new(id: String, tenant_id: String, user_id: String, prompt: String, config: RunConfig) -> Self {
        let prompt_hash = crate::hash_str(&prompt);
        Self {
            id,
            external_id: None,
            tenant_id,
            user_id,
            status: RunStatus::Pending,
            prompt,
            prompt_hash,
            config,
            plan: None,
            current_phase_id: None,
            current_step_id: None,
            step_count: 0,
            steps: Vec::new(),
            retry_count: 0,
            max_retries: 3,
            credits_reserved: 0,
            credits_consumed: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            timeout_at: None,
            error: None,
            version: 0,
            priority: 0,
            worker_id: None,
            lease_expires_at: None,
        }
    }

    pub fn remaining_credits(&self) -> u64 {
        self.credits_reserved.saturating_sub(self.credits_consumed)
    }
}
