use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderFormat {
    Openai,
    Anthropic,
    Google,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub id: String,
    pub api_base: String,
    pub format: ProviderFormat,
    pub api_key_env: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackChain {
    pub primary: String,
    pub fallbacks: Vec<String>,
    pub max_retries: u32,
}

impl FallbackChain {
    /// `[selected] ++ fallbacks`, de-duplicated (first occurrence wins), capped at
    /// `max_retries + 1` candidates.
    pub fn candidates(&self, selected: &str) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for model in std::iter::once(selected.to_string()).chain(self.fallbacks.iter().cloned()) {
            if seen.insert(model.clone()) {
                out.push(model);
            }
            if out.len() as u32 >= self.max_retries + 1 {
                break;
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelHealth {
    pub status: HealthStatus,
    pub latency_ms: u64,
    pub failure_count: u32,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
}

impl Default for ModelHealth {
    fn default() -> Self {
        Self {
            status: HealthStatus::Healthy,
            latency_ms: 0,
            failure_count: 0,
            last_success_at: None,
            last_failure_at: None,
        }
    }
}

impl ModelHealth {
    pub fn is_available(&self) -> bool {
        self.status != HealthStatus::Unhealthy
    }

    pub fn record_success(&mut self, latency_ms: u64) {
        self.latency_ms = latency_ms;
        self.failure_count = 0;
        self.last_success_at = Some(Utc::now());
        self.status = if latency_ms > 5000 {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
    }

    pub fn record_failure(&mut self) {
        self.failure_count += 1;
        self.last_failure_at = Some(Utc::now());
        self.status = if self.failure_count >= 3 {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub functions: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub prompt: u64,
    pub completion: u64,
    pub total: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub id: String,
    pub model: String,
    pub provider: String,
    pub content: String,
    pub finish_reason: String,
    pub usage: TokenUsage,
    pub latency_ms: u64,
}
