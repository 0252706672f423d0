use crate::adapter::ProviderAdapter;
use conduit_types::{ChatRequest, ChatResponse, ErrorCode, FallbackChain, ModelHealth, OrchestratorError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// `gemini-2.0-flash` on `google` is the single default identity: both the hard default when
/// `model` and `capability` are absent, and the fallback entry of the capability lookup table
/// (see SPEC_FULL.md §4.6, Open Question resolution).
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";
pub const DEFAULT_PROVIDER: &str = "google";

/// Everything the router needs to know about the static catalog: which provider serves a
/// model, and the fallback chain to use when the selected model is unavailable. Loaded once
/// at startup (§6 Configuration: "all read at startup; hot reload is not required").
pub struct ProviderRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
    model_providers: HashMap<String, String>,
    capability_defaults: HashMap<String, String>,
    fallback_chains: HashMap<String, FallbackChain>,
    health: Arc<RwLock<HashMap<String, ModelHealth>>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            model_providers: HashMap::new(),
            capability_defaults: HashMap::new(),
            fallback_chains: HashMap::new(),
            health: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn register_adapter(&mut self, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(adapter.provider_id().to_string(), adapter);
    }

    pub fn register_model(&mut self, model: impl Into<String>, provider_id: impl Into<String>) {
        self.model_providers.insert(model.into(), provider_id.into());
    }

    pub fn register_capability_default(&mut self, capability: impl Into<String>, model: impl Into<String>) {
        self.capability_defaults.insert(capability.into(), model.into());
    }

    pub fn register_fallback_chain(&mut self, chain: FallbackChain) {
        self.fallback_chains.insert(chain.primary.clone(), chain);
    }

    pub async fn health_snapshot(&self) -> HashMap<String, ModelHealth> {
        self.health.read().await.clone()
    }

    fn select_model(&self, request: &ChatRequest) -> String {
        if let Some(model) = &request.model {
            return model.clone();
        }
        if let Some(capability) = &request.capability {
            if let Some(model) = self.capability_defaults.get(capability) {
                return model.clone();
            }
        }
        DEFAULT_MODEL.to_string()
    }

    fn candidates_for(&self, selected: &str) -> Vec<String> {
        match self.fallback_chains.get(selected) {
            Some(chain) => chain.candidates(selected),
            None => vec![selected.to_string()],
        }
    }

    /// Drives the three-step selection algorithm in §4.6, then walks the candidate list in
    /// order, skipping unavailable models, recording health on every outcome, and returning
    /// the first success. Exhausting the list yields `ALL_MODELS_FAILED`.
    pub async fn route(&self, request: ChatRequest) -> Result<ChatResponse, OrchestratorError> {
        let selected = self.select_model(&request);
        let candidates = self.candidates_for(&selected);

        let mut last_error: Option<String> = None;

        for model in candidates {
            let provider_id = match self.model_providers.get(&model) {
                Some(id) => id.clone(),
                None => {
                    last_error = Some(format!("no provider configured for model {model}"));
                    continue;
                }
            };

            {
                let health = self.health.read().await;
                if let Some(entry) = health.get(&model) {
                    if !entry.is_available() {
                        continue;
                    }
                }
            }

            let adapter = match self.adapters.get(&provider_id) {
                Some(a) => a.clone(),
                None => {
                    last_error = Some(format!("provider {provider_id} not registered"));
                    continue;
                }
            };

            match adapter.complete(&request, &model).await {
                Ok(response) => {
                    let mut health = self.health.write().await;
                    health.entry(model.clone()).or_default().record_success(response.latency_ms);
                    info!(model = %model, provider = %provider_id, latency_ms = response.latency_ms, "provider_call_succeeded");
                    return Ok(response);
                }
                Err(err) => {
                    let mut health = self.health.write().await;
                    health.entry(model.clone()).or_default().record_failure();
                    warn!(model = %model, provider = %provider_id, error = %err, "provider_call_failed");
                    last_error = Some(err.to_string());
                }
            }
        }

        Err(OrchestratorError::new(
            ErrorCode::AllModelsFailed,
            last_error.unwrap_or_else(|| "no candidate models were available".to_string()),
        ))
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::new()
    }
}
