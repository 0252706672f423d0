use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs;

/// One registered provider's static configuration. The API key itself is never read
/// from this struct at request time — it is always re-read from `api_key_env` so a
/// rotated secret takes effect without a restart, and so the key never round-trips
/// through whatever loaded this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub id: String,
    pub api_base: String,
    pub format: String,
    pub api_key_env: String,
    #[serde(default)]
    pub models: Vec<String>,
}

/// Startup-only configuration (§2.1): read once when the process boots, never
/// hot-reloaded. A file at `config_path` supplies the provider catalog and server
/// settings; provider secrets come from the environment named in
/// `ProviderSettings::api_key_env`, never from the file itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
    #[serde(default = "default_lease_ttl_seconds")]
    pub lease_ttl_seconds: i64,
    #[serde(default = "default_reap_interval_seconds")]
    pub reap_interval_seconds: u64,
    /// Per-tenant ceiling on outstanding (not yet released/finalized) reserved credits,
    /// checked at ingress (§4.7: account-level rate gating happens there, not in the
    /// Credit Manager itself).
    #[serde(default = "default_tenant_credit_budget")]
    pub tenant_credit_budget: u64,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_lease_ttl_seconds() -> i64 {
    30
}

fn default_reap_interval_seconds() -> u64 {
    10
}

fn default_tenant_credit_budget() -> u64 {
    10_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            data_dir: default_data_dir(),
            providers: Vec::new(),
            lease_ttl_seconds: default_lease_ttl_seconds(),
            reap_interval_seconds: default_reap_interval_seconds(),
            tenant_credit_budget: default_tenant_credit_budget(),
        }
    }
}

impl Config {
    /// Loads `path` if present, falling back to defaults entirely if it is absent —
    /// a missing config file is not an error, only a malformed one is. `CONDUIT_LISTEN_ADDR`
    /// and `CONDUIT_DATA_DIR` override the file when set, matching the env-over-file
    /// precedence the rest of this stack uses for everything except provider secrets.
    pub async fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path).await?;
            serde_json::from_str(&raw)?
        } else {
            Config::default()
        };

        if let Ok(addr) = std::env::var("CONDUIT_LISTEN_ADDR") {
            config.listen_addr = addr;
        }
        if let Ok(dir) = std::env::var("CONDUIT_DATA_DIR") {
            config.data_dir = dir;
        }

        Ok(config)
    }

    /// Resolves the live API key for `provider_id` from its configured env var.
    /// Returns `None` if the provider is unknown or the env var is unset/blank.
    pub fn resolve_api_key(&self, provider_id: &str) -> Option<String> {
        let settings = self.providers.iter().find(|p| p.id == provider_id)?;
        std::env::var(&settings.api_key_env).ok().filter(|v| !v.trim().is_empty())
    }

    /// A JSON view of this config with every `api_key_env` target's *value* never
    /// embedded in the first place — this exists so callers writing the effective
    /// config back to disk for diagnostics can't accidentally leak a secret that was
    /// never stored here, matching the scrub-before-persist discipline used
    /// elsewhere in this stack.
    pub fn to_scrubbed_json(&self) -> anyhow::Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_falls_back_to_defaults() {
        let config = Config::load("/nonexistent/path/conduit.json").await.unwrap();
        assert_eq!(config.listen_addr, default_listen_addr());
    }

    #[tokio::test]
    async fn env_override_wins_over_file_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conduit.json");
        fs::write(&path, serde_json::json!({ "listen_addr": "0.0.0.0:9999" }).to_string()).await.unwrap();

        std::env::set_var("CONDUIT_LISTEN_ADDR", "127.0.0.1:4000");
        let config = Config::load(&path).await.unwrap();
        std::env::remove_var("CONDUIT_LISTEN_ADDR");

        assert_eq!(config.listen_addr, "127.0.0.1:4000");
    }

    #[test]
    fn resolve_api_key_returns_none_for_unset_env() {
        let config = Config {
            providers: vec![ProviderSettings {
                id: "openai".to_string(),
                api_base: "https://api.openai.com/v1".to_string(),
                format: "openai".to_string(),
                api_key_env: "CONDUIT_TEST_UNSET_KEY_XYZ".to_string(),
                models: vec![],
            }],
            ..Config::default()
        };
        assert!(config.resolve_api_key("openai").is_none());
    }
}
