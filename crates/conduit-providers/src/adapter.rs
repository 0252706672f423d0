use anyhow::Context;
use async_trait::async_trait;
use conduit_types::{ChatRequest, ChatResponse, ProviderFormat, TokenUsage};
use serde_json::Value;
use std::time::Instant;

/// One adapter per wire format. Adapters normalize openai/anthropic/google request and
/// response shapes to the internal `ChatRequest`/`ChatResponse` contract; no other part of
/// the system speaks a provider's native wire format.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_id(&self) -> &str;
    fn format(&self) -> ProviderFormat;
    async fn complete(&self, request: &ChatRequest, model: &str) -> anyhow::Result<ChatResponse>;
}

fn truncate_for_error(body: &str) -> String {
    if body.len() > 500 {
        format!("{}...", &body[..500])
    } else {
        body.to_string()
    }
}

/// Shared by every OpenAI-compatible provider (openai, openrouter, groq, mistral, together,
/// azure, and any other vendor that copies the `/chat/completions` shape).
pub struct OpenAiCompatibleAdapter {
    pub id: String,
    pub base_url: String,
    pub api_key: String,
    pub client: reqwest::Client,
}

impl OpenAiCompatibleAdapter {
    pub fn new(id: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for OpenAiCompatibleAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn format(&self) -> ProviderFormat {
        ProviderFormat::Openai
    }

    async fn complete(&self, request: &ChatRequest, model: &str) -> anyhow::Result<ChatResponse> {
        let started = Instant::now();
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
            .collect();
        let mut body = serde_json::json!({ "model": model, "messages": messages });
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("openai-compatible request failed")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("provider {} returned {}: {}", self.id, status, truncate_for_error(&text));
        }

        let parsed: Value = serde_json::from_str(&text).context("invalid JSON from provider")?;
        let content = parsed["choices"][0]["message"]["content"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finish_reason = parsed["choices"][0]["finish_reason"]
            .as_str()
            .unwrap_or("stop")
            .to_string();
        let usage = TokenUsage {
            prompt: parsed["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            completion: parsed["usage"]["completion_tokens"].as_u64().unwrap_or(0),
            total: parsed["usage"]["total_tokens"].as_u64().unwrap_or(0),
        };

        Ok(ChatResponse {
            id: parsed["id"].as_str().unwrap_or_default().to_string(),
            model: model.to_string(),
            provider: self.id.clone(),
            content,
            finish_reason,
            usage,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

pub struct AnthropicAdapter {
    pub id: String,
    pub base_url: String,
    pub api_key: String,
    pub client: reqwest::Client,
}

impl AnthropicAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: "anthropic".to_string(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for AnthropicAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn format(&self) -> ProviderFormat {
        ProviderFormat::Anthropic
    }

    async fn complete(&self, request: &ChatRequest, model: &str) -> anyhow::Result<ChatResponse> {
        let started = Instant::now();
        let (system, messages): (Option<String>, Vec<Value>) = {
            let mut system = None;
            let mut out = Vec::new();
            for m in &request.messages {
                if m.role == "system" {
                    system = Some(m.content.clone());
                } else {
                    out.push(serde_json::json!({ "role": m.role, "content": m.content }));
                }
            }
            (system, out)
        };

        let mut body = serde_json::json!({
            "model": model,
            "max_tokens": request.max_tokens.unwrap_or(4096),
            "messages": messages,
        });
        if let Some(system) = system {
            body["system"] = serde_json::json!(system);
        }
        if let Some(temp) = request.temperature {
            body["temperature"] = serde_json::json!(temp);
        }

        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .context("anthropic request failed")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("anthropic returned {}: {}", status, truncate_for_error(&text));
        }

        let parsed: Value = serde_json::from_str(&text).context("invalid JSON from anthropic")?;
        let content = parsed["content"][0]["text"].as_str().unwrap_or_default().to_string();
        let finish_reason = parsed["stop_reason"].as_str().unwrap_or("end_turn").to_string();
        let usage = TokenUsage {
            prompt: parsed["usage"]["input_tokens"].as_u64().unwrap_or(0),
            completion: parsed["usage"]["output_tokens"].as_u64().unwrap_or(0),
            total: parsed["usage"]["input_tokens"].as_u64().unwrap_or(0)
                + parsed["usage"]["output_tokens"].as_u64().unwrap_or(0),
        };

        Ok(ChatResponse {
            id: parsed["id"].as_str().unwrap_or_default().to_string(),
            model: model.to_string(),
            provider: self.id.clone(),
            content,
            finish_reason,
            usage,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

/// Google Generative Language API (`generateContent`): `contents[].parts[].text`.
pub struct GoogleAdapter {
    pub id: String,
    pub base_url: String,
    pub api_key: String,
    pub client: reqwest::Client,
}

impl GoogleAdapter {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: "google".to_string(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderAdapter for GoogleAdapter {
    fn provider_id(&self) -> &str {
        &self.id
    }

    fn format(&self) -> ProviderFormat {
        ProviderFormat::Google
    }

    async fn complete(&self, request: &ChatRequest, model: &str) -> anyhow::Result<ChatResponse> {
        let started = Instant::now();
        let contents: Vec<Value> = request
            .messages
            .iter()
            .filter(|m| m.role != "system")
            .map(|m| {
                let role = if m.role == "assistant" { "model" } else { "user" };
                serde_json::json!({ "role": role, "parts": [{ "text": m.content }] })
            })
            .collect();

        let mut body = serde_json::json!({ "contents": contents });
        if request.temperature.is_some() || request.max_tokens.is_some() {
            let mut generation_config = serde_json::json!({});
            if let Some(temp) = request.temperature {
                generation_config["temperature"] = serde_json::json!(temp);
            }
            if let Some(max_tokens) = request.max_tokens {
                generation_config["maxOutputTokens"] = serde_json::json!(max_tokens);
            }
            body["generationConfig"] = generation_config;
        }

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );
        let resp = self.client.post(url).json(&body).send().await.context("google request failed")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("google returned {}: {}", status, truncate_for_error(&text));
        }

        let parsed: Value = serde_json::from_str(&text).context("invalid JSON from google")?;
        let content = parsed["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let finish_reason = parsed["candidates"][0]["finishReason"]
            .as_str()
            .unwrap_or("STOP")
            .to_string();
        let usage = TokenUsage {
            prompt: parsed["usageMetadata"]["promptTokenCount"].as_u64().unwrap_or(0),
            completion: parsed["usageMetadata"]["candidatesTokenCount"].as_u64().unwrap_or(0),
            total: parsed["usageMetadata"]["totalTokenCount"].as_u64().unwrap_or(0),
        };

        Ok(ChatResponse {
            id: uuid_like_id(),
            model: model.to_string(),
            provider: self.id.clone(),
            content,
            finish_reason,
            usage,
            latency_ms: started.elapsed().as_millis() as u64,
        })
    }
}

fn uuid_like_id() -> String {
    conduit_types::hash_str(&format!("{:?}", Instant::now()))
}
