use crate::ratelimit::RateLimiter;
use async_trait::async_trait;
use conduit_types::{ErrorCode, OrchestratorError, ToolCall, ToolDefinition, ToolResult};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, Semaphore};
use tracing::warn;

/// A handler signals an emitted artifact by including a top-level `"artifacts"` array of
/// workspace-relative paths in its output (§4.5's envelope has `artifacts?` as a sibling of
/// `output`; handlers express it inline since `Tool::call` only returns the output half).
fn extract_artifacts(output: &Value) -> Vec<String> {
    output
        .get("artifacts")
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(|item| item.as_str().map(String::from)).collect())
        .unwrap_or_default()
}

#[derive(Debug, Clone)]
pub struct ToolExecutionContext {
    pub run_id: String,
    pub step_id: String,
    pub tenant_id: String,
    pub timeout_ms: u64,
    pub credit_budget: u64,
    pub idempotency_key: String,
}

/// The handler signature every registered tool implements: `(input, context) -> ToolResult`.
/// Handlers must not assume idempotency even when the catalog marks them so — reuse of prior
/// output on a matching idempotency key is the Supervisor's responsibility, not the handler's.
#[async_trait]
pub trait Tool: Send + Sync {
    async fn call(&self, input: Value, ctx: &ToolExecutionContext) -> anyhow::Result<Value>;
}

struct Registered {
    handler: Arc<dyn Tool>,
    definition: ToolDefinition,
    concurrency: Arc<Semaphore>,
}

/// Name -> handler registry with uniform envelopes, per-tool timeout enforcement, rate
/// limiting, and bounded-concurrent batch execution (§4.5).
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, Registered>>,
    limiter: RwLock<RateLimiter>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: RwLock::new(HashMap::new()),
            limiter: RwLock::new(RateLimiter::new()),
        }
    }

    /// Registers (or replaces) a handler under `definition.name`. Returns whether a handler
    /// already existed under that name — re-registration replaces it outright, leaking no
    /// reference to the previous handler.
    pub async fn register(&self, definition: ToolDefinition, handler: Arc<dyn Tool>) -> bool {
        let concurrency = Arc::new(Semaphore::new(definition.rate_limit.concurrent.max(1) as usize));
        let mut tools = self.tools.write().await;
        tools
            .insert(definition.name.clone(), Registered { handler, definition, concurrency })
            .is_some()
    }

    pub async fn unregister(&self, name: &str) -> bool {
        self.tools.write().await.remove(name).is_some()
    }

    pub async fn has(&self, name: &str) -> bool {
        self.tools.read().await.contains_key(name)
    }

    pub async fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn definition(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().await.get(name).map(|r| r.definition.clone())
    }

    /// Runs exactly one handler: enforces the timeout, wraps handler errors as
    /// `HANDLER_EXCEPTION`, and measures `duration_ms` around the handler invocation only.
    pub async fn execute(&self, call: ToolCall) -> ToolResult {
        if !self.has(&call.tool_name).await {
            return ToolResult::err(
                OrchestratorError::new(ErrorCode::UnknownTool, format!("no tool registered as {}", call.tool_name)),
                0,
            );
        }

        if let Some(retry_after_ms) = {
            let mut limiter = self.limiter.write().await;
            let definition = self.tools.read().await.get(&call.tool_name).map(|r| r.definition.clone());
            match definition {
                Some(def) => limiter.try_acquire(&call.tenant_id, &call.tool_name, def.rate_limit.per_minute, def.rate_limit.per_hour),
                None => None,
            }
        } {
            return ToolResult::err(
                OrchestratorError::new(ErrorCode::RateLimited, "tool rate limit exceeded")
                    .retry_after_ms(retry_after_ms),
                0,
            );
        }

        let (handler, timeout_ms, concurrency) = {
            let tools = self.tools.read().await;
            match tools.get(&call.tool_name) {
                Some(registered) => (registered.handler.clone(), registered.definition.timeout_ms, registered.concurrency.clone()),
                None => {
                    return ToolResult::err(
                        OrchestratorError::new(ErrorCode::UnknownTool, format!("no tool registered as {}", call.tool_name)),
                        0,
                    )
                }
            }
        };

        let _permit = concurrency.acquire_owned().await.expect("semaphore never closed");

        let ctx = ToolExecutionContext {
            run_id: call.run_id.clone(),
            step_id: call.step_id.clone(),
            tenant_id: call.tenant_id.clone(),
            timeout_ms: call.timeout_ms.min(timeout_ms),
            credit_budget: call.credit_budget,
            idempotency_key: call.idempotency_key.clone(),
        };

        let started = Instant::now();
        let outcome = tokio::time::timeout(Duration::from_millis(ctx.timeout_ms), handler.call(call.input, &ctx)).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(output)) => {
                let artifacts = extract_artifacts(&output);
                let mut result = ToolResult::ok(output, duration_ms);
                result.artifacts = artifacts;
                result
            }
            Ok(Err(err)) => {
                warn!(tool = %call.tool_name, error = %err, "tool_handler_exception");
                ToolResult::err(
                    OrchestratorError::new(ErrorCode::HandlerException, err.to_string()).recoverable(false),
                    duration_ms,
                )
            }
            Err(_elapsed) => ToolResult::err(
                OrchestratorError::new(ErrorCode::ToolTimeout, format!("{} exceeded {}ms", call.tool_name, ctx.timeout_ms))
                    .recoverable(true),
                duration_ms,
            ),
        }
    }

    /// Executes independent calls concurrently, preserving input order in the result list;
    /// concurrency across the whole batch is additionally bounded per-tool by each call's own
    /// `execute` (via the per-tool semaphore), so a batch heavy in one tool doesn't starve the
    /// others out of their own budget.
    pub async fn execute_batch(&self, calls: Vec<ToolCall>) -> Vec<ToolResult> {
        let futures: Vec<_> = calls.into_iter().map(|call| self.execute(call)).collect();
        futures::future::join_all(futures).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::default_catalog;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        async fn call(&self, input: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<Value> {
            Ok(input)
        }
    }

    struct CountingTool {
        calls: Arc<AtomicU32>,
    }

    #[async_trait]
    impl Tool for CountingTool {
        async fn call(&self, _input: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<Value> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "ok": true }))
        }
    }

    fn call_for(tool_name: &str) -> ToolCall {
        ToolCall {
            tool_name: tool_name.to_string(),
            input: json!({ "x": 1 }),
            tenant_id: "tenant-1".to_string(),
            run_id: "run-1".to_string(),
            step_id: "step-1".to_string(),
            idempotency_key: "key-1".to_string(),
            timeout_ms: 5_000,
            credit_budget: 10,
        }
    }

    #[tokio::test]
    async fn unknown_tool_fails_without_invoking_handler() {
        let registry = ToolRegistry::new();
        let result = registry.execute(call_for("file_read")).await;
        assert!(!result.success);
        assert_eq!(result.error.unwrap().code, ErrorCode::UnknownTool);
    }

    #[tokio::test]
    async fn register_then_execute_succeeds() {
        let registry = ToolRegistry::new();
        let def = default_catalog().into_iter().find(|d| d.name == "file_read").unwrap();
        registry.register(def, Arc::new(EchoTool)).await;
        let result = registry.execute(call_for("file_read")).await;
        assert!(result.success);
        assert_eq!(result.output.unwrap(), json!({ "x": 1 }));
    }

    #[tokio::test]
    async fn reregistering_replaces_handler() {
        let registry = ToolRegistry::new();
        let def = default_catalog().into_iter().find(|d| d.name == "file_read").unwrap();
        let existed = registry.register(def.clone(), Arc::new(EchoTool)).await;
        assert!(!existed);
        let calls = Arc::new(AtomicU32::new(0));
        let existed = registry.register(def, Arc::new(CountingTool { calls: calls.clone() })).await;
        assert!(existed);
        registry.execute(call_for("file_read")).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_preserves_order() {
        let registry = ToolRegistry::new();
        for name in ["file_read", "code_search"] {
            let def = default_catalog().into_iter().find(|d| d.name == name).unwrap();
            registry.register(def, Arc::new(EchoTool)).await;
        }
        let calls = vec![call_for("file_read"), call_for("code_search"), call_for("file_read")];
        let results = registry.execute_batch(calls).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn per_tool_rate_limit_rejects_excess_calls() {
        let registry = ToolRegistry::new();
        let mut def = default_catalog().into_iter().find(|d| d.name == "web_search").unwrap();
        def.rate_limit.per_minute = 1;
        registry.register(def, Arc::new(EchoTool)).await;
        let first = registry.execute(call_for("web_search")).await;
        assert!(first.success);
        let second = registry.execute(call_for("web_search")).await;
        assert!(!second.success);
        assert_eq!(second.error.unwrap().code, ErrorCode::RateLimited);
    }
}
