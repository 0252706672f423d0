pub mod catalog;
pub mod ratelimit;
pub mod registry;
pub mod stubs;

pub use catalog::*;
pub use ratelimit::*;
pub use registry::*;

use std::sync::Arc;

/// Registers the full default catalog against concrete handlers: real bodies for the tools
/// whose domain is local to this process (filesystem, shell, search), and
/// `stubs::NotImplementedTool` for tools whose backing service (browser automation, image
/// generation, email/chat delivery, deployment control planes, document conversion, web
/// search) is out of scope here but whose registry contract must still hold.
pub async fn install_default_tools(registry: &ToolRegistry) {
    use stubs::*;

    for definition in catalog::default_catalog() {
        let name = definition.name.clone();
        let handler: Arc<dyn Tool> = match name.as_str() {
            "file_read" => Arc::new(FileReadTool),
            "file_write" => Arc::new(FileWriteTool),
            "file_edit" => Arc::new(FileEditTool),
            "shell_exec" => Arc::new(ShellExecTool),
            "grep_search" | "code_search" => Arc::new(GrepSearchTool),
            other => Arc::new(NotImplementedTool { tool_name: other.to_string() }),
        };
        registry.register(definition, handler).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conduit_types::ToolCall;
    use serde_json::json;

    fn call(tool_name: &str, input: serde_json::Value) -> ToolCall {
        ToolCall {
            tool_name: tool_name.to_string(),
            input,
            tenant_id: "tenant-1".to_string(),
            run_id: "run-1".to_string(),
            step_id: "step-1".to_string(),
            idempotency_key: "key-1".to_string(),
            timeout_ms: 5_000,
            credit_budget: 10,
        }
    }

    #[tokio::test]
    async fn installs_every_catalog_entry() {
        let registry = ToolRegistry::new();
        install_default_tools(&registry).await;
        let installed = registry.list().await;
        let mut expected: Vec<String> = catalog::default_catalog().into_iter().map(|d| d.name).collect();
        expected.sort();
        assert_eq!(installed, expected);
    }

    #[tokio::test]
    async fn file_write_then_read_round_trips() {
        let rel = format!("conduit_tools_test_tmp/note_{}.txt", std::process::id());

        let registry = ToolRegistry::new();
        install_default_tools(&registry).await;

        let write_result = registry.execute(call("file_write", json!({ "path": rel, "content": "hello" }))).await;
        assert!(write_result.success, "{:?}", write_result.error);

        let read_result = registry.execute(call("file_read", json!({ "path": rel }))).await;
        assert!(read_result.success);
        assert_eq!(read_result.output.unwrap()["content"], "hello");

        tokio::fs::remove_dir_all("conduit_tools_test_tmp").await.ok();
    }

    #[tokio::test]
    async fn out_of_scope_tool_returns_not_implemented_envelope() {
        let registry = ToolRegistry::new();
        install_default_tools(&registry).await;
        let result = registry.execute(call("web_search", json!({ "query": "rust" }))).await;
        assert!(result.success);
        assert_eq!(result.output.unwrap()["status"], "not_implemented");
    }
}
