use conduit_types::{RateLimitSpec, ToolCategory, ToolDefinition};
use serde_json::json;

fn def(
    name: &str,
    category: ToolCategory,
    timeout_ms: u64,
    cost_credits: u64,
    rate_limit: RateLimitSpec,
    idempotent: bool,
) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        category,
        parameters_schema: json!({ "type": "object", "additionalProperties": true }),
        required_capabilities: Vec::new(),
        timeout_ms,
        cost_credits,
        rate_limit,
        idempotent,
    }
}

fn rl(per_minute: u32, per_hour: u32, concurrent: u32) -> RateLimitSpec {
    RateLimitSpec { per_minute, per_hour, concurrent }
}

/// The twenty-entry canonical catalog spanning every required category (§4.5). Names are
/// illustrative of the category spread the catalog must cover, not a prescribed vendor list.
pub fn default_catalog() -> Vec<ToolDefinition> {
    use ToolCategory::*;
    vec![
        def("browser_navigate", Browser, 30_000, 2, rl(20, 200, 4), false),
        def("browser_screenshot", Browser, 15_000, 1, rl(20, 200, 4), false),
        def("shell_exec", Shell, 60_000, 3, rl(10, 100, 2), false),
        def("file_read", File, 10_000, 1, rl(60, 1000, 8), true),
        def("file_write", File, 10_000, 1, rl(60, 1000, 8), false),
        def("file_edit", File, 10_000, 1, rl(60, 1000, 8), false),
        def("web_search", Search, 20_000, 2, rl(30, 300, 3), false),
        def("code_search", Search, 15_000, 1, rl(60, 600, 6), true),
        def("grep_search", Search, 15_000, 1, rl(60, 600, 6), true),
        def("doc_generate", Document, 30_000, 3, rl(10, 100, 2), false),
        def("doc_convert", Document, 30_000, 2, rl(10, 100, 2), true),
        def("image_generate", Image, 45_000, 5, rl(10, 100, 2), false),
        def("image_edit", Image, 45_000, 4, rl(10, 100, 2), false),
        def("email_send", Communication, 10_000, 1, rl(20, 200, 2), false),
        def("slack_post", Communication, 10_000, 1, rl(20, 200, 2), false),
        def("deploy_trigger", Deployment, 60_000, 5, rl(5, 50, 1), false),
        def("deploy_status", Deployment, 10_000, 1, rl(30, 300, 4), true),
        def("todo_write", Orchestration, 5_000, 0, rl(120, 2000, 10), false),
        def("batch", Orchestration, 60_000, 0, rl(30, 300, 4), false),
        def("question", Orchestration, 5_000, 0, rl(60, 600, 4), false),
    ]
}
