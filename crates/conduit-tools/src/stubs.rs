use crate::registry::{Tool, ToolExecutionContext};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

fn reject_traversal(path: &str) -> anyhow::Result<PathBuf> {
    let p = Path::new(path);
    if p.is_absolute() || p.components().any(|c| c.as_os_str() == "..") {
        anyhow::bail!("path escapes workspace: {path}");
    }
    Ok(p.to_path_buf())
}

pub struct FileReadTool;

#[async_trait]
impl Tool for FileReadTool {
    async fn call(&self, input: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<Value> {
        let path = input.get("path").and_then(Value::as_str).ok_or_else(|| anyhow::anyhow!("missing path"))?;
        let safe_path = reject_traversal(path)?;
        let content = tokio::fs::read_to_string(&safe_path).await?;
        Ok(json!({ "path": path, "content": content }))
    }
}

pub struct FileWriteTool;

#[async_trait]
impl Tool for FileWriteTool {
    async fn call(&self, input: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<Value> {
        let path = input.get("path").and_then(Value::as_str).ok_or_else(|| anyhow::anyhow!("missing path"))?;
        let content = input.get("content").and_then(Value::as_str).unwrap_or_default();
        let safe_path = reject_traversal(path)?;
        if let Some(parent) = safe_path.parent() {
            tokio::fs::create_dir_all(parent).await.ok();
        }
        tokio::fs::write(&safe_path, content).await?;
        Ok(json!({ "path": path, "bytes_written": content.len(), "artifacts": [path] }))
    }
}

pub struct FileEditTool;

#[async_trait]
impl Tool for FileEditTool {
    async fn call(&self, input: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<Value> {
        let path = input.get("path").and_then(Value::as_str).ok_or_else(|| anyhow::anyhow!("missing path"))?;
        let find = input.get("find").and_then(Value::as_str).unwrap_or_default();
        let replace = input.get("replace").and_then(Value::as_str).unwrap_or_default();
        let safe_path = reject_traversal(path)?;
        let content = tokio::fs::read_to_string(&safe_path).await?;
        let occurrences = content.matches(find).count();
        let updated = content.replacen(find, replace, 1);
        tokio::fs::write(&safe_path, &updated).await?;
        Ok(json!({ "path": path, "occurrences_found": occurrences, "replaced": occurrences > 0, "artifacts": [path] }))
    }
}

pub struct ShellExecTool;

#[async_trait]
impl Tool for ShellExecTool {
    async fn call(&self, input: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<Value> {
        let command = input.get("command").and_then(Value::as_str).ok_or_else(|| anyhow::anyhow!("missing command"))?;
        let output = if cfg!(target_os = "windows") {
            tokio::process::Command::new("cmd").arg("/C").arg(command).output().await?
        } else {
            tokio::process::Command::new("sh").arg("-c").arg(command).output().await?
        };
        Ok(json!({
            "stdout": String::from_utf8_lossy(&output.stdout),
            "stderr": String::from_utf8_lossy(&output.stderr),
            "exit_code": output.status.code(),
        }))
    }
}

pub struct GrepSearchTool;

#[async_trait]
impl Tool for GrepSearchTool {
    async fn call(&self, input: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<Value> {
        let pattern = input.get("pattern").and_then(Value::as_str).ok_or_else(|| anyhow::anyhow!("missing pattern"))?;
        let dir = input.get("path").and_then(Value::as_str).unwrap_or(".");
        let regex = regex::Regex::new(pattern)?;
        let mut matches = Vec::new();
        for entry in ignore::WalkBuilder::new(dir).build() {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(entry.path()) else { continue };
            for (lineno, line) in content.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(json!({
                        "path": entry.path().display().to_string(),
                        "line": lineno + 1,
                        "text": line,
                    }));
                }
                if matches.len() >= 100 {
                    break;
                }
            }
            if matches.len() >= 100 {
                break;
            }
        }
        Ok(json!({ "matches": matches }))
    }
}

/// Thin stub for a body this orchestrator deliberately does not implement (§1: "third-party
/// ...APIs", "thin domain services"). Exercises the router contract end-to-end without the
/// real external call.
pub struct NotImplementedTool {
    pub tool_name: String,
}

#[async_trait]
impl Tool for NotImplementedTool {
    async fn call(&self, input: Value, _ctx: &ToolExecutionContext) -> anyhow::Result<Value> {
        Ok(json!({
            "tool": self.tool_name,
            "status": "not_implemented",
            "echo_input": input,
        }))
    }
}
