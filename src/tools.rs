//! Minimal reference tool set (§6): `read_file`, `write_file`, `bash`. Just
//! enough surface to exercise the capability filter and the snapshot hook
//! end-to-end; richer tools are explicitly out of this core's scope.
//!
//! Grounded on the teacher's `engine/tools/file_tools.rs` (read/write via
//! plain `std::fs`, paths normalized relative to a workspace root) and
//! `engine/tool_exec.rs`'s shell-out pattern for `Bash`, ported onto
//! `tokio::process::Command` since the dispatch loop is async.

use crate::conversation::{ToolContext, ToolHandler};
use crate::llm::ToolCallRequest;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tokio::process::Command;

fn arg_str<'a>(args: &'a JsonValue, key: &str) -> Result<&'a str, String> {
    args.get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| format!("missing string argument '{key}'"))
}

pub struct ReadFileTool;

#[async_trait]
impl ToolHandler for ReadFileTool {
    fn schema(&self) -> crate::llm::ToolSchema {
        crate::llm::ToolSchema {
            name: "read_file".to_string(),
            description: "Read the full contents of a text file.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "path": { "type": "string" } },
                "required": ["path"],
            }),
        }
    }

    async fn invoke(&self, tool_call: &ToolCallRequest, ctx: &ToolContext) -> Result<String, String> {
        let args = tool_call.function.parsed_arguments();
        let path = arg_str(&args, "path")?;
        let resolved = ctx.cwd.join(path);
        tokio::fs::read_to_string(&resolved)
            .await
            .map_err(|e| format!("failed to read {}: {e}", resolved.display()))
    }
}

pub struct WriteFileTool;

#[async_trait]
impl ToolHandler for WriteFileTool {
    fn schema(&self) -> crate::llm::ToolSchema {
        crate::llm::ToolSchema {
            name: "write_file".to_string(),
            description: "Overwrite a text file with the given content, creating it if absent.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string" },
                    "content": { "type": "string" },
                },
                "required": ["path", "content"],
            }),
        }
    }

    async fn invoke(&self, tool_call: &ToolCallRequest, ctx: &ToolContext) -> Result<String, String> {
        let args = tool_call.function.parsed_arguments();
        let path = arg_str(&args, "path")?;
        let content = arg_str(&args, "content")?;
        let resolved = ctx.cwd.join(path);
        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        }
        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| format!("failed to write {}: {e}", resolved.display()))?;
        Ok(format!("wrote {} bytes to {}", content.len(), resolved.display()))
    }
}

pub struct BashTool;

#[async_trait]
impl ToolHandler for BashTool {
    fn schema(&self) -> crate::llm::ToolSchema {
        crate::llm::ToolSchema {
            name: "bash".to_string(),
            description: "Run a shell command in the workspace and return its combined output.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": { "command": { "type": "string" } },
                "required": ["command"],
            }),
        }
    }

    async fn invoke(&self, tool_call: &ToolCallRequest, ctx: &ToolContext) -> Result<String, String> {
        let args = tool_call.function.parsed_arguments();
        let command = arg_str(&args, "command")?;
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.cwd)
            .output()
            .await
            .map_err(|e| format!("failed to spawn shell: {e}"))?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            return Err(format!("exit status {}: {combined}", output.status));
        }
        Ok(combined)
    }
}

/// Declarative classification table for the snapshot hook (§4.9), grounded
/// on the teacher's `engine::permission::is_destructive_tool`.
pub fn is_file_modifying(tool_name: &str) -> bool {
    matches!(tool_name, "write_file" | "bash")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolCallFunction;
    use tempfile::tempdir;

    fn call(name: &str, args: JsonValue) -> ToolCallRequest {
        ToolCallRequest {
            id: "1".to_string(),
            function: ToolCallFunction {
                name: name.to_string(),
                arguments: args.to_string(),
            },
        }
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext {
            current_role: "test".to_string(),
            current_agent_id: None,
            cwd: dir.path().to_path_buf(),
        };
        let write = WriteFileTool;
        write
            .invoke(&call("write_file", serde_json::json!({"path": "a.txt", "content": "hello"})), &ctx)
            .await
            .unwrap();

        let read = ReadFileTool;
        let content = read.invoke(&call("read_file", serde_json::json!({"path": "a.txt"})), &ctx).await.unwrap();
        assert_eq!(content, "hello");
    }

    #[tokio::test]
    async fn bash_reports_nonzero_exit_as_error() {
        let dir = tempdir().unwrap();
        let ctx = ToolContext {
            current_role: "test".to_string(),
            current_agent_id: None,
            cwd: dir.path().to_path_buf(),
        };
        let bash = BashTool;
        let err = bash.invoke(&call("bash", serde_json::json!({"command": "exit 3"})), &ctx).await.unwrap_err();
        assert!(err.contains("exit status"));
    }

    #[test]
    fn destructive_classification_matches_hook_expectations() {
        assert!(is_file_modifying("write_file"));
        assert!(is_file_modifying("bash"));
        assert!(!is_file_modifying("read_file"));
    }
}
