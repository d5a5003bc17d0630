//! Tools every runner can offer without host code.

use async_trait::async_trait;
use serde_json::{Value, json};

use super::{Tool, ToolContext, ToolError, ToolOutput};

/// Lets a model inside a `LoopAgent` end the loop.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExitLoopTool;

#[async_trait]
impl Tool for ExitLoopTool {
    fn name(&self) -> &str {
        "exit_loop"
    }

    fn description(&self) -> &str {
        "Exit the enclosing loop. Call this only when the task is finished."
    }

    fn schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn invoke(&self, _args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        ctx.escalate();
        Ok(ToolOutput::Ready(json!({"status": "loop exit requested"})))
    }
}

/// Searches long-term memory for the calling user.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoadMemoryTool;

#[async_trait]
impl Tool for LoadMemoryTool {
    fn name(&self) -> &str {
        "load_memory"
    }

    fn description(&self) -> &str {
        "Search memories of earlier conversations with this user."
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"query": {"type": "string", "minLength": 1}},
            "required": ["query"]
        })
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let query = args["query"].as_str().unwrap_or_default().trim();
        if query.is_empty() {
            return Err(ToolError::InvalidInput("query must not be blank".into()));
        }
        let fragments = ctx
            .search_memory(query)
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;
        let memories: Vec<Value> = fragments
            .into_iter()
            .map(|f| {
                json!({
                    "author": f.author,
                    "text": f.text,
                    "timestamp": f.timestamp.to_rfc3339(),
                })
            })
            .collect();
        Ok(ToolOutput::Ready(json!({"memories": memories})))
    }
}
