use async_trait::async_trait;
use serde_json::Value;
use storage::{State, ToolOutcome};

use super::{Callback, CallbackContext, Flow};
use crate::Result;
use crate::model::{LlmRequest, LlmResponse};

/// Structured log records at every interception point.
///
/// Entering and leaving agents and model calls are logged at `info`;
/// state keys, user content and tool arguments at `debug`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingCallback;

impl LoggingCallback {
    pub fn new() -> Self {
        Self
    }

    async fn log_state(&self, ctx: &CallbackContext) {
        match ctx.state().await {
            Ok(state) => {
                let keys: Vec<&str> = State::keys(&state).collect();
                tracing::debug!(agent = ctx.agent_name(), ?keys, "state keys");
            }
            Err(e) => tracing::debug!(agent = ctx.agent_name(), error = %e, "state unavailable"),
        }
        if let Some(content) = ctx.user_content() {
            tracing::debug!(agent = ctx.agent_name(), content, "user content");
        }
    }
}

#[async_trait]
impl Callback for LoggingCallback {
    fn name(&self) -> &str {
        "logging"
    }

    async fn before_agent(&self, ctx: &CallbackContext) -> Result<Flow<String>> {
        tracing::info!(
            agent = ctx.agent_name(),
            invocation_id = %ctx.invocation_id(),
            "starting agent"
        );
        self.log_state(ctx).await;
        Ok(Flow::Continue)
    }

    async fn after_agent(&self, ctx: &CallbackContext) -> Result<Flow<String>> {
        tracing::info!(
            agent = ctx.agent_name(),
            invocation_id = %ctx.invocation_id(),
            "leaving agent"
        );
        self.log_state(ctx).await;
        Ok(Flow::Continue)
    }

    async fn before_model(
        &self,
        ctx: &CallbackContext,
        request: &mut LlmRequest,
    ) -> Result<Flow<LlmResponse>> {
        tracing::info!(
            agent = ctx.agent_name(),
            invocation_id = %ctx.invocation_id(),
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "before model call"
        );
        Ok(Flow::Continue)
    }

    async fn after_model(
        &self,
        ctx: &CallbackContext,
        response: &mut LlmResponse,
    ) -> Result<Flow<LlmResponse>> {
        tracing::info!(
            agent = ctx.agent_name(),
            invocation_id = %ctx.invocation_id(),
            text_len = response.text.len(),
            tool_calls = response.tool_calls.len(),
            turn_complete = response.turn_complete,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "after model call"
        );
        Ok(Flow::Continue)
    }

    async fn before_tool(
        &self,
        ctx: &CallbackContext,
        tool: &str,
        args: &mut Value,
    ) -> Result<Flow<ToolOutcome>> {
        tracing::info!(
            agent = ctx.agent_name(),
            invocation_id = %ctx.invocation_id(),
            tool,
            "before tool call"
        );
        tracing::debug!(agent = ctx.agent_name(), tool, %args, "tool arguments");
        Ok(Flow::Continue)
    }

    async fn after_tool(
        &self,
        ctx: &CallbackContext,
        tool: &str,
        _args: &Value,
        outcome: &mut ToolOutcome,
    ) -> Result<Flow<ToolOutcome>> {
        let status = match outcome {
            ToolOutcome::Success { .. } => "success",
            ToolOutcome::Error { .. } => "error",
            ToolOutcome::Pending { .. } => "pending",
        };
        tracing::info!(
            agent = ctx.agent_name(),
            invocation_id = %ctx.invocation_id(),
            tool,
            status,
            "after tool call"
        );
        Ok(Flow::Continue)
    }
}
