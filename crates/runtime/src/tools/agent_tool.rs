use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{Value, json};
use storage::EventKind;

use super::{Tool, ToolContext, ToolError, ToolOutput};
use crate::Result;
use crate::agent::{self, Agent};
use crate::config::ConfigError;

/// Exposes an agent as a tool.
///
/// The call's `request` is appended as a user message authored by the
/// calling agent, then the wrapped agent runs inside the same invocation.
/// Its final text becomes the tool output. Escalations inside the wrapped
/// agent stay in the log but do not reach the caller's enclosing loop.
pub struct AgentTool {
    agent: Arc<dyn Agent>,
}

impl AgentTool {
    /// Fails if the agent cannot be wrapped or its tree is malformed.
    pub fn new(agent: Arc<dyn Agent>) -> Result<Self> {
        if !agent.capabilities().as_tool {
            return Err(ConfigError::Invalid(format!(
                "agent '{}' cannot be used as a tool",
                agent.name()
            ))
            .into());
        }
        agent::validate_tree(&agent)?;
        Ok(Self { agent })
    }

    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }
}

#[async_trait]
impl Tool for AgentTool {
    fn name(&self) -> &str {
        self.agent.name()
    }

    fn description(&self) -> &str {
        self.agent.description()
    }

    fn schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {"request": {"type": "string"}},
            "required": ["request"]
        })
    }

    async fn invoke(
        &self,
        args: Value,
        ctx: &ToolContext,
    ) -> std::result::Result<ToolOutput, ToolError> {
        let request = args["request"].as_str().unwrap_or_default().to_string();
        ctx.append(EventKind::user_message(request))
            .await
            .map_err(|e| ToolError::Execution(e.to_string()))?;

        let name = self.agent.name().to_string();
        let mut events = agent::run(Arc::clone(&self.agent), ctx.invocation().clone());
        let mut answer = None;
        while let Some(event) = events.next().await {
            let event = event.map_err(|e| ToolError::Execution(format!("agent '{name}': {e}")))?;
            if event.author == name
                && let Some(text) = event.final_text()
            {
                answer = Some(text.to_string());
            }
            if !event.is_escalation() {
                ctx.record(event);
            }
        }
        Ok(ToolOutput::Ready(answer.map_or(Value::Null, Value::String)))
    }
}
