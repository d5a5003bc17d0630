use async_trait::async_trait;

use super::{Callback, CallbackContext, Flow};
use crate::Result;

/// Saves the session to the memory service whenever an agent finishes.
///
/// Failures, including a missing memory service, are logged and never
/// fail the agent.
#[derive(Debug, Default, Clone, Copy)]
pub struct SessionMemoryCallback;

impl SessionMemoryCallback {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Callback for SessionMemoryCallback {
    fn name(&self) -> &str {
        "session_memory"
    }

    async fn after_agent(&self, ctx: &CallbackContext) -> Result<Flow<String>> {
        match ctx.add_session_to_memory().await {
            Ok(()) => tracing::info!(
                agent = ctx.agent_name(),
                session_id = %ctx.invocation().session_id(),
                "session added to memory"
            ),
            Err(e) => tracing::warn!(
                agent = ctx.agent_name(),
                error = %e,
                "failed to add session to memory"
            ),
        }
        Ok(Flow::Continue)
    }
}
