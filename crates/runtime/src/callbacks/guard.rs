use async_trait::async_trait;
use policy::{Decision, ToolPolicy, ToolRequest};
use serde_json::Value;
use storage::{ToolErrorKind, ToolOutcome};

use super::{Callback, CallbackContext, Flow};
use crate::Result;

/// Refuses tool calls the policy does not allow.
///
/// Denied calls short-circuit with a `Denied` outcome, which the model sees
/// like any other tool error.
#[derive(Debug, Clone)]
pub struct PolicyGuard {
    policy: ToolPolicy,
}

impl PolicyGuard {
    pub fn new(policy: ToolPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &ToolPolicy {
        &self.policy
    }
}

#[async_trait]
impl Callback for PolicyGuard {
    fn name(&self) -> &str {
        "policy_guard"
    }

    async fn before_tool(
        &self,
        ctx: &CallbackContext,
        tool: &str,
        _args: &mut Value,
    ) -> Result<Flow<ToolOutcome>> {
        match self.policy.check(&ToolRequest::new(ctx.agent_name(), tool)) {
            Decision::Allow => Ok(Flow::Continue),
            Decision::Deny { reason } => {
                tracing::warn!(agent = ctx.agent_name(), tool, %reason, "tool call denied");
                Ok(Flow::ShortCircuit(ToolOutcome::error(
                    ToolErrorKind::Denied,
                    reason,
                )))
            }
        }
    }
}
