use std::sync::Arc;

use futures::StreamExt;

use super::{Agent, Capabilities, EventStream};
use crate::context::InvocationContext;

/// Runs its children one after another in declaration order.
///
/// Stops at the first child that fails (the failure is propagated),
/// suspends the invocation or escalates to an enclosing loop.
pub struct SequentialAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl SequentialAgent {
    pub fn new(name: impl Into<String>, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            sub_agents,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

impl Agent for SequentialAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &self.sub_agents
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            as_tool: true,
            has_tools: false,
            delegates: true,
        }
    }

    fn run_impl(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        Box::pin(async_stream::stream! {
            'children: for child in &self.sub_agents {
                tracing::debug!(agent = %self.name, child = child.name(), "running child");
                let mut events = super::run(Arc::clone(child), ctx.clone());
                let mut escalated = false;
                while let Some(item) = events.next().await {
                    let failed = item.is_err();
                    escalated |= matches!(&item, Ok(event) if event.is_escalation());
                    yield item;
                    if failed {
                        break 'children;
                    }
                }
                // An escalation is headed for an enclosing loop; later
                // children belong to the iteration it ends.
                if escalated || ctx.is_suspended() {
                    break;
                }
            }
        })
    }
}
