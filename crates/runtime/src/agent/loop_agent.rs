use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};

use super::{Agent, Capabilities, EventStream};
use crate::Error;
use crate::context::InvocationContext;

/// How many times a [`LoopAgent`] runs its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopMode {
    /// Exactly `n` iterations, unless a child escalates first.
    Fixed(u32),
    /// Until a child escalates. Hitting the bound fails the loop.
    UntilEscalate { max_iterations: u32 },
}

impl LoopMode {
    fn limit(self) -> u32 {
        match self {
            LoopMode::Fixed(n) => n,
            LoopMode::UntilEscalate { max_iterations } => max_iterations,
        }
    }
}

/// Runs its children in order, repeatedly.
///
/// An `Escalate` event from any descendant stops the loop once the child
/// that carried it has finished. The escalation is consumed here: it stays
/// in the log but is not forwarded, so an outer loop keeps going.
pub struct LoopAgent {
    name: String,
    description: String,
    mode: LoopMode,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl LoopAgent {
    pub fn new(name: impl Into<String>, mode: LoopMode, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            mode,
            sub_agents,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn mode(&self) -> LoopMode {
        self.mode
    }
}

impl Agent for LoopAgent {
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
            let limit = self.mode.limit();
            let mut iteration = 0;
            let mut stopped = false;

            'iterations: while iteration < limit {
                iteration += 1;
                tracing::debug!(agent = %self.name, iteration, "loop iteration");

                for child in &self.sub_agents {
                    // The child runs to its end so its after-agent hooks fire.
                    let mut events = super::run(Arc::clone(child), ctx.clone());
                    let mut escalated = false;
                    while let Some(item) = events.next().await {
                        match item {
                            Ok(event) if event.is_escalation() => {
                                tracing::info!(agent = %self.name, iteration, by = %event.author, "loop escalated");
                                escalated = true;
                            }
                            Ok(event) => yield Ok(event),
                            Err(e) => {
                                yield Err(e);
                                stopped = true;
                                break 'iterations;
                            }
                        }
                    }
                    if escalated || ctx.is_suspended() {
                        stopped = true;
                        break 'iterations;
                    }
                }
            }

            if !stopped && let LoopMode::UntilEscalate { max_iterations } = self.mode {
                yield Err(Error::MaxIterationsExceeded {
                    agent: self.name.clone(),
                    max_iterations,
                });
            }
        })
    }
}
