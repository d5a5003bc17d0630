use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::{Agent, Capabilities, EventStream};
use crate::context::InvocationContext;
use crate::{Error, Result};

/// Runs its children concurrently on separate tasks.
///
/// Events are forwarded as they are appended, so siblings interleave. A
/// failing child does not stop its siblings: the parent waits for all of
/// them and then fails with the first error observed. Dropping the stream
/// aborts every child still running.
pub struct ParallelAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
}

impl ParallelAgent {
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

impl Agent for ParallelAgent {
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
            let (tx, mut rx) = mpsc::unbounded_channel::<Result<storage::Event>>();
            let mut tasks = JoinSet::new();
            for child in &self.sub_agents {
                let tx = tx.clone();
                let mut events = super::run(Arc::clone(child), ctx.clone());
                tasks.spawn(async move {
                    while let Some(item) = events.next().await {
                        let failed = item.is_err();
                        if tx.send(item).is_err() || failed {
                            break;
                        }
                    }
                });
            }
            drop(tx);
            tracing::debug!(agent = %self.name, children = self.sub_agents.len(), "children started");

            let mut first_failure: Option<Error> = None;
            while let Some(item) = rx.recv().await {
                match item {
                    Ok(event) => yield Ok(event),
                    Err(e) => {
                        if first_failure.is_none() {
                            first_failure = Some(e);
                        } else {
                            tracing::debug!(agent = %self.name, error = %e, "additional child failure");
                        }
                    }
                }
            }

            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined
                    && first_failure.is_none()
                {
                    first_failure = Some(Error::Internal(format!("child task failed: {e}")));
                }
            }

            if let Some(e) = first_failure {
                yield Err(e);
            }
        })
    }
}
