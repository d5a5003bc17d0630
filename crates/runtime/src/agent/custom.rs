use std::sync::Arc;

use super::{Agent, Capabilities, EventStream};
use crate::context::InvocationContext;

type Body = dyn Fn(InvocationContext) -> EventStream + Send + Sync;

/// An agent whose behavior is an arbitrary function of the context.
///
/// The body appends through the context and yields what it appended:
///
/// ```no_run
/// use runtime::agent::CustomAgent;
/// use storage::EventKind;
///
/// let greeter = CustomAgent::new("greeter", |ctx| {
///     Box::pin(async_stream::stream! {
///         yield ctx.append("greeter", EventKind::model_text("hello")).await;
///     })
/// });
/// ```
pub struct CustomAgent {
    name: String,
    description: String,
    sub_agents: Vec<Arc<dyn Agent>>,
    body: Arc<Body>,
}

impl CustomAgent {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(InvocationContext) -> EventStream + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            sub_agents: Vec::new(),
            body: Arc::new(body),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Children the body may drive with [`agent::run`](super::run).
    pub fn with_sub_agents(mut self, sub_agents: Vec<Arc<dyn Agent>>) -> Self {
        self.sub_agents = sub_agents;
        self
    }
}

impl Agent for CustomAgent {
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
            delegates: !self.sub_agents.is_empty(),
        }
    }

    fn run_impl(self: Arc<Self>, ctx: InvocationContext) -> EventStream {
        (self.body)(ctx)
    }
}
