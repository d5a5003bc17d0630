//! Agents and the wrapper every agent run goes through.
//!
//! An agent turns an [`InvocationContext`] into a lazy stream of the events
//! it appended. Composite agents drive their children's streams; the
//! [`Runner`](crate::Runner) drives the root's.

mod custom;
mod history;
mod llm;
mod loop_agent;
mod parallel;
mod sequential;
mod status;

use std::collections::HashSet;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use storage::{Event, EventKind};

use crate::callbacks::CallbackContext;
use crate::config::ConfigError;
use crate::context::InvocationContext;
use crate::{Error, Result};

pub use custom::CustomAgent;
pub use llm::LlmAgent;
pub use loop_agent::{LoopAgent, LoopMode};
pub use parallel::ParallelAgent;
pub use sequential::SequentialAgent;
pub use status::AgentStatus;

/// Events an agent appended, in append order. An `Err` item ends the run.
pub type EventStream = BoxStream<'static, Result<Event>>;

/// What an agent can do, used to validate how it is wired.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// May be wrapped in an [`AgentTool`](crate::tools::AgentTool).
    pub as_tool: bool,
    /// Calls tools.
    pub has_tools: bool,
    /// Hands control to its children.
    pub delegates: bool,
}

/// A unit of work in an agent tree.
///
/// Agents are built once and reused across invocations; everything that
/// changes during a run lives in the context and the session. Names must be
/// unique within a tree.
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn sub_agents(&self) -> &[Arc<dyn Agent>] {
        &[]
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            as_tool: true,
            ..Capabilities::default()
        }
    }

    /// Registered tools this agent expects to call.
    fn tool_names(&self) -> &[String] {
        &[]
    }

    /// The agent's own behavior. Call [`run`] instead, which adds callbacks
    /// and lifecycle tracking around this.
    fn run_impl(self: Arc<Self>, ctx: InvocationContext) -> EventStream;
}

impl std::fmt::Debug for dyn Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name())
            .field("sub_agents", &self.sub_agents().len())
            .finish()
    }
}

fn advance(
    agent: &str,
    ctx: &InvocationContext,
    status: &mut AgentStatus,
    next: AgentStatus,
) -> Result<()> {
    *status = status.transition(next)?;
    tracing::debug!(
        agent,
        invocation_id = %ctx.invocation_id(),
        status = %next,
        "agent status changed"
    );
    Ok(())
}

/// Run an agent with before/after-agent callbacks and status tracking.
pub fn run(agent: Arc<dyn Agent>, ctx: InvocationContext) -> EventStream {
    Box::pin(async_stream::stream! {
        let name = agent.name().to_string();
        let callbacks = CallbackContext::new(ctx.clone(), &name);
        let mut status = AgentStatus::Pending;
        let mut failure: Option<Error> = None;

        match ctx.callbacks().before_agent(&callbacks).await {
            Err(e) => failure = Some(e),
            Ok(replacement) => {
                if let Err(e) = advance(&name, &ctx, &mut status, AgentStatus::Running) {
                    failure = Some(e);
                } else if let Some(text) = replacement {
                    match ctx.append(&name, EventKind::model_text(text)).await {
                        Ok(event) => yield Ok(event),
                        Err(e) => failure = Some(e),
                    }
                } else {
                    let mut body = Arc::clone(&agent).run_impl(ctx.clone());
                    while let Some(item) = body.next().await {
                        match item {
                            Ok(event) => yield Ok(event),
                            Err(e) => {
                                failure = Some(e);
                                break;
                            }
                        }
                    }
                }
            }
        }

        if failure.is_none() {
            match ctx.callbacks().after_agent(&callbacks).await {
                Ok(Some(text)) => match ctx.append(&name, EventKind::model_text(text)).await {
                    Ok(event) => yield Ok(event),
                    Err(e) => failure = Some(e),
                },
                Ok(None) => {}
                Err(e) => failure = Some(e),
            }
        }

        let outcome = match &failure {
            Some(e) if e.is_cancelled() => AgentStatus::Cancelled,
            Some(_) => AgentStatus::Failed,
            None if ctx.is_suspended() => AgentStatus::Suspended,
            None => AgentStatus::Completed,
        };
        if let Err(e) = advance(&name, &ctx, &mut status, outcome) {
            tracing::error!(agent = %name, error = %e, "agent lifecycle violated");
        }

        if let Some(e) = failure {
            if !e.is_cancelled() {
                tracing::warn!(agent = %name, invocation_id = %ctx.invocation_id(), error = %e, "agent failed");
            }
            yield Err(e);
        }
    })
}

/// Reject trees with empty or duplicate names and trees containing cycles.
pub fn validate_tree(root: &Arc<dyn Agent>) -> Result<()> {
    fn visit(
        agent: &Arc<dyn Agent>,
        names: &mut HashSet<String>,
        path: &mut Vec<*const ()>,
    ) -> Result<()> {
        let ptr = Arc::as_ptr(agent) as *const ();
        if path.contains(&ptr) {
            return Err(Error::AgentCycle(agent.name().to_string()));
        }
        if agent.name().trim().is_empty() {
            return Err(ConfigError::Invalid("agent name must not be empty".into()).into());
        }
        if !names.insert(agent.name().to_string()) {
            return Err(Error::DuplicateAgent(agent.name().to_string()));
        }

        path.push(ptr);
        for child in agent.sub_agents() {
            visit(child, names, path)?;
        }
        path.pop();
        Ok(())
    }

    visit(root, &mut HashSet::new(), &mut Vec::new())
}

/// Every agent in the tree, parents before children.
pub fn descendants(root: &Arc<dyn Agent>) -> Vec<Arc<dyn Agent>> {
    let mut agents = vec![Arc::clone(root)];
    let mut next = 0;
    while next < agents.len() {
        let children: Vec<_> = agents[next].sub_agents().to_vec();
        agents.extend(children);
        next += 1;
    }
    agents
}

/// Find an agent by name.
pub fn find_agent(root: &Arc<dyn Agent>, name: &str) -> Option<Arc<dyn Agent>> {
    descendants(root).into_iter().find(|agent| agent.name() == name)
}
