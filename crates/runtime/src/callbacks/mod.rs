//! Interceptors around agent, model and tool execution.
//!
//! A [`Callback`] may hook any of six points. Every hook defaults to
//! [`Flow::Continue`], so implementations only override the points they
//! care about. Hooks run in registration order; the first
//! [`Flow::ShortCircuit`] at a point skips the remaining hooks at that
//! point along with the wrapped operation. Hooks at other points still run.

mod guard;
mod logging;
mod memory;
mod model_select;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use storage::{Event, State, ToolOutcome};

use crate::context::InvocationContext;
use crate::model::{LlmRequest, LlmResponse};
use crate::{Error, Result};

pub use guard::PolicyGuard;
pub use logging::LoggingCallback;
pub use memory::SessionMemoryCallback;
pub use model_select::{ModelSelectionCallback, SELECTED_MODEL_STATE_KEY};

/// Whether the wrapped operation should proceed.
#[derive(Debug, Clone, PartialEq)]
pub enum Flow<T> {
    Continue,
    /// Skip the operation and use this value instead.
    ShortCircuit(T),
}

/// Hooks around agent, model and tool execution.
///
/// Short-circuit values mean, per point:
///
/// | hook | value |
/// |------|-------|
/// | `before_agent` | emitted as the agent's response; the agent body is skipped |
/// | `after_agent` | emitted as an extra response |
/// | `before_model` | used as the model response; the model is not called |
/// | `after_model` | replaces the model response |
/// | `before_tool` | becomes the tool outcome; the tool is not invoked |
/// | `after_tool` | replaces the tool outcome |
///
/// An `Err` from any hook fails the agent.
#[async_trait]
pub trait Callback: Send + Sync {
    fn name(&self) -> &str;

    async fn before_agent(&self, _ctx: &CallbackContext) -> Result<Flow<String>> {
        Ok(Flow::Continue)
    }

    async fn after_agent(&self, _ctx: &CallbackContext) -> Result<Flow<String>> {
        Ok(Flow::Continue)
    }

    async fn before_model(
        &self,
        _ctx: &CallbackContext,
        _request: &mut LlmRequest,
    ) -> Result<Flow<LlmResponse>> {
        Ok(Flow::Continue)
    }

    async fn after_model(
        &self,
        _ctx: &CallbackContext,
        _response: &mut LlmResponse,
    ) -> Result<Flow<LlmResponse>> {
        Ok(Flow::Continue)
    }

    async fn before_tool(
        &self,
        _ctx: &CallbackContext,
        _tool: &str,
        _args: &mut Value,
    ) -> Result<Flow<ToolOutcome>> {
        Ok(Flow::Continue)
    }

    async fn after_tool(
        &self,
        _ctx: &CallbackContext,
        _tool: &str,
        _args: &Value,
        _outcome: &mut ToolOutcome,
    ) -> Result<Flow<ToolOutcome>> {
        Ok(Flow::Continue)
    }
}

/// What a hook can see: the running agent plus its invocation.
pub struct CallbackContext {
    ctx: InvocationContext,
    agent: String,
}

impl CallbackContext {
    pub fn new(ctx: InvocationContext, agent: &str) -> Self {
        Self {
            ctx,
            agent: agent.to_string(),
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent
    }

    pub fn invocation(&self) -> &InvocationContext {
        &self.ctx
    }

    pub fn invocation_id(&self) -> storage::InvocationId {
        self.ctx.invocation_id()
    }

    pub fn user_content(&self) -> Option<&str> {
        self.ctx.user_content()
    }

    pub async fn state(&self) -> Result<State> {
        self.ctx.state().await
    }

    /// Record a state change authored by the current agent.
    pub async fn set_state(&self, key: &str, value: Value) -> Result<Event> {
        self.ctx.set_state(&self.agent, key, value).await
    }

    /// Store the current session in the memory service.
    pub async fn add_session_to_memory(&self) -> Result<()> {
        let memory = self
            .ctx
            .memory()
            .ok_or(crate::config::ConfigError::Missing("memory service"))?;
        let session = self
            .ctx
            .store()
            .get_session(self.ctx.session_id())
            .await?
            .ok_or(Error::SessionNotFound(self.ctx.session_id()))?;
        memory.add_session(&session).await
    }
}

/// Registered callbacks, in the order they run.
#[derive(Default, Clone)]
pub struct CallbackChain {
    callbacks: Vec<Arc<dyn Callback>>,
}

macro_rules! short_circuited {
    ($callback:expr, $ctx:expr, $point:literal) => {
        tracing::debug!(
            callback = $callback.name(),
            agent = $ctx.agent_name(),
            invocation_id = %$ctx.invocation_id(),
            point = $point,
            "callback short-circuited"
        )
    };
}

impl CallbackChain {
    pub fn new(callbacks: Vec<Arc<dyn Callback>>) -> Self {
        Self { callbacks }
    }

    pub fn push(&mut self, callback: Arc<dyn Callback>) {
        self.callbacks.push(callback);
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    /// Returns the replacement response if a hook short-circuited.
    pub async fn before_agent(&self, ctx: &CallbackContext) -> Result<Option<String>> {
        for callback in &self.callbacks {
            if let Flow::ShortCircuit(text) = callback.before_agent(ctx).await? {
                short_circuited!(callback, ctx, "before_agent");
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    /// Returns the extra response if a hook short-circuited.
    pub async fn after_agent(&self, ctx: &CallbackContext) -> Result<Option<String>> {
        for callback in &self.callbacks {
            if let Flow::ShortCircuit(text) = callback.after_agent(ctx).await? {
                short_circuited!(callback, ctx, "after_agent");
                return Ok(Some(text));
            }
        }
        Ok(None)
    }

    /// Returns a response to use instead of calling the model.
    pub async fn before_model(
        &self,
        ctx: &CallbackContext,
        request: &mut LlmRequest,
    ) -> Result<Option<LlmResponse>> {
        for callback in &self.callbacks {
            if let Flow::ShortCircuit(response) = callback.before_model(ctx, request).await? {
                short_circuited!(callback, ctx, "before_model");
                return Ok(Some(response));
            }
        }
        Ok(None)
    }

    pub async fn after_model(&self, ctx: &CallbackContext, response: &mut LlmResponse) -> Result<()> {
        for callback in &self.callbacks {
            if let Flow::ShortCircuit(replacement) = callback.after_model(ctx, response).await? {
                short_circuited!(callback, ctx, "after_model");
                *response = replacement;
                break;
            }
        }
        Ok(())
    }

    /// Returns an outcome to use instead of invoking the tool.
    pub async fn before_tool(
        &self,
        ctx: &CallbackContext,
        tool: &str,
        args: &mut Value,
    ) -> Result<Option<ToolOutcome>> {
        for callback in &self.callbacks {
            if let Flow::ShortCircuit(outcome) = callback.before_tool(ctx, tool, args).await? {
                short_circuited!(callback, ctx, "before_tool");
                return Ok(Some(outcome));
            }
        }
        Ok(None)
    }

    pub async fn after_tool(
        &self,
        ctx: &CallbackContext,
        tool: &str,
        args: &Value,
        outcome: &mut ToolOutcome,
    ) -> Result<()> {
        for callback in &self.callbacks {
            if let Flow::ShortCircuit(replacement) =
                callback.after_tool(ctx, tool, args, outcome).await?
            {
                short_circuited!(callback, ctx, "after_tool");
                *outcome = replacement;
                break;
            }
        }
        Ok(())
    }
}
