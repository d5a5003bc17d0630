use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use storage::{Event, EventKind, State};

use super::ToolError;
use crate::context::InvocationContext;
use crate::memory::MemoryFragment;
use crate::model::ToolSpec;
use crate::Result;

/// What a tool produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Ready(Value),
    /// Work continues outside the invocation; the final result arrives
    /// later as a tool response keyed by the call id.
    Pending { ticket: String },
}

/// A named capability the model can call.
///
/// Tools are stateless and shared across invocations. `schema` is a JSON
/// Schema for the arguments; it is compiled once when the tool is
/// registered and every call is validated against it before `invoke`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn schema(&self) -> Value;

    fn is_long_running(&self) -> bool {
        false
    }

    async fn invoke(&self, args: Value, ctx: &ToolContext) -> std::result::Result<ToolOutput, ToolError>;

    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: self.name().to_string(),
            description: self.description().to_string(),
            schema: self.schema(),
        }
    }
}

impl std::fmt::Debug for dyn Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool").field("name", &self.name()).finish()
    }
}

/// The view of the invocation a tool gets while it runs.
///
/// Events appended through it are authored by the calling agent and
/// reported back to that agent's event stream after the call.
pub struct ToolContext {
    ctx: InvocationContext,
    agent: String,
    call_id: String,
    emitted: Mutex<Vec<Event>>,
    escalate: AtomicBool,
}

impl ToolContext {
    pub(crate) fn new(ctx: InvocationContext, agent: &str, call_id: &str) -> Self {
        Self {
            ctx,
            agent: agent.to_string(),
            call_id: call_id.to_string(),
            emitted: Mutex::new(Vec::new()),
            escalate: AtomicBool::new(false),
        }
    }

    pub fn invocation(&self) -> &InvocationContext {
        &self.ctx
    }

    /// Name of the agent that issued the call.
    pub fn agent_name(&self) -> &str {
        &self.agent
    }

    pub fn call_id(&self) -> &str {
        &self.call_id
    }

    pub async fn state(&self) -> Result<State> {
        self.ctx.state().await
    }

    pub async fn state_value(&self, key: &str) -> Result<Option<Value>> {
        self.ctx.state_value(key).await
    }

    pub async fn set_state(&self, key: &str, value: Value) -> Result<Event> {
        self.append(EventKind::state(key, value)).await
    }

    /// Ask the nearest enclosing loop to stop once this call's result is
    /// recorded.
    pub fn escalate(&self) {
        self.escalate.store(true, Ordering::SeqCst);
    }

    pub(crate) fn escalation_requested(&self) -> bool {
        self.escalate.load(Ordering::SeqCst)
    }

    pub async fn append(&self, kind: EventKind) -> Result<Event> {
        let event = self.ctx.append(&self.agent, kind).await?;
        self.record(event.clone());
        Ok(event)
    }

    pub async fn search_memory(&self, query: &str) -> Result<Vec<MemoryFragment>> {
        self.ctx.search_memory(query).await
    }

    pub(crate) fn record(&self, event: Event) {
        if let Ok(mut emitted) = self.emitted.lock() {
            emitted.push(event);
        }
    }

    pub(crate) fn take_emitted(&self) -> Vec<Event> {
        self.emitted
            .lock()
            .map(|mut emitted| std::mem::take(&mut *emitted))
            .unwrap_or_default()
    }
}
