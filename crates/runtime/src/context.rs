//! Per-invocation execution context.

use std::sync::{Arc, Mutex as StdMutex};

use futures::TryStreamExt;
use serde_json::Value;
use storage::{
    ControlSignal, Event, EventKind, InvocationId, NewEvent, SessionId, SessionStore, State,
};
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use crate::agent::Agent;
use crate::callbacks::CallbackChain;
use crate::config::RunConfig;
use crate::memory::{MemoryFragment, MemoryScope, MemoryService};
use crate::model::RetryConfig;
use crate::tools::ToolRegistry;
use crate::{Error, Result};

/// Services shared by every invocation a runner starts.
#[derive(Clone)]
pub(crate) struct Services {
    pub store: Arc<dyn SessionStore>,
    pub tools: Arc<ToolRegistry>,
    pub callbacks: Arc<CallbackChain>,
    pub memory: Option<Arc<dyn MemoryService>>,
    pub retry: RetryConfig,
}

struct Gate {
    sealed: bool,
    last_sequence: u64,
}

struct Inner {
    invocation_id: InvocationId,
    session_id: SessionId,
    app_name: String,
    user_id: String,
    user_content: Option<String>,
    root: Arc<dyn Agent>,
    run_config: RunConfig,
    services: Services,
    cancel: CancellationToken,
    live: Option<Mutex<mpsc::UnboundedReceiver<String>>>,
    gate: Mutex<Gate>,
    sink: mpsc::UnboundedSender<Event>,
    suspension: StdMutex<Option<String>>,
}

impl Inner {
    async fn append_locked(&self, gate: &mut Gate, event: NewEvent) -> Result<Event> {
        let event = self.services.store.append(self.session_id, event).await?;
        gate.last_sequence = event.sequence;
        // The runner may have stopped listening; the log is authoritative.
        let _ = self.sink.send(event.clone());
        Ok(event)
    }
}

/// Everything one invocation needs: session, agent tree, run settings,
/// services, cancellation and live input.
///
/// Cloning is cheap; clones share the same append gate and cancellation
/// token. Every append goes through the gate, which forwards the stamped
/// event to the invocation's sink while still holding the lock, so the
/// caller observes events in exactly the order they were appended.
#[derive(Clone)]
pub struct InvocationContext {
    inner: Arc<Inner>,
}

pub(crate) struct ContextParts {
    pub invocation_id: InvocationId,
    pub session_id: SessionId,
    pub app_name: String,
    pub user_id: String,
    pub user_content: Option<String>,
    pub root: Arc<dyn Agent>,
    pub run_config: RunConfig,
    pub services: Services,
    pub cancel: CancellationToken,
    pub live: Option<mpsc::UnboundedReceiver<String>>,
    pub sink: mpsc::UnboundedSender<Event>,
}

impl InvocationContext {
    pub(crate) fn new(parts: ContextParts) -> Self {
        Self {
            inner: Arc::new(Inner {
                invocation_id: parts.invocation_id,
                session_id: parts.session_id,
                app_name: parts.app_name,
                user_id: parts.user_id,
                user_content: parts.user_content,
                root: parts.root,
                run_config: parts.run_config,
                services: parts.services,
                cancel: parts.cancel,
                live: parts.live.map(Mutex::new),
                gate: Mutex::new(Gate {
                    sealed: false,
                    last_sequence: 0,
                }),
                sink: parts.sink,
                suspension: StdMutex::new(None),
            }),
        }
    }

    pub fn invocation_id(&self) -> InvocationId {
        self.inner.invocation_id
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session_id
    }

    pub fn app_name(&self) -> &str {
        &self.inner.app_name
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    /// Text of the user message that started this invocation, if any.
    pub fn user_content(&self) -> Option<&str> {
        self.inner.user_content.as_deref()
    }

    /// Root of the agent tree this invocation runs.
    pub fn root_agent(&self) -> &Arc<dyn Agent> {
        &self.inner.root
    }

    pub fn run_config(&self) -> &RunConfig {
        &self.inner.run_config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.services.store
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.inner.services.tools
    }

    pub fn callbacks(&self) -> &CallbackChain {
        &self.inner.services.callbacks
    }

    pub fn memory(&self) -> Option<&Arc<dyn MemoryService>> {
        self.inner.services.memory.as_ref()
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.inner.services.retry
    }

    pub fn memory_scope(&self) -> MemoryScope {
        MemoryScope::new(self.app_name(), self.user_id())
    }

    /// Search the memory service within this invocation's app and user.
    pub async fn search_memory(&self, query: &str) -> Result<Vec<MemoryFragment>> {
        let memory = self
            .memory()
            .ok_or(crate::config::ConfigError::Missing("memory service"))?;
        memory.search(query, &self.memory_scope()).await
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Resolves once the invocation is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.inner.cancel.cancelled()
    }

    /// Append an event to the session on behalf of `author`.
    ///
    /// Fails with [`Error::Cancelled`] once the invocation is cancelled and
    /// with [`Error::InvocationClosed`] once its terminal event is written.
    ///
    /// The write runs on its own task. Dropping the returned future does not
    /// abandon it: once the store commits the event, the event still
    /// advances the gate and reaches the sink before anything can seal.
    pub async fn append(&self, author: &str, kind: EventKind) -> Result<Event> {
        let inner = Arc::clone(&self.inner);
        let event = NewEvent::new(author, kind).in_invocation(inner.invocation_id);
        tokio::spawn(async move {
            let mut gate = inner.gate.lock().await;
            if gate.sealed {
                return Err(Error::InvocationClosed);
            }
            if inner.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            inner.append_locked(&mut gate, event).await
        })
        .await
        .map_err(|e| Error::Internal(format!("append task failed: {e}")))?
    }

    /// Write the terminal event and close the gate.
    ///
    /// `signal` receives the sequence of the last event this invocation
    /// appended. Runs even after cancellation; fails if already sealed.
    /// Waits for any append already holding the gate.
    pub(crate) async fn seal(
        &self,
        author: &str,
        signal: impl FnOnce(u64) -> ControlSignal,
    ) -> Result<Event> {
        let mut gate = self.inner.gate.lock().await;
        if gate.sealed {
            return Err(Error::InvocationClosed);
        }
        let signal = signal(gate.last_sequence);
        let event = NewEvent::new(author, EventKind::control(signal))
            .in_invocation(self.inner.invocation_id);
        let event = self.inner.append_locked(&mut gate, event).await;
        gate.sealed = true;
        event
    }

    pub async fn is_sealed(&self) -> bool {
        self.inner.gate.lock().await.sealed
    }

    /// Sequence of the last event appended by this invocation, 0 if none.
    pub async fn last_sequence(&self) -> u64 {
        self.inner.gate.lock().await.last_sequence
    }

    pub async fn set_state(&self, author: &str, key: &str, value: Value) -> Result<Event> {
        self.append(author, EventKind::state(key, value)).await
    }

    /// Ask the nearest enclosing loop to stop.
    pub async fn escalate(&self, author: &str) -> Result<Event> {
        self.append(author, EventKind::control(ControlSignal::Escalate))
            .await
    }

    /// Current session state.
    pub async fn state(&self) -> Result<State> {
        Ok(self.store().get_state(self.inner.session_id).await?)
    }

    /// Look up a state key, resolving `temp:` keys in this invocation.
    pub async fn state_value(&self, key: &str) -> Result<Option<Value>> {
        let state = self.state().await?;
        Ok(state.get_scoped(key, self.inner.invocation_id).cloned())
    }

    /// The whole session log.
    pub async fn events(&self) -> Result<Vec<Event>> {
        let stream = self.store().read(self.inner.session_id, 1).await?;
        Ok(stream.try_collect().await?)
    }

    /// Mark the invocation as waiting on external input. The first reason
    /// wins.
    pub fn suspend(&self, reason: impl Into<String>) {
        if let Ok(mut suspension) = self.inner.suspension.lock()
            && suspension.is_none()
        {
            *suspension = Some(reason.into());
        }
    }

    pub fn suspension(&self) -> Option<String> {
        self.inner
            .suspension
            .lock()
            .ok()
            .and_then(|suspension| suspension.clone())
    }

    pub fn is_suspended(&self) -> bool {
        self.suspension().is_some()
    }

    /// Whether this invocation accepts live input.
    pub fn is_live(&self) -> bool {
        self.inner.live.is_some()
    }

    /// Take every live input message that has already arrived.
    pub async fn drain_live_input(&self) -> Vec<String> {
        let Some(live) = &self.inner.live else {
            return Vec::new();
        };
        let mut rx = live.lock().await;
        let mut messages = Vec::new();
        while let Ok(text) = rx.try_recv() {
            messages.push(text);
        }
        messages
    }

    /// Wait for the next live input message.
    ///
    /// Returns `None` when the sender is closed, the invocation is not live,
    /// or the invocation is cancelled.
    pub async fn next_live_input(&self) -> Option<String> {
        let live = self.inner.live.as_ref()?;
        let mut rx = live.lock().await;
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => None,
            text = rx.recv() => text,
        }
    }
}

impl std::fmt::Debug for InvocationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvocationContext")
            .field("invocation_id", &self.inner.invocation_id)
            .field("session_id", &self.inner.session_id)
            .field("root", &self.inner.root.name())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::agent::CustomAgent;
    use futures::StreamExt;
    use storage::InMemorySessionStore;

    /// Knobs for building a context over a fresh in-memory session.
    #[derive(Default)]
    pub(crate) struct TestSetup {
        pub tools: ToolRegistry,
        pub callbacks: CallbackChain,
        pub run_config: RunConfig,
        pub memory: Option<Arc<dyn MemoryService>>,
        pub live: Option<mpsc::UnboundedReceiver<String>>,
    }

    impl TestSetup {
        pub(crate) async fn build(
            self,
            root: Arc<dyn Agent>,
        ) -> (InvocationContext, mpsc::UnboundedReceiver<Event>) {
            let store: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());
            let session = store.create_session("app", "u1").await.unwrap();
            let (sink, rx) = mpsc::unbounded_channel();
            let ctx = InvocationContext::new(ContextParts {
                invocation_id: InvocationId::new(),
                session_id: session.id,
                app_name: "app".into(),
                user_id: "u1".into(),
                user_content: None,
                root,
                run_config: self.run_config,
                services: Services {
                    store,
                    tools: Arc::new(self.tools),
                    callbacks: Arc::new(self.callbacks),
                    memory: self.memory,
                    retry: RetryConfig::default(),
                },
                cancel: CancellationToken::new(),
                live: self.live,
                sink,
            });
            (ctx, rx)
        }
    }

    pub(crate) async fn test_context(
        root: Arc<dyn Agent>,
    ) -> (InvocationContext, mpsc::UnboundedReceiver<Event>) {
        TestSetup::default().build(root).await
    }

    pub(crate) async fn test_context_with(
        root: Arc<dyn Agent>,
        tools: ToolRegistry,
    ) -> (InvocationContext, mpsc::UnboundedReceiver<Event>) {
        TestSetup {
            tools,
            ..TestSetup::default()
        }
        .build(root)
        .await
    }

    fn idle() -> Arc<dyn Agent> {
        Arc::new(CustomAgent::new("idle", |_ctx| futures::stream::empty().boxed()))
    }

    #[tokio::test]
    async fn append_forwards_to_sink_in_order() {
        let (ctx, mut rx) = test_context(idle()).await;
        ctx.append("user", EventKind::user_message("a")).await.unwrap();
        ctx.append("idle", EventKind::model_text("b")).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(rx.recv().await.unwrap().sequence, 2);
        assert_eq!(ctx.last_sequence().await, 2);
    }

    #[tokio::test]
    async fn sealed_gate_rejects_appends() {
        let (ctx, _rx) = test_context(idle()).await;
        ctx.append("user", EventKind::user_message("a")).await.unwrap();
        let terminal = ctx.seal("idle", |_| ControlSignal::TurnComplete).await.unwrap();
        assert_eq!(terminal.sequence, 2);

        assert!(matches!(
            ctx.append("idle", EventKind::model_text("late")).await,
            Err(Error::InvocationClosed)
        ));
        assert!(matches!(
            ctx.seal("idle", |_| ControlSignal::TurnComplete).await,
            Err(Error::InvocationClosed)
        ));
    }

    #[tokio::test]
    async fn cancelled_context_rejects_appends_but_can_seal() {
        let (ctx, _rx) = test_context(idle()).await;
        ctx.append("user", EventKind::user_message("a")).await.unwrap();
        ctx.cancellation_token().cancel();

        assert!(matches!(
            ctx.append("idle", EventKind::model_text("b")).await,
            Err(Error::Cancelled)
        ));
        let terminal = ctx
            .seal("idle", |last| ControlSignal::Cancelled { last_sequence: last })
            .await
            .unwrap();
        assert_eq!(
            terminal.signal(),
            Some(&ControlSignal::Cancelled { last_sequence: 1 })
        );
    }

    #[tokio::test]
    async fn first_suspension_reason_wins() {
        let (ctx, _rx) = test_context(idle()).await;
        assert!(!ctx.is_suspended());
        ctx.suspend("first");
        ctx.suspend("second");
        assert_eq!(ctx.suspension().as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn temp_state_is_scoped_to_invocation() {
        let (ctx, _rx) = test_context(idle()).await;
        ctx.set_state("idle", "temp:scratch", serde_json::json!(1)).await.unwrap();
        assert_eq!(
            ctx.state_value("temp:scratch").await.unwrap(),
            Some(serde_json::json!(1))
        );
    }
}
