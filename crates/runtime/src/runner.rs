//! The top-level driver for invocations.
//!
//! A [`Runner`] owns an agent tree and the services it runs against. Each
//! call to [`Runner::run`] starts one invocation: it appends the caller's
//! input, runs the entry agent and returns the events the invocation
//! appended as an [`Invocation`] stream, ending with exactly one terminal
//! control event.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::{Stream, StreamExt, TryStreamExt};
use serde_json::Value;
use storage::{
    ControlSignal, Event, EventKind, InMemorySessionStore, InvocationId, Session, SessionId,
    SessionStore, SessionSummary, ToolOutcome, USER_AUTHOR,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::{self, Agent, AgentStatus, EventStream};
use crate::callbacks::{Callback, CallbackChain, PolicyGuard};
use crate::config::{RunConfig, RuntimeConfig, StreamingMode};
use crate::context::{ContextParts, InvocationContext, Services};
use crate::memory::MemoryService;
use crate::model::RetryConfig;
use crate::tools::{Tool, ToolRegistry};
use crate::{Error, Result};

/// What the caller hands an invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum RunInput {
    /// A new user message.
    Message(String),
    /// The final result of a call that was left pending. The agent that
    /// issued the call picks the conversation back up.
    ToolResponse { call_id: String, output: Value },
    /// Run the root agent again without new input.
    Resume,
}

impl From<&str> for RunInput {
    fn from(text: &str) -> Self {
        Self::Message(text.to_string())
    }
}

impl From<String> for RunInput {
    fn from(text: String) -> Self {
        Self::Message(text)
    }
}

/// Builder for [`Runner`].
pub struct RunnerBuilder {
    root: Arc<dyn Agent>,
    app_name: Option<String>,
    store: Option<Arc<dyn SessionStore>>,
    tools: Vec<Arc<dyn Tool>>,
    callbacks: Vec<Arc<dyn Callback>>,
    memory: Option<Arc<dyn MemoryService>>,
    retry: Option<RetryConfig>,
    config: Option<RuntimeConfig>,
}

impl RunnerBuilder {
    pub fn app_name(mut self, app_name: impl Into<String>) -> Self {
        self.app_name = Some(app_name.into());
        self
    }

    pub fn store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    /// Callbacks run in the order they are added.
    pub fn callback(mut self, callback: Arc<dyn Callback>) -> Self {
        self.callbacks.push(callback);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryService>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = Some(retry);
        self
    }

    /// Take defaults from a loaded configuration: app name, run and retry
    /// settings, the session store, and a [`PolicyGuard`] enforcing its tool
    /// rules ahead of every other callback. Explicit builder calls win.
    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Validate the agent tree and tool references.
    pub fn build(self) -> Result<Runner> {
        agent::validate_tree(&self.root)?;

        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            tools.register(tool)?;
        }
        for agent in agent::descendants(&self.root) {
            if let Some(missing) = agent.tool_names().iter().find(|name| !tools.contains(name)) {
                return Err(Error::UnknownTool {
                    agent: agent.name().to_string(),
                    tool: missing.clone(),
                });
            }
        }

        let config = self.config;
        let store = match (self.store, &config) {
            (Some(store), _) => store,
            (None, Some(config)) => config.store.open()?,
            (None, None) => Arc::new(InMemorySessionStore::new()),
        };

        let mut callbacks = CallbackChain::default();
        if let Some(config) = &config {
            callbacks.push(Arc::new(PolicyGuard::new(config.policy.clone())));
        }
        for callback in self.callbacks {
            callbacks.push(callback);
        }

        let app_name = self
            .app_name
            .or_else(|| config.as_ref().map(|c| c.app_name.clone()))
            .unwrap_or_else(|| "app".to_string());
        let retry = self
            .retry
            .or_else(|| config.as_ref().map(|c| c.retry.clone()))
            .unwrap_or_default();
        let run_config = config.map(|c| c.run).unwrap_or_default();

        tracing::debug!(
            app_name = %app_name,
            root = self.root.name(),
            tools = tools.len(),
            callbacks = callbacks.len(),
            "runner built"
        );

        Ok(Runner {
            root: self.root,
            app_name,
            run_config,
            services: Services {
                store,
                tools: Arc::new(tools),
                callbacks: Arc::new(callbacks),
                memory: self.memory,
                retry,
            },
        })
    }
}

/// Runs invocations of one agent tree.
pub struct Runner {
    root: Arc<dyn Agent>,
    app_name: String,
    run_config: RunConfig,
    services: Services,
}

impl Runner {
    pub fn builder(root: Arc<dyn Agent>) -> RunnerBuilder {
        RunnerBuilder {
            root,
            app_name: None,
            store: None,
            tools: Vec::new(),
            callbacks: Vec::new(),
            memory: None,
            retry: None,
            config: None,
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn root_agent(&self) -> &Arc<dyn Agent> {
        &self.root
    }

    /// Run settings from the configuration, or the defaults. Used by
    /// [`Runner::run_with_defaults`].
    pub fn default_run_config(&self) -> &RunConfig {
        &self.run_config
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.services.store
    }

    pub async fn create_session(&self, user_id: &str) -> Result<Session> {
        Ok(self
            .services
            .store
            .create_session(&self.app_name, user_id)
            .await?)
    }

    pub async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        Ok(self.services.store.get_session(id).await?)
    }

    pub async fn delete_session(&self, id: SessionId) -> Result<()> {
        Ok(self.services.store.delete_session(id).await?)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>> {
        Ok(self.services.store.list_sessions(&self.app_name).await?)
    }

    /// Start an invocation. Nothing happens until the returned stream is
    /// polled.
    pub fn run(
        &self,
        session_id: SessionId,
        input: impl Into<RunInput>,
        config: RunConfig,
    ) -> Invocation {
        self.start(session_id, input.into(), config, None)
    }

    /// Start an invocation with the run settings from the configuration
    /// (see [`RunnerBuilder::config`]), or the defaults without one.
    pub fn run_with_defaults(&self, session_id: SessionId, input: impl Into<RunInput>) -> Invocation {
        self.run(session_id, input, self.run_config.clone())
    }

    /// Start a bidirectional invocation. The sender feeds user messages to
    /// the running agents; closing it lets them finish.
    pub fn run_live(
        &self,
        session_id: SessionId,
        input: impl Into<RunInput>,
        config: RunConfig,
    ) -> (Invocation, LiveSender) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = config.with_streaming(StreamingMode::Bidi);
        let invocation = self.start(session_id, input.into(), config, Some(rx));
        (invocation, LiveSender { tx })
    }

    fn start(
        &self,
        session_id: SessionId,
        input: RunInput,
        config: RunConfig,
        live: Option<mpsc::UnboundedReceiver<String>>,
    ) -> Invocation {
        let id = InvocationId::new();
        let cancel = CancellationToken::new();
        let status = Arc::new(Mutex::new(AgentStatus::Pending));
        let events = drive(Drive {
            invocation_id: id,
            session_id,
            input,
            config,
            live,
            root: Arc::clone(&self.root),
            services: self.services.clone(),
            cancel: cancel.clone(),
            status: Arc::clone(&status),
        });
        Invocation {
            id,
            cancel,
            status,
            events,
        }
    }
}

struct Drive {
    invocation_id: InvocationId,
    session_id: SessionId,
    input: RunInput,
    config: RunConfig,
    live: Option<mpsc::UnboundedReceiver<String>>,
    root: Arc<dyn Agent>,
    services: Services,
    cancel: CancellationToken,
    status: Arc<Mutex<AgentStatus>>,
}

enum Step {
    Cancelled,
    Appended(Event),
    Agent(Option<Result<Event>>),
}

fn set_status(status: &Mutex<AgentStatus>, next: AgentStatus) {
    if let Ok(mut status) = status.lock() {
        *status = next;
    }
}

/// The agent that issued `call_id`, and the tool it called.
///
/// Only calls still waiting on a result can be answered: the latest result
/// for the call, if any, must be `Pending`.
fn find_call(session: &Session, call_id: &str) -> Result<(String, String)> {
    let mut seen_pending = false;
    for event in session.events.iter().rev() {
        match &event.kind {
            EventKind::ToolResult { call_id: id, outcome, .. } if id == call_id && !seen_pending => {
                if !matches!(outcome, ToolOutcome::Pending { .. }) {
                    return Err(Error::ToolCallNotPending(call_id.to_string()));
                }
                seen_pending = true;
            }
            EventKind::ToolCall { call_id: id, name, .. } if id == call_id => {
                return Ok((event.author.clone(), name.clone()));
            }
            _ => {}
        }
    }
    Err(Error::UnknownToolCall(call_id.to_string()))
}

fn drive(run: Drive) -> EventStream {
    Box::pin(async_stream::stream! {
        let Drive { invocation_id, session_id, input, config, live, root, services, cancel, status } = run;

        let session = match services.store.get_session(session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => {
                yield Err(Error::SessionNotFound(session_id));
                return;
            }
            Err(e) => {
                yield Err(e.into());
                return;
            }
        };

        let (sink, mut appended) = mpsc::unbounded_channel();
        let ctx = InvocationContext::new(ContextParts {
            invocation_id,
            session_id,
            app_name: session.app_name.clone(),
            user_id: session.user_id.clone(),
            user_content: match &input {
                RunInput::Message(text) => Some(text.clone()),
                _ => None,
            },
            root: Arc::clone(&root),
            run_config: config.clone(),
            services,
            cancel: cancel.clone(),
            live,
            sink,
        });
        set_status(&status, AgentStatus::Running);
        tracing::info!(
            invocation_id = %invocation_id,
            session_id = %session_id,
            root = root.name(),
            streaming = ?config.streaming,
            "invocation started"
        );

        let entry: Result<Arc<dyn Agent>> = match &input {
            RunInput::Message(text) => ctx
                .append(USER_AUTHOR, EventKind::user_message(text.clone()))
                .await
                .map(|_| Arc::clone(&root)),
            RunInput::ToolResponse { call_id, output } => match find_call(&session, call_id) {
                Err(e) => Err(e),
                Ok((author, name)) => match agent::find_agent(&root, &author) {
                    None => Err(Error::AgentNotFound(author)),
                    Some(agent) => ctx
                        .append(
                            USER_AUTHOR,
                            EventKind::ToolResult {
                                call_id: call_id.clone(),
                                name,
                                outcome: ToolOutcome::success(output.clone()),
                            },
                        )
                        .await
                        .map(|_| agent),
                },
            },
            RunInput::Resume => Ok(Arc::clone(&root)),
        };

        let streaming = config.streaming.is_streaming();
        let mut buffered = Vec::new();
        let mut failure: Option<Error> = None;
        let mut cancelled = false;
        let mut body = match entry {
            Ok(entry) => Some(agent::run(entry, ctx.clone())),
            Err(e) => {
                if e.is_cancelled() {
                    cancelled = true;
                } else {
                    failure = Some(e);
                }
                None
            }
        };

        while let Some(events) = body.as_mut() {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                Some(event) = appended.recv() => Step::Appended(event),
                item = events.next() => Step::Agent(item),
            };
            match step {
                Step::Cancelled => {
                    cancelled = true;
                    body = None;
                }
                Step::Appended(event) => {
                    if streaming {
                        yield Ok(event);
                    } else {
                        buffered.push(event);
                    }
                }
                // Appended events arrive through the sink.
                Step::Agent(Some(Ok(_))) => {}
                Step::Agent(Some(Err(e))) => {
                    if e.is_cancelled() {
                        cancelled = true;
                    } else {
                        failure = Some(e);
                    }
                    body = None;
                }
                Step::Agent(None) => body = None,
            }
        }

        let (terminal, outcome) = if cancelled {
            let terminal = ctx
                .seal(root.name(), |last_sequence| ControlSignal::Cancelled { last_sequence })
                .await;
            (terminal, AgentStatus::Cancelled)
        } else {
            let (signal, outcome) = match (&failure, ctx.suspension()) {
                (Some(e), _) => (
                    ControlSignal::Failed {
                        kind: e.failure_kind(),
                        message: e.to_string(),
                    },
                    AgentStatus::Failed,
                ),
                (None, Some(reason)) => (ControlSignal::Suspended { reason }, AgentStatus::Suspended),
                (None, None) => (ControlSignal::TurnComplete, AgentStatus::Completed),
            };
            (ctx.seal(root.name(), move |_| signal).await, outcome)
        };
        set_status(&status, outcome);

        while let Ok(event) = appended.try_recv() {
            buffered.push(event);
        }
        for event in buffered {
            yield Ok(event);
        }

        match terminal {
            Ok(event) => tracing::info!(
                invocation_id = %invocation_id,
                session_id = %session_id,
                sequence = event.sequence,
                status = %outcome,
                "invocation finished"
            ),
            Err(e) => {
                tracing::error!(invocation_id = %invocation_id, error = %e, "failed to record terminal event");
                set_status(&status, AgentStatus::Failed);
                yield Err(e);
            }
        }
    })
}

/// A running invocation: the stream of events it appends, in order.
///
/// The stream ends after the terminal control event. Failures of the
/// agents themselves are reported by that event; an `Err` item means the
/// invocation could not start or could not record its outcome.
pub struct Invocation {
    id: InvocationId,
    cancel: CancellationToken,
    status: Arc<Mutex<AgentStatus>>,
    events: EventStream,
}

impl Invocation {
    pub fn id(&self) -> InvocationId {
        self.id
    }

    /// Stop the invocation. It records a `Cancelled` event and appends
    /// nothing afterwards.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A handle that can cancel the invocation from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            token: self.cancel.clone(),
        }
    }

    /// `Pending` until first polled, `Running` until the terminal event is
    /// written, then the outcome.
    pub fn status(&self) -> AgentStatus {
        self.status
            .lock()
            .map(|status| *status)
            .unwrap_or(AgentStatus::Failed)
    }

    /// Drive the invocation to the end and collect its events.
    pub async fn collect_events(self) -> Result<Vec<Event>> {
        self.try_collect().await
    }
}

impl Stream for Invocation {
    type Item = Result<Event>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for Invocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Invocation")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

/// Cancels an invocation from another task.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Feeds user messages into a live invocation.
#[derive(Debug, Clone)]
pub struct LiveSender {
    tx: mpsc::UnboundedSender<String>,
}

impl LiveSender {
    pub fn send(&self, text: impl Into<String>) -> Result<()> {
        self.tx
            .send(text.into())
            .map_err(|_| Error::InvocationClosed)
    }

    /// Stop sending. Agents waiting for input finish their turn.
    pub fn close(self) {}
}
