//! Event types for the event log.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Author name used for events that originate from the caller.
pub const USER_AUTHOR: &str = "user";

/// A unique identifier for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// A unique identifier for one invocation of a root agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InvocationId(pub Uuid);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for InvocationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// Why a tool call did not produce a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorKind {
    /// Arguments failed schema validation; the tool was not invoked.
    InvalidArguments,
    /// The tool ran and returned an error.
    ExecutionFailed,
    /// The model asked for a tool that is not registered.
    NotFound,
    /// A guardrail refused the call.
    Denied,
}

/// Outcome of a tool call as recorded in the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { output: Value },
    Error { kind: ToolErrorKind, message: String },
    /// Long-running work was accepted; a final outcome arrives later.
    Pending { ticket: String },
}

impl ToolOutcome {
    pub fn success(output: Value) -> Self {
        Self::Success { output }
    }

    pub fn error(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

/// Failure categories recorded in terminal `Failed` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    MaxTurnsExceeded,
    MaxIterationsExceeded,
    ModelBackendUnavailable,
    Model,
    Callback,
    Configuration,
    Storage,
    Internal,
}

/// Control signals that steer or terminate an invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum ControlSignal {
    /// The invocation completed normally.
    TurnComplete,
    /// A child asks the nearest enclosing loop to stop.
    Escalate,
    /// The invocation is waiting on external input.
    Suspended { reason: String },
    /// The invocation failed.
    Failed { kind: FailureKind, message: String },
    /// The caller cancelled the invocation.
    Cancelled { last_sequence: u64 },
}

impl ControlSignal {
    /// Whether this signal ends an invocation.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Escalate)
    }
}

/// The kind of event that occurred.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    /// Input from the caller.
    UserMessage { text: String },
    /// Text produced by a model. Partial events are streaming fragments.
    ModelResponse { text: String, partial: bool },
    /// A tool was requested.
    ToolCall {
        call_id: String,
        name: String,
        arguments: Value,
    },
    /// A tool call finished, failed, or was accepted as pending.
    ToolResult {
        call_id: String,
        name: String,
        outcome: ToolOutcome,
    },
    /// A change to session state. `null` removes a key.
    StateDelta { changes: BTreeMap<String, Value> },
    /// A control signal.
    Control { signal: ControlSignal },
}

impl EventKind {
    pub fn user_message(text: impl Into<String>) -> Self {
        Self::UserMessage { text: text.into() }
    }

    pub fn model_text(text: impl Into<String>) -> Self {
        Self::ModelResponse {
            text: text.into(),
            partial: false,
        }
    }

    pub fn state(key: impl Into<String>, value: Value) -> Self {
        let mut changes = BTreeMap::new();
        changes.insert(key.into(), value);
        Self::StateDelta { changes }
    }

    pub fn control(signal: ControlSignal) -> Self {
        Self::Control { signal }
    }

    /// Short name used for indexing and filtering.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserMessage { .. } => "user_message",
            Self::ModelResponse { .. } => "model_response",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::StateDelta { .. } => "state_delta",
            Self::Control { .. } => "control",
        }
    }
}

/// An event that has not been appended yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    pub invocation_id: Option<InvocationId>,
    pub author: String,
    pub kind: EventKind,
}

impl NewEvent {
    pub fn new(author: impl Into<String>, kind: EventKind) -> Self {
        Self {
            invocation_id: None,
            author: author.into(),
            kind,
        }
    }

    pub fn in_invocation(mut self, invocation_id: InvocationId) -> Self {
        self.invocation_id = Some(invocation_id);
        self
    }
}

/// An event in the session log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub session_id: SessionId,
    pub sequence: u64,
    pub invocation_id: Option<InvocationId>,
    pub author: String,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
}

impl Event {
    /// Stamp a new event with its identity and position in the log.
    pub fn stamp(session_id: SessionId, sequence: u64, event: NewEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            sequence,
            invocation_id: event.invocation_id,
            author: event.author,
            timestamp: Utc::now(),
            kind: event.kind,
        }
    }

    /// The control signal carried by this event, if any.
    pub fn signal(&self) -> Option<&ControlSignal> {
        match &self.kind {
            EventKind::Control { signal } => Some(signal),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.signal().is_some_and(ControlSignal::is_terminal)
    }

    pub fn is_escalation(&self) -> bool {
        matches!(self.signal(), Some(ControlSignal::Escalate))
    }

    pub fn is_partial(&self) -> bool {
        matches!(self.kind, EventKind::ModelResponse { partial: true, .. })
    }

    /// Final (non-partial) model text, if this is a model response.
    pub fn final_text(&self) -> Option<&str> {
        match &self.kind {
            EventKind::ModelResponse {
                text,
                partial: false,
            } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_serializes_with_tag() {
        let kind = EventKind::ToolCall {
            call_id: "c1".into(),
            name: "add".into(),
            arguments: json!({"a": 2, "b": 2}),
        };
        let value = serde_json::to_value(&kind).unwrap();
        assert_eq!(value["kind"], "tool_call");
        assert_eq!(value["arguments"]["a"], 2);
    }

    #[test]
    fn only_escalate_is_not_terminal() {
        assert!(!ControlSignal::Escalate.is_terminal());
        assert!(ControlSignal::TurnComplete.is_terminal());
        assert!(ControlSignal::Cancelled { last_sequence: 3 }.is_terminal());
    }

    #[test]
    fn stamp_keeps_author_and_invocation() {
        let session = SessionId::new();
        let invocation = InvocationId::new();
        let event = Event::stamp(
            session,
            7,
            NewEvent::new("planner", EventKind::model_text("hi")).in_invocation(invocation),
        );
        assert_eq!(event.sequence, 7);
        assert_eq!(event.author, "planner");
        assert_eq!(event.invocation_id, Some(invocation));
        assert_eq!(event.final_text(), Some("hi"));
    }
}
