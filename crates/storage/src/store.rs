//! Session store contract.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::{Event, NewEvent, Result, SessionId, State};

/// A lazy, finite, forward-only sequence of stored events.
pub type EventStream = BoxStream<'static, Result<Event>>;

/// One conversation: identity, ordered log and derived state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: SessionId,
    pub app_name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub events: Vec<Event>,
    pub state: State,
}

impl Session {
    /// Sequence number of the newest event, or 0 for an empty log.
    pub fn last_sequence(&self) -> u64 {
        self.events.last().map_or(0, |e| e.sequence)
    }
}

/// Summary row for session listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: SessionId,
    pub app_name: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub event_count: u64,
    pub last_sequence: u64,
}

/// Append-only, per-session event storage.
///
/// Appends to one session are serialized: every successful `append`
/// receives the next sequence number, with no gaps. Sessions are fully
/// independent of each other.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create an empty session.
    async fn create_session(&self, app_name: &str, user_id: &str) -> Result<Session>;

    /// Load a session with its full log and folded state.
    async fn get_session(&self, id: SessionId) -> Result<Option<Session>>;

    /// Remove a session and its log.
    async fn delete_session(&self, id: SessionId) -> Result<()>;

    /// List sessions belonging to an application, newest first.
    async fn list_sessions(&self, app_name: &str) -> Result<Vec<SessionSummary>>;

    /// Append an event, assigning it the next sequence number.
    async fn append(&self, session_id: SessionId, event: NewEvent) -> Result<Event>;

    /// Read events with `sequence >= from_sequence`, in order.
    async fn read(&self, session_id: SessionId, from_sequence: u64) -> Result<EventStream>;

    /// Current state, consistent with every append that has returned.
    async fn get_state(&self, session_id: SessionId) -> Result<State>;
}
