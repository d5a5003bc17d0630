//! In-memory session store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tokio::sync::{Mutex, RwLock};

use crate::{
    Error, Event, EventStream, NewEvent, Result, Session, SessionId, SessionStore, SessionSummary,
    State,
};

struct SessionLog {
    app_name: String,
    user_id: String,
    created_at: DateTime<Utc>,
    events: Vec<Event>,
    state: State,
}

/// Session store that keeps every log in process memory.
///
/// Each session has its own mutex, so appends to different sessions never
/// contend. State is folded incrementally on append with the same function
/// used for replay.
#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<SessionLog>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    async fn log(&self, id: SessionId) -> Result<Arc<Mutex<SessionLog>>> {
        let sessions = self.sessions.read().await;
        sessions.get(&id).cloned().ok_or(Error::NotFound(id))
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self, app_name: &str, user_id: &str) -> Result<Session> {
        let id = SessionId::new();
        let created_at = Utc::now();
        let log = SessionLog {
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            created_at,
            events: Vec::new(),
            state: State::default(),
        };

        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&id) {
            return Err(Error::AlreadyExists(id));
        }
        sessions.insert(id, Arc::new(Mutex::new(log)));
        tracing::debug!(session_id = %id, app_name, user_id, "session created");

        Ok(Session {
            id,
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            created_at,
            events: Vec::new(),
            state: State::default(),
        })
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        let log = match self.log(id).await {
            Ok(log) => log,
            Err(Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(e),
        };
        let log = log.lock().await;
        Ok(Some(Session {
            id,
            app_name: log.app_name.clone(),
            user_id: log.user_id.clone(),
            created_at: log.created_at,
            events: log.events.clone(),
            state: log.state.clone(),
        }))
    }

    async fn delete_session(&self, id: SessionId) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(&id).ok_or(Error::NotFound(id))?;
        tracing::debug!(session_id = %id, "session deleted");
        Ok(())
    }

    async fn list_sessions(&self, app_name: &str) -> Result<Vec<SessionSummary>> {
        let logs: Vec<_> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .map(|(id, log)| (*id, Arc::clone(log)))
                .collect()
        };

        let mut summaries = Vec::new();
        for (id, log) in logs {
            let log = log.lock().await;
            if log.app_name != app_name {
                continue;
            }
            summaries.push(SessionSummary {
                id,
                app_name: log.app_name.clone(),
                user_id: log.user_id.clone(),
                created_at: log.created_at,
                event_count: log.events.len() as u64,
                last_sequence: log.events.last().map_or(0, |e| e.sequence),
            });
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    async fn append(&self, session_id: SessionId, event: NewEvent) -> Result<Event> {
        let log = self.log(session_id).await?;
        let mut log = log.lock().await;

        let sequence = log.events.last().map_or(1, |e| e.sequence + 1);
        let event = Event::stamp(session_id, sequence, event);
        log.state.apply(&event);
        log.events.push(event.clone());

        tracing::trace!(session_id = %session_id, sequence, kind = event.kind.name(), "event appended");
        Ok(event)
    }

    async fn read(&self, session_id: SessionId, from_sequence: u64) -> Result<EventStream> {
        let log = self.log(session_id).await?;
        let log = log.lock().await;

        // Sequences start at 1 and have no gaps, so the position is direct.
        let start = from_sequence.saturating_sub(1) as usize;
        let events: Vec<Event> = log.events.iter().skip(start).cloned().collect();
        Ok(stream::iter(events.into_iter().map(Ok)).boxed())
    }

    async fn get_state(&self, session_id: SessionId) -> Result<State> {
        let log = self.log(session_id).await?;
        let log = log.lock().await;
        Ok(log.state.clone())
    }
}
