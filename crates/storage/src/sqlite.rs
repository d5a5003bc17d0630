//! SQLite event store implementation.
//!
//! The connection lives behind an `Arc<Mutex<>>` and every query runs on the
//! blocking pool. Holding the mutex for the whole append transaction is what
//! serializes writers, so sequence numbers are assigned without gaps.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use rusqlite::{Connection, OptionalExtension, params};

use crate::{
    Error, Event, EventKind, EventStream, InvocationId, NewEvent, Result, Session, SessionId,
    SessionStore, SessionSummary, State,
};

/// Number of rows fetched per round trip by [`SessionStore::read`].
const PAGE_SIZE: usize = 256;

/// SQLite-backed session store.
#[derive(Clone)]
pub struct SqliteSessionStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!(path = %path.display(), "opening session store");
        Self::init(Connection::open(path)?)
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                app_name TEXT NOT NULL,
                user_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
                sequence INTEGER NOT NULL,
                invocation_id TEXT,
                author TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                kind TEXT NOT NULL,
                data TEXT NOT NULL,
                UNIQUE (session_id, sequence)
            );
            CREATE INDEX IF NOT EXISTS idx_events_session_kind
                ON events(session_id, kind, sequence);
            CREATE INDEX IF NOT EXISTS idx_sessions_app
                ON sessions(app_name, created_at);
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn execute<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|e| Error::Task(format!("mutex poisoned: {e}")))?;
            f(&mut conn)
        })
        .await?
    }
}

fn session_exists(conn: &Connection, id: SessionId) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM sessions WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    value
        .parse()
        .map_err(|e| Error::Corrupt(format!("bad timestamp '{value}': {e}")))
}

struct EventRow {
    id: String,
    session_id: String,
    sequence: i64,
    invocation_id: Option<String>,
    author: String,
    timestamp: String,
    data: String,
}

impl EventRow {
    const COLUMNS: &'static str =
        "id, session_id, sequence, invocation_id, author, timestamp, data";

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            sequence: row.get(2)?,
            invocation_id: row.get(3)?,
            author: row.get(4)?,
            timestamp: row.get(5)?,
            data: row.get(6)?,
        })
    }

    fn into_event(self) -> Result<Event> {
        let invocation_id = self
            .invocation_id
            .map(|id| {
                id.parse::<InvocationId>()
                    .map_err(|e| Error::Corrupt(format!("bad invocation id: {e}")))
            })
            .transpose()?;
        Ok(Event {
            id: self
                .id
                .parse()
                .map_err(|e| Error::Corrupt(format!("bad event id: {e}")))?,
            session_id: self
                .session_id
                .parse()
                .map_err(|e| Error::Corrupt(format!("bad session id: {e}")))?,
            sequence: u64::try_from(self.sequence)
                .map_err(|_| Error::Corrupt(format!("negative sequence {}", self.sequence)))?,
            invocation_id,
            author: self.author,
            timestamp: parse_time(&self.timestamp)?,
            kind: serde_json::from_str::<EventKind>(&self.data)?,
        })
    }
}

fn load_events(
    conn: &Connection,
    session_id: SessionId,
    from_sequence: u64,
    limit: Option<usize>,
    kind: Option<&str>,
) -> Result<Vec<Event>> {
    let mut sql = format!(
        "SELECT {} FROM events WHERE session_id = ?1 AND sequence >= ?2",
        EventRow::COLUMNS
    );
    if kind.is_some() {
        sql.push_str(" AND kind = ?3");
    }
    sql.push_str(" ORDER BY sequence");
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }

    let mut stmt = conn.prepare(&sql)?;
    let from = i64::try_from(from_sequence).unwrap_or(i64::MAX);
    let rows: Vec<EventRow> = match kind {
        Some(kind) => stmt
            .query_map(params![session_id.to_string(), from, kind], EventRow::from_row)?
            .collect::<rusqlite::Result<_>>()?,
        None => stmt
            .query_map(params![session_id.to_string(), from], EventRow::from_row)?
            .collect::<rusqlite::Result<_>>()?,
    };
    rows.into_iter().map(EventRow::into_event).collect()
}

#[async_trait]
impl SessionStore for SqliteSessionStore {
    async fn create_session(&self, app_name: &str, user_id: &str) -> Result<Session> {
        let session = Session {
            id: SessionId::new(),
            app_name: app_name.to_string(),
            user_id: user_id.to_string(),
            created_at: Utc::now(),
            events: Vec::new(),
            state: State::default(),
        };
        let row = session.clone();
        self.execute(move |conn| {
            if session_exists(conn, row.id)? {
                return Err(Error::AlreadyExists(row.id));
            }
            conn.execute(
                "INSERT INTO sessions (id, app_name, user_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![
                    row.id.to_string(),
                    row.app_name,
                    row.user_id,
                    row.created_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
        .await?;
        tracing::debug!(session_id = %session.id, app_name, user_id, "session created");
        Ok(session)
    }

    async fn get_session(&self, id: SessionId) -> Result<Option<Session>> {
        self.execute(move |conn| {
            let header: Option<(String, String, String)> = conn
                .query_row(
                    "SELECT app_name, user_id, created_at FROM sessions WHERE id = ?1",
                    [id.to_string()],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            let Some((app_name, user_id, created_at)) = header else {
                return Ok(None);
            };

            let events = load_events(conn, id, 1, None, None)?;
            let state = State::replay(&events);
            Ok(Some(Session {
                id,
                app_name,
                user_id,
                created_at: parse_time(&created_at)?,
                events,
                state,
            }))
        })
        .await
    }

    async fn delete_session(&self, id: SessionId) -> Result<()> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM events WHERE session_id = ?1", [id.to_string()])?;
            let removed = tx.execute("DELETE FROM sessions WHERE id = ?1", [id.to_string()])?;
            if removed == 0 {
                return Err(Error::NotFound(id));
            }
            tx.commit()?;
            Ok(())
        })
        .await?;
        tracing::debug!(session_id = %id, "session deleted");
        Ok(())
    }

    async fn list_sessions(&self, app_name: &str) -> Result<Vec<SessionSummary>> {
        let app_name = app_name.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.app_name, s.user_id, s.created_at,
                        COUNT(e.id), COALESCE(MAX(e.sequence), 0)
                 FROM sessions s LEFT JOIN events e ON e.session_id = s.id
                 WHERE s.app_name = ?1
                 GROUP BY s.id
                 ORDER BY s.created_at DESC",
            )?;
            let rows = stmt
                .query_map([&app_name], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, i64>(5)?,
                    ))
                })?
                .collect::<rusqlite::Result<Vec<_>>>()?;

            rows.into_iter()
                .map(|(id, app_name, user_id, created_at, count, last)| -> Result<SessionSummary> {
                    Ok(SessionSummary {
                        id: id
                            .parse()
                            .map_err(|e| Error::Corrupt(format!("bad session id: {e}")))?,
                        app_name,
                        user_id,
                        created_at: parse_time(&created_at)?,
                        event_count: count.max(0) as u64,
                        last_sequence: last.max(0) as u64,
                    })
                })
                .collect()
        })
        .await
    }

    async fn append(&self, session_id: SessionId, event: NewEvent) -> Result<Event> {
        let event = self
            .execute(move |conn| {
                let tx = conn.transaction()?;
                if !session_exists(&tx, session_id)? {
                    return Err(Error::NotFound(session_id));
                }
                let last: i64 = tx.query_row(
                    "SELECT COALESCE(MAX(sequence), 0) FROM events WHERE session_id = ?1",
                    [session_id.to_string()],
                    |row| row.get(0),
                )?;
                let event = Event::stamp(session_id, last as u64 + 1, event);
                tx.execute(
                    "INSERT INTO events (id, session_id, sequence, invocation_id, author, timestamp, kind, data)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    params![
                        event.id.to_string(),
                        session_id.to_string(),
                        last + 1,
                        event.invocation_id.map(|id| id.to_string()),
                        &event.author,
                        event.timestamp.to_rfc3339(),
                        event.kind.name(),
                        serde_json::to_string(&event.kind)?,
                    ],
                )?;
                tx.commit()?;
                Ok(event)
            })
            .await?;
        tracing::trace!(session_id = %session_id, sequence = event.sequence, kind = event.kind.name(), "event appended");
        Ok(event)
    }

    async fn read(&self, session_id: SessionId, from_sequence: u64) -> Result<EventStream> {
        if !self.execute(move |conn| session_exists(conn, session_id)).await? {
            return Err(Error::NotFound(session_id));
        }

        let store = self.clone();
        let pages = stream::try_unfold(
            (from_sequence.max(1), VecDeque::new(), false),
            move |(next, mut buffered, mut exhausted)| {
                let store = store.clone();
                async move {
                    if buffered.is_empty() && !exhausted {
                        let page = store
                            .execute(move |conn| {
                                load_events(conn, session_id, next, Some(PAGE_SIZE), None)
                            })
                            .await?;
                        exhausted = page.len() < PAGE_SIZE;
                        buffered.extend(page);
                    }
                    Ok::<_, Error>(buffered.pop_front().map(|event: Event| {
                        let next = event.sequence + 1;
                        (event, (next, buffered, exhausted))
                    }))
                }
            },
        );
        Ok(pages.boxed())
    }

    async fn get_state(&self, session_id: SessionId) -> Result<State> {
        self.execute(move |conn| {
            if !session_exists(conn, session_id)? {
                return Err(Error::NotFound(session_id));
            }
            let deltas = load_events(conn, session_id, 1, None, Some("state_delta"))?;
            Ok(State::replay(&deltas))
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn append_and_read_round_trip_through_sqlite() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = store.create_session("app", "u1").await.unwrap();

        store
            .append(session.id, NewEvent::new("user", EventKind::user_message("hello")))
            .await
            .unwrap();
        let second = store
            .append(
                session.id,
                NewEvent::new("root", EventKind::model_text("hi")).in_invocation(InvocationId::new()),
            )
            .await
            .unwrap();
        assert_eq!(second.sequence, 2);

        let events: Vec<Event> = store.read(session.id, 1).await.unwrap().try_collect().await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1], second);
    }

    #[tokio::test]
    async fn read_pages_through_long_logs() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = store.create_session("app", "u1").await.unwrap();
        for i in 0..(PAGE_SIZE + 10) {
            store
                .append(session.id, NewEvent::new("user", EventKind::user_message(i.to_string())))
                .await
                .unwrap();
        }
        let events: Vec<Event> = store.read(session.id, 5).await.unwrap().try_collect().await.unwrap();
        assert_eq!(events.len(), PAGE_SIZE + 6);
        assert!(events.windows(2).all(|w| w[1].sequence == w[0].sequence + 1));
    }

    #[tokio::test]
    async fn state_is_folded_from_deltas() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = store.create_session("app", "u1").await.unwrap();
        store
            .append(session.id, NewEvent::new("a", EventKind::state("topic", json!("rust"))))
            .await
            .unwrap();
        store
            .append(session.id, NewEvent::new("user", EventKind::user_message("noise")))
            .await
            .unwrap();

        let state = store.get_state(session.id).await.unwrap();
        assert_eq!(state.get("topic"), Some(&json!("rust")));

        let loaded = store.get_session(session.id).await.unwrap().unwrap();
        assert_eq!(loaded.state, state);
        assert_eq!(loaded.last_sequence(), 2);
    }

    #[tokio::test]
    async fn delete_removes_session_and_events() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = store.create_session("app", "u1").await.unwrap();
        store
            .append(session.id, NewEvent::new("user", EventKind::user_message("x")))
            .await
            .unwrap();

        store.delete_session(session.id).await.unwrap();
        assert!(store.get_session(session.id).await.unwrap().is_none());
        assert!(matches!(store.delete_session(session.id).await, Err(Error::NotFound(_))));
    }

    #[tokio::test]
    async fn list_sessions_reports_counts() {
        let store = SqliteSessionStore::in_memory().unwrap();
        let session = store.create_session("app", "u1").await.unwrap();
        store
            .append(session.id, NewEvent::new("user", EventKind::user_message("x")))
            .await
            .unwrap();

        let summaries = store.list_sessions("app").await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].event_count, 1);
        assert_eq!(summaries[0].last_sequence, 1);
    }
}
