//! Append-only session storage.
//!
//! This crate owns the event log: the ordered, immutable record of everything
//! that happens in a session. Every user message, model response, tool call,
//! state change and control signal is an [`Event`], and session [`State`] is
//! nothing more than a fold over the log's state-delta events.
//!
//! # Core Concepts
//!
//! ## SessionStore
//!
//! [`SessionStore`] is the persistence contract. Appends to one session are
//! serialized and receive strictly increasing, gap-free sequence numbers;
//! different sessions never contend. Two implementations ship with the
//! crate:
//!
//! - [`InMemorySessionStore`]: per-session locks, state folded on append.
//! - [`SqliteSessionStore`]: embedded SQLite, queries on the blocking pool.
//!
//! ## Event
//!
//! An [`Event`] is stamped by the store with a UUID, its session, a
//! `sequence`, a timestamp and an author. Callers only ever hand the store a
//! [`NewEvent`]. `sequence` is the only ordering signal; timestamps are
//! informational.
//!
//! ## State
//!
//! [`State::replay`] folds a log into state. Keys prefixed with `temp:` are
//! scoped to the invocation that wrote them.
//!
//! # Example
//!
//! ```no_run
//! use storage::{EventKind, InMemorySessionStore, NewEvent, SessionStore};
//! use serde_json::json;
//!
//! # async fn example() -> storage::Result<()> {
//! let store = InMemorySessionStore::new();
//! let session = store.create_session("app", "alice").await?;
//!
//! store.append(session.id, NewEvent::new("user", EventKind::user_message("Hello"))).await?;
//! store.append(session.id, NewEvent::new("root", EventKind::state("mood", json!("good")))).await?;
//!
//! let state = store.get_state(session.id).await?;
//! assert_eq!(state.get("mood"), Some(&json!("good")));
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod in_memory;
mod sqlite;
mod state;
mod store;

pub use error::{Error, Result};
pub use event::{
    ControlSignal, Event, EventKind, FailureKind, InvocationId, NewEvent, SessionId,
    ToolErrorKind, ToolOutcome, USER_AUTHOR,
};
pub use in_memory::InMemorySessionStore;
pub use sqlite::SqliteSessionStore;
pub use state::{INVOCATION_PREFIX, State};
pub use store::{EventStream, Session, SessionStore, SessionSummary};
