//! Long-term memory across sessions.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::{EventKind, Session, SessionId};
use tokio::sync::RwLock;

use crate::Result;

/// Which memories a search may see.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MemoryScope {
    pub app_name: String,
    pub user_id: String,
}

impl MemoryScope {
    pub fn new(app_name: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            user_id: user_id.into(),
        }
    }
}

/// One remembered piece of conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryFragment {
    pub session_id: SessionId,
    pub author: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Ingest a session's conversation. Adding the same session again
    /// replaces what was remembered from it.
    async fn add_session(&self, session: &Session) -> Result<()>;

    /// Fragments relevant to `query`, most relevant first, then newest first.
    async fn search(&self, query: &str, scope: &MemoryScope) -> Result<Vec<MemoryFragment>>;
}

/// Keyword-matching memory kept in process.
#[derive(Default)]
pub struct InMemoryMemoryService {
    entries: RwLock<HashMap<MemoryScope, HashMap<SessionId, Vec<MemoryFragment>>>>,
}

impl InMemoryMemoryService {
    pub fn new() -> Self {
        Self::default()
    }
}

fn words(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn add_session(&self, session: &Session) -> Result<()> {
        let fragments: Vec<MemoryFragment> = session
            .events
            .iter()
            .filter_map(|event| {
                let text = match &event.kind {
                    EventKind::UserMessage { text } => text,
                    EventKind::ModelResponse {
                        text,
                        partial: false,
                    } => text,
                    _ => return None,
                };
                (!text.trim().is_empty()).then(|| MemoryFragment {
                    session_id: session.id,
                    author: event.author.clone(),
                    text: text.clone(),
                    timestamp: event.timestamp,
                })
            })
            .collect();

        let scope = MemoryScope::new(&session.app_name, &session.user_id);
        tracing::debug!(
            session_id = %session.id,
            fragments = fragments.len(),
            "session added to memory"
        );
        self.entries
            .write()
            .await
            .entry(scope)
            .or_default()
            .insert(session.id, fragments);
        Ok(())
    }

    async fn search(&self, query: &str, scope: &MemoryScope) -> Result<Vec<MemoryFragment>> {
        let query = words(query);
        if query.is_empty() {
            return Ok(Vec::new());
        }

        let entries = self.entries.read().await;
        let Some(sessions) = entries.get(scope) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(usize, &MemoryFragment)> = sessions
            .values()
            .flatten()
            .filter_map(|fragment| {
                let score = words(&fragment.text).intersection(&query).count();
                (score > 0).then_some((score, fragment))
            })
            .collect();
        scored.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then(b.timestamp.cmp(&a.timestamp)));

        Ok(scored.into_iter().map(|(_, f)| f.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storage::{InMemorySessionStore, NewEvent, SessionStore};

    async fn session_with(store: &InMemorySessionStore, user: &str, texts: &[&str]) -> Session {
        let session = store.create_session("app", user).await.unwrap();
        for text in texts {
            store
                .append(session.id, NewEvent::new("user", EventKind::user_message(*text)))
                .await
                .unwrap();
        }
        store.get_session(session.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn search_ranks_by_overlap() {
        let store = InMemorySessionStore::new();
        let memory = InMemoryMemoryService::new();
        let session = session_with(
            &store,
            "alice",
            &["my cat is grey", "the grey cat sleeps", "dogs bark"],
        )
        .await;
        memory.add_session(&session).await.unwrap();

        let hits = memory
            .search("grey cat sleeps", &MemoryScope::new("app", "alice"))
            .await
            .unwrap();
        let texts: Vec<_> = hits.iter().map(|f| f.text.as_str()).collect();
        assert_eq!(texts, vec!["the grey cat sleeps", "my cat is grey"]);
    }

    #[tokio::test]
    async fn search_is_scoped_to_user() {
        let store = InMemorySessionStore::new();
        let memory = InMemoryMemoryService::new();
        let session = session_with(&store, "alice", &["secret plans"]).await;
        memory.add_session(&session).await.unwrap();

        let hits = memory
            .search("plans", &MemoryScope::new("app", "bob"))
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn re_adding_a_session_replaces_fragments() {
        let store = InMemorySessionStore::new();
        let memory = InMemoryMemoryService::new();
        let session = session_with(&store, "alice", &["hello world"]).await;
        memory.add_session(&session).await.unwrap();
        memory.add_session(&session).await.unwrap();

        let hits = memory
            .search("hello", &MemoryScope::new("app", "alice"))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }
}
