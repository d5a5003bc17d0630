//! Session state derived from the event log.
//!
//! State is never written directly. It is the result of folding every
//! `StateDelta` event of a session in sequence order, so it can always be
//! rebuilt by replaying the log.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Event, EventKind, InvocationId};

/// Keys with this prefix live only for the invocation that wrote them.
pub const INVOCATION_PREFIX: &str = "temp:";

/// Key-value state of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct State {
    session: BTreeMap<String, Value>,
    invocations: HashMap<InvocationId, BTreeMap<String, Value>>,
}

impl State {
    /// Fold a sequence of events into a fresh state.
    pub fn replay<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut state = Self::default();
        for event in events {
            state.apply(event);
        }
        state
    }

    /// Apply one event. Events other than state deltas are ignored.
    pub fn apply(&mut self, event: &Event) {
        let EventKind::StateDelta { changes } = &event.kind else {
            return;
        };

        for (key, value) in changes {
            let target = if key.starts_with(INVOCATION_PREFIX) {
                match event.invocation_id {
                    Some(id) => self.invocations.entry(id).or_default(),
                    // Invocation-scoped keys written outside an invocation
                    // have nowhere to live.
                    None => continue,
                }
            } else {
                &mut self.session
            };

            if value.is_null() {
                target.remove(key);
            } else {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    /// Look up a session-scoped key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.session.get(key)
    }

    /// Look up a key, resolving `temp:` keys against the given invocation.
    pub fn get_scoped(&self, key: &str, invocation_id: InvocationId) -> Option<&Value> {
        if key.starts_with(INVOCATION_PREFIX) {
            self.invocations.get(&invocation_id)?.get(key)
        } else {
            self.session.get(key)
        }
    }

    /// Session-scoped entries.
    pub fn session(&self) -> &BTreeMap<String, Value> {
        &self.session
    }

    /// Invocation-scoped entries written by the given invocation.
    pub fn invocation(&self, invocation_id: InvocationId) -> Option<&BTreeMap<String, Value>> {
        self.invocations.get(&invocation_id)
    }

    /// Session-scoped keys, in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.session.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.session.is_empty() && self.invocations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{NewEvent, SessionId};
    use serde_json::json;

    fn delta(seq: u64, invocation: Option<InvocationId>, key: &str, value: Value) -> Event {
        let mut event = NewEvent::new("agent", EventKind::state(key, value));
        event.invocation_id = invocation;
        Event::stamp(SessionId::new(), seq, event)
    }

    #[test]
    fn later_deltas_overwrite_earlier_ones() {
        let events = vec![
            delta(1, None, "count", json!(1)),
            delta(2, None, "count", json!(2)),
        ];
        let state = State::replay(&events);
        assert_eq!(state.get("count"), Some(&json!(2)));
    }

    #[test]
    fn null_removes_key() {
        let events = vec![
            delta(1, None, "draft", json!("x")),
            delta(2, None, "draft", Value::Null),
        ];
        assert!(State::replay(&events).get("draft").is_none());
    }

    #[test]
    fn temp_keys_are_scoped_to_their_invocation() {
        let first = InvocationId::new();
        let second = InvocationId::new();
        let events = vec![
            delta(1, Some(first), "temp:scratch", json!("a")),
            delta(2, Some(second), "temp:scratch", json!("b")),
        ];
        let state = State::replay(&events);
        assert_eq!(state.get_scoped("temp:scratch", first), Some(&json!("a")));
        assert_eq!(state.get_scoped("temp:scratch", second), Some(&json!("b")));
        assert!(state.get("temp:scratch").is_none());
    }

    #[test]
    fn incremental_apply_matches_replay() {
        let invocation = InvocationId::new();
        let events = vec![
            delta(1, None, "a", json!(1)),
            delta(2, Some(invocation), "temp:b", json!(2)),
            delta(3, None, "a", Value::Null),
            delta(4, None, "c", json!([1, 2])),
        ];
        let mut incremental = State::default();
        for event in &events {
            incremental.apply(event);
        }
        assert_eq!(incremental, State::replay(&events));
    }
}
