//! Turning the session log into a model conversation.
//!
//! The log is shared by every agent in the tree, so history is always built
//! from one agent's point of view: its own responses and tool calls are
//! assistant turns, everything else arrives as user-side context.

use std::collections::HashSet;

use storage::{Event, EventKind, ToolOutcome};

use crate::model::{Message, Part, Role, ToolCall};

/// Build the conversation `agent` sees, optionally limited to the most
/// recent `window` relevant events.
pub(crate) fn build_messages(events: &[Event], agent: &str, window: Option<usize>) -> Vec<Message> {
    let own_calls: HashSet<&str> = events
        .iter()
        .filter(|e| e.author == agent)
        .filter_map(|e| match &e.kind {
            EventKind::ToolCall { call_id, .. } => Some(call_id.as_str()),
            _ => None,
        })
        .collect();

    let superseded = superseded_pending(events);
    let mut relevant: Vec<&Event> = events
        .iter()
        .enumerate()
        .filter(|(index, event)| match &event.kind {
            EventKind::UserMessage { .. } | EventKind::ToolCall { .. } => true,
            EventKind::ModelResponse { partial, .. } => !partial,
            EventKind::ToolResult { .. } => !superseded.contains(index),
            EventKind::StateDelta { .. } | EventKind::Control { .. } => false,
        })
        .map(|(_, event)| event)
        .collect();

    if let Some(window) = window
        && relevant.len() > window
    {
        relevant.drain(..relevant.len() - window);
        // A result whose call fell outside the window means nothing alone.
        let orphans = relevant
            .iter()
            .take_while(|e| matches!(e.kind, EventKind::ToolResult { .. }))
            .count();
        relevant.drain(..orphans);
    }

    let mut messages: Vec<Message> = Vec::new();
    for event in relevant {
        let Some((role, part)) = to_part(event, agent, &own_calls) else {
            continue;
        };
        match messages.last_mut() {
            Some(last) if last.role == role => last.parts.push(part),
            _ => messages.push(Message {
                role,
                parts: vec![part],
            }),
        }
    }
    messages
}

/// Indices of pending results that a later final result replaced.
fn superseded_pending(events: &[Event]) -> HashSet<usize> {
    let mut finished: HashSet<&str> = HashSet::new();
    let mut superseded = HashSet::new();
    for (index, event) in events.iter().enumerate().rev() {
        if let EventKind::ToolResult {
            call_id, outcome, ..
        } = &event.kind
        {
            if outcome.is_pending() {
                if finished.contains(call_id.as_str()) {
                    superseded.insert(index);
                }
            } else {
                finished.insert(call_id);
            }
        }
    }
    superseded
}

fn to_part(event: &Event, agent: &str, own_calls: &HashSet<&str>) -> Option<(Role, Part)> {
    let own = event.author == agent;
    let part = match &event.kind {
        EventKind::UserMessage { text } => (Role::User, Part::text(text)),
        EventKind::ModelResponse { text, .. } if own => (Role::Assistant, Part::text(text)),
        EventKind::ModelResponse { text, .. } => (
            Role::User,
            Part::text(format!("[{}] said: {text}", event.author)),
        ),
        EventKind::ToolCall {
            call_id,
            name,
            arguments,
        } if own => (
            Role::Assistant,
            Part::ToolCall(ToolCall::new(call_id, name, arguments.clone())),
        ),
        EventKind::ToolCall {
            name, arguments, ..
        } => (
            Role::User,
            Part::text(format!(
                "[{}] called tool `{name}` with arguments: {arguments}",
                event.author
            )),
        ),
        EventKind::ToolResult {
            call_id,
            name,
            outcome,
        } if own_calls.contains(call_id.as_str()) => (
            Role::User,
            Part::ToolResult {
                tool_call_id: call_id.clone(),
                name: name.clone(),
                outcome: outcome.clone(),
            },
        ),
        EventKind::ToolResult { name, outcome, .. } => (
            Role::User,
            Part::text(format!(
                "[{}] tool `{name}` returned: {}",
                event.author,
                describe(outcome)
            )),
        ),
        EventKind::StateDelta { .. } | EventKind::Control { .. } => return None,
    };
    Some(part)
}

fn describe(outcome: &ToolOutcome) -> String {
    match outcome {
        ToolOutcome::Success { output } => output.to_string(),
        ToolOutcome::Error { kind, message } => format!("error ({kind:?}): {message}"),
        ToolOutcome::Pending { ticket } => format!("pending (ticket {ticket})"),
    }
}
