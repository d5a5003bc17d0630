use storage::{FailureKind, SessionId};
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::ModelError;

/// Runtime errors.
///
/// Construction-time variants (duplicate agents, cycles, unknown tools,
/// invalid schemas) are returned before any session is touched. The rest
/// end an invocation and are recorded in its terminal `Failed` event.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("duplicate agent name in tree: {0}")]
    DuplicateAgent(String),

    #[error("agent tree contains a cycle through '{0}'")]
    AgentCycle(String),

    #[error("agent not found: {0}")]
    AgentNotFound(String),

    #[error("agent '{agent}' references unknown tool '{tool}'")]
    UnknownTool { agent: String, tool: String },

    #[error("no tool call with id '{0}' in session")]
    UnknownToolCall(String),

    #[error("tool call '{0}' already has a final result")]
    ToolCallNotPending(String),

    #[error("duplicate tool: {0}")]
    DuplicateTool(String),

    #[error("invalid schema for tool '{tool}': {reason}")]
    InvalidToolSchema { tool: String, reason: String },

    #[error("agent '{agent}' exceeded max turns ({max_turns})")]
    MaxTurnsExceeded { agent: String, max_turns: u32 },

    #[error("loop '{agent}' exceeded max iterations ({max_iterations})")]
    MaxIterationsExceeded { agent: String, max_iterations: u32 },

    #[error("model backend unavailable after {attempts} attempts: {reason}")]
    ModelBackendUnavailable { attempts: u32, reason: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("callback '{callback}' failed: {reason}")]
    Callback { callback: String, reason: String },

    #[error("invalid status transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: crate::AgentStatus,
        to: crate::AgentStatus,
    },

    #[error("invocation cancelled")]
    Cancelled,

    #[error("invocation already finished")]
    InvocationClosed,

    #[error("session not found: {0}")]
    SessionNotFound(SessionId),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Storage(#[from] storage::Error),

    #[error(transparent)]
    Policy(#[from] policy::Error),
}

impl Error {
    /// Category recorded in the terminal `Failed` event.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::MaxTurnsExceeded { .. } => FailureKind::MaxTurnsExceeded,
            Self::MaxIterationsExceeded { .. } => FailureKind::MaxIterationsExceeded,
            Self::ModelBackendUnavailable { .. } => FailureKind::ModelBackendUnavailable,
            Self::Model(_) => FailureKind::Model,
            Self::Callback { .. } => FailureKind::Callback,
            Self::Config(_)
            | Self::DuplicateAgent(_)
            | Self::AgentCycle(_)
            | Self::AgentNotFound(_)
            | Self::UnknownTool { .. }
            | Self::UnknownToolCall(_)
            | Self::ToolCallNotPending(_)
            | Self::DuplicateTool(_)
            | Self::InvalidToolSchema { .. }
            | Self::Policy(_) => FailureKind::Configuration,
            Self::Storage(_) | Self::SessionNotFound(_) => FailureKind::Storage,
            Self::InvalidTransition { .. }
            | Self::Cancelled
            | Self::InvocationClosed
            | Self::Internal(_) => FailureKind::Internal,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
