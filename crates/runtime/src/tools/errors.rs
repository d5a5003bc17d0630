use serde::{Deserialize, Serialize};
use storage::ToolErrorKind;
use thiserror::Error;

/// Errors a tool reports from [`Tool::invoke`](super::Tool::invoke).
///
/// They never fail the agent: dispatch records them as the call's outcome
/// and the model sees them on its next turn.
#[derive(Debug, Clone, Serialize, Deserialize, Error)]
pub enum ToolError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("execution failed: {0}")]
    Execution(String),
}

impl ToolError {
    /// Outcome category recorded in the log.
    pub fn kind(&self) -> ToolErrorKind {
        match self {
            Self::InvalidInput(_) => ToolErrorKind::InvalidArguments,
            Self::Execution(_) => ToolErrorKind::ExecutionFailed,
        }
    }
}
