//! Errors raised while loading or enforcing a tool policy.

use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The policy refused a tool call; carries the denial reason.
    #[error("tool denied: {0}")]
    Denied(String),

    /// A rule is malformed, e.g. an empty pattern.
    #[error("invalid tool rule: {0}")]
    Invalid(String),

    #[error("failed to parse tool policy: {0}")]
    Parse(String),

    #[error("failed to read tool policy: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
