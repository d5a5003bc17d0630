use thiserror::Error;

use crate::SessionId;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("session not found: {0}")]
    NotFound(SessionId),

    #[error("session already exists: {0}")]
    AlreadyExists(SessionId),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("storage task failed: {0}")]
    Task(String),
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
