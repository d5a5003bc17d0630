use thiserror::Error;

/// Errors from model backend calls.
///
/// Only [`ModelError::Unavailable`] is retried; the other variants end the
/// turn immediately.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum ModelError {
    /// The backend could not be reached or asked us to back off.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The backend returned an error response.
    #[error("backend api: {0}")]
    Api(String),

    /// The backend response could not be interpreted.
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}
