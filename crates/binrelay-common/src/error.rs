use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("malformed message: {0}")]
    Malformed(String),

    #[error("backend not connected")]
    NotConnected,

    #[error("request timed out waiting for backend response")]
    RequestTimeout,

    #[error("circuit open for backend {0}")]
    CircuitOpen(String),

    #[error("no backend is available")]
    NoBackendAvailable,

    #[error("failed on all backends")]
    AllBackendsFailed,

    #[error("backend index out of bounds")]
    OutOfBounds,

    #[error("no such backend {0}")]
    UnknownBackend(String),

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RelayError {
    /// Whether the load balancer may retry this failure on another backend.
    ///
    /// Retryable failures are attempt-scoped: the chosen backend was
    /// unusable or the write/connection broke. A request timeout is
    /// terminal for the request, so the client sees the timeout text
    /// rather than a generic all-backends failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::NotConnected
                | RelayError::CircuitOpen(_)
                | RelayError::OutOfBounds
                | RelayError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
