//! Errors at the isolation runtime boundary.

/// Failures reported by a [`Runtime`](super::Runtime) implementation.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("runtime unavailable: {0}")]
    Unavailable(String),

    /// The runtime does not know the handle (already removed or never existed).
    #[error("sandbox not found: {0}")]
    HandleNotFound(String),

    #[error("{op} failed: {stderr}")]
    CommandFailed { op: &'static str, stderr: String },

    #[error("runtime i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unparseable runtime output: {0}")]
    Parse(String),
}

impl RuntimeError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, RuntimeError::HandleNotFound(_))
    }
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
