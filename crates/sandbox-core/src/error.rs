//! Error types for the session manager.
//!
//! Only contract violations surface here. Runtime failures become returned
//! state: a session in `error`, or an execution with a failed outcome.

use sandbox_state::{SessionStatus, StorageError};

/// Errors produced by the sandbox service.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("capacity exceeded: {limit} concurrent sessions already active")]
    CapacityExceeded { limit: usize },

    #[error("session not found: {0}")]
    SessionNotFound(String),

    #[error("session {session_id} is not active (status: {status})")]
    SessionNotActive {
        session_id: String,
        status: SessionStatus,
    },

    #[error("session expired: {0}")]
    SessionExpired(String),

    #[error("sandbox {handle} backing session {session_id} no longer exists")]
    SandboxLost { session_id: String, handle: String },

    #[error("invalid sandbox configuration: {0}")]
    InvalidConfig(String),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl SandboxError {
    /// Maps a store-level "not found" onto the caller-facing variant.
    pub(crate) fn from_lookup(err: StorageError) -> Self {
        match err {
            StorageError::SessionNotFound { session_id } => SandboxError::SessionNotFound(session_id),
            other => SandboxError::Storage(other),
        }
    }
}

/// Result type for sandbox operations.
pub type Result<T> = std::result::Result<T, SandboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_maps_missing_session() {
        let err = SandboxError::from_lookup(StorageError::SessionNotFound {
            session_id: "s-1".into(),
        });
        assert!(matches!(err, SandboxError::SessionNotFound(ref id) if id == "s-1"));

        let err = SandboxError::from_lookup(StorageError::Backend("down".into()));
        assert!(matches!(err, SandboxError::Storage(_)));
    }

    #[test]
    fn test_display_mentions_status() {
        let err = SandboxError::SessionNotActive {
            session_id: "s-2".into(),
            status: SessionStatus::Closed,
        };
        assert_eq!(err.to_string(), "session s-2 is not active (status: closed)");
    }
}
