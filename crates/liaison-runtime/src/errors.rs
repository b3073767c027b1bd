//! Workflow error types.

use liaison_core::session::InvalidDirection;
use liaison_llm::ProviderError;
use liaison_store::StoreError;

/// Errors that can occur while driving a translation session.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    /// Language-capability provider error (after retries, where allowed).
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Checkpoint or history persistence error.
    #[error("persistence error: {0}")]
    Persistence(StoreError),

    /// Checkpoint version conflict: another writer advanced the session.
    /// The current execution attempt must abort without further writes.
    #[error("checkpoint conflict for session {0}")]
    CheckpointConflict(String),

    /// No session exists with this id.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// Another execution is already active for this session.
    #[error("session conflict: another execution is active for {0}")]
    SessionConflict(String),

    /// The session already reached a terminal state and cannot be resumed.
    #[error("session {0} is terminal and cannot be resumed")]
    SessionTerminal(String),

    /// Unsupported direction value in a start request.
    #[error(transparent)]
    InvalidDirection(#[from] InvalidDirection),

    /// Start request carried no content.
    #[error("content must not be empty")]
    EmptyContent,

    /// Execution observed cancellation. Not a failure.
    #[error("session cancelled")]
    Cancelled,

    /// Internal / unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for WorkflowError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::VersionConflict { session_id, .. } => Self::CheckpointConflict(session_id),
            StoreError::NotFound(id) => Self::SessionNotFound(id),
            other => Self::Persistence(other),
        }
    }
}

impl WorkflowError {
    /// Stable category string for `Error` event emission.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Provider(e) => e.category(),
            Self::Persistence(_) => "persistence",
            Self::CheckpointConflict(_) => "conflict",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionConflict(_) => "session_conflict",
            Self::SessionTerminal(_) => "session_terminal",
            Self::InvalidDirection(_) => "invalid_direction",
            Self::EmptyContent => "invalid_request",
            Self::Cancelled => "cancelled",
            Self::Internal(_) => "internal",
        }
    }
}
