//! Error types for the sync engine.

use opsdesk_store::StorageError;
use opsdesk_types::ConflictId;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Network-level failure reaching the remote service.
    #[error("network error: {0}")]
    Network(String),

    /// The remote service refused the request as a whole.
    #[error("remote rejected request: {0}")]
    Rejected(String),

    /// The exchange did not finish within the configured deadline.
    #[error("operation timed out")]
    Timeout,

    /// Local storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No open conflict with this id.
    #[error("unknown conflict: {0}")]
    UnknownConflict(ConflictId),

    /// The chosen resolution cannot be applied to this conflict.
    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    /// The service loop is no longer running.
    #[error("channel closed")]
    ChannelClosed,

    /// A background task failed to complete.
    #[error("internal error: {0}")]
    Internal(String),
}
