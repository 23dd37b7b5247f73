use attrsync_core::ValidationError;
use attrsync_storage::{StorageError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("write failed for {key}: {source}")]
    WriteFailure {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("read failed for {key}: {source}")]
    ReadFailure {
        key: String,
        #[source]
        source: StoreError,
    },

    #[error("unknown attribute: {0}")]
    UnknownAttribute(String),

    #[error("cannot {op} {key} while {state}")]
    InvalidState {
        key: String,
        state: &'static str,
        op: &'static str,
    },

    #[error("commit still in flight for {0}")]
    CommitInFlight(String),

    #[error("cache error: {0}")]
    Cache(#[from] StorageError),
}

impl SyncError {
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation(_))
    }

    pub fn is_write_failure(&self) -> bool {
        matches!(self, SyncError::WriteFailure { .. })
    }
}

/// A push channel could not accept an announcement.
#[derive(Debug, Clone, Error)]
#[error("push publish failed: {0}")]
pub struct PushError(pub String);
