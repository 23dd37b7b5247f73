use thiserror::Error;

/// Failure of the local cache tier.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("checksum mismatch for cached {0}")]
    ChecksumMismatch(String),

    #[error("core error: {0}")]
    Core(#[from] attrsync_core::CoreError),
}

/// Failure reported by the durable store. Cloneable because one write
/// outcome may be delivered to several coalesced callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("write abandoned before completion")]
    Abandoned,
}
