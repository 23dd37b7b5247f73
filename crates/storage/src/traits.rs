use async_trait::async_trait;

use attrsync_core::{AttributeKey, AttributeValue, UserId, Value, Version};

use crate::error::{StorageError, StoreError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: AttributeKey,
    pub attribute: AttributeValue,
}

impl CacheEntry {
    pub fn new(key: AttributeKey, attribute: AttributeValue) -> Self {
        Self { key, attribute }
    }
}

/// Synchronous last-known-value tier that survives restarts.
///
/// Every write is version-gated: `set` only replaces an entry with a strictly
/// newer version, whichever path produced it.
pub trait CacheStore {
    fn get(&self, key: &AttributeKey) -> Result<Option<CacheEntry>, StorageError>;

    /// Returns `true` if the entry was stored.
    fn set(&mut self, entry: &CacheEntry) -> Result<bool, StorageError>;

    /// All readable entries for one user. Corrupt rows are skipped.
    fn load_user(&self, user: UserId) -> Result<Vec<CacheEntry>, StorageError>;

    fn clear_user(&mut self, user: UserId) -> Result<usize, StorageError>;
}

/// Remote source of truth. Implemented by the host application over
/// whatever transport it uses.
#[async_trait(?Send)]
pub trait DurableStore {
    async fn get(&self, key: &AttributeKey) -> Result<Option<(Value, Version)>, StoreError>;

    /// Persist `value`, returning the version the store assigned to it.
    async fn put(&self, key: &AttributeKey, value: &Value) -> Result<Version, StoreError>;
}
