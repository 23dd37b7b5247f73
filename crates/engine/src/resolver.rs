use attrsync_core::{AttributeKey, AttributeValue, SyncEvent, Value, Version};

use crate::error::SyncError;
use crate::reconcile::ReconcileOutcome;
use crate::{Inner, SyncEngine};

// Tiered reads: draft, memory, cache, registered default.

impl Inner {
    /// Last settled value, ignoring any draft. Cache hits are promoted into
    /// memory; unreadable cache entries count as misses.
    pub(crate) fn settled(&mut self, key: &AttributeKey) -> Option<AttributeValue> {
        if let Some(held) = self.held.get(key) {
            return Some(held.clone());
        }
        match self.cache.get(key) {
            Ok(Some(entry)) => {
                tracing::trace!(%key, version = %entry.attribute.version, "promoted cache entry");
                self.held.insert(key.clone(), entry.attribute.clone());
                Some(entry.attribute)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(%key, error = %e, "ignoring unreadable cache entry");
                None
            }
        }
    }

    pub(crate) fn held_version(&mut self, key: &AttributeKey) -> Version {
        self.settled(key).map_or(Version::ZERO, |held| held.version)
    }

    fn default_for(&self, key: &AttributeKey) -> Value {
        self.registry
            .get(key.name())
            .map(|d| d.default.clone())
            .unwrap_or(Value::Null)
    }

    pub(crate) fn visible_settled(&mut self, key: &AttributeKey) -> (Value, Version) {
        match self.settled(key) {
            Some(held) => (held.value, held.version),
            None => (self.default_for(key), Version::ZERO),
        }
    }

    pub(crate) fn resolve(&mut self, key: &AttributeKey) -> Value {
        if let Some(tx) = self.transactions.get(key) {
            if tx.state.is_editing() {
                return tx.draft.clone();
            }
        }
        self.visible_settled(key).0
    }
}

impl SyncEngine {
    /// What the UI should show for `key` right now. Never waits on the network.
    pub fn read(&self, key: &AttributeKey) -> Value {
        self.inner.borrow_mut().resolve(key)
    }

    /// The settled value with its version and origin, if one is known.
    pub fn read_attribute(&self, key: &AttributeKey) -> Option<AttributeValue> {
        self.inner.borrow_mut().settled(key)
    }

    pub fn version(&self, key: &AttributeKey) -> Version {
        self.inner.borrow_mut().held_version(key)
    }

    /// Read `key` from the durable store and reconcile the result like a
    /// remote announcement. `Ok(None)` means the store has no value.
    pub async fn refresh(&self, key: &AttributeKey) -> Result<Option<ReconcileOutcome>, SyncError> {
        let store = self.committer.store().clone();
        let fetched = store
            .get(key)
            .await
            .map_err(|source| SyncError::ReadFailure {
                key: key.to_string(),
                source,
            })?;

        let Some((value, version)) = fetched else {
            tracing::trace!(%key, "durable store has no value");
            return Ok(None);
        };
        let event = SyncEvent {
            key: key.clone(),
            value,
            version,
            origin_session: None,
        };
        Ok(Some(self.apply_remote(event)))
    }
}
