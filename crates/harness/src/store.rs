use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Notify;

use attrsync_core::{AttributeKey, Value, Version};
use attrsync_storage::{DurableStore, StoreError};

/// In-memory durable store shared by every session of a test network.
///
/// Versions are assigned per key starting at 1. Writes can be held open with
/// [`MemoryStore::hold`] to observe in-flight behaviour, and failures can be
/// injected.
#[derive(Default)]
pub struct MemoryStore {
    values: RefCell<HashMap<AttributeKey, (Value, Version)>>,
    puts: RefCell<Vec<(AttributeKey, Value)>>,
    holding: Cell<bool>,
    gate: Notify,
    fail_next: Cell<usize>,
    unavailable: Cell<bool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write directly, as another device would, bypassing every engine.
    pub fn seed(&self, key: &AttributeKey, value: Value) -> Version {
        let mut values = self.values.borrow_mut();
        let version = values
            .get(key)
            .map_or(Version::new(1), |(_, v)| v.next());
        values.insert(key.clone(), (value, version));
        version
    }

    pub fn value(&self, key: &AttributeKey) -> Option<(Value, Version)> {
        self.values.borrow().get(key).cloned()
    }

    pub fn put_count(&self) -> usize {
        self.puts.borrow().len()
    }

    pub fn puts_for(&self, key: &AttributeKey) -> Vec<Value> {
        self.puts
            .borrow()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// Make subsequent puts wait until [`MemoryStore::release`].
    pub fn hold(&self) {
        self.holding.set(true);
    }

    /// Let every waiting put (and all future ones) through.
    pub fn release(&self) {
        self.holding.set(false);
        self.gate.notify_waiters();
    }

    /// Reject the next `n` puts.
    pub fn fail_next(&self, n: usize) {
        self.fail_next.set(n);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.set(unavailable);
    }
}

#[async_trait(?Send)]
impl DurableStore for MemoryStore {
    async fn get(&self, key: &AttributeKey) -> Result<Option<(Value, Version)>, StoreError> {
        if self.unavailable.get() {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(self.value(key))
    }

    async fn put(&self, key: &AttributeKey, value: &Value) -> Result<Version, StoreError> {
        self.puts.borrow_mut().push((key.clone(), value.clone()));
        while self.holding.get() {
            self.gate.notified().await;
        }
        if self.unavailable.get() {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        let remaining = self.fail_next.get();
        if remaining > 0 {
            self.fail_next.set(remaining - 1);
            return Err(StoreError::Rejected("injected failure".into()));
        }
        Ok(self.seed(key, value.clone()))
    }
}
