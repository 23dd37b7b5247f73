use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use tokio::sync::oneshot;

use attrsync_core::{AttributeKey, Value, Version};
use attrsync_storage::{DurableStore, StoreError};

/// A value the store accepted, with the version it assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct Written {
    pub value: Value,
    pub version: Version,
}

type Waiter = oneshot::Sender<Result<Written, StoreError>>;

struct Queued {
    value: Value,
    waiters: Vec<Waiter>,
}

#[derive(Default)]
struct Slot {
    queued: Option<Queued>,
}

/// Serializes durable writes per attribute.
///
/// At most one `put` is in flight per key. A write requested while one is
/// pending is queued, and later requests replace the queued value, so only
/// the latest state reaches the store. Every queued caller receives the
/// outcome of the write that carried its value. Failures are returned, never
/// retried.
///
/// `SyncEngine` itself never overlaps writes for one key: `commit` requires a
/// drafting transaction and the transaction is Committing until the write
/// lands. The queue serves hosts that drive the committer directly.
pub struct Committer {
    store: Rc<dyn DurableStore>,
    // Presence of a slot means a write is in flight for that key.
    slots: RefCell<HashMap<AttributeKey, Slot>>,
}

/// Releases the slot if the draining future is dropped mid-write, so later
/// writes are not queued forever. Queued waiters see `StoreError::Abandoned`.
struct SlotGuard<'a> {
    committer: &'a Committer,
    key: &'a AttributeKey,
    armed: bool,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.committer.slots.borrow_mut().remove(self.key);
        }
    }
}

impl Committer {
    pub fn new(store: Rc<dyn DurableStore>) -> Self {
        Self {
            store,
            slots: RefCell::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Rc<dyn DurableStore> {
        &self.store
    }

    pub fn is_in_flight(&self, key: &AttributeKey) -> bool {
        self.slots.borrow().contains_key(key)
    }

    pub async fn write(&self, key: &AttributeKey, value: Value) -> Result<Written, StoreError> {
        if self.is_in_flight(key) {
            return self.enqueue(key, value).await;
        }
        self.slots.borrow_mut().insert(key.clone(), Slot::default());

        let mut guard = SlotGuard {
            committer: self,
            key,
            armed: true,
        };

        let first = self.put(key, value).await;

        loop {
            let next = self
                .slots
                .borrow_mut()
                .get_mut(key)
                .and_then(|slot| slot.queued.take());
            let Some(queued) = next else { break };

            let outcome = self.put(key, queued.value).await;
            for waiter in queued.waiters {
                let _ = waiter.send(outcome.clone());
            }
        }

        self.slots.borrow_mut().remove(key);
        guard.armed = false;
        first
    }

    /// Wait behind the in-flight put, replacing any value queued before.
    async fn enqueue(&self, key: &AttributeKey, value: Value) -> Result<Written, StoreError> {
        let (tx, rx) = oneshot::channel();
        {
            let mut slots = self.slots.borrow_mut();
            // Checked by the caller without yielding in between.
            let Some(slot) = slots.get_mut(key) else {
                return Err(StoreError::Abandoned);
            };
            match slot.queued.as_mut() {
                Some(queued) => {
                    queued.value = value;
                    queued.waiters.push(tx);
                }
                None => {
                    slot.queued = Some(Queued {
                        value,
                        waiters: vec![tx],
                    });
                }
            }
        }
        tracing::trace!(%key, "write queued behind in-flight put");
        rx.await.unwrap_or(Err(StoreError::Abandoned))
    }

    async fn put(&self, key: &AttributeKey, value: Value) -> Result<Written, StoreError> {
        match self.store.put(key, &value).await {
            Ok(version) => {
                tracing::debug!(%key, %version, "durable write accepted");
                Ok(Written { value, version })
            }
            Err(e) => {
                tracing::warn!(%key, error = %e, "durable write failed");
                Err(e)
            }
        }
    }
}
