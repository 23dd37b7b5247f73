use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::{Rc, Weak};

use attrsync_core::{AttributeKey, SyncEvent, UserId, Value, Version};

use crate::error::PushError;

/// Why subscribers are being told about a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Optimistic, uncommitted edit from this session.
    Draft,
    /// This session's write was accepted.
    Committed,
    /// A draft was cancelled or its write failed; the durable value is back.
    Reverted,
    /// Another session's value was reconciled in.
    Remote,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub key: AttributeKey,
    pub value: Value,
    pub version: Version,
    pub phase: Phase,
}

type Callback = Rc<RefCell<dyn FnMut(&Notification)>>;

/// Same-device fan-out. Delivery is synchronous and in order; other sessions
/// are reached through a [`PushChannel`] instead.
#[derive(Default)]
pub struct SubscriberBus {
    next_id: Cell<u64>,
    subscribers: RefCell<HashMap<AttributeKey, Vec<(u64, Callback)>>>,
}

impl SubscriberBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        self: &Rc<Self>,
        key: &AttributeKey,
        callback: impl FnMut(&Notification) + 'static,
    ) -> Subscription {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let callback: Callback = Rc::new(RefCell::new(callback));
        self.subscribers
            .borrow_mut()
            .entry(key.clone())
            .or_default()
            .push((id, callback));
        Subscription {
            bus: Rc::downgrade(self),
            key: key.clone(),
            id,
        }
    }

    fn unsubscribe(&self, key: &AttributeKey, id: u64) {
        let mut subscribers = self.subscribers.borrow_mut();
        if let Some(list) = subscribers.get_mut(key) {
            list.retain(|(sid, _)| *sid != id);
            if list.is_empty() {
                subscribers.remove(key);
            }
        }
    }

    pub fn subscriber_count(&self, key: &AttributeKey) -> usize {
        self.subscribers.borrow().get(key).map_or(0, Vec::len)
    }

    /// Deliver in order. Callbacks may subscribe, unsubscribe, or call back
    /// into the engine; a callback that re-enters itself is skipped.
    pub fn dispatch(&self, notifications: &[Notification]) {
        for notification in notifications {
            let targets: Vec<Callback> = match self.subscribers.borrow().get(&notification.key) {
                Some(list) => list.iter().map(|(_, cb)| cb.clone()).collect(),
                None => continue,
            };
            for callback in targets {
                match callback.try_borrow_mut() {
                    Ok(mut f) => f(notification),
                    Err(_) => {
                        tracing::trace!(key = %notification.key, "skipping re-entrant subscriber")
                    }
                }
            }
        }
    }
}

/// Keeps a subscription alive; dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<SubscriberBus>,
    key: AttributeKey,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(&self.key, self.id);
        }
    }
}

/// Fire-and-forget announcement to every other session of a user.
/// Delivery is at-least-once and unordered across attributes.
pub trait PushChannel {
    fn publish(&self, user: UserId, event: &SyncEvent) -> Result<(), PushError>;
}

/// For sessions with no push transport (offline, single device).
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalOnly;

impl PushChannel for LocalOnly {
    fn publish(&self, _user: UserId, _event: &SyncEvent) -> Result<(), PushError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(key: &AttributeKey, n: i64) -> Notification {
        Notification {
            key: key.clone(),
            value: Value::Integer(n),
            version: Version::new(n as u64),
            phase: Phase::Remote,
        }
    }

    #[test]
    fn delivers_only_to_matching_key() {
        let bus = Rc::new(SubscriberBus::new());
        let user = UserId::new();
        let bio = AttributeKey::new(user, "bio");
        let accent = AttributeKey::new(user, "accentColor");
        let seen = Rc::new(RefCell::new(Vec::new()));

        let sink = seen.clone();
        let _sub = bus.subscribe(&bio, move |n| sink.borrow_mut().push(n.value.clone()));

        bus.dispatch(&[note(&bio, 1), note(&accent, 2), note(&bio, 3)]);
        assert_eq!(*seen.borrow(), vec![Value::Integer(1), Value::Integer(3)]);
    }

    #[test]
    fn dropping_subscription_unsubscribes() {
        let bus = Rc::new(SubscriberBus::new());
        let key = AttributeKey::new(UserId::new(), "bio");
        let hits = Rc::new(Cell::new(0));

        let counter = hits.clone();
        let sub = bus.subscribe(&key, move |_| counter.set(counter.get() + 1));
        let counter = hits.clone();
        let _other = bus.subscribe(&key, move |_| counter.set(counter.get() + 10));
        assert_eq!(bus.subscriber_count(&key), 2);

        drop(sub);
        bus.dispatch(&[note(&key, 1)]);
        assert_eq!(hits.get(), 10);
        assert_eq!(bus.subscriber_count(&key), 1);
    }

    #[test]
    fn callbacks_may_subscribe_during_dispatch() {
        let bus = Rc::new(SubscriberBus::new());
        let key = AttributeKey::new(UserId::new(), "bio");
        let late = Rc::new(RefCell::new(Vec::new()));

        let inner_bus = bus.clone();
        let inner_key = key.clone();
        let store = late.clone();
        let _sub = bus.subscribe(&key, move |_| {
            store.borrow_mut().push(inner_bus.subscribe(&inner_key, |_| {}));
        });

        bus.dispatch(&[note(&key, 1)]);
        assert_eq!(bus.subscriber_count(&key), 2);
    }
}
