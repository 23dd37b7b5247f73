use attrsync_core::{AttributeKey, AttributeValue, SyncEvent};
use attrsync_storage::CacheEntry;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::broadcast::{Notification, Phase};
use crate::{Inner, SyncEngine};

/// What happened to a value this session did not draft.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Applied,
    /// Held back until the local transaction on the key ends.
    Deferred,
    /// This session's own commit coming back; already applied.
    Echo,
    /// Not newer than what is held. Normal under at-least-once delivery.
    StaleIgnored,
}

impl Inner {
    pub(crate) fn reconcile(
        &mut self,
        event: SyncEvent,
        notes: &mut Vec<Notification>,
    ) -> ReconcileOutcome {
        if event.origin_session == Some(self.session) {
            tracing::trace!(
                key = %event.key,
                version = %event.version,
                "ignoring echo of own commit"
            );
            return ReconcileOutcome::Echo;
        }

        if let Some(tx) = self.transactions.get_mut(&event.key) {
            // Any live transaction (including a rollback in progress) defers.
            tracing::debug!(
                key = %event.key,
                version = %event.version,
                state = tx.state.as_str(),
                "deferring remote value during local edit"
            );
            tx.stash_remote(event);
            return ReconcileOutcome::Deferred;
        }

        let key = event.key.clone();
        match self.accept(&key, event.to_attribute(), Phase::Remote) {
            Some(note) => {
                notes.push(note);
                ReconcileOutcome::Applied
            }
            None => ReconcileOutcome::StaleIgnored,
        }
    }

    /// Store `attribute` in memory and cache if it is strictly newer than the
    /// held version. Returns the notification to send, or `None` if stale.
    pub(crate) fn accept(
        &mut self,
        key: &AttributeKey,
        attribute: AttributeValue,
        phase: Phase,
    ) -> Option<Notification> {
        let held = self.held_version(key);
        if !attribute.is_newer_than(held) {
            tracing::trace!(%key, incoming = %attribute.version, %held, "stale value ignored");
            return None;
        }

        let entry = CacheEntry::new(key.clone(), attribute.clone());
        if let Err(e) = self.cache.set(&entry) {
            tracing::warn!(%key, error = %e, "cache write failed; value kept in memory only");
        }
        let note = Notification {
            key: key.clone(),
            value: attribute.value.clone(),
            version: attribute.version,
            phase,
        };
        tracing::debug!(%key, version = %attribute.version, ?phase, "value accepted");
        self.held.insert(key.clone(), attribute);
        Some(note)
    }

    /// Re-check a deferred announcement once its transaction is gone.
    pub(crate) fn settle_pending(
        &mut self,
        pending: Option<SyncEvent>,
        notes: &mut Vec<Notification>,
    ) {
        if let Some(event) = pending {
            let outcome = self.reconcile(event, notes);
            tracing::debug!(?outcome, "settled deferred remote value");
        }
    }
}

impl SyncEngine {
    /// Feed one announcement from another session (or tab) into this one.
    pub fn apply_remote(&self, event: SyncEvent) -> ReconcileOutcome {
        let mut notes = Vec::new();
        let outcome = self.inner.borrow_mut().reconcile(event, &mut notes);
        self.bus.dispatch(&notes);
        outcome
    }

    /// Apply push-channel deliveries until the channel closes.
    pub async fn pump_remote(&self, receiver: &mut UnboundedReceiver<SyncEvent>) {
        while let Some(event) = receiver.recv().await {
            self.apply_remote(event);
        }
        tracing::debug!(session = %self.session_id(), "push channel closed");
    }
}
