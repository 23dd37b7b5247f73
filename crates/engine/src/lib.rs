pub mod broadcast;
pub mod committer;
pub mod config;
pub mod error;
pub mod reconcile;
pub mod resolver;
pub mod scheduler;
pub mod transaction;

pub use broadcast::{LocalOnly, Notification, Phase, PushChannel, SubscriberBus, Subscription};
pub use committer::{Committer, Written};
pub use config::EngineConfig;
pub use error::{PushError, SyncError};
pub use reconcile::ReconcileOutcome;
pub use scheduler::FrameScheduler;
pub use transaction::{Transaction, TransactionTable, TxState};

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;

use attrsync_core::{
    AttributeKey, AttributeRegistry, AttributeValue, Origin, SessionId, SyncEvent, UserId, Value,
};
use attrsync_storage::{CacheStore, DurableStore};

#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
    /// The store accepted the draft under this version.
    Committed(AttributeValue),
    /// The draft matched its baseline; nothing was written.
    Unchanged,
}

/// Session-local state. Only ever borrowed for the duration of a synchronous
/// step; never across an `.await` or while subscribers run.
pub(crate) struct Inner {
    session: SessionId,
    registry: AttributeRegistry,
    config: EngineConfig,
    cache: Box<dyn CacheStore>,
    held: HashMap<AttributeKey, AttributeValue>,
    transactions: TransactionTable,
    scheduler: FrameScheduler,
}

impl Inner {
    fn validate(&self, key: &AttributeKey, value: &Value) -> Result<(), SyncError> {
        let descriptor = self
            .registry
            .get(key.name())
            .ok_or_else(|| SyncError::UnknownAttribute(key.name().to_string()))?;
        descriptor.validate(value)?;
        Ok(())
    }

    fn debounce_for(&self, key: &AttributeKey) -> Duration {
        self.registry
            .get(key.name())
            .and_then(|d| d.debounce)
            .unwrap_or_else(|| self.config.debounce())
    }

    /// Replace the draft of an editing transaction. Returns `false` if the key
    /// has no transaction that accepts drafts any more.
    fn apply_draft(
        &mut self,
        key: &AttributeKey,
        value: Value,
        notes: &mut Vec<Notification>,
    ) -> bool {
        match self.transactions.get_mut(key) {
            Some(tx) if tx.state.is_editing() => tx.draft = value.clone(),
            _ => return false,
        }
        let version = self.held_version(key);
        notes.push(Notification {
            key: key.clone(),
            value,
            version,
            phase: Phase::Draft,
        });
        true
    }

    /// Take a successful write into the held state. Reopens the draft if the
    /// user kept editing while it was in flight.
    fn settle_written(
        &mut self,
        key: &AttributeKey,
        written: &Written,
        attribute: &AttributeValue,
        notes: &mut Vec<Notification>,
    ) {
        let accepted = self.accept(key, attribute.clone(), Phase::Committed);

        // An update still waiting for its frame counts as moving on.
        let moved_on = self.scheduler.has_pending(key)
            || self
                .transactions
                .get(key)
                .is_some_and(|tx| tx.draft != written.value);
        if moved_on {
            if let Some(tx) = self.transactions.get_mut(key) {
                tx.state = TxState::Drafting;
                tx.last_durable = written.value.clone();
            }
            tracing::debug!(
                %key,
                version = %written.version,
                "committed; draft moved on during write"
            );
            return;
        }

        let pending = self.transactions.remove(key).and_then(|tx| tx.pending_remote);
        match accepted {
            Some(note) => notes.push(note),
            None => {
                tracing::warn!(
                    %key,
                    version = %written.version,
                    "store returned a version that is not newer than the held value"
                );
                // Subscribers last saw the draft; show them what is held.
                notes.push(self.reverted(key));
            }
        }
        self.settle_pending(pending, notes);
        tracing::debug!(%key, version = %written.version, "committed");
    }

    /// Notification restoring the settled value after a draft ends without
    /// being committed.
    fn reverted(&mut self, key: &AttributeKey) -> Notification {
        let (value, version) = self.visible_settled(key);
        Notification {
            key: key.clone(),
            value,
            version,
            phase: Phase::Reverted,
        }
    }
}

fn invalid_state(key: &AttributeKey, state: TxState, op: &'static str) -> SyncError {
    SyncError::InvalidState {
        key: key.to_string(),
        state: state.as_str(),
        op,
    }
}

/// Optimistic attribute synchronization for one session.
///
/// Cloning is cheap and yields another handle to the same session; all
/// handles must stay on one thread.
#[derive(Clone)]
pub struct SyncEngine {
    inner: Rc<RefCell<Inner>>,
    committer: Rc<Committer>,
    bus: Rc<SubscriberBus>,
    push: Rc<dyn PushChannel>,
}

impl SyncEngine {
    pub fn new(
        registry: AttributeRegistry,
        cache: Box<dyn CacheStore>,
        store: Rc<dyn DurableStore>,
        push: Rc<dyn PushChannel>,
    ) -> Self {
        let session = SessionId::new();
        tracing::debug!(%session, attributes = registry.len(), "sync engine started");
        Self {
            inner: Rc::new(RefCell::new(Inner {
                session,
                registry,
                config: EngineConfig::default(),
                cache,
                held: HashMap::new(),
                transactions: TransactionTable::new(),
                scheduler: FrameScheduler::new(),
            })),
            committer: Rc::new(Committer::new(store)),
            bus: Rc::new(SubscriberBus::new()),
            push,
        }
    }

    pub fn with_config(self, config: EngineConfig) -> Self {
        self.inner.borrow_mut().config = config;
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.borrow().session
    }

    pub fn config(&self) -> EngineConfig {
        self.inner.borrow().config.clone()
    }

    pub fn committer(&self) -> &Committer {
        &self.committer
    }

    /// Load every cached attribute of `user` into memory for instant first
    /// paint. Returns how many entries were taken.
    pub fn hydrate(&self, user: UserId) -> Result<usize, SyncError> {
        let mut inner = self.inner.borrow_mut();
        let entries = inner.cache.load_user(user)?;
        let mut loaded = 0;
        for entry in entries {
            let newer = inner
                .held
                .get(&entry.key)
                .is_none_or(|held| entry.attribute.is_newer_than(held.version));
            if newer {
                inner.held.insert(entry.key, entry.attribute);
                loaded += 1;
            }
        }
        tracing::debug!(%user, loaded, "hydrated from cache");
        Ok(loaded)
    }

    /// Drop everything known about `user` locally, including the cache.
    /// Open drafts for that user are discarded without notification.
    pub fn forget_user(&self, user: UserId) -> Result<usize, SyncError> {
        let mut inner = self.inner.borrow_mut();
        inner.held.retain(|key, _| key.user() != user);
        let dropped = inner.transactions.discard_user(user);
        inner.scheduler.discard_user(user);
        let removed = inner.cache.clear_user(user)?;
        tracing::debug!(%user, dropped, removed, "forgot user");
        Ok(removed)
    }

    pub fn subscribe(
        &self,
        key: &AttributeKey,
        callback: impl FnMut(&Notification) + 'static,
    ) -> Subscription {
        self.bus.subscribe(key, callback)
    }

    pub fn state(&self, key: &AttributeKey) -> TxState {
        self.inner.borrow().transactions.state(key)
    }

    /// Start (or continue) an optimistic edit of `key`, showing `current`.
    pub fn begin_draft(&self, key: &AttributeKey, current: Value) -> Result<(), SyncError> {
        let mut notes = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            inner.validate(key, &current)?;

            match inner.transactions.get_mut(key) {
                Some(tx) => match tx.state {
                    // No stacking: the existing transaction keeps its baseline.
                    TxState::Drafting => {
                        tx.draft = current.clone();
                        tx.revision += 1;
                    }
                    TxState::Committing => {
                        return Err(SyncError::CommitInFlight(key.to_string()));
                    }
                    state => return Err(invalid_state(key, state, "begin")),
                },
                None => inner
                    .transactions
                    .insert(key.clone(), Transaction::begin(current.clone())),
            }
            inner.scheduler.discard(key);

            let version = inner.held_version(key);
            tracing::debug!(%key, %version, "draft started");
            notes.push(Notification {
                key: key.clone(),
                value: current,
                version,
                phase: Phase::Draft,
            });
        }
        self.bus.dispatch(&notes);
        Ok(())
    }

    /// Schedule a new draft value for the next frame. Allowed while a commit
    /// is in flight; the newest draft always wins.
    pub fn update_draft(&self, key: &AttributeKey, value: Value) -> Result<(), SyncError> {
        let mut inner = self.inner.borrow_mut();
        inner.validate(key, &value)?;

        let tx = match inner.transactions.get_mut(key) {
            Some(tx) if tx.state.is_editing() => tx,
            other => {
                let state = other.map_or(TxState::Idle, |tx| tx.state);
                return Err(invalid_state(key, state, "update"));
            }
        };
        tx.revision += 1;
        inner.scheduler.schedule(key, Box::new(move || value));
        Ok(())
    }

    /// Close the current frame: apply at most one coalesced draft per key and
    /// notify subscribers. Returns the number of drafts applied.
    pub fn run_frame(&self) -> usize {
        let frame = self.inner.borrow_mut().scheduler.take_frame();
        if frame.is_empty() {
            return 0;
        }
        // Producers run without the state borrowed so they may read the engine.
        let values: Vec<(AttributeKey, Value)> = frame
            .into_iter()
            .map(|(key, producer)| (key, producer()))
            .collect();

        let mut notes = Vec::new();
        let mut applied = 0;
        {
            let mut inner = self.inner.borrow_mut();
            for (key, value) in values {
                if inner.apply_draft(&key, value, &mut notes) {
                    applied += 1;
                } else {
                    tracing::trace!(%key, "dropping draft update for settled attribute");
                }
            }
        }
        self.bus.dispatch(&notes);
        applied
    }

    /// Run frames forever at the configured interval. Hosts without their own
    /// render loop spawn this on their local task set.
    pub async fn drive_frames(&self) {
        let mut ticker = tokio::time::interval(self.config().frame_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.run_frame();
        }
    }

    /// Discard the draft and show exactly what was visible before it began.
    /// Never touches the network.
    pub fn cancel(&self, key: &AttributeKey) -> Result<(), SyncError> {
        let mut notes = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            let state = inner.transactions.state(key);
            if state != TxState::Drafting {
                return Err(invalid_state(key, state, "cancel"));
            }
            inner.scheduler.discard(key);
            let pending = inner.transactions.remove(key).and_then(|tx| tx.pending_remote);
            let note = inner.reverted(key);
            notes.push(note);
            inner.settle_pending(pending, &mut notes);
            tracing::debug!(%key, "draft cancelled");
        }
        self.bus.dispatch(&notes);
        Ok(())
    }

    /// Persist the current draft. The optimistic value stays visible while the
    /// write is outstanding; on failure the durable value is restored and
    /// `SyncError::WriteFailure` returned.
    pub async fn commit(&self, key: &AttributeKey) -> Result<CommitOutcome, SyncError> {
        let state = self.state(key);
        if state != TxState::Drafting {
            return Err(invalid_state(key, state, "commit"));
        }

        let mut notes = Vec::new();
        // The last gesture position may still be waiting for its frame.
        let pending = self.inner.borrow_mut().scheduler.take(key);
        if let Some(producer) = pending {
            let value = producer();
            self.inner.borrow_mut().apply_draft(key, value, &mut notes);
        }

        let value = {
            let mut inner = self.inner.borrow_mut();
            let unchanged = match inner.transactions.get_mut(key) {
                Some(tx) if tx.state == TxState::Drafting => {
                    if !tx.is_unchanged() {
                        tx.state = TxState::Committing;
                    }
                    tx.is_unchanged()
                }
                other => {
                    let state = other.map_or(TxState::Idle, |tx| tx.state);
                    drop(inner);
                    self.bus.dispatch(&notes);
                    return Err(invalid_state(key, state, "commit"));
                }
            };

            if unchanged {
                let pending = inner.transactions.remove(key).and_then(|tx| tx.pending_remote);
                inner.settle_pending(pending, &mut notes);
                None
            } else {
                inner.transactions.get(key).map(|tx| tx.draft.clone())
            }
        };

        self.bus.dispatch(&notes);
        let Some(value) = value else {
            tracing::debug!(%key, "draft unchanged; skipping write");
            return Ok(CommitOutcome::Unchanged);
        };

        tracing::debug!(%key, "commit issued");
        match self.committer.write(key, value).await {
            Ok(written) => Ok(CommitOutcome::Committed(self.settle_commit(key, written))),
            Err(source) => {
                self.revert(key);
                Err(SyncError::WriteFailure {
                    key: key.to_string(),
                    source,
                })
            }
        }
    }

    fn settle_commit(&self, key: &AttributeKey, written: Written) -> AttributeValue {
        let mut notes = Vec::new();
        let (attribute, forgotten) = {
            let mut inner = self.inner.borrow_mut();
            let attribute = AttributeValue::new(
                written.value.clone(),
                written.version,
                Origin::Session(inner.session),
            );
            // The user was forgotten while the write was in flight.
            let forgotten = inner.transactions.get(key).is_none();
            if forgotten {
                tracing::debug!(
                    %key,
                    version = %written.version,
                    "write landed for forgotten user; not kept"
                );
            } else {
                inner.settle_written(key, &written, &attribute, &mut notes);
            }
            (attribute, forgotten)
        };

        if !forgotten {
            let event = SyncEvent::from_attribute(key.clone(), &attribute);
            if let Err(e) = self.push.publish(key.user(), &event) {
                tracing::warn!(%key, error = %e, "commit not announced to other sessions");
            }
        }
        self.bus.dispatch(&notes);
        attribute
    }

    fn revert(&self, key: &AttributeKey) {
        let note = {
            let mut inner = self.inner.borrow_mut();
            if let Some(tx) = inner.transactions.get_mut(key) {
                tx.state = TxState::Reverting;
            }
            inner.reverted(key)
        };
        // Subscribers observe the Reverting state while the rollback is shown.
        self.bus.dispatch(&[note]);

        let mut notes = Vec::new();
        {
            let mut inner = self.inner.borrow_mut();
            let pending = inner.transactions.remove(key).and_then(|tx| tx.pending_remote);
            inner.settle_pending(pending, &mut notes);
        }
        tracing::debug!(%key, "draft rolled back after failed write");
        self.bus.dispatch(&notes);
    }

    /// One-shot edit for discrete inputs (uploads, swatch clicks).
    pub async fn set(&self, key: &AttributeKey, value: Value) -> Result<CommitOutcome, SyncError> {
        self.inner.borrow().validate(key, &value)?;
        let current = self.read(key);
        self.begin_draft(key, current)?;
        self.update_draft(key, value)?;
        self.commit(key).await
    }

    /// Auto-save: commit once the draft has been quiet for the attribute's
    /// debounce. Returns `Ok(None)` if a newer update or a cancel arrived in
    /// the meantime; the caller that scheduled that newer update owns the save.
    pub async fn commit_after_quiet(
        &self,
        key: &AttributeKey,
    ) -> Result<Option<CommitOutcome>, SyncError> {
        let (revision, delay) = {
            let inner = self.inner.borrow();
            let tx = inner
                .transactions
                .get(key)
                .ok_or_else(|| invalid_state(key, TxState::Idle, "auto-save"))?;
            (tx.revision, inner.debounce_for(key))
        };

        loop {
            tokio::time::sleep(delay).await;
            let state = {
                let inner = self.inner.borrow();
                match inner.transactions.get(key) {
                    Some(tx) if tx.revision == revision => tx.state,
                    _ => return Ok(None),
                }
            };
            match state {
                TxState::Drafting => return self.commit(key).await.map(Some),
                // An earlier save is still in flight; try again after it lands.
                TxState::Committing => continue,
                _ => return Ok(None),
            }
        }
    }
}
