use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

use attrsync_core::{AttributeKey, AttributeRegistry, SyncEvent, UserId, Value};
use attrsync_engine::{Notification, Phase, ReconcileOutcome, Subscription, SyncEngine};
use attrsync_storage::SqliteCache;

use crate::network::PushHub;
use crate::store::MemoryStore;

/// One tab: an engine plus its end of the push channel.
pub struct TestSession {
    pub user: UserId,
    pub engine: SyncEngine,
    pub inbox: UnboundedReceiver<SyncEvent>,
}

impl TestSession {
    pub fn open(
        user: UserId,
        registry: AttributeRegistry,
        cache_path: Option<&str>,
        store: Rc<MemoryStore>,
        hub: Rc<PushHub>,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let cache = match cache_path {
            Some(path) => SqliteCache::open(path)?,
            None => SqliteCache::open_in_memory()?,
        };
        let engine = SyncEngine::new(registry, Box::new(cache), store, hub.clone());
        engine.hydrate(user)?;
        let inbox = hub.connect(user, engine.session_id());
        Ok(Self {
            user,
            engine,
            inbox,
        })
    }

    pub fn key(&self, name: &str) -> AttributeKey {
        AttributeKey::new(self.user, name)
    }

    /// Start recording every notification for `name`.
    pub fn record(&self, name: &str) -> Recorder {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        let subscription = self
            .engine
            .subscribe(&self.key(name), move |note: &Notification| {
                sink.borrow_mut().push(note.clone())
            });
        Recorder {
            _subscription: subscription,
            seen,
        }
    }

    /// Apply everything the push channel has delivered so far.
    pub fn drain_push(&mut self) -> Vec<ReconcileOutcome> {
        let mut outcomes = Vec::new();
        loop {
            match self.inbox.try_recv() {
                Ok(event) => outcomes.push(self.engine.apply_remote(event)),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        outcomes
    }
}

/// Notifications observed by one subscriber.
pub struct Recorder {
    _subscription: Subscription,
    seen: Rc<RefCell<Vec<Notification>>>,
}

impl Recorder {
    pub fn notes(&self) -> Vec<Notification> {
        self.seen.borrow().clone()
    }

    pub fn values(&self, phase: Phase) -> Vec<Value> {
        self.seen
            .borrow()
            .iter()
            .filter(|n| n.phase == phase)
            .map(|n| n.value.clone())
            .collect()
    }

    pub fn phases(&self) -> Vec<Phase> {
        self.seen.borrow().iter().map(|n| n.phase).collect()
    }

    pub fn clear(&self) {
        self.seen.borrow_mut().clear();
    }
}
