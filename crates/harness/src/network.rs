use std::cell::{Cell, RefCell};
use std::rc::Rc;

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use attrsync_core::{AttributeRegistry, SessionId, SyncEvent, UserId};
use attrsync_engine::{PushChannel, PushError};

use crate::store::MemoryStore;
use crate::TestSession;

struct Route {
    user: UserId,
    session: SessionId,
    sender: UnboundedSender<SyncEvent>,
}

/// Push channel shared by all sessions in a network. Announcements are
/// delivered to every session of the user, the publisher included, as a real
/// fan-out service would.
#[derive(Default)]
pub struct PushHub {
    routes: RefCell<Vec<Route>>,
    published: RefCell<Vec<SyncEvent>>,
    duplicate: Cell<bool>,
    offline: Cell<bool>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, user: UserId, session: SessionId) -> UnboundedReceiver<SyncEvent> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.routes.borrow_mut().push(Route {
            user,
            session,
            sender,
        });
        receiver
    }

    pub fn disconnect(&self, session: SessionId) {
        self.routes.borrow_mut().retain(|r| r.session != session);
    }

    /// Deliver every announcement twice (at-least-once delivery).
    pub fn set_duplicate(&self, duplicate: bool) {
        self.duplicate.set(duplicate);
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.set(offline);
    }

    pub fn published(&self) -> Vec<SyncEvent> {
        self.published.borrow().clone()
    }
}

impl PushChannel for PushHub {
    fn publish(&self, user: UserId, event: &SyncEvent) -> Result<(), PushError> {
        if self.offline.get() {
            return Err(PushError("push hub offline".into()));
        }
        self.published.borrow_mut().push(event.clone());
        let copies = if self.duplicate.get() { 2 } else { 1 };
        for route in self.routes.borrow().iter().filter(|r| r.user == user) {
            for _ in 0..copies {
                // A closed receiver is a session that went away.
                let _ = route.sender.send(event.clone());
            }
        }
        tracing::trace!(key = %event.key, version = %event.version, "push published");
        Ok(())
    }
}

/// A durable store, a push hub, and any number of sessions sharing them.
pub struct TestNetwork {
    store: Rc<MemoryStore>,
    hub: Rc<PushHub>,
    registry: AttributeRegistry,
    sessions: Vec<TestSession>,
}

impl TestNetwork {
    pub fn new(registry: AttributeRegistry) -> Self {
        Self {
            store: Rc::new(MemoryStore::new()),
            hub: Rc::new(PushHub::new()),
            registry,
            sessions: Vec::new(),
        }
    }

    pub fn store(&self) -> &Rc<MemoryStore> {
        &self.store
    }

    pub fn hub(&self) -> &Rc<PushHub> {
        &self.hub
    }

    /// Open a session for `user` with an in-memory cache.
    pub fn add_session(&mut self, user: UserId) -> Result<usize, Box<dyn std::error::Error>> {
        let session = TestSession::open(
            user,
            self.registry.clone(),
            None,
            self.store.clone(),
            self.hub.clone(),
        )?;
        let index = self.sessions.len();
        self.sessions.push(session);
        Ok(index)
    }

    /// Open a session whose cache lives at `path`, as a reloaded tab would.
    pub fn add_session_with_cache(
        &mut self,
        user: UserId,
        path: &str,
    ) -> Result<usize, Box<dyn std::error::Error>> {
        let session = TestSession::open(
            user,
            self.registry.clone(),
            Some(path),
            self.store.clone(),
            self.hub.clone(),
        )?;
        let index = self.sessions.len();
        self.sessions.push(session);
        Ok(index)
    }

    pub fn session(&self, index: usize) -> &TestSession {
        &self.sessions[index]
    }

    pub fn session_mut(&mut self, index: usize) -> &mut TestSession {
        &mut self.sessions[index]
    }

    /// Close a session, e.g. before reopening it from its cache.
    pub fn close_session(&mut self, index: usize) -> TestSession {
        let session = self.sessions.remove(index);
        self.hub.disconnect(session.engine.session_id());
        session
    }
}
