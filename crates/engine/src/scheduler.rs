use attrsync_core::{AttributeKey, UserId, Value};

pub type Producer = Box<dyn FnOnce() -> Value>;

/// Keeps at most one pending producer per attribute until the host closes the
/// frame; scheduling again before then replaces it.
#[derive(Default)]
pub struct FrameScheduler {
    // Insertion order is kept so a frame applies keys in first-touched order.
    pending: Vec<(AttributeKey, Producer)>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `producer` for the next frame. Returns `true` if it replaced a
    /// producer already pending for `key`.
    pub fn schedule(&mut self, key: &AttributeKey, producer: Producer) -> bool {
        match self.pending.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => {
                *slot = producer;
                true
            }
            None => {
                self.pending.push((key.clone(), producer));
                false
            }
        }
    }

    pub fn has_pending(&self, key: &AttributeKey) -> bool {
        self.pending.iter().any(|(k, _)| k == key)
    }

    /// Pull the pending producer for one key out of the current frame.
    pub fn take(&mut self, key: &AttributeKey) -> Option<Producer> {
        let index = self.pending.iter().position(|(k, _)| k == key)?;
        Some(self.pending.remove(index).1)
    }

    pub fn discard(&mut self, key: &AttributeKey) -> bool {
        self.take(key).is_some()
    }

    /// Drop every pending producer for `user`. Returns how many went.
    pub fn discard_user(&mut self, user: UserId) -> usize {
        let before = self.pending.len();
        self.pending.retain(|(key, _)| key.user() != user);
        before - self.pending.len()
    }

    /// Close the current frame, handing back everything that was pending.
    pub fn take_frame(&mut self) -> Vec<(AttributeKey, Producer)> {
        std::mem::take(&mut self.pending)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
