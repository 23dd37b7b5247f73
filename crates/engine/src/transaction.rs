use std::collections::HashMap;

use attrsync_core::{AttributeKey, SyncEvent, UserId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Drafting,
    Committing,
    Reverting,
}

impl TxState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Drafting => "drafting",
            Self::Committing => "committing",
            Self::Reverting => "reverting",
        }
    }

    /// A local edit is in progress; remote values must wait.
    pub fn is_editing(&self) -> bool {
        matches!(self, Self::Drafting | Self::Committing)
    }
}

/// Draft state for one attribute in this session.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub state: TxState,
    /// What the user currently sees.
    pub draft: Value,
    /// Baseline captured at `begin_draft`; an unchanged draft commits nothing.
    pub last_durable: Value,
    /// Highest-versioned remote announcement held back while editing.
    pub pending_remote: Option<SyncEvent>,
    /// Bumped on every accepted update; auto-save uses it to detect newer input.
    pub revision: u64,
}

impl Transaction {
    pub fn begin(current: Value) -> Self {
        Self {
            state: TxState::Drafting,
            draft: current.clone(),
            last_durable: current,
            pending_remote: None,
            revision: 0,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        self.draft == self.last_durable
    }

    /// Keep only the newest deferred event. Returns `false` if `event` was
    /// older than one already stashed.
    pub fn stash_remote(&mut self, event: SyncEvent) -> bool {
        match &self.pending_remote {
            Some(held) if held.version >= event.version => false,
            _ => {
                self.pending_remote = Some(event);
                true
            }
        }
    }
}

/// At most one transaction per attribute; beginning again reuses it.
#[derive(Debug, Default)]
pub struct TransactionTable {
    transactions: HashMap<AttributeKey, Transaction>,
}

impl TransactionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, key: &AttributeKey) -> TxState {
        self.transactions
            .get(key)
            .map(|tx| tx.state)
            .unwrap_or(TxState::Idle)
    }

    pub fn get(&self, key: &AttributeKey) -> Option<&Transaction> {
        self.transactions.get(key)
    }

    pub fn get_mut(&mut self, key: &AttributeKey) -> Option<&mut Transaction> {
        self.transactions.get_mut(key)
    }

    pub fn insert(&mut self, key: AttributeKey, tx: Transaction) {
        self.transactions.insert(key, tx);
    }

    pub fn remove(&mut self, key: &AttributeKey) -> Option<Transaction> {
        self.transactions.remove(key)
    }

    /// Drop every transaction belonging to `user`. Returns how many went.
    pub fn discard_user(&mut self, user: UserId) -> usize {
        let before = self.transactions.len();
        self.transactions.retain(|key, _| key.user() != user);
        before - self.transactions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attrsync_core::Version;

    fn event(key: &AttributeKey, version: u64) -> SyncEvent {
        SyncEvent {
            key: key.clone(),
            value: Value::Integer(version as i64),
            version: Version::new(version),
            origin_session: None,
        }
    }

    #[test]
    fn stash_keeps_highest_version() {
        let key = AttributeKey::new(UserId::new(), "bio");
        let mut tx = Transaction::begin(Value::Null);

        assert!(tx.stash_remote(event(&key, 5)));
        assert!(!tx.stash_remote(event(&key, 3)));
        assert!(!tx.stash_remote(event(&key, 5)));
        assert!(tx.stash_remote(event(&key, 7)));
        assert_eq!(tx.pending_remote.map(|e| e.version), Some(Version::new(7)));
    }

    #[test]
    fn missing_transaction_reads_as_idle() {
        let key = AttributeKey::new(UserId::new(), "bio");
        let mut table = TransactionTable::new();
        assert_eq!(table.state(&key), TxState::Idle);

        table.insert(key.clone(), Transaction::begin(Value::from("hi")));
        assert_eq!(table.state(&key), TxState::Drafting);
        assert!(table.get(&key).is_some_and(Transaction::is_unchanged));

        table.remove(&key);
        assert_eq!(table.state(&key), TxState::Idle);
        assert!(table.get(&key).is_none());
    }
}
