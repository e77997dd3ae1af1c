// ============================================================================
// Change Notifications
// ============================================================================
//
// Observers register per object type. Every commit that touches the type
// sends one ordered `RawChange` down the observer's channel while the store's
// write lock is still held, so versions arrive strictly increasing. Objects
// are detached against the committed state of that version before sending.
//
// ============================================================================

use super::engine::DatabaseInner;
use crate::core::{PersistError, PrimaryKey};
use serde_json::Value as JsonValue;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc::UnboundedSender;

#[derive(Debug, Clone)]
pub enum RawChange {
    Initial {
        version: u64,
        values: Vec<JsonValue>,
    },
    Update {
        version: u64,
        values: Vec<JsonValue>,
        deletions: Vec<usize>,
        insertions: Vec<usize>,
        modifications: Vec<usize>,
    },
    Error(PersistError),
}

impl RawChange {
    pub fn version(&self) -> Option<u64> {
        match self {
            Self::Initial { version, .. } | Self::Update { version, .. } => Some(*version),
            Self::Error(_) => None,
        }
    }
}

/// Index sets between two orderings of the same collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexChanges {
    /// Positions in the old ordering
    pub deletions: Vec<usize>,
    /// Positions in the new ordering
    pub insertions: Vec<usize>,
    /// Positions in the new ordering
    pub modifications: Vec<usize>,
}

impl IndexChanges {
    pub fn compute(before: &[PrimaryKey], after: &[PrimaryKey], modified: &HashSet<PrimaryKey>) -> Self {
        let before_set: HashSet<&PrimaryKey> = before.iter().collect();
        let after_set: HashSet<&PrimaryKey> = after.iter().collect();

        let deletions = before
            .iter()
            .enumerate()
            .filter(|(_, key)| !after_set.contains(key))
            .map(|(index, _)| index)
            .collect();

        let mut insertions = Vec::new();
        let mut modifications = Vec::new();
        for (index, key) in after.iter().enumerate() {
            if !before_set.contains(key) {
                insertions.push(index);
            } else if modified.contains(key) {
                modifications.push(index);
            }
        }

        Self {
            deletions,
            insertions,
            modifications,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deletions.is_empty() && self.insertions.is_empty() && self.modifications.is_empty()
    }
}

// ============================================================================
// Observer Registry
// ============================================================================

struct Observer {
    type_name: String,
    sender: UnboundedSender<RawChange>,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    next_id: u64,
    observers: HashMap<u64, Observer>,
}

impl ObserverRegistry {
    pub fn register(&mut self, type_name: &str, sender: UnboundedSender<RawChange>) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.observers.insert(
            id,
            Observer {
                type_name: type_name.to_string(),
                sender,
            },
        );
        id
    }

    pub fn remove(&mut self, id: u64) {
        self.observers.remove(&id);
    }

    pub fn observed_types(&self) -> HashSet<String> {
        self.observers
            .values()
            .map(|observer| observer.type_name.clone())
            .collect()
    }

    /// Sends `change` to every observer of `type_name`, dropping observers
    /// whose receiver is gone.
    pub fn send(&mut self, type_name: &str, change: &RawChange) {
        self.observers.retain(|_, observer| {
            if observer.type_name != type_name {
                return true;
            }
            observer.sender.send(change.clone()).is_ok()
        });
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

// ============================================================================
// Notification Token
// ============================================================================

struct TokenInner {
    id: u64,
    database: Weak<DatabaseInner>,
    active: AtomicBool,
}

/// Keeps an observation alive. Invalidating any clone stops delivery for all.
#[derive(Clone)]
pub struct NotificationToken {
    inner: Arc<TokenInner>,
}

impl NotificationToken {
    pub(crate) fn new(id: u64, database: Weak<DatabaseInner>) -> Self {
        Self {
            inner: Arc::new(TokenInner {
                id,
                database,
                active: AtomicBool::new(true),
            }),
        }
    }

    pub fn is_active(&self) -> bool {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn invalidate(&self) {
        if !self.inner.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(database) = self.inner.database.upgrade() {
            database.remove_observer(self.inner.id);
        }
    }
}

impl std::fmt::Debug for NotificationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationToken")
            .field("id", &self.inner.id)
            .field("active", &self.is_active())
            .finish()
    }
}
