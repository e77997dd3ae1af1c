// ============================================================================
// Live Queries
// ============================================================================

use super::managed::Managed;
use super::{Persistable, detach};
use crate::core::{ObjectKey, PersistError, Record, Result};
use crate::storage::{Database, NotificationToken, RawChange};
use serde_json::Value as JsonValue;
use std::fmt;
use std::marker::PhantomData;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;
use tracing::warn;

/// Every stored object of `T`, evaluated on access.
pub struct Results<T> {
    database: Database,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistable> Results<T> {
    pub(crate) fn new(database: &Database) -> Result<Self> {
        database.registry().get(T::schema().name)?;
        Ok(Self {
            database: database.clone(),
            _marker: PhantomData,
        })
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Managed handles, bound to the calling thread's session.
    pub fn to_vec(&self) -> Vec<Managed<T>> {
        T::all(&self.database)
    }

    /// Detached copies of every object.
    pub fn unmanaged_vec(&self) -> Vec<T> {
        let session = self.database.session();
        let result = session.records(T::schema().name).and_then(|records| {
            let records: Vec<Record> = records.into_iter().map(|(_, record)| record).collect();
            detach_all(&self.database, &records)
        });
        result
            .inspect_err(|err| warn!(error = %err, type_name = T::schema().name, "unmanaged_vec failed"))
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.database
            .session()
            .records(T::schema().name)
            .map(|records| records.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Starts observing the collection. The first notification is always the
    /// current contents.
    pub fn observe(&self) -> Result<Subscription<T>> {
        let (token, receiver) = self.database.observe_raw(T::schema().name)?;
        Ok(Subscription {
            token,
            receiver,
            database: self.database.clone(),
            _marker: PhantomData,
        })
    }
}

impl<T> Clone for Results<T> {
    fn clone(&self) -> Self {
        Self {
            database: self.database.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Results<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Results")
            .field("database", &self.database)
            .finish()
    }
}

/// One notification of a live query.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange<T> {
    /// The collection when observation started
    Initial(Vec<T>),
    /// The collection after a commit. `deletions` index the previous
    /// collection, `insertions` and `modifications` this one.
    Update {
        results: Vec<T>,
        deletions: Vec<usize>,
        insertions: Vec<usize>,
        modifications: Vec<usize>,
    },
    Error(PersistError),
}

/// Receiving end of [`Results::observe`].
///
/// Versions arrive strictly increasing. Nothing is delivered after the token
/// is invalidated; dropping the subscription invalidates it.
pub struct Subscription<T> {
    token: NotificationToken,
    receiver: UnboundedReceiver<RawChange>,
    database: Database,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistable> Subscription<T> {
    pub fn token(&self) -> &NotificationToken {
        &self.token
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn invalidate(&self) {
        self.token.invalidate();
    }

    /// Next notification, or `None` once the subscription is invalidated.
    pub async fn recv(&mut self) -> Option<CollectionChange<T>> {
        if !self.token.is_active() {
            return None;
        }
        let raw = self.receiver.recv().await?;
        self.deliver(raw)
    }

    /// Blocking form of [`recv`](Self::recv) for synchronous code.
    pub fn blocking_recv(&mut self) -> Option<CollectionChange<T>> {
        if !self.token.is_active() {
            return None;
        }
        let raw = self.receiver.blocking_recv()?;
        self.deliver(raw)
    }

    /// Next queued notification without waiting.
    pub fn try_recv(&mut self) -> Option<CollectionChange<T>> {
        if !self.token.is_active() {
            return None;
        }
        match self.receiver.try_recv() {
            Ok(raw) => self.deliver(raw),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    fn deliver(&self, raw: RawChange) -> Option<CollectionChange<T>> {
        if !self.token.is_active() {
            return None;
        }
        Some(self.convert(raw))
    }

    /// Values arrive already detached at the commit's version; only the
    /// typed decode happens here.
    fn convert(&self, raw: RawChange) -> CollectionChange<T> {
        match raw {
            RawChange::Initial { values, .. } => match decode_all(values) {
                Ok(results) => CollectionChange::Initial(results),
                Err(err) => CollectionChange::Error(err),
            },
            RawChange::Update {
                values,
                deletions,
                insertions,
                modifications,
                ..
            } => match decode_all(values) {
                Ok(results) => CollectionChange::Update {
                    results,
                    deletions,
                    insertions,
                    modifications,
                },
                Err(err) => CollectionChange::Error(err),
            },
            RawChange::Error(err) => CollectionChange::Error(err),
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.token.invalidate();
    }
}

impl<T> fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .finish()
    }
}

fn decode_all<T: Persistable>(values: Vec<JsonValue>) -> Result<Vec<T>> {
    values
        .into_iter()
        .map(|value| Ok(serde_json::from_value(value)?))
        .collect()
}

fn detach_all<T: Persistable>(database: &Database, records: &[Record]) -> Result<Vec<T>> {
    let session = database.session();
    let schema = T::schema();
    records
        .iter()
        .map(|record| {
            let mut path = vec![ObjectKey::new(schema.name, schema.primary_key_of(record)?)];
            let json = detach::detach_record(&session, schema, record, &mut path)?;
            Ok(serde_json::from_value(json)?)
        })
        .collect()
}
