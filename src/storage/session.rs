// ============================================================================
// Sessions and Write Transactions
// ============================================================================
//
// A session is one thread's view of a database. It is deliberately `!Send`:
// managed objects hold their session, so they cannot leave the thread either.
// Writes are staged in the session and become visible to other sessions only
// when the transaction commits. An open write transaction holds the database's
// writer lease, so other threads' `begin_write` waits for it.
//
// ============================================================================

use super::engine::{Database, WriterLease};
use crate::core::{ObjectKey, PersistError, PrimaryKey, Record, Result};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::rc::{Rc, Weak};
use tracing::warn;

/// What to do when an added object's primary key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpdatePolicy {
    /// Fail with `ObjectAlreadyExists`
    Error,
    /// Overwrite, but only record a change when some field differs
    Modified,
    /// Overwrite and always record a change
    #[default]
    All,
}

/// Uncommitted writes of one transaction, in first-touched order.
#[derive(Debug, Default)]
pub(crate) struct StagedChanges {
    order: Vec<ObjectKey>,
    changes: HashMap<ObjectKey, Option<Record>>,
}

impl StagedChanges {
    /// `None` stages a deletion.
    pub fn stage(&mut self, key: ObjectKey, change: Option<Record>) {
        if !self.changes.contains_key(&key) {
            self.order.push(key.clone());
        }
        self.changes.insert(key, change);
    }

    pub fn get(&self, key: &ObjectKey) -> Option<&Option<Record>> {
        self.changes.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn touched_types(&self) -> BTreeSet<String> {
        self.order.iter().map(|key| key.type_name.clone()).collect()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ObjectKey> {
        self.order.iter()
    }

    pub fn into_ordered(mut self) -> Vec<(ObjectKey, Option<Record>)> {
        let mut ordered = Vec::with_capacity(self.order.len());
        for key in self.order {
            if let Some(change) = self.changes.remove(&key) {
                ordered.push((key, change));
            }
        }
        ordered
    }
}

pub(crate) struct SessionInner {
    database: Database,
    write: RefCell<Option<StagedChanges>>,
    lease: RefCell<Option<WriterLease>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if self.write.get_mut().is_some() {
            warn!("session dropped inside a write transaction; staged changes discarded");
        }
    }
}

#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

/// Cancels the transaction if the closure given to [`Session::write`] unwinds.
struct CancelOnUnwind<'a> {
    session: &'a Session,
    armed: bool,
}

impl Drop for CancelOnUnwind<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.session.cancel_write();
        }
    }
}

impl Session {
    pub(crate) fn new(database: Database) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                database,
                write: RefCell::new(None),
                lease: RefCell::new(None),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Rc<SessionInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn downgrade(&self) -> Weak<SessionInner> {
        Rc::downgrade(&self.inner)
    }

    pub fn database(&self) -> &Database {
        &self.inner.database
    }

    /// True when both handles are the same thread-local session.
    pub fn same_session(&self, other: &Session) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    pub fn is_in_write_transaction(&self) -> bool {
        self.inner.write.borrow().is_some()
    }

    /// Opens a write transaction, waiting while another session holds one.
    pub fn begin_write(&self) -> Result<()> {
        if self.database().is_read_only() {
            return Err(PersistError::ReadOnly);
        }
        if self.is_in_write_transaction() {
            return Err(PersistError::AlreadyInWriteTransaction);
        }
        let lease = self.database().acquire_writer()?;
        *self.inner.lease.borrow_mut() = Some(lease);
        *self.inner.write.borrow_mut() = Some(StagedChanges::default());
        Ok(())
    }

    /// Applies the staged writes and releases the writer lease, also when the
    /// commit fails.
    pub fn commit_write(&self) -> Result<()> {
        let staged = self
            .inner
            .write
            .borrow_mut()
            .take()
            .ok_or(PersistError::NotInWriteTransaction)?;
        let result = self.database().commit(staged);
        self.inner.lease.borrow_mut().take();
        result.map(|_| ())
    }

    /// Discards everything staged since `begin_write`.
    pub fn cancel_write(&self) {
        self.inner.write.borrow_mut().take();
        self.inner.lease.borrow_mut().take();
    }

    /// Runs `f` in a new write transaction, committing on `Ok` and cancelling
    /// on `Err` or panic.
    pub fn write<R>(&self, f: impl FnOnce(&Session) -> Result<R>) -> Result<R> {
        self.begin_write()?;
        let mut guard = CancelOnUnwind {
            session: self,
            armed: true,
        };
        let result = f(self);
        guard.armed = false;
        match result {
            Ok(value) => {
                self.commit_write()?;
                Ok(value)
            }
            Err(err) => {
                self.cancel_write();
                Err(err)
            }
        }
    }

    /// Like [`write`](Self::write), but joins the transaction that is already
    /// open instead of failing, so nested writes compose.
    pub fn safe_write<R>(&self, f: impl FnOnce(&Session) -> Result<R>) -> Result<R> {
        if self.is_in_write_transaction() {
            f(self)
        } else {
            self.write(f)
        }
    }

    // ========================================================================
    // Records
    // ========================================================================

    /// Current record for `key`, including this session's staged writes.
    pub fn record(&self, key: &ObjectKey) -> Result<Option<Record>> {
        if let Some(staged) = self
            .inner
            .write
            .borrow()
            .as_ref()
            .and_then(|write| write.get(key))
        {
            return Ok(staged.clone());
        }
        self.database()
            .committed_record(&key.type_name, &key.primary_key)
    }

    pub fn contains(&self, key: &ObjectKey) -> Result<bool> {
        Ok(self.record(key)?.is_some())
    }

    /// Every record of `type_name` in insertion order, including staged writes.
    /// Fails for types the database was not opened with.
    pub fn records(&self, type_name: &str) -> Result<Vec<(PrimaryKey, Record)>> {
        self.database().registry().get(type_name)?;
        let committed = self.database().committed_records(type_name)?;

        let write = self.inner.write.borrow();
        let Some(staged) = write.as_ref() else {
            return Ok(committed);
        };

        let committed_keys: HashSet<PrimaryKey> =
            committed.iter().map(|(key, _)| key.clone()).collect();
        let mut records = Vec::with_capacity(committed.len());
        for (key, record) in committed {
            let object_key = ObjectKey::new(type_name, key.clone());
            match staged.get(&object_key) {
                Some(Some(updated)) => records.push((key, updated.clone())),
                Some(None) => {}
                None => records.push((key, record)),
            }
        }
        for object_key in staged.keys() {
            if object_key.type_name != type_name || committed_keys.contains(&object_key.primary_key) {
                continue;
            }
            if let Some(Some(record)) = staged.get(object_key) {
                records.push((object_key.primary_key.clone(), record.clone()));
            }
        }
        Ok(records)
    }

    /// Validates and stages one flat record. Must run inside a write transaction.
    pub fn put_record(&self, type_name: &str, record: Record, policy: UpdatePolicy) -> Result<PrimaryKey> {
        let schema = self.database().registry().get(type_name)?;
        schema.validate_record(&record)?;
        let primary_key = schema.primary_key_of(&record)?;
        let key = ObjectKey::new(schema.name, primary_key.clone());

        match (policy, self.record(&key)?) {
            (UpdatePolicy::Error, Some(_)) => {
                return Err(PersistError::ObjectAlreadyExists(
                    schema.name.to_string(),
                    primary_key.to_string(),
                ));
            }
            (UpdatePolicy::Modified, Some(existing)) if existing == record => {
                return Ok(primary_key);
            }
            _ => {}
        }

        self.stage(key, Some(record))?;
        Ok(primary_key)
    }

    /// Stages removal of one record. Returns false when it does not exist.
    pub fn remove_record(&self, key: &ObjectKey) -> Result<bool> {
        if !self.contains(key)? {
            return Ok(false);
        }
        self.stage(key.clone(), None)?;
        Ok(true)
    }

    fn stage(&self, key: ObjectKey, change: Option<Record>) -> Result<()> {
        let mut write = self.inner.write.borrow_mut();
        let staged = write.as_mut().ok_or(PersistError::NotInWriteTransaction)?;
        staged.stage(key, change);
        Ok(())
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("database", self.database())
            .field("in_write_transaction", &self.is_in_write_transaction())
            .finish()
    }
}
