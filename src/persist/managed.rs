use super::{Persistable, cascade, handoff};
use crate::core::{ObjectKey, PersistError, PrimaryKey, Result};
use crate::storage::{Database, Session, ThreadSafeReference, UpdatePolicy};
use std::fmt;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Handle to a stored object, bound to the session of the thread that
/// produced it.
///
/// Reads always see the latest state through that session; writes go through
/// write transactions. The handle is `!Send`: to use the object on another
/// thread, pass a [`ThreadSafeReference`] and resolve it there.
pub struct Managed<T> {
    session: Session,
    key: ObjectKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Persistable> Managed<T> {
    pub(crate) fn new(session: Session, key: ObjectKey) -> Self {
        Self {
            session,
            key,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn primary_key(&self) -> &PrimaryKey {
        &self.key.primary_key
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn database(&self) -> &Database {
        self.session.database()
    }

    pub fn is_managed(&self) -> bool {
        true
    }

    /// True once the object has been deleted.
    pub fn is_invalidated(&self) -> bool {
        !self.session.contains(&self.key).unwrap_or(false)
    }

    /// Detached snapshot of the stored object. `None` once it is deleted.
    pub fn value(&self) -> Option<T> {
        self.unmanaged()
            .inspect_err(|err| debug!(error = %err, key = %self.key, "no value for managed object"))
            .ok()
    }

    /// Detached snapshot, with the reason when there is none.
    pub fn unmanaged(&self) -> Result<T> {
        self.session.detached::<T>(&self.key)?.ok_or_else(|| self.not_found())
    }

    pub fn thread_safe_reference(&self) -> ThreadSafeReference<T> {
        ThreadSafeReference::new(self.key.clone())
    }

    // ========================================================================
    // Writes
    // ========================================================================

    pub fn save(&self, update: UpdatePolicy) -> Option<Managed<T>> {
        self.saved(update)
            .inspect_err(|err| warn!(error = %err, key = %self.key, "managed save failed"))
            .ok()
    }

    /// Writes the stored object again with `update`.
    ///
    /// Inside an open write transaction of this session the write joins it.
    /// Otherwise the object is resolved and written on a short-lived worker
    /// thread and this call blocks until the worker is done; calling it from
    /// within an async runtime panics in that case.
    pub fn saved(&self, update: UpdatePolicy) -> Result<Managed<T>> {
        let primary_key = if self.session.is_in_write_transaction() {
            handoff::resave(&self.session, &self.key, update)?
        } else {
            handoff::save_on_worker(self.database(), self.thread_safe_reference(), update)?
        };
        Ok(Self::new(
            self.session.clone(),
            ObjectKey::new(self.key.type_name.clone(), primary_key),
        ))
    }

    pub fn delete(&self, cascading: bool) {
        if let Err(err) = self.try_delete(cascading) {
            warn!(error = %err, key = %self.key, "delete failed");
        }
    }

    pub fn try_delete(&self, cascading: bool) -> Result<()> {
        cascade::delete_objects(&self.session, [self.key.clone()], cascading)?;
        Ok(())
    }

    /// Applies `mutate` to the stored object in a write transaction. A no-op
    /// when the object no longer exists.
    pub fn edit(&self, mutate: impl FnOnce(&mut T)) {
        if let Err(err) = self.try_edit(mutate) {
            warn!(error = %err, key = %self.key, "edit failed");
        }
    }

    /// Like [`edit`](Self::edit), but reports a deleted object as
    /// `ManagedCounterpartNotFound`. Changing the primary key is refused with
    /// `PrimaryKeyImmutable`.
    pub fn try_edit(&self, mutate: impl FnOnce(&mut T)) -> Result<()> {
        self.session.safe_write(|session| {
            let mut value = session
                .detached::<T>(&self.key)?
                .ok_or_else(|| self.not_found())?;
            mutate(&mut value);

            let primary_key = value.primary_key();
            if primary_key != self.key.primary_key {
                return Err(PersistError::PrimaryKeyImmutable(
                    self.key.type_name.clone(),
                    self.key.primary_key.to_string(),
                    primary_key.to_string(),
                ));
            }
            session.add(&value, UpdatePolicy::Modified)?;
            Ok(())
        })
    }

    fn not_found(&self) -> PersistError {
        PersistError::ManagedCounterpartNotFound(
            self.key.type_name.clone(),
            self.key.primary_key.to_string(),
        )
    }
}

impl<T> Clone for Managed<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            key: self.key.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Managed<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Managed").field(&self.key).finish()
    }
}
