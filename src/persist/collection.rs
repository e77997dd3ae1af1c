use super::managed::Managed;
use super::{Persistable, cascade};
use crate::core::{ObjectKey, PrimaryKey, Result};
use crate::storage::{Database, UpdatePolicy};
use std::collections::HashSet;
use tracing::warn;

/// Whether [`PersistableSliceExt::save_all`] first removes stored objects
/// missing from the slice, and whether that removal cascades.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffingPolicy {
    pub should_diff: bool,
    pub cascading: bool,
}

impl DiffingPolicy {
    pub fn new(should_diff: bool, cascading: bool) -> Self {
        Self {
            should_diff,
            cascading,
        }
    }
}

/// Bulk operations over in-memory collections of persistable values.
pub trait PersistableSliceExt<T: Persistable> {
    /// Deletes every stored `T` whose primary key is not in this slice.
    /// Returns how many objects were removed.
    fn remove_deletions(&self, db: &Database, cascading: bool) -> usize;

    fn try_remove_deletions(&self, db: &Database, cascading: bool) -> Result<usize>;

    /// Deletes the stored counterpart of every element.
    fn delete_all(&self, db: &Database, cascading: bool);

    /// Upserts every element in one write transaction, after removing
    /// deletions when `diffing.should_diff` is set.
    fn save_all(&self, db: &Database, update: UpdatePolicy, diffing: DiffingPolicy) -> Vec<Managed<T>>;

    fn try_save_all(&self, db: &Database, update: UpdatePolicy, diffing: DiffingPolicy) -> Result<Vec<Managed<T>>>;
}

impl<T: Persistable> PersistableSliceExt<T> for [T] {
    fn remove_deletions(&self, db: &Database, cascading: bool) -> usize {
        self.try_remove_deletions(db, cascading)
            .inspect_err(|err| warn!(error = %err, type_name = T::schema().name, "remove_deletions failed"))
            .unwrap_or(0)
    }

    fn try_remove_deletions(&self, db: &Database, cascading: bool) -> Result<usize> {
        let keep: HashSet<PrimaryKey> = self.iter().map(Persistable::primary_key).collect();
        let session = db.session();
        let stale: Vec<ObjectKey> = session
            .records(T::schema().name)?
            .into_iter()
            .filter(|(key, _)| !keep.contains(key))
            .map(|(key, _)| ObjectKey::new(T::schema().name, key))
            .collect();
        cascade::delete_objects(&session, stale, cascading)
    }

    fn delete_all(&self, db: &Database, cascading: bool) {
        let session = db.session();
        let keys = self.iter().map(Persistable::object_key);
        if let Err(err) = cascade::delete_objects(&session, keys, cascading) {
            warn!(error = %err, type_name = T::schema().name, "delete_all failed");
        }
    }

    fn save_all(&self, db: &Database, update: UpdatePolicy, diffing: DiffingPolicy) -> Vec<Managed<T>> {
        self.try_save_all(db, update, diffing)
            .inspect_err(|err| warn!(error = %err, type_name = T::schema().name, "save_all failed"))
            .unwrap_or_default()
    }

    fn try_save_all(&self, db: &Database, update: UpdatePolicy, diffing: DiffingPolicy) -> Result<Vec<Managed<T>>> {
        db.session().safe_write(|session| {
            if diffing.should_diff {
                self.try_remove_deletions(db, diffing.cascading)?;
            }
            self.iter().map(|value| session.add(value, update)).collect()
        })
    }
}
