use crate::core::{ObjectKey, PrimaryKey};
use std::fmt;
use std::marker::PhantomData;

/// Names a managed object so it can be resolved again on another thread.
///
/// Managed handles are confined to the thread whose session produced them;
/// this token is `Send` and carries only the object's identity. Resolving it
/// fails once the object has been deleted.
pub struct ThreadSafeReference<T> {
    key: ObjectKey,
    _marker: PhantomData<fn() -> T>,
}

impl<T> ThreadSafeReference<T> {
    pub(crate) fn new(key: ObjectKey) -> Self {
        Self {
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
}

impl<T> Clone for ThreadSafeReference<T> {
    fn clone(&self) -> Self {
        Self::new(self.key.clone())
    }
}

impl<T> fmt::Debug for ThreadSafeReference<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadSafeReference").field(&self.key).finish()
    }
}
