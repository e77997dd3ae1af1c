//! Resolve-and-save on a dedicated worker thread.
//!
//! A managed object is tied to the session of the thread that produced it.
//! Saving it from a fresh transaction means naming it with a
//! [`ThreadSafeReference`], resolving that in a worker's own session and
//! writing there. One worker per save; the caller blocks until it is joined.

use super::Persistable;
use crate::core::{ObjectKey, PersistError, PrimaryKey, Result};
use crate::storage::{Database, Session, ThreadSafeReference, UpdatePolicy};
use std::thread;
use tokio::sync::oneshot;
use tracing::debug;
use uuid::Uuid;

/// Writes the stored record under `key` back through `session`.
pub(crate) fn resave(session: &Session, key: &ObjectKey, update: UpdatePolicy) -> Result<PrimaryKey> {
    let record = session
        .record(key)?
        .ok_or_else(|| PersistError::ReferenceUnresolvable(key.to_string()))?;
    session.safe_write(|session| session.put_record(&key.type_name, record, update))
}

/// # Panics
///
/// Panics when called from inside an async runtime, since it blocks the
/// calling thread on the worker's result.
pub(crate) fn save_on_worker<T: Persistable>(
    database: &Database,
    reference: ThreadSafeReference<T>,
    update: UpdatePolicy,
) -> Result<PrimaryKey> {
    let (sender, receiver) = oneshot::channel();
    let worker_database = database.clone();
    let name = format!("objectkeep-save-{}", Uuid::new_v4());
    debug!(worker = %name, key = %reference.key(), "handing save to worker");

    let handle = thread::Builder::new()
        .name(name)
        .spawn(move || {
            let session = worker_database.session();
            let result = match session.resolve(&reference) {
                Some(managed) => resave(&session, managed.key(), update),
                None => Err(PersistError::ReferenceUnresolvable(reference.key().to_string())),
            };
            // The caller only goes away by panicking.
            let _ = sender.send(result);
        })
        .map_err(|err| PersistError::CrossThreadWorkerUnavailable(err.to_string()))?;

    let result = receiver.blocking_recv().map_err(|_| {
        PersistError::CrossThreadWorkerUnavailable("save worker exited without a result".to_string())
    })?;
    handle
        .join()
        .map_err(|_| PersistError::CrossThreadWorkerUnavailable("save worker panicked".to_string()))?;
    result
}
