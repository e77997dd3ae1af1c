//! Integration tests for cross-thread references and worker saves

mod common;

use common::*;
use objectkeep::{Database, PersistError, Persistable, ThreadSafeReference, UpdatePolicy};
use std::sync::{Arc, Barrier};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_handles_that_cross_threads() {
    assert_send_sync::<Database>();
    assert_send_sync::<ThreadSafeReference<Model>>();
}

#[test]
fn test_managed_save_runs_on_worker() {
    let db = open_db("worker-save");
    let managed = model("a", "x", 1).save(&db, UpdatePolicy::All).unwrap();
    let before = db.version().unwrap();

    let saved = managed.saved(UpdatePolicy::All).unwrap();

    assert_eq!(db.version().unwrap(), before + 1);
    assert_eq!(saved.primary_key(), managed.primary_key());
    assert_eq!(saved.value().unwrap(), model("a", "x", 1));
}

#[test]
fn test_managed_save_with_modified_policy_does_not_commit() {
    let db = open_db("worker-save-modified");
    let managed = model("a", "x", 1).save(&db, UpdatePolicy::All).unwrap();
    let before = db.version().unwrap();

    managed.save(UpdatePolicy::Modified).unwrap();
    assert_eq!(db.version().unwrap(), before);
}

#[test]
fn test_reference_resolves_on_another_thread() {
    let db = open_db("resolve-elsewhere");
    let managed = model("a", "x", 1).save(&db, UpdatePolicy::All).unwrap();
    let reference = managed.thread_safe_reference();

    let worker_db = db.clone();
    thread::spawn(move || {
        let resolved = worker_db.session().resolve(&reference).unwrap();
        assert_eq!(resolved.value().unwrap().kind, "x");
        resolved.edit(|m| m.kind = "from worker".to_string());
    })
    .join()
    .unwrap();

    assert_eq!(managed.value().unwrap().kind, "from worker");
}

#[test]
fn test_deleted_object_does_not_resolve() {
    let db = open_db("resolve-deleted");
    let managed = model("a", "x", 1).save(&db, UpdatePolicy::All).unwrap();
    let reference = managed.thread_safe_reference();
    managed.delete(false);

    let worker_db = db.clone();
    let resolved = thread::spawn(move || worker_db.session().resolve(&reference).is_none())
        .join()
        .unwrap();
    assert!(resolved);

    assert!(matches!(
        managed.saved(UpdatePolicy::All),
        Err(PersistError::ReferenceUnresolvable(_))
    ));
    assert!(managed.save(UpdatePolicy::All).is_none());
}

#[test]
fn test_managed_save_inside_write_transaction_runs_inline() {
    let db = open_db("inline-save");
    let managed = model("a", "x", 1).save(&db, UpdatePolicy::All).unwrap();
    let before = db.version().unwrap();

    db.session()
        .write(|_| {
            managed.saved(UpdatePolicy::All)?;
            model("b", "y", 2).saved(&db, UpdatePolicy::All)?;
            Ok(())
        })
        .unwrap();

    assert_eq!(db.version().unwrap(), before + 1);
    assert_eq!(Model::all(&db).len(), 2);
}

#[test]
fn test_concurrent_creators() {
    let db = open_db("concurrent-creators");
    let created = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..4)
        .map(|worker| {
            let db = db.clone();
            let created = created.clone();
            thread::spawn(move || {
                for i in 0..25 {
                    let id = format!("w{}-{}", worker, i);
                    if model(&id, "", i).save(&db, UpdatePolicy::Error).is_some() {
                        created.fetch_add(1, Ordering::SeqCst);
                    }
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(created.load(Ordering::SeqCst), 100);
    assert_eq!(Model::all(&db).len(), 100);
    assert_eq!(db.version().unwrap(), 100);
}

#[test]
fn test_sessions_are_per_thread() {
    let db = open_db("session-per-thread");
    let here = db.session();
    assert!(here.same_session(&db.session()));

    let worker_db = db.clone();
    let in_transaction = thread::spawn(move || worker_db.session().is_in_write_transaction());

    here.write(|s| {
        assert!(s.is_in_write_transaction());
        Ok(())
    })
    .unwrap();
    assert!(!in_transaction.join().unwrap());
}

#[test]
fn test_concurrent_edits_of_one_object_are_not_lost() {
    let db = open_db("concurrent-edits");
    model("shared", "", 0).save(&db, UpdatePolicy::All).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let db = db.clone();
            thread::spawn(move || {
                for _ in 0..50 {
                    Model::get(&db, "shared".to_string())
                        .unwrap()
                        .try_edit(|m| m.count += 1)
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let shared = Model::get(&db, "shared".to_string()).unwrap();
    assert_eq!(shared.value().unwrap().count, 200);
}

#[test]
fn test_racing_creates_under_error_policy() {
    let db = open_db("racing-creates");
    let workers = 8;
    let start = Arc::new(Barrier::new(workers));

    let handles: Vec<_> = (0..workers)
        .map(|worker| {
            let db = db.clone();
            let start = start.clone();
            thread::spawn(move || {
                start.wait();
                model("dup", &format!("w{}", worker), worker as i64)
                    .saved(&db, UpdatePolicy::Error)
                    .map(|_| ())
            })
        })
        .collect();
    let outcomes: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

    let created = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(created, 1);
    assert!(
        outcomes
            .iter()
            .filter_map(|outcome| outcome.as_ref().err())
            .all(|err| matches!(err, PersistError::ObjectAlreadyExists(_, _)))
    );
    assert_eq!(Model::all(&db).len(), 1);
    assert_eq!(db.version().unwrap(), 1);
}
