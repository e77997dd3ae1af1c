// ============================================================================
// Database Handle
// ============================================================================
//
// Shared, thread-safe store state. Readers take the read lock, a commit takes
// the write lock, applies a session's staged changes, rewrites the data file
// and then notifies observers before releasing it.
//
// One session at a time may hold a write transaction: `begin_write` takes the
// writer gate and keeps it until commit or cancel, so staged reads always see
// the latest committed state.
//
// ============================================================================

use super::config::{Configuration, Location};
use super::notify::{IndexChanges, NotificationToken, ObserverRegistry, RawChange};
use super::persistence::{self, DataFile};
use super::session::{Session, SessionInner, StagedChanges};
use super::table::{StoreState, Table};
use crate::core::{PersistError, PrimaryKey, Record, Result};
use crate::migration;
use crate::persist::detach::{self, Committed};
use crate::schema::SchemaRegistry;
use chrono::{DateTime, Utc};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tracing::{debug, warn};

static NEXT_DATABASE_ID: AtomicU64 = AtomicU64::new(1);

// Data files with a writable handle open in this process.
static OPEN_FILES: Mutex<BTreeSet<PathBuf>> = Mutex::new(BTreeSet::new());

thread_local! {
    // One session per database per thread, like a connection cached on the
    // thread that opened it.
    static SESSIONS: RefCell<HashMap<u64, rc::Weak<SessionInner>>> = RefCell::new(HashMap::new());
}

/// Marks a data file as owned by one writable database until dropped.
struct FileClaim {
    path: Option<PathBuf>,
}

impl FileClaim {
    fn none() -> Self {
        Self { path: None }
    }

    fn acquire(path: &Path) -> Result<Self> {
        let canonical = canonical_data_path(path);
        let mut open = OPEN_FILES.lock()?;
        if !open.insert(canonical.clone()) {
            return Err(PersistError::SessionUnavailable(format!(
                "{} is already open for writing in this process; clone that Database instead",
                path.display()
            )));
        }
        Ok(Self {
            path: Some(canonical),
        })
    }
}

impl Drop for FileClaim {
    fn drop(&mut self) {
        let Some(path) = self.path.take() else {
            return;
        };
        match OPEN_FILES.lock() {
            Ok(mut open) => open.remove(&path),
            Err(poisoned) => poisoned.into_inner().remove(&path),
        };
    }
}

/// The file may not exist yet, so only its directory is resolved.
fn canonical_data_path(path: &Path) -> PathBuf {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    match (parent.canonicalize(), path.file_name()) {
        (Ok(parent), Some(name)) => parent.join(name),
        _ => path.to_path_buf(),
    }
}

/// Serializes write transactions across sessions.
#[derive(Default)]
struct WriterGate {
    busy: Mutex<bool>,
    released: Condvar,
}

/// Exclusive right to stage and commit writes on one database. Released on
/// drop.
pub(crate) struct WriterLease {
    database: Database,
}

impl Drop for WriterLease {
    fn drop(&mut self) {
        let gate = &self.database.inner.writer;
        let mut busy = match gate.busy.lock() {
            Ok(busy) => busy,
            Err(poisoned) => poisoned.into_inner(),
        };
        *busy = false;
        gate.released.notify_one();
    }
}

pub(crate) struct DatabaseInner {
    id: u64,
    location: Location,
    registry: SchemaRegistry,
    read_only: bool,
    created_at: DateTime<Utc>,
    state: RwLock<StoreState>,
    observers: Mutex<ObserverRegistry>,
    writer: WriterGate,
    _claim: FileClaim,
}

impl DatabaseInner {
    pub(crate) fn remove_observer(&self, id: u64) {
        match self.observers.lock() {
            Ok(mut observers) => observers.remove(id),
            Err(poisoned) => poisoned.into_inner().remove(id),
        }
    }
}

/// Handle to an open database. Cheap to clone and safe to share across threads;
/// objects read through it are reached via a per-thread [`Session`].
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Opens (or creates) the database described by `config`.
    ///
    /// Runs the configured migration when the stored schema version is lower
    /// than the requested one. Fails with `SchemaMismatch` when the declared
    /// types differ from the stored ones at the same version.
    ///
    /// A data file can have one writable `Database` per process; share it by
    /// cloning. A second writable open of the same file fails with
    /// `SessionUnavailable` until the first handle and its clones are dropped.
    /// Read-only opens load a snapshot and are always allowed.
    pub fn open(config: Configuration) -> Result<Self> {
        let registry = SchemaRegistry::new(&config.object_types)?;
        let claim = match (&config.location, config.read_only) {
            (Location::File(path), false) => FileClaim::acquire(path)?,
            _ => FileClaim::none(),
        };

        let loaded = match config.location.path() {
            Some(path) => persistence::load(path)?,
            None => None,
        };

        let (state, created_at, dirty) = match loaded {
            None => (
                StoreState::new(config.schema_version, registry.fingerprints()),
                Utc::now(),
                true,
            ),
            Some(file) => {
                let created_at = file.created_at;
                let (state, dirty) = Self::adopt(file, &registry, &config)?;
                (state, created_at, dirty)
            }
        };

        if dirty && !config.read_only {
            if let Location::File(path) = &config.location {
                persistence::save(path, &DataFile::from_state(&state, created_at))?;
            }
        }

        debug!(
            location = ?config.location,
            schema_version = state.schema_version,
            types = registry.len(),
            "database opened"
        );

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                id: NEXT_DATABASE_ID.fetch_add(1, Ordering::Relaxed),
                location: config.location,
                registry,
                read_only: config.read_only,
                created_at,
                state: RwLock::new(state),
                observers: Mutex::new(ObserverRegistry::default()),
                writer: WriterGate::default(),
                _claim: claim,
            }),
        })
    }

    fn adopt(
        file: DataFile,
        registry: &SchemaRegistry,
        config: &Configuration,
    ) -> Result<(StoreState, bool)> {
        if config.schema_version < file.schema_version {
            return Err(PersistError::InvalidSchemaVersion(
                config.schema_version,
                file.schema_version,
            ));
        }

        // Types new to the file are additive; only changed types need a migration.
        let changed = registry.iter().find(|schema| {
            file.schemas
                .get(schema.name)
                .is_some_and(|stored| *stored != schema.fingerprint())
        });

        if config.schema_version > file.schema_version && !config.read_only {
            let state = migration::migrate_data_file(file, registry, config)?;
            return Ok((state, true));
        }

        if let Some(schema) = changed {
            return Err(PersistError::SchemaMismatch(
                schema.name.to_string(),
                format!(
                    "stored schema differs at version {}; migration required",
                    file.schema_version
                ),
            ));
        }

        let primary_keys = file.primary_keys();
        let mut state = file.into_state(&primary_keys)?;
        let mut dirty = false;
        for schema in registry.iter() {
            if !state.schemas.contains_key(schema.name) {
                state
                    .schemas
                    .insert(schema.name.to_string(), schema.fingerprint());
                state.table_mut(schema.name);
                dirty = true;
            }
        }
        Ok((state, dirty))
    }

    /// This thread's session. Repeated calls on one thread share the session
    /// (and its open write transaction) for as long as any handle to it lives.
    pub fn session(&self) -> Session {
        SESSIONS.with(|sessions| {
            let mut sessions = sessions.borrow_mut();
            if let Some(inner) = sessions.get(&self.inner.id).and_then(rc::Weak::upgrade) {
                return Session::from_inner(inner);
            }
            sessions.retain(|_, weak| weak.strong_count() > 0);
            let session = Session::new(self.clone());
            sessions.insert(self.inner.id, session.downgrade());
            session
        })
    }

    pub fn location(&self) -> &Location {
        &self.inner.location
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn is_read_only(&self) -> bool {
        self.inner.read_only
    }

    pub fn schema_version(&self) -> Result<u64> {
        self.read(|state| state.schema_version)
    }

    /// Number of committed write transactions.
    pub fn version(&self) -> Result<u64> {
        self.read(|state| state.version)
    }

    /// Blocks until no other session holds a write transaction on this
    /// database, then takes the writer gate.
    pub(crate) fn acquire_writer(&self) -> Result<WriterLease> {
        let gate = &self.inner.writer;
        let mut busy = gate.busy.lock()?;
        while *busy {
            busy = gate.released.wait(busy)?;
        }
        *busy = true;
        Ok(WriterLease {
            database: self.clone(),
        })
    }

    /// Fully detached objects of `type_name` at the committed state.
    fn snapshot(&self, state: &StoreState, type_name: &str) -> Result<Vec<serde_json::Value>> {
        detach::detach_table(&Committed::new(&self.inner.registry, state), type_name)
    }

    pub(crate) fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> Result<R> {
        let state = self.inner.state.read()?;
        Ok(f(&state))
    }

    pub(crate) fn committed_record(&self, type_name: &str, key: &PrimaryKey) -> Result<Option<Record>> {
        self.read(|state| state.table(type_name).and_then(|table| table.get(key)).cloned())
    }

    pub(crate) fn committed_records(&self, type_name: &str) -> Result<Vec<(PrimaryKey, Record)>> {
        self.read(|state| {
            state
                .table(type_name)
                .map(|table| {
                    table
                        .iter()
                        .map(|(key, record)| (key.clone(), record.clone()))
                        .collect()
                })
                .unwrap_or_default()
        })
    }

    /// Applies `changes` atomically and returns the new store version.
    pub(crate) fn commit(&self, changes: StagedChanges) -> Result<u64> {
        if self.inner.read_only {
            return Err(PersistError::ReadOnly);
        }

        let mut state = self.inner.state.write()?;
        if changes.is_empty() {
            return Ok(state.version);
        }

        let mut observers = self.inner.observers.lock()?;
        let touched: BTreeSet<String> = changes.touched_types();
        let observed: BTreeSet<String> = observers
            .observed_types()
            .into_iter()
            .filter(|type_name| touched.contains(type_name))
            .collect();

        let before: HashMap<String, Vec<PrimaryKey>> = observed
            .iter()
            .map(|type_name| {
                let keys = state.table(type_name).map(Table::keys).unwrap_or_default();
                (type_name.clone(), keys)
            })
            .collect();

        let backup: Option<HashMap<String, Option<Table>>> = match self.inner.location {
            Location::File(_) => Some(
                touched
                    .iter()
                    .map(|type_name| (type_name.clone(), state.tables.get(type_name).cloned()))
                    .collect(),
            ),
            Location::InMemory(_) => None,
        };

        let mut modified: HashMap<String, HashSet<PrimaryKey>> = HashMap::new();
        for (key, change) in changes.into_ordered() {
            let table = state.table_mut(&key.type_name);
            match change {
                Some(record) => {
                    table.upsert(key.primary_key.clone(), record);
                    modified
                        .entry(key.type_name)
                        .or_default()
                        .insert(key.primary_key);
                }
                None => {
                    table.remove(&key.primary_key);
                }
            }
        }
        state.version += 1;

        if let (Location::File(path), Some(backup)) = (&self.inner.location, backup) {
            let file = DataFile::from_state(&state, self.inner.created_at);
            if let Err(err) = persistence::save(path, &file) {
                warn!(error = %err, path = %path.display(), "commit could not be written, rolling back");
                for (type_name, table) in backup {
                    match table {
                        Some(table) => {
                            state.tables.insert(type_name, table);
                        }
                        None => {
                            state.tables.remove(&type_name);
                        }
                    }
                }
                state.version -= 1;
                for type_name in &observed {
                    observers.send(type_name, &RawChange::Error(err.clone()));
                }
                return Err(err);
            }
        }

        let version = state.version;
        let empty = HashSet::new();
        for type_name in &observed {
            let Some(table) = state.table(type_name) else {
                continue;
            };
            let after = table.keys();
            let before_keys = before.get(type_name).map(Vec::as_slice).unwrap_or(&[]);
            let changes = IndexChanges::compute(
                before_keys,
                &after,
                modified.get(type_name).unwrap_or(&empty),
            );
            if changes.is_empty() {
                continue;
            }
            let change = match self.snapshot(&state, type_name) {
                Ok(values) => RawChange::Update {
                    version,
                    values,
                    deletions: changes.deletions,
                    insertions: changes.insertions,
                    modifications: changes.modifications,
                },
                Err(err) => RawChange::Error(err),
            };
            observers.send(type_name, &change);
        }

        debug!(version, types = touched.len(), "write transaction committed");
        Ok(version)
    }

    /// Registers an observer of `type_name`. The current contents are queued
    /// as the first notification before any later commit can interleave.
    pub(crate) fn observe_raw(
        &self,
        type_name: &str,
    ) -> Result<(NotificationToken, UnboundedReceiver<RawChange>)> {
        self.inner.registry.get(type_name)?;

        let state = self.inner.state.read()?;
        let mut observers = self.inner.observers.lock()?;
        let (sender, receiver) = unbounded_channel();
        let initial = match self.snapshot(&state, type_name) {
            Ok(values) => RawChange::Initial {
                version: state.version,
                values,
            },
            Err(err) => RawChange::Error(err),
        };
        // The receiver is still in scope, so this cannot fail.
        let _ = sender.send(initial);
        let id = observers.register(type_name, sender);

        Ok((
            NotificationToken::new(id, Arc::downgrade(&self.inner)),
            receiver,
        ))
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("id", &self.inner.id)
            .field("location", &self.inner.location)
            .field("read_only", &self.inner.read_only)
            .finish()
    }
}
