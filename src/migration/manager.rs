// ============================================================================
// Database Manager
// ============================================================================
//
// Process-wide bootstrap: pick the data file, detect whether the declared
// schema still matches what is on disk, bump the durable schema version when
// it does not, and open the database with the migration block attached.
//
// ============================================================================

use super::version_store::{KeyValueStore, SchemaVersionStore};
use super::{DefaultMigration, SchemaMigration, migration_block};
use crate::core::{PersistError, Result};
use crate::schema::ObjectSchema;
use crate::storage::{Configuration, Database, Location};
use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const PATH_ENV: &str = "OBJECTKEEP_PATH";
pub const OVERRIDE_PATH_ENV: &str = "OBJECTKEEP_OVERRIDE_PATH";
const DEFAULT_FILE_NAME: &str = "default.objectkeep";

/// Build flavour of the running process.
pub struct Platform;

impl Platform {
    pub fn is_development() -> bool {
        cfg!(debug_assertions)
    }
}

/// Bootstrap configuration for [`DatabaseManager::initialize`].
#[derive(Clone)]
pub struct ManagerConfig {
    /// Data file used unless the override applies
    pub default_path: PathBuf,

    /// Alternative data file for development builds
    pub override_path: Option<PathBuf>,

    /// Use `override_path` when running a development build
    pub use_override_in_development: bool,

    /// Rewrite rules run when the schema version goes up
    pub migration: Arc<dyn SchemaMigration>,

    /// Every persisted type
    pub object_types: Vec<&'static ObjectSchema>,
}

impl ManagerConfig {
    pub fn new(default_path: impl Into<PathBuf>) -> Self {
        Self {
            default_path: default_path.into(),
            override_path: None,
            use_override_in_development: false,
            migration: Arc::new(DefaultMigration),
            object_types: Vec::new(),
        }
    }

    /// Reads `OBJECTKEEP_PATH` and `OBJECTKEEP_OVERRIDE_PATH`. A present
    /// override is used in development builds.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let default_path = lookup(PATH_ENV).unwrap_or_else(|| DEFAULT_FILE_NAME.to_string());
        let mut config = Self::new(default_path);
        if let Some(path) = lookup(OVERRIDE_PATH_ENV) {
            config = config.override_path(path).use_override_in_development(true);
        }
        config
    }

    pub fn override_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.override_path = Some(path.into());
        self
    }

    pub fn use_override_in_development(mut self, enabled: bool) -> Self {
        self.use_override_in_development = enabled;
        self
    }

    pub fn migration(mut self, migration: impl SchemaMigration + 'static) -> Self {
        self.migration = Arc::new(migration);
        self
    }

    pub fn object_types(mut self, object_types: Vec<&'static ObjectSchema>) -> Self {
        self.object_types = object_types;
        self
    }
}

impl fmt::Debug for ManagerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagerConfig")
            .field("default_path", &self.default_path)
            .field("override_path", &self.override_path)
            .field("use_override_in_development", &self.use_override_in_development)
            .field(
                "object_types",
                &self.object_types.iter().map(|s| s.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// The data file a manager opens for `config`.
pub fn resolve_location(config: &ManagerConfig, is_development: bool) -> PathBuf {
    match &config.override_path {
        Some(path) if config.use_override_in_development && is_development => path.clone(),
        _ => config.default_path.clone(),
    }
}

struct Opened {
    configuration: Configuration,
    database: Database,
}

/// Owns the schema version counter and the opened database.
///
/// Create one per process, call [`initialize`](Self::initialize) once at
/// startup, and hand `database()` to the rest of the application.
pub struct DatabaseManager<S> {
    versions: SchemaVersionStore<S>,
    opened: Mutex<Option<Opened>>,
}

impl<S: KeyValueStore> DatabaseManager<S> {
    pub fn new(store: S) -> Self {
        Self {
            versions: SchemaVersionStore::new(store),
            opened: Mutex::new(None),
        }
    }

    pub fn versions(&self) -> &SchemaVersionStore<S> {
        &self.versions
    }

    /// Opens the database for `config` and returns the schema version it was
    /// opened at.
    ///
    /// If the declared types cannot be read at the stored version, the stored
    /// version is bumped by one and the migration runs during the open. An
    /// open that still fails is `SchemaMigrationFailed`.
    pub fn initialize(&self, config: ManagerConfig) -> Result<u64> {
        let path = resolve_location(&config, Platform::is_development());
        let location = Location::File(path);

        let mut version = self.versions.get_version()?;
        match self.probe(&location, &config, version) {
            Ok(()) => {}
            Err(PersistError::InvalidSchemaVersion(requested, stored)) => {
                warn!(requested, stored, "stored schema version is ahead of the counter, adopting it");
                self.versions.set_version(stored)?;
                version = stored;
                if let Err(err) = self.probe(&location, &config, version) {
                    debug!(error = %err, "schema probe failed");
                    version = self.versions.increment()?;
                }
            }
            Err(err) => {
                debug!(error = %err, "schema probe failed");
                version = self.versions.increment()?;
            }
        }

        let configuration = Configuration::new(location)
            .schema_version(version)
            .migration(migration_block(config.migration.clone(), version))
            .object_types(config.object_types.clone());

        // The previous handle holds the file's write claim.
        let mut opened = self.opened.lock()?;
        if opened.take().is_some() {
            warn!("database manager initialized twice; replacing the previous database");
        }

        let database = Database::open(configuration.clone()).map_err(|err| match err {
            PersistError::SchemaMigrationFailed(_) | PersistError::SessionUnavailable(_) => err,
            other => PersistError::SchemaMigrationFailed(other.to_string()),
        })?;

        info!(schema_version = version, location = ?configuration.location, "database initialized");

        *opened = Some(Opened {
            configuration,
            database,
        });
        Ok(version)
    }

    /// Opens read-only at `version` and reads every declared type.
    fn probe(&self, location: &Location, config: &ManagerConfig, version: u64) -> Result<()> {
        let probe = Database::open(
            Configuration::new(location.clone())
                .schema_version(version)
                .object_types(config.object_types.clone())
                .read_only(true),
        )?;
        let session = probe.session();
        for schema in &config.object_types {
            session.records(schema.name)?;
        }
        Ok(())
    }

    /// The database opened by `initialize`.
    pub fn database(&self) -> Result<Database> {
        self.opened
            .lock()?
            .as_ref()
            .map(|opened| opened.database.clone())
            .ok_or_else(|| PersistError::SessionUnavailable("database manager is not initialized".to_string()))
    }

    /// The configuration the database was opened with.
    pub fn configuration(&self) -> Result<Configuration> {
        self.opened
            .lock()?
            .as_ref()
            .map(|opened| opened.configuration.clone())
            .ok_or_else(|| PersistError::SessionUnavailable("database manager is not initialized".to_string()))
    }

    pub fn is_initialized(&self) -> bool {
        self.opened.lock().map(|opened| opened.is_some()).unwrap_or(false)
    }

    /// Releases the manager's handle. Clones of the database stay usable.
    pub fn shutdown(&self) -> Result<()> {
        if self.opened.lock()?.take().is_some() {
            debug!("database manager shut down");
        }
        Ok(())
    }
}

impl<S> fmt::Debug for DatabaseManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseManager").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MemoryKeyValueStore;
    use std::collections::HashMap;

    #[test]
    fn test_resolve_location() {
        let config = ManagerConfig::new("/data/app.store").override_path("/tmp/dev.store");
        assert_eq!(resolve_location(&config, true), PathBuf::from("/data/app.store"));

        let config = config.use_override_in_development(true);
        assert_eq!(resolve_location(&config, true), PathBuf::from("/tmp/dev.store"));
        assert_eq!(resolve_location(&config, false), PathBuf::from("/data/app.store"));
    }

    #[test]
    fn test_config_from_lookup() {
        let vars: HashMap<&str, &str> =
            HashMap::from([(PATH_ENV, "/srv/app.store"), (OVERRIDE_PATH_ENV, "/tmp/dev.store")]);
        let config = ManagerConfig::from_lookup(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.default_path, PathBuf::from("/srv/app.store"));
        assert_eq!(config.override_path, Some(PathBuf::from("/tmp/dev.store")));
        assert!(config.use_override_in_development);

        let config = ManagerConfig::from_lookup(|_| None);
        assert_eq!(config.default_path, PathBuf::from(DEFAULT_FILE_NAME));
        assert!(config.override_path.is_none());
    }

    #[test]
    fn test_database_before_initialize() {
        let manager = DatabaseManager::new(MemoryKeyValueStore::new());
        assert!(!manager.is_initialized());
        assert!(matches!(
            manager.database(),
            Err(PersistError::SessionUnavailable(_))
        ));
        manager.shutdown().unwrap();
    }
}
