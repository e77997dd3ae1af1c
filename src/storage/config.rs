use crate::migration::MigrationBlock;
use crate::schema::ObjectSchema;
use std::fmt;
use std::path::{Path, PathBuf};

/// Where a database keeps its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    /// Single data file, rewritten atomically on every commit.
    File(PathBuf),
    /// Process memory only. Every open starts empty.
    InMemory(String),
}

impl Location {
    pub fn path(&self) -> Option<&Path> {
        match self {
            Self::File(path) => Some(path),
            Self::InMemory(_) => None,
        }
    }
}

/// Options for opening a [`Database`](crate::storage::Database).
///
/// # Examples
///
/// ```ignore
/// let config = Configuration::new(Location::File("app.okdb".into()))
///     .schema_version(2)
///     .object_types(vec![&MODEL_SCHEMA]);
/// ```
#[derive(Clone)]
pub struct Configuration {
    /// Data file or in-memory identifier
    pub location: Location,

    /// Schema version the caller expects the data to be at
    pub schema_version: u64,

    /// Called once when the stored version is lower than `schema_version`
    pub migration: Option<MigrationBlock>,

    /// Types to register
    pub object_types: Vec<&'static ObjectSchema>,

    /// Open without creating, migrating or writing anything
    pub read_only: bool,
}

impl Configuration {
    pub fn new(location: Location) -> Self {
        Self {
            location,
            schema_version: 0,
            migration: None,
            object_types: Vec::new(),
            read_only: false,
        }
    }

    pub fn in_memory(identifier: &str) -> Self {
        Self::new(Location::InMemory(identifier.to_string()))
    }

    /// Set the schema version
    pub fn schema_version(mut self, version: u64) -> Self {
        self.schema_version = version;
        self
    }

    /// Set the migration block
    pub fn migration(mut self, block: MigrationBlock) -> Self {
        self.migration = Some(block);
        self
    }

    /// Set the registered object types
    pub fn object_types(mut self, object_types: Vec<&'static ObjectSchema>) -> Self {
        self.object_types = object_types;
        self
    }

    /// Open read-only
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("location", &self.location)
            .field("schema_version", &self.schema_version)
            .field("has_migration", &self.migration.is_some())
            .field(
                "object_types",
                &self.object_types.iter().map(|schema| schema.name).collect::<Vec<_>>(),
            )
            .field("read_only", &self.read_only)
            .finish()
    }
}
