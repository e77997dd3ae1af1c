// ============================================================================
// Schema Migration
// ============================================================================
//
// The engine compares the stored schema version with the requested one when a
// database opens. If the stored one is lower, every record is reshaped to the
// declared schema and the migration block gets one pass over old and new
// records before the database becomes usable. The block never runs again for
// the same transition because the new version is written with the data.
//
// ============================================================================

pub mod manager;
pub mod version_store;

pub use manager::{DatabaseManager, ManagerConfig, Platform, resolve_location};
pub use version_store::{
    FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, SCHEMA_VERSION_KEY, SchemaVersionStore,
};

use crate::core::{PersistError, Record, Result};
use crate::schema::SchemaRegistry;
use crate::storage::persistence::DataFile;
use crate::storage::{Configuration, StoreState, Table};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Engine-level callback: `(migration, old_schema_version)`.
pub type MigrationBlock = Arc<dyn Fn(&mut Migration<'_>, u64) + Send + Sync>;

/// Caller-declared rewrite rules for a version transition.
pub trait SchemaMigration: Send + Sync {
    fn migrate(&self, migration: &mut Migration<'_>, old_schema_version: u64, new_schema_version: u64);
}

impl<F> SchemaMigration for F
where
    F: Fn(&mut Migration<'_>, u64, u64) + Send + Sync,
{
    fn migrate(&self, migration: &mut Migration<'_>, old_schema_version: u64, new_schema_version: u64) {
        self(migration, old_schema_version, new_schema_version)
    }
}

/// Builds the engine block for a database opened at `schema_version`.
/// The rules only run for transitions from a lower version.
pub fn migration_block(migration: Arc<dyn SchemaMigration>, schema_version: u64) -> MigrationBlock {
    Arc::new(move |context: &mut Migration<'_>, old_schema_version: u64| {
        if old_schema_version < schema_version {
            migration.migrate(context, old_schema_version, schema_version);
        }
    })
}

/// Migration with no rewrite rules. Added fields get their defaults and
/// removed fields are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultMigration;

impl SchemaMigration for DefaultMigration {
    fn migrate(&self, _migration: &mut Migration<'_>, _old: u64, _new: u64) {}
}

struct MigrationObject {
    old: Record,
    new: Option<Record>,
}

/// Access to the records being migrated, handed to the migration block.
pub struct Migration<'a> {
    old_schema_version: u64,
    new_schema_version: u64,
    objects: &'a mut BTreeMap<String, Vec<MigrationObject>>,
    registry: &'a SchemaRegistry,
}

impl Migration<'_> {
    pub fn old_schema_version(&self) -> u64 {
        self.old_schema_version
    }

    pub fn new_schema_version(&self) -> u64 {
        self.new_schema_version
    }

    /// Calls `f(old, new)` for every stored object of `type_name`. `old` is the
    /// record as stored; `new` is already reshaped to the declared schema.
    /// Returns how many objects were visited.
    pub fn enumerate_objects<F>(&mut self, type_name: &str, mut f: F) -> usize
    where
        F: FnMut(&Record, &mut Record),
    {
        if !self.registry.contains(type_name) {
            warn!(type_name, "migration enumerated an unregistered type");
            return 0;
        }
        let Some(objects) = self.objects.get_mut(type_name) else {
            return 0;
        };

        let mut visited = 0;
        for object in objects.iter_mut() {
            if let Some(new) = object.new.as_mut() {
                f(&object.old, new);
                visited += 1;
            }
        }
        visited
    }

    /// Copies the stored value of `old_name` into `new_name` for every object.
    pub fn rename_property(&mut self, type_name: &str, old_name: &str, new_name: &str) -> usize {
        self.enumerate_objects(type_name, |old, new| {
            if let Some(value) = old.get(old_name) {
                new.insert(new_name.to_string(), value.clone());
            }
        })
    }

    /// Drops every object of `type_name`.
    pub fn delete_data(&mut self, type_name: &str) {
        if let Some(objects) = self.objects.get_mut(type_name) {
            for object in objects.iter_mut() {
                object.new = None;
            }
        }
    }

    pub fn count(&self, type_name: &str) -> usize {
        self.objects
            .get(type_name)
            .map(|objects| objects.iter().filter(|object| object.new.is_some()).count())
            .unwrap_or(0)
    }
}

/// Reshapes a stored data file to the declared schema, runs the configured
/// block and validates the result.
pub(crate) fn migrate_data_file(
    file: DataFile,
    registry: &SchemaRegistry,
    config: &Configuration,
) -> Result<StoreState> {
    let old_version = file.schema_version;
    let new_version = config.schema_version;
    info!(old_version, new_version, "running schema migration");

    let primary_keys = file.primary_keys();
    let DataFile {
        version,
        schemas: old_schemas,
        tables: old_tables,
        ..
    } = file;

    let mut objects: BTreeMap<String, Vec<MigrationObject>> = BTreeMap::new();
    let mut retained: BTreeMap<String, Vec<Record>> = BTreeMap::new();
    for (type_name, records) in old_tables {
        match registry.get(&type_name) {
            Ok(schema) => {
                let migrated = records
                    .into_iter()
                    .map(|old| {
                        let new = schema.reshape(&old);
                        MigrationObject { old, new: Some(new) }
                    })
                    .collect();
                objects.insert(type_name, migrated);
            }
            Err(_) => {
                retained.insert(type_name, records);
            }
        }
    }

    if let Some(block) = &config.migration {
        let mut migration = Migration {
            old_schema_version: old_version,
            new_schema_version: new_version,
            objects: &mut objects,
            registry,
        };
        block(&mut migration, old_version);
    }

    let mut state = StoreState {
        schema_version: new_version,
        version,
        schemas: BTreeMap::new(),
        tables: BTreeMap::new(),
    };

    for schema in registry.iter() {
        let records: Vec<Record> = objects
            .remove(schema.name)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|object| object.new)
            .collect();
        schema
            .validate_records(records.iter())
            .map_err(|err| PersistError::SchemaMigrationFailed(err.to_string()))?;

        let mut table = Table::new();
        for record in records {
            let key = schema.primary_key_of(&record)?;
            table.upsert(key, record);
        }
        state.tables.insert(schema.name.to_string(), table);
        state
            .schemas
            .insert(schema.name.to_string(), schema.fingerprint());
    }

    for (type_name, records) in retained {
        let key_field = primary_keys
            .get(&type_name)
            .cloned()
            .unwrap_or_else(|| "id".to_string());
        let mut table = Table::new();
        for record in records {
            let key = record
                .get(&key_field)
                .and_then(crate::core::PrimaryKey::from_json)
                .ok_or_else(|| PersistError::MissingPrimaryKey(type_name.clone()))?;
            table.upsert(key, record);
        }
        if let Some(fingerprint) = old_schemas.get(&type_name) {
            state.schemas.insert(type_name.clone(), fingerprint.clone());
        }
        state.tables.insert(type_name, table);
    }

    Ok(state)
}

/// Integer value of a record field, if it holds one.
pub fn int_field(record: &Record, name: &str) -> Option<i64> {
    record.get(name).and_then(JsonValue::as_i64)
}

/// String value of a record field, if it holds one.
pub fn str_field<'r>(record: &'r Record, name: &str) -> Option<&'r str> {
    record.get(name).and_then(JsonValue::as_str)
}
