//! Data file format and atomic file writes.

use super::table::{StoreState, Table};
use crate::core::{PersistError, Record, Result};
use crate::schema::SchemaFingerprint;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

pub const DATA_FILE_FORMAT_VERSION: u16 = 1;

// ============================================================================
// Data File
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFile {
    pub format_version: u16,
    pub schema_version: u64,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub schemas: BTreeMap<String, SchemaFingerprint>,
    /// Records per type in insertion order.
    pub tables: BTreeMap<String, Vec<Record>>,
}

impl DataFile {
    pub fn from_state(state: &StoreState, created_at: DateTime<Utc>) -> Self {
        Self {
            format_version: DATA_FILE_FORMAT_VERSION,
            schema_version: state.schema_version,
            version: state.version,
            created_at,
            updated_at: Utc::now(),
            schemas: state.schemas.clone(),
            tables: state
                .tables
                .iter()
                .map(|(name, table)| (name.clone(), table.records()))
                .collect(),
        }
    }

    /// Rebuilds the in-memory state. `primary_keys` maps each type to its
    /// primary key field; records without a usable key are rejected.
    pub fn into_state(self, primary_keys: &BTreeMap<String, String>) -> Result<StoreState> {
        let mut tables = BTreeMap::new();
        for (type_name, records) in self.tables {
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
            tables.insert(type_name, table);
        }

        Ok(StoreState {
            schema_version: self.schema_version,
            version: self.version,
            schemas: self.schemas,
            tables,
        })
    }

    /// Primary key field of every stored type, read from the fingerprints.
    pub fn primary_keys(&self) -> BTreeMap<String, String> {
        self.schemas
            .iter()
            .filter_map(|(name, fingerprint)| {
                fingerprint
                    .get("__primary_key")
                    .map(|key| (name.clone(), key.clone()))
            })
            .collect()
    }
}

// ============================================================================
// File IO
// ============================================================================

pub fn load(path: &Path) -> Result<Option<DataFile>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path)?;
    let file: DataFile = rmp_serde::from_slice(&data)?;
    if file.format_version != DATA_FILE_FORMAT_VERSION {
        return Err(PersistError::SessionUnavailable(format!(
            "unsupported data file format {} in {}",
            file.format_version,
            path.display()
        )));
    }
    Ok(Some(file))
}

pub fn save(path: &Path, file: &DataFile) -> Result<()> {
    let serialized = rmp_serde::to_vec_named(file)?;
    write_atomic(path, &serialized)
}

/// Writes to a temp file next to `path`, syncs it, then renames it over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(bytes)?;
    temp.flush()?;
    temp.as_file().sync_all()?;
    temp.persist(path)
        .map_err(|err| PersistError::IoError(format!("Failed to persist {}: {}", path.display(), err)))?;
    Ok(())
}
