//! Durable schema-version bookkeeping kept outside the data file, so it
//! survives the data file being deleted and recreated.

use crate::core::Result;
use crate::storage::persistence::write_atomic;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const SCHEMA_VERSION_KEY: &str = "schemaVersion";

/// Small durable key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<JsonValue>>;
    fn set(&self, key: &str, value: JsonValue) -> Result<()>;
}

impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        (**self).set(key, value)
    }
}

/// JSON file of key/value pairs, rewritten atomically on every `set`.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    values: Mutex<BTreeMap<String, JsonValue>>,
}

impl FileKeyValueStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let values = if path.exists() {
            let data = fs::read(&path)?;
            serde_json::from_slice(&data)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path,
            values: Mutex::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl KeyValueStore for FileKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.values.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        let mut values = self.values.lock()?;
        let previous = values.insert(key.to_string(), value);
        let serialized = serde_json::to_vec_pretty(&*values)?;
        if let Err(err) = write_atomic(&self.path, &serialized) {
            match previous {
                Some(previous) => values.insert(key.to_string(), previous),
                None => values.remove(key),
            };
            return Err(err);
        }
        Ok(())
    }
}

/// Process-memory store, mainly for tests.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    values: Mutex<BTreeMap<String, JsonValue>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KeyValueStore for MemoryKeyValueStore {
    fn get(&self, key: &str) -> Result<Option<JsonValue>> {
        Ok(self.values.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: JsonValue) -> Result<()> {
        self.values.lock()?.insert(key.to_string(), value);
        Ok(())
    }
}

/// The schema version counter, stored under [`SCHEMA_VERSION_KEY`].
#[derive(Debug)]
pub struct SchemaVersionStore<S> {
    store: S,
}

impl<S: KeyValueStore> SchemaVersionStore<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Stored version, or 0 when absent or not an unsigned integer.
    pub fn get_version(&self) -> Result<u64> {
        Ok(self
            .store
            .get(SCHEMA_VERSION_KEY)?
            .and_then(|value| value.as_u64())
            .unwrap_or(0))
    }

    pub fn set_version(&self, version: u64) -> Result<()> {
        self.store.set(SCHEMA_VERSION_KEY, JsonValue::from(version))
    }

    /// Bumps the stored version by one and returns the new value.
    pub fn increment(&self) -> Result<u64> {
        let next = self.get_version()? + 1;
        self.set_version(next)?;
        Ok(next)
    }

    pub fn store(&self) -> &S {
        &self.store
    }
}
