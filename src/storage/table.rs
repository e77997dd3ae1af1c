use crate::core::{PrimaryKey, Record};
use crate::schema::SchemaFingerprint;
use std::collections::{BTreeMap, HashMap};

/// Objects of one type in insertion order, indexed by primary key.
#[derive(Debug, Clone, Default)]
pub struct Table {
    next_row: u64,
    rows: BTreeMap<u64, (PrimaryKey, Record)>,
    index: HashMap<PrimaryKey, u64>,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &PrimaryKey) -> Option<&Record> {
        let row = self.index.get(key)?;
        self.rows.get(row).map(|(_, record)| record)
    }

    pub fn contains(&self, key: &PrimaryKey) -> bool {
        self.index.contains_key(key)
    }

    /// Inserts or replaces in place. Returns true when the key was new.
    pub fn upsert(&mut self, key: PrimaryKey, record: Record) -> bool {
        if let Some(row) = self.index.get(&key) {
            if let Some(slot) = self.rows.get_mut(row) {
                slot.1 = record;
            }
            return false;
        }

        let row = self.next_row;
        self.next_row += 1;
        self.index.insert(key.clone(), row);
        self.rows.insert(row, (key, record));
        true
    }

    pub fn remove(&mut self, key: &PrimaryKey) -> Option<Record> {
        let row = self.index.remove(key)?;
        self.rows.remove(&row).map(|(_, record)| record)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PrimaryKey, &Record)> {
        self.rows.values().map(|(key, record)| (key, record))
    }

    pub fn keys(&self) -> Vec<PrimaryKey> {
        self.rows.values().map(|(key, _)| key.clone()).collect()
    }

    pub fn records(&self) -> Vec<Record> {
        self.rows.values().map(|(_, record)| record.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Committed contents of a database.
#[derive(Debug, Clone, Default)]
pub struct StoreState {
    pub schema_version: u64,
    /// Incremented once per committed write transaction.
    pub version: u64,
    pub schemas: BTreeMap<String, SchemaFingerprint>,
    pub tables: BTreeMap<String, Table>,
}

impl StoreState {
    pub fn new(schema_version: u64, schemas: BTreeMap<String, SchemaFingerprint>) -> Self {
        let tables = schemas
            .keys()
            .map(|name| (name.clone(), Table::new()))
            .collect();
        Self {
            schema_version,
            version: 0,
            schemas,
            tables,
        }
    }

    pub fn table(&self, type_name: &str) -> Option<&Table> {
        self.tables.get(type_name)
    }

    pub fn table_mut(&mut self, type_name: &str) -> &mut Table {
        self.tables.entry(type_name.to_string()).or_default()
    }
}
