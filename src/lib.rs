// ============================================================================
// ObjectKeep Library
// ============================================================================
//
// Persistence layer over a small embedded object store: uniform CRUD for model
// types, schema-version bookkeeping with migrations, cascading deletes across
// object graphs, detached copies and cross-thread saves of managed objects.
//
// ============================================================================

pub mod core;
pub mod migration;
pub mod persist;
pub mod schema;
pub mod storage;

pub use core::{ObjectKey, PersistError, PrimaryKey, Record, Result};
pub use migration::{
    DatabaseManager, DefaultMigration, FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, Migration,
    MigrationBlock, ManagerConfig, SchemaMigration, SchemaVersionStore, migration_block,
};
pub use persist::{
    CollectionChange, DiffingPolicy, Managed, Persistable, PersistableSliceExt, Results, Subscription,
};
pub use schema::{CascadeRule, Field, FieldKind, ObjectSchema, ScalarType, SchemaRegistry};
pub use storage::{
    Configuration, Database, Location, NotificationToken, RawChange, Session, ThreadSafeReference,
    UpdatePolicy,
};
