use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PersistError {
    #[error("Storage session unavailable: {0}")]
    SessionUnavailable(String),

    #[error("Cross-thread worker unavailable: {0}")]
    CrossThreadWorkerUnavailable(String),

    #[error("Thread-safe reference to {0} could not be resolved")]
    ReferenceUnresolvable(String),

    #[error("Object of type '{0}' has no primary key")]
    MissingPrimaryKey(String),

    #[error("No managed '{0}' with primary key {1}")]
    ManagedCounterpartNotFound(String, String),

    #[error("Schema migration failed: {0}")]
    SchemaMigrationFailed(String),

    #[error("Schema mismatch for '{0}': {1}")]
    SchemaMismatch(String, String),

    #[error("Provided schema version {0} is less than last set version {1}")]
    InvalidSchemaVersion(u64, u64),

    #[error("Object type '{0}' is not registered")]
    UnknownObjectType(String),

    #[error("'{0}' with primary key {1} already exists")]
    ObjectAlreadyExists(String, String),

    #[error("Primary key of '{0}' cannot change from {1} to {2}")]
    PrimaryKeyImmutable(String, String, String),

    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Cannot modify a read-only database")]
    ReadOnly,

    #[error("Not in a write transaction")]
    NotInWriteTransaction,

    #[error("Already in a write transaction")]
    AlreadyInWriteTransaction,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Lock error: {0}")]
    LockError(String),

    #[error("I/O error: {0}")]
    IoError(String),
}

pub type Result<T> = std::result::Result<T, PersistError>;

impl<T> From<std::sync::PoisonError<T>> for PersistError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for PersistError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for PersistError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for PersistError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}
