// ============================================================================
// Embedded Object Store
// ============================================================================
//
// The storage handle the persistence layer is built on: typed records keyed
// by primary key, per-thread sessions, staged write transactions, thread-safe
// references and change notifications.
//
// ============================================================================

pub mod config;
pub mod engine;
pub mod notify;
pub mod persistence;
pub mod reference;
pub mod session;
pub mod table;

pub use config::{Configuration, Location};
pub use engine::Database;
pub use notify::{IndexChanges, NotificationToken, RawChange};
pub use reference::ThreadSafeReference;
pub use session::{Session, UpdatePolicy};
pub use table::{StoreState, Table};
