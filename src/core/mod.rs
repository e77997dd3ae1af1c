pub mod error;
pub mod value;

pub use error::{PersistError, Result};
pub use value::{ObjectKey, PrimaryKey, Record};
