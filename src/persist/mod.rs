// ============================================================================
// Persistable Façade
// ============================================================================
//
// Uniform save/load/delete/query operations for application model types.
// Each operation opens its own write transaction unless the calling thread's
// session already has one open, in which case it joins it.
//
// Convenience operations return `Option`, `bool` or an empty collection and
// log the underlying error; the `try_`/`saved` variants return the concrete
// `PersistError`. "Not found" is never an error.
//
// ============================================================================

pub mod cascade;
pub mod collection;
pub mod detach;
mod handoff;
pub mod managed;
pub mod results;
mod session_ops;

pub use collection::{DiffingPolicy, PersistableSliceExt};
pub use managed::Managed;
pub use results::{CollectionChange, Results, Subscription};

use crate::core::{ObjectKey, PersistError, PrimaryKey, Result};
use crate::schema::ObjectSchema;
use crate::storage::{Database, UpdatePolicy};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// A model type stored in the database.
///
/// Implementors describe their stored shape with a static [`ObjectSchema`] and
/// serialize to a JSON object whose keys are the schema's field names. Related
/// objects serialize nested (`Option<Box<T>>`, `Vec<T>`); back-reference
/// fields should be `#[serde(default)]` collections, they are never stored.
///
/// # Examples
///
/// ```no_run
/// use objectkeep::{Configuration, Database, Field, ObjectSchema, Persistable, ScalarType};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Default, Serialize, Deserialize)]
/// struct Model {
///     id: String,
///     count: i64,
/// }
///
/// const MODEL_FIELDS: &[Field] = &[
///     Field::scalar("id", ScalarType::String),
///     Field::scalar("count", ScalarType::Int),
/// ];
/// static MODEL: ObjectSchema = ObjectSchema::new("Model", "id", MODEL_FIELDS);
///
/// impl Persistable for Model {
///     type Id = String;
///     fn schema() -> &'static ObjectSchema { &MODEL }
///     fn id(&self) -> String { self.id.clone() }
/// }
///
/// # fn main() -> objectkeep::Result<()> {
/// let db = Database::open(Configuration::in_memory("models").object_types(vec![&MODEL]))?;
/// Model::create(&db, |m| m.id = "a".into());
/// let stored = Model::get(&db, "a".to_string());
/// assert!(stored.is_some());
/// # Ok(())
/// # }
/// ```
pub trait Persistable: Serialize + DeserializeOwned + Clone + Default + 'static {
    type Id: Clone + PartialEq + Into<PrimaryKey>;

    fn schema() -> &'static ObjectSchema;

    fn id(&self) -> Self::Id;

    fn primary_key(&self) -> PrimaryKey {
        self.id().into()
    }

    fn object_key(&self) -> ObjectKey {
        ObjectKey::new(Self::schema().name, self.primary_key())
    }

    /// Plain values are never managed; see [`Managed`].
    fn is_managed(&self) -> bool {
        false
    }

    // ========================================================================
    // Type-level operations
    // ========================================================================

    /// Point lookup. `None` when absent or when the store cannot be read.
    fn get(db: &Database, id: Self::Id) -> Option<Managed<Self>> {
        db.session()
            .object::<Self>(id)
            .inspect_err(|err| warn!(error = %err, type_name = Self::schema().name, "get failed"))
            .ok()
            .flatten()
    }

    fn all(db: &Database) -> Vec<Managed<Self>> {
        db.session()
            .objects::<Self>()
            .inspect_err(|err| warn!(error = %err, type_name = Self::schema().name, "all failed"))
            .unwrap_or_default()
    }

    /// Live query over every stored object. `None` when the type is not
    /// registered with `db`.
    fn all_results(db: &Database) -> Option<Results<Self>> {
        Results::new(db)
            .inspect_err(|err| warn!(error = %err, type_name = Self::schema().name, "all_results failed"))
            .ok()
    }

    /// Builds a default value, lets `build` fill it in and saves it.
    fn create(db: &Database, build: impl FnOnce(&mut Self)) -> Option<Managed<Self>> {
        let mut value = Self::default();
        build(&mut value);
        value.save(db, UpdatePolicy::All)
    }

    /// Deletes every stored object of this type. Returns how many objects
    /// were removed, related objects included.
    fn delete_all(db: &Database, cascading: bool) -> usize {
        let session = db.session();
        let result = session.records(Self::schema().name).and_then(|records| {
            let keys = records
                .into_iter()
                .map(|(key, _)| ObjectKey::new(Self::schema().name, key));
            cascade::delete_objects(&session, keys, cascading)
        });
        result
            .inspect_err(|err| warn!(error = %err, type_name = Self::schema().name, "delete_all failed"))
            .unwrap_or(0)
    }

    // ========================================================================
    // Instance operations on plain values
    // ========================================================================

    fn save(&self, db: &Database, update: UpdatePolicy) -> Option<Managed<Self>> {
        self.saved(db, update)
            .inspect_err(|err| warn!(error = %err, key = %self.object_key(), "save failed"))
            .ok()
    }

    /// Upserts this value and every nested related object in one transaction.
    fn saved(&self, db: &Database, update: UpdatePolicy) -> Result<Managed<Self>> {
        let session = db.session();
        session.safe_write(|session| session.add(self, update))
    }

    /// Deletes the stored counterpart, if any.
    fn delete(&self, db: &Database, cascading: bool) {
        if let Err(err) = self.try_delete(db, cascading) {
            warn!(error = %err, key = %self.object_key(), "delete failed");
        }
    }

    fn try_delete(&self, db: &Database, cascading: bool) -> Result<()> {
        match self.managed(db) {
            Some(managed) => managed.try_delete(cascading),
            None => {
                debug!(key = %self.object_key(), "nothing stored to delete");
                Ok(())
            }
        }
    }

    /// Applies `mutate` to the stored counterpart. A no-op when nothing is
    /// stored under this value's primary key.
    fn edit(&self, db: &Database, mutate: impl FnOnce(&mut Self)) {
        match self.managed(db) {
            Some(managed) => managed.edit(mutate),
            None => debug!(key = %self.object_key(), "nothing stored to edit"),
        }
    }

    /// The stored object with this value's primary key.
    fn managed(&self, db: &Database) -> Option<Managed<Self>> {
        Self::get(db, self.id())
    }

    fn try_managed(&self, db: &Database) -> Result<Managed<Self>> {
        db.session().object::<Self>(self.id())?.ok_or_else(|| {
            PersistError::ManagedCounterpartNotFound(
                Self::schema().name.to_string(),
                self.primary_key().to_string(),
            )
        })
    }
}
