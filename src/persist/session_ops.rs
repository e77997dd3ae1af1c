//! Typed object operations on a [`Session`].

use super::managed::Managed;
use super::{Persistable, cascade, detach};
use crate::core::{ObjectKey, PersistError, PrimaryKey, Record, Result};
use crate::schema::{FieldKind, ObjectSchema};
use crate::storage::{Session, ThreadSafeReference, UpdatePolicy};
use serde_json::Value as JsonValue;
use std::collections::HashSet;

impl Session {
    /// Upserts `value` and every related object nested in it. Must run inside
    /// a write transaction.
    pub fn add<T: Persistable>(&self, value: &T, policy: UpdatePolicy) -> Result<Managed<T>> {
        let json = serde_json::to_value(value)?;
        let primary_key = self.add_value(T::schema().name, &json, policy)?;
        Ok(Managed::new(
            self.clone(),
            ObjectKey::new(T::schema().name, primary_key),
        ))
    }

    /// Untyped form of [`add`](Self::add). Related objects may be nested
    /// objects or bare primary keys of objects that already exist.
    ///
    /// Each object is written at most once per call; when the same key occurs
    /// more than once in the graph, the outermost occurrence wins.
    pub fn add_value(&self, type_name: &str, value: &JsonValue, policy: UpdatePolicy) -> Result<PrimaryKey> {
        let schema = self.database().registry().get(type_name)?;
        let mut written = HashSet::new();
        self.upsert_graph(schema, value, policy, &mut written)
    }

    fn upsert_graph(
        &self,
        schema: &'static ObjectSchema,
        value: &JsonValue,
        policy: UpdatePolicy,
        written: &mut HashSet<ObjectKey>,
    ) -> Result<PrimaryKey> {
        let object = value.as_object().ok_or_else(|| {
            PersistError::InvalidObject(format!("{} must be an object, got {}", schema.name, value))
        })?;
        let primary_key = schema.primary_key_of(object)?;
        if !written.insert(ObjectKey::new(schema.name, primary_key.clone())) {
            return Ok(primary_key);
        }

        let mut record = Record::new();
        for field in schema.stored_fields() {
            let value = object.get(field.name);
            let stored = match field.kind {
                FieldKind::Scalar(_) => value.cloned().unwrap_or_else(|| field.default_value()),
                FieldKind::SingleRef(target) => match value {
                    None | Some(JsonValue::Null) => JsonValue::Null,
                    Some(linked) => self.link(target, linked, policy, written)?,
                },
                FieldKind::ManyRef(target) => match value {
                    None | Some(JsonValue::Null) => JsonValue::Array(Vec::new()),
                    Some(JsonValue::Array(items)) => JsonValue::Array(
                        items
                            .iter()
                            .map(|item| self.link(target, item, policy, written))
                            .collect::<Result<Vec<_>>>()?,
                    ),
                    Some(other) => {
                        return Err(PersistError::InvalidObject(format!(
                            "{}.{} must be a list, got {}",
                            schema.name, field.name, other
                        )));
                    }
                },
                FieldKind::BackRef { .. } => continue,
            };
            record.insert(field.name.to_string(), stored);
        }

        self.put_record(schema.name, record, policy)
    }

    fn link(
        &self,
        target: &'static str,
        value: &JsonValue,
        policy: UpdatePolicy,
        written: &mut HashSet<ObjectKey>,
    ) -> Result<JsonValue> {
        if value.is_object() {
            let schema = self.database().registry().get(target)?;
            return Ok(self.upsert_graph(schema, value, policy, written)?.to_json());
        }
        let key = PrimaryKey::from_json(value)
            .ok_or_else(|| PersistError::InvalidObject(format!("invalid link to {}: {}", target, value)))?;
        if !self.contains(&ObjectKey::new(target, key.clone()))? {
            return Err(PersistError::InvalidObject(format!(
                "link to missing {}[{}]",
                target, key
            )));
        }
        Ok(key.to_json())
    }

    /// Managed handle for the stored `T` with `id`, if there is one.
    pub fn object<T: Persistable>(&self, id: T::Id) -> Result<Option<Managed<T>>> {
        self.database().registry().get(T::schema().name)?;
        let key = ObjectKey::new(T::schema().name, id.into());
        if self.contains(&key)? {
            Ok(Some(Managed::new(self.clone(), key)))
        } else {
            Ok(None)
        }
    }

    /// Every stored `T`, in insertion order.
    pub fn objects<T: Persistable>(&self) -> Result<Vec<Managed<T>>> {
        Ok(self
            .records(T::schema().name)?
            .into_iter()
            .map(|(key, _)| Managed::new(self.clone(), ObjectKey::new(T::schema().name, key)))
            .collect())
    }

    /// Resolves a reference taken on another thread. `None` once the object
    /// has been deleted.
    pub fn resolve<T: Persistable>(&self, reference: &ThreadSafeReference<T>) -> Option<Managed<T>> {
        match self.contains(reference.key()) {
            Ok(true) => Some(Managed::new(self.clone(), reference.key().clone())),
            _ => None,
        }
    }

    /// Detached copy of the stored object under `key`.
    pub fn detached<T: Persistable>(&self, key: &ObjectKey) -> Result<Option<T>> {
        match detach::detach_object(self, key)? {
            Some(json) => Ok(Some(serde_json::from_value(json)?)),
            None => Ok(None),
        }
    }

    /// Deletes `keys`, following cascade rules when `cascading` is set.
    /// Returns how many objects were removed.
    pub fn delete_objects(&self, keys: impl IntoIterator<Item = ObjectKey>, cascading: bool) -> Result<usize> {
        cascade::delete_objects(self, keys, cascading)
    }
}

#[cfg(test)]
mod tests {
    use crate::core::{ObjectKey, PersistError, PrimaryKey};
    use crate::schema::{Field, ObjectSchema, ScalarType};
    use crate::storage::{Configuration, Database, UpdatePolicy};
    use serde_json::json;

    const AUTHOR_FIELDS: &[Field] = &[
        Field::scalar("id", ScalarType::Int),
        Field::scalar("name", ScalarType::String),
        Field::single_ref("mentor", "Author"),
        Field::many_ref("books", "Book"),
    ];
    static AUTHOR: ObjectSchema = ObjectSchema::new("Author", "id", AUTHOR_FIELDS);

    const BOOK_FIELDS: &[Field] = &[
        Field::scalar("isbn", ScalarType::String),
        Field::back_ref("authors", "books"),
    ];
    static BOOK: ObjectSchema = ObjectSchema::new("Book", "isbn", BOOK_FIELDS);

    fn open() -> Database {
        Database::open(Configuration::in_memory("session-ops").object_types(vec![&AUTHOR, &BOOK])).unwrap()
    }

    #[test]
    fn test_add_value_upserts_nested_objects() {
        let db = open();
        let session = db.session();
        let value = json!({
            "id": 1,
            "name": "Ann",
            "mentor": { "id": 2, "name": "Bea", "mentor": null, "books": [] },
            "books": [{ "isbn": "x-1" }, "x-2"],
        });
        let err = session
            .write(|s| s.add_value("Author", &value, UpdatePolicy::All))
            .unwrap_err();
        assert!(matches!(err, PersistError::InvalidObject(_)));

        session
            .write(|s| {
                s.add_value("Book", &json!({ "isbn": "x-2" }), UpdatePolicy::All)?;
                s.add_value("Author", &value, UpdatePolicy::All)
            })
            .unwrap();

        let ann = session
            .record(&ObjectKey::new("Author", PrimaryKey::Int(1)))
            .unwrap()
            .unwrap();
        assert_eq!(ann["mentor"], json!(2));
        assert_eq!(ann["books"], json!(["x-1", "x-2"]));
        assert_eq!(session.records("Book").unwrap().len(), 2);
        assert_eq!(session.records("Author").unwrap().len(), 2);
    }

    #[test]
    fn test_outermost_occurrence_wins() {
        let db = open();
        let session = db.session();
        let value = json!({
            "id": 1,
            "name": "outer",
            "mentor": { "id": 1, "name": "inner", "mentor": null, "books": [] },
            "books": [],
        });
        session
            .write(|s| s.add_value("Author", &value, UpdatePolicy::All))
            .unwrap();

        let stored = session
            .record(&ObjectKey::new("Author", PrimaryKey::Int(1)))
            .unwrap()
            .unwrap();
        assert_eq!(stored["name"], json!("outer"));
        assert_eq!(stored["mentor"], json!(1));
    }

    #[test]
    fn test_back_references_are_not_stored() {
        let db = open();
        let session = db.session();
        session
            .write(|s| s.add_value("Book", &json!({ "isbn": "b", "authors": [{ "id": 9 }] }), UpdatePolicy::All))
            .unwrap();
        let book = session
            .record(&ObjectKey::new("Book", PrimaryKey::from("b")))
            .unwrap()
            .unwrap();
        assert!(!book.contains_key("authors"));
        assert!(session.records("Author").unwrap().is_empty());
    }
}
