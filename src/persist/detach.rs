// ============================================================================
// Detach
// ============================================================================
//
// Deep-copies a stored object and everything it links to into a plain JSON
// value with no tie to the session. Links are followed recursively; an object
// met again on the current path is copied shallowly (scalars only, links
// empty), so cyclic graphs terminate. Shared targets reached along different
// paths are copied in full each time.
//
// Records come from a `RecordSource`: a session (staged writes included) or
// the committed store state (used for change notifications).
//
// ============================================================================

use crate::core::{ObjectKey, PrimaryKey, Record, Result};
use crate::schema::{FieldKind, ObjectSchema, SchemaRegistry};
use crate::storage::{Session, StoreState};
use serde_json::Value as JsonValue;

/// Where detached copies read their records from.
pub trait RecordSource {
    fn registry(&self) -> &SchemaRegistry;

    fn record(&self, key: &ObjectKey) -> Result<Option<Record>>;
}

impl RecordSource for Session {
    fn registry(&self) -> &SchemaRegistry {
        self.database().registry()
    }

    fn record(&self, key: &ObjectKey) -> Result<Option<Record>> {
        Session::record(self, key)
    }
}

/// Committed state only, as seen while holding the store lock.
pub struct Committed<'a> {
    registry: &'a SchemaRegistry,
    state: &'a StoreState,
}

impl<'a> Committed<'a> {
    pub fn new(registry: &'a SchemaRegistry, state: &'a StoreState) -> Self {
        Self { registry, state }
    }
}

impl RecordSource for Committed<'_> {
    fn registry(&self) -> &SchemaRegistry {
        self.registry
    }

    fn record(&self, key: &ObjectKey) -> Result<Option<Record>> {
        Ok(self
            .state
            .table(&key.type_name)
            .and_then(|table| table.get(&key.primary_key))
            .cloned())
    }
}

/// Detached copy of the object under `key`, or `None` when it is not stored.
pub fn detach_object<S: RecordSource + ?Sized>(source: &S, key: &ObjectKey) -> Result<Option<JsonValue>> {
    let schema = source.registry().get(&key.type_name)?;
    let Some(record) = source.record(key)? else {
        return Ok(None);
    };
    let mut path = vec![key.clone()];
    detach_record(source, schema, &record, &mut path).map(Some)
}

/// Detached copy of `record`. `path` holds the objects being copied above it.
pub fn detach_record<S: RecordSource + ?Sized>(
    source: &S,
    schema: &ObjectSchema,
    record: &Record,
    path: &mut Vec<ObjectKey>,
) -> Result<JsonValue> {
    let mut object = Record::new();
    for field in schema.fields {
        let value = record.get(field.name);
        let detached = match field.kind {
            FieldKind::Scalar(_) => value.cloned().unwrap_or_else(|| field.default_value()),
            FieldKind::SingleRef(target) => match value.and_then(PrimaryKey::from_json) {
                Some(key) => detach_link(source, target, key, path)?.unwrap_or(JsonValue::Null),
                None => JsonValue::Null,
            },
            FieldKind::ManyRef(target) => {
                let mut items = Vec::new();
                for item in value.and_then(JsonValue::as_array).into_iter().flatten() {
                    let Some(key) = PrimaryKey::from_json(item) else {
                        continue;
                    };
                    if let Some(detached) = detach_link(source, target, key, path)? {
                        items.push(detached);
                    }
                }
                JsonValue::Array(items)
            }
            FieldKind::BackRef { .. } => JsonValue::Array(Vec::new()),
        };
        object.insert(field.name.to_string(), detached);
    }
    Ok(JsonValue::Object(object))
}

/// Detached copies of every committed object of `type_name`, in insertion order.
pub fn detach_table(source: &Committed<'_>, type_name: &str) -> Result<Vec<JsonValue>> {
    let schema = source.registry.get(type_name)?;
    let Some(table) = source.state.table(type_name) else {
        return Ok(Vec::new());
    };
    table
        .iter()
        .map(|(primary_key, record)| {
            let mut path = vec![ObjectKey::new(type_name, primary_key.clone())];
            detach_record(source, schema, record, &mut path)
        })
        .collect()
}

fn detach_link<S: RecordSource + ?Sized>(
    source: &S,
    target: &'static str,
    primary_key: PrimaryKey,
    path: &mut Vec<ObjectKey>,
) -> Result<Option<JsonValue>> {
    let schema = source.registry().get(target)?;
    let key = ObjectKey::new(target, primary_key);
    let Some(record) = source.record(&key)? else {
        return Ok(None);
    };

    if path.contains(&key) {
        return Ok(Some(shallow_copy(schema, &record)));
    }

    path.push(key);
    let detached = detach_record(source, schema, &record, path);
    path.pop();
    detached.map(Some)
}

fn shallow_copy(schema: &ObjectSchema, record: &Record) -> JsonValue {
    let object: Record = schema
        .fields
        .iter()
        .map(|field| {
            let value = match field.kind {
                FieldKind::Scalar(_) => record
                    .get(field.name)
                    .cloned()
                    .unwrap_or_else(|| field.default_value()),
                _ => field.default_value(),
            };
            (field.name.to_string(), value)
        })
        .collect();
    JsonValue::Object(object)
}
