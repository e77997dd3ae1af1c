// ============================================================================
// Cascade Delete
// ============================================================================
//
// Worklist walk over the object graph. Pending objects live in an ordered set
// keyed by (type, primary key), so an object enters it at most once no matter
// how many paths lead to it; objects already removed are skipped when popped,
// which ends cycles. Only fields named in a schema's cascade rules are
// followed. All removals of one call share a single write transaction.
//
// ============================================================================

use crate::core::{ObjectKey, PrimaryKey, Record, Result};
use crate::schema::{FieldKind, ObjectSchema};
use crate::storage::{Session, UpdatePolicy};
use serde_json::Value as JsonValue;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::debug;

/// Removes `roots` and, when `cascading`, everything reachable from them
/// through cascade fields. Links left pointing at removed objects are cleared.
/// Returns how many objects were removed.
///
/// # Panics
///
/// Panics when a cascading back-reference field has no related type declared.
pub fn delete_objects(
    session: &Session,
    roots: impl IntoIterator<Item = ObjectKey>,
    cascading: bool,
) -> Result<usize> {
    let roots: Vec<ObjectKey> = roots.into_iter().collect();
    session.safe_write(|session| {
        let removed = if cascading {
            cascade(session, roots)?
        } else {
            let mut removed = Vec::new();
            for key in roots {
                if session.remove_record(&key)? {
                    removed.push(key);
                }
            }
            removed
        };

        clear_dangling_links(session, &removed)?;
        debug!(removed = removed.len(), cascading, "objects deleted");
        Ok(removed.len())
    })
}

fn cascade(session: &Session, roots: Vec<ObjectKey>) -> Result<Vec<ObjectKey>> {
    let registry = session.database().registry();
    let mut pending: BTreeSet<ObjectKey> = roots.into_iter().collect();
    let mut removed = Vec::new();

    while let Some(key) = pending.pop_first() {
        let Some(record) = session.record(&key)? else {
            continue;
        };
        let schema = registry.get(&key.type_name)?;
        enqueue_related(session, schema, &key, &record, &mut pending)?;
        session.remove_record(&key)?;
        removed.push(key);
    }

    Ok(removed)
}

fn enqueue_related(
    session: &Session,
    schema: &ObjectSchema,
    key: &ObjectKey,
    record: &Record,
    pending: &mut BTreeSet<ObjectKey>,
) -> Result<()> {
    for &(field_name, related_type) in schema.cascade {
        let Some(field) = schema.field(field_name) else {
            continue;
        };
        match field.kind {
            FieldKind::SingleRef(target) => {
                if let Some(related) = record.get(field_name).and_then(PrimaryKey::from_json) {
                    pending.insert(ObjectKey::new(target, related));
                }
            }
            FieldKind::ManyRef(target) => {
                let items = record.get(field_name).and_then(JsonValue::as_array);
                for related in items.into_iter().flatten().filter_map(PrimaryKey::from_json) {
                    pending.insert(ObjectKey::new(target, related));
                }
            }
            FieldKind::BackRef { origin_property } => {
                let Some(related_type) = related_type else {
                    panic!(
                        "Object type not specified for cascade delete of linking objects {}.{}",
                        schema.name, field_name
                    );
                };
                let links_back = session
                    .database()
                    .registry()
                    .get(related_type)?
                    .field(origin_property)
                    .and_then(|origin| origin.link_target())
                    == Some(schema.name);
                if !links_back {
                    continue;
                }
                for (related, related_record) in session.records(related_type)? {
                    if related_record
                        .get(origin_property)
                        .is_some_and(|value| key.primary_key.is_referenced_by(value))
                    {
                        pending.insert(ObjectKey::new(related_type, related));
                    }
                }
            }
            FieldKind::Scalar(_) => {}
        }
    }
    Ok(())
}

/// Nulls single links and drops list entries that point at removed objects.
fn clear_dangling_links(session: &Session, removed: &[ObjectKey]) -> Result<()> {
    if removed.is_empty() {
        return Ok(());
    }
    let mut removed_by_type: HashMap<&str, HashSet<&PrimaryKey>> = HashMap::new();
    for key in removed {
        removed_by_type
            .entry(key.type_name.as_str())
            .or_default()
            .insert(&key.primary_key);
    }

    let registry = session.database().registry();
    for schema in registry.iter() {
        let linking: Vec<_> = schema
            .stored_fields()
            .filter_map(|field| {
                let target = field.link_target()?;
                removed_by_type.get(target).map(|keys| (field, keys))
            })
            .collect();
        if linking.is_empty() {
            continue;
        }

        for (_, mut record) in session.records(schema.name)? {
            let mut changed = false;
            for (field, keys) in &linking {
                let Some(value) = record.get_mut(field.name) else {
                    continue;
                };
                match value {
                    JsonValue::Array(items) => {
                        let before = items.len();
                        items.retain(|item| {
                            PrimaryKey::from_json(item).is_none_or(|item| !keys.contains(&item))
                        });
                        changed |= items.len() != before;
                    }
                    other => {
                        if PrimaryKey::from_json(other).is_some_and(|link| keys.contains(&link)) {
                            *other = JsonValue::Null;
                            changed = true;
                        }
                    }
                }
            }
            if changed {
                session.put_record(schema.name, record, UpdatePolicy::All)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CascadeRule, Field, ScalarType};
    use crate::storage::{Configuration, Database};
    use serde_json::json;

    const FOLDER_FIELDS: &[Field] = &[
        Field::scalar("id", ScalarType::Int),
        Field::single_ref("parent", "Folder"),
        Field::many_ref("children", "Folder"),
    ];
    const FOLDER_CASCADE: &[CascadeRule] = &[("children", None)];
    static FOLDER: ObjectSchema =
        ObjectSchema::new("Folder", "id", FOLDER_FIELDS).with_cascade(FOLDER_CASCADE);

    fn folder(id: i64, parent: Option<i64>, children: &[i64]) -> Record {
        json!({ "id": id, "parent": parent, "children": children })
            .as_object()
            .cloned()
            .unwrap()
    }

    fn key(id: i64) -> ObjectKey {
        ObjectKey::new("Folder", PrimaryKey::Int(id))
    }

    fn open_tree() -> Database {
        let db = Database::open(Configuration::in_memory("cascade").object_types(vec![&FOLDER])).unwrap();
        db.session()
            .write(|s| {
                s.put_record("Folder", folder(1, None, &[2, 3]), UpdatePolicy::All)?;
                s.put_record("Folder", folder(2, Some(1), &[4]), UpdatePolicy::All)?;
                s.put_record("Folder", folder(3, Some(1), &[]), UpdatePolicy::All)?;
                s.put_record("Folder", folder(4, Some(2), &[]), UpdatePolicy::All)?;
                s.put_record("Folder", folder(5, None, &[]), UpdatePolicy::All)
            })
            .unwrap();
        db
    }

    #[test]
    fn test_cascade_removes_subtree_only() {
        let db = open_tree();
        let session = db.session();
        assert_eq!(delete_objects(&session, [key(2)], true).unwrap(), 2);

        let remaining: Vec<_> = session
            .records("Folder")
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(
            remaining,
            vec![PrimaryKey::Int(1), PrimaryKey::Int(3), PrimaryKey::Int(5)]
        );
        let root = session.record(&key(1)).unwrap().unwrap();
        assert_eq!(root["children"], json!([3]));
        assert_eq!(db.version().unwrap(), 2);
    }

    #[test]
    fn test_non_cascading_delete_clears_links() {
        let db = open_tree();
        let session = db.session();
        assert_eq!(delete_objects(&session, [key(1), key(99)], false).unwrap(), 1);
        assert_eq!(session.records("Folder").unwrap().len(), 4);
        let child = session.record(&key(2)).unwrap().unwrap();
        assert_eq!(child["parent"], JsonValue::Null);
    }

    #[test]
    fn test_joins_open_transaction() {
        let db = open_tree();
        let session = db.session();
        session
            .write(|s| {
                delete_objects(s, [key(1)], true)?;
                assert!(s.is_in_write_transaction());
                Ok(())
            })
            .unwrap();
        assert_eq!(session.records("Folder").unwrap().len(), 1);
        assert_eq!(db.version().unwrap(), 2);
    }
}
