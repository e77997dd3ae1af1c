use super::{FieldKind, ObjectSchema, ScalarType, SchemaFingerprint};
use crate::core::{PersistError, Result};
use std::collections::{BTreeMap, HashMap};

/// Every object type a database was opened with, by name.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, &'static ObjectSchema>,
    order: Vec<&'static str>,
}

impl SchemaRegistry {
    pub fn new(object_types: &[&'static ObjectSchema]) -> Result<Self> {
        let mut registry = Self::default();
        for schema in object_types {
            registry.register(schema)?;
        }
        registry.validate_links()?;
        Ok(registry)
    }

    fn register(&mut self, schema: &'static ObjectSchema) -> Result<()> {
        if self.schemas.contains_key(schema.name) {
            return Err(PersistError::SchemaMismatch(
                schema.name.to_string(),
                "type registered twice".to_string(),
            ));
        }

        let primary = schema.field(schema.primary_key).ok_or_else(|| {
            PersistError::MissingPrimaryKey(schema.name.to_string())
        })?;
        let valid_key = matches!(
            primary.kind,
            FieldKind::Scalar(ScalarType::Int) | FieldKind::Scalar(ScalarType::String)
        ) && !primary.optional;
        if !valid_key {
            return Err(PersistError::SchemaMismatch(
                schema.name.to_string(),
                format!(
                    "primary key '{}' must be a non-optional int or string",
                    schema.primary_key
                ),
            ));
        }

        self.schemas.insert(schema.name, schema);
        self.order.push(schema.name);
        Ok(())
    }

    fn validate_links(&self) -> Result<()> {
        for schema in self.iter() {
            for field in schema.fields {
                if let Some(target) = field.link_target() {
                    if !self.contains(target) {
                        return Err(PersistError::UnknownObjectType(target.to_string()));
                    }
                }
            }
            for (field, _) in schema.cascade {
                if schema.field(field).is_none() {
                    return Err(PersistError::SchemaMismatch(
                        schema.name.to_string(),
                        format!("cascade rule names unknown field '{}'", field),
                    ));
                }
            }
        }
        Ok(())
    }

    pub fn get(&self, type_name: &str) -> Result<&'static ObjectSchema> {
        self.schemas
            .get(type_name)
            .copied()
            .ok_or_else(|| PersistError::UnknownObjectType(type_name.to_string()))
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.schemas.contains_key(type_name)
    }

    /// Schemas in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &'static ObjectSchema> + '_ {
        self.order.iter().filter_map(|name| self.schemas.get(name).copied())
    }

    pub fn fingerprints(&self) -> BTreeMap<String, SchemaFingerprint> {
        self.iter()
            .map(|schema| (schema.name.to_string(), schema.fingerprint()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
