// ============================================================================
// Object Schemas
// ============================================================================
//
// Static, per-type descriptors of every persisted field. The cascade walker,
// the detach engine and the migration reshaper all drive off these tables
// instead of inspecting values at runtime.
//
// ============================================================================

pub mod registry;

pub use registry::SchemaRegistry;

use crate::core::{PersistError, PrimaryKey, Record, Result};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashSet};

/// Field name to a printable kind, plus the primary key under `"__primary_key"`.
/// Two schemas with equal fingerprints are storage compatible.
pub type SchemaFingerprint = BTreeMap<String, String>;

const PRIMARY_KEY_ENTRY: &str = "__primary_key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarType {
    Int,
    Double,
    Bool,
    String,
}

impl ScalarType {
    fn name(self) -> &'static str {
        match self {
            Self::Int => "int",
            Self::Double => "double",
            Self::Bool => "bool",
            Self::String => "string",
        }
    }

    fn default_value(self) -> JsonValue {
        match self {
            Self::Int => JsonValue::from(0),
            Self::Double => JsonValue::from(0.0),
            Self::Bool => JsonValue::Bool(false),
            Self::String => JsonValue::String(String::new()),
        }
    }

    fn accepts(self, value: &JsonValue) -> bool {
        match self {
            Self::Int => value.is_i64() || value.is_u64(),
            Self::Double => value.is_number(),
            Self::Bool => value.is_boolean(),
            Self::String => value.is_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Scalar(ScalarType),
    /// Link to at most one object of the named type.
    SingleRef(&'static str),
    /// Ordered list of links to objects of the named type.
    ManyRef(&'static str),
    /// Computed inverse of `origin_property` on some other type. Never stored.
    BackRef { origin_property: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Field {
    pub name: &'static str,
    pub kind: FieldKind,
    pub optional: bool,
}

impl Field {
    pub const fn scalar(name: &'static str, ty: ScalarType) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar(ty),
            optional: false,
        }
    }

    pub const fn optional(name: &'static str, ty: ScalarType) -> Self {
        Self {
            name,
            kind: FieldKind::Scalar(ty),
            optional: true,
        }
    }

    pub const fn single_ref(name: &'static str, target: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::SingleRef(target),
            optional: true,
        }
    }

    pub const fn many_ref(name: &'static str, target: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::ManyRef(target),
            optional: false,
        }
    }

    pub const fn back_ref(name: &'static str, origin_property: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::BackRef { origin_property },
            optional: false,
        }
    }

    pub fn is_stored(&self) -> bool {
        !matches!(self.kind, FieldKind::BackRef { .. })
    }

    /// Type this field links to, for single and many references.
    pub fn link_target(&self) -> Option<&'static str> {
        match self.kind {
            FieldKind::SingleRef(target) | FieldKind::ManyRef(target) => Some(target),
            _ => None,
        }
    }

    pub fn default_value(&self) -> JsonValue {
        match self.kind {
            FieldKind::Scalar(_) if self.optional => JsonValue::Null,
            FieldKind::Scalar(ty) => ty.default_value(),
            FieldKind::SingleRef(_) | FieldKind::BackRef { .. } => JsonValue::Null,
            FieldKind::ManyRef(_) => JsonValue::Array(Vec::new()),
        }
    }

    fn fingerprint(&self) -> String {
        match self.kind {
            FieldKind::Scalar(ty) if self.optional => format!("{}?", ty.name()),
            FieldKind::Scalar(ty) => ty.name().to_string(),
            FieldKind::SingleRef(target) => format!("link<{}>", target),
            FieldKind::ManyRef(target) => format!("list<{}>", target),
            FieldKind::BackRef { origin_property } => format!("backref<{}>", origin_property),
        }
    }

    fn accepts(&self, value: &JsonValue) -> bool {
        match self.kind {
            FieldKind::Scalar(_) if value.is_null() => self.optional,
            FieldKind::Scalar(ty) => ty.accepts(value),
            FieldKind::SingleRef(_) => value.is_null() || PrimaryKey::from_json(value).is_some(),
            FieldKind::ManyRef(_) => value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| PrimaryKey::from_json(item).is_some())),
            FieldKind::BackRef { .. } => true,
        }
    }
}

/// Cascade declaration: field name and, for back-references, the type whose
/// objects point back at this one.
pub type CascadeRule = (&'static str, Option<&'static str>);

#[derive(Debug, PartialEq, Eq)]
pub struct ObjectSchema {
    pub name: &'static str,
    pub primary_key: &'static str,
    pub fields: &'static [Field],
    pub cascade: &'static [CascadeRule],
}

impl ObjectSchema {
    pub const fn new(
        name: &'static str,
        primary_key: &'static str,
        fields: &'static [Field],
    ) -> Self {
        Self {
            name,
            primary_key,
            fields,
            cascade: &[],
        }
    }

    pub const fn with_cascade(mut self, cascade: &'static [CascadeRule]) -> Self {
        self.cascade = cascade;
        self
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn stored_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|field| field.is_stored())
    }

    /// Declared cascade entry for `field`. `None` when the field does not cascade.
    pub fn cascade_rule(&self, field: &str) -> Option<Option<&'static str>> {
        self.cascade
            .iter()
            .find(|(name, _)| *name == field)
            .map(|(_, target)| *target)
    }

    pub fn fingerprint(&self) -> SchemaFingerprint {
        let mut fingerprint: SchemaFingerprint = self
            .stored_fields()
            .map(|field| (field.name.to_string(), field.fingerprint()))
            .collect();
        fingerprint.insert(PRIMARY_KEY_ENTRY.to_string(), self.primary_key.to_string());
        fingerprint
    }

    pub fn primary_key_of(&self, record: &Record) -> Result<PrimaryKey> {
        record
            .get(self.primary_key)
            .and_then(PrimaryKey::from_json)
            .ok_or_else(|| PersistError::MissingPrimaryKey(self.name.to_string()))
    }

    pub fn default_record(&self) -> Record {
        self.stored_fields()
            .map(|field| (field.name.to_string(), field.default_value()))
            .collect()
    }

    /// Copies the fields this schema knows from `old`, filling defaults for
    /// the rest. Fields that no longer exist are dropped.
    pub fn reshape(&self, old: &Record) -> Record {
        let mut record = self.default_record();
        for (name, value) in record.iter_mut() {
            if let Some(old_value) = old.get(name) {
                *value = old_value.clone();
            }
        }
        record
    }

    pub fn validate_record(&self, record: &Record) -> Result<()> {
        self.primary_key_of(record)?;

        for field in self.stored_fields() {
            let value = record.get(field.name).ok_or_else(|| {
                PersistError::InvalidObject(format!("{}.{} is missing", self.name, field.name))
            })?;
            if !field.accepts(value) {
                return Err(PersistError::InvalidObject(format!(
                    "{}.{} expects {}, got {}",
                    self.name,
                    field.name,
                    field.fingerprint(),
                    value
                )));
            }
        }

        for name in record.keys() {
            if !self.field(name).is_some_and(Field::is_stored) {
                return Err(PersistError::InvalidObject(format!(
                    "{} has no stored field '{}'",
                    self.name, name
                )));
            }
        }

        Ok(())
    }

    /// Validates every record and the uniqueness of their primary keys.
    pub fn validate_records<'a>(&self, records: impl IntoIterator<Item = &'a Record>) -> Result<()> {
        let mut seen = HashSet::new();
        for record in records {
            self.validate_record(record)?;
            let key = self.primary_key_of(record)?;
            if !seen.insert(key.clone()) {
                return Err(PersistError::ObjectAlreadyExists(
                    self.name.to_string(),
                    key.to_string(),
                ));
            }
        }
        Ok(())
    }
}
