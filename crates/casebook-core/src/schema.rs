//! # Kind Schemas
//!
//! Each entity kind declares its columns once: name, semantic type, whether
//! `update` may change it and whether bare filter strings search it by
//! substring. The filter parser coerces against these types and the
//! repository intersects update payloads with the mutable set.

use casebook_rbac::EntityKind;
use chrono::{DateTime, NaiveDate, SecondsFormat, TimeZone, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::{CoreError, CoreResult};
use crate::record::Tlp;

const OPEN_CLOSED: &[&str] = &["open", "closed"];
const PROMOTABLE: &[&str] = &["open", "closed", "promoted"];

/// Semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Int,
    /// One of a fixed set of lowercase names
    Enum(&'static [&'static str]),
    DateTime,
    String,
    /// Arbitrary JSON, stored as given and never filterable
    Json,
}

impl FieldType {
    /// Name used in error messages.
    pub fn describe(&self) -> String {
        match self {
            FieldType::Int => "int".to_string(),
            FieldType::Enum(values) => format!("one of [{}]", values.join(", ")),
            FieldType::DateTime => "datetime".to_string(),
            FieldType::String => "string".to_string(),
            FieldType::Json => "json".to_string(),
        }
    }

    /// Coerce an incoming value to the stored representation.
    ///
    /// `null` is accepted for every type and clears the column.
    pub fn coerce(&self, field: &str, value: &Value) -> CoreResult<Value> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match self {
            FieldType::Int => coerce_int(value)
                .map(Value::from)
                .ok_or_else(|| CoreError::mismatch(field, self.describe(), value)),
            FieldType::Enum(values) => value
                .as_str()
                .and_then(|s| canonical_enum(*values, s))
                .map(Value::from)
                .ok_or_else(|| CoreError::mismatch(field, self.describe(), value)),
            FieldType::DateTime => coerce_datetime(value)
                .map(|dt| Value::from(dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
                .ok_or_else(|| CoreError::mismatch(field, self.describe(), value)),
            FieldType::String => match value {
                Value::String(_) => Ok(value.clone()),
                Value::Number(n) => Ok(Value::from(n.to_string())),
                Value::Bool(b) => Ok(Value::from(b.to_string())),
                _ => Err(CoreError::mismatch(field, self.describe(), value)),
            },
            FieldType::Json => Ok(value.clone()),
        }
    }
}

pub(crate) fn coerce_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn canonical_enum(values: &'static [&'static str], raw: &str) -> Option<&'static str> {
    let wanted = raw.trim();
    values
        .iter()
        .copied()
        .find(|v| v.eq_ignore_ascii_case(wanted))
}

/// Parse RFC 3339, a bare `YYYY-MM-DD` date, or epoch seconds.
pub(crate) fn coerce_datetime(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::Number(n) => n.as_i64().and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
        Value::String(s) => parse_datetime(s),
        _ => None,
    }
}

pub(crate) fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// One column of a kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: &'static str,
    pub ty: FieldType,
    /// Whether `update` may change it
    pub mutable: bool,
    /// Whether a bare filter string matches by substring
    pub fragment: bool,
}

impl FieldSpec {
    /// A mutable, exact-match column.
    pub const fn new(name: &'static str, ty: FieldType) -> Self {
        Self {
            name,
            ty,
            mutable: true,
            fragment: false,
        }
    }

    /// Mark read-only after create.
    pub const fn immutable(mut self) -> Self {
        self.mutable = false;
        self
    }

    /// Mark substring-searchable.
    pub const fn fragment(mut self) -> Self {
        self.fragment = true;
        self
    }
}

/// Column declarations for one kind.
#[derive(Debug, Clone)]
pub struct EntitySchema {
    pub kind: EntityKind,
    pub fields: Vec<FieldSpec>,
    /// Records carry an external blob that moves on delete/undelete
    pub blob_backed: bool,
}

/// Names of the columns every kind carries.
pub const BUILTIN_FIELDS: &[&str] = &["id", "owner", "tlp", "created", "modified"];

impl EntitySchema {
    /// Declare a kind; built-in columns are prepended.
    pub fn new(kind: EntityKind, fields: impl IntoIterator<Item = FieldSpec>) -> Self {
        let mut all = vec![
            FieldSpec::new("id", FieldType::Int).immutable(),
            FieldSpec::new("owner", FieldType::String),
            FieldSpec::new("tlp", FieldType::Enum(Tlp::NAMES)),
            FieldSpec::new("created", FieldType::DateTime).immutable(),
            FieldSpec::new("modified", FieldType::DateTime).immutable(),
        ];
        all.extend(fields);
        Self {
            kind,
            fields: all,
            blob_backed: false,
        }
    }

    /// Mark the kind as blob-backed.
    pub fn with_blob(mut self) -> Self {
        self.blob_backed = true;
        self
    }

    /// Look up a column.
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Whether `update` may change `name`.
    pub fn is_mutable(&self, name: &str) -> bool {
        self.field(name).is_some_and(|f| f.mutable)
    }

    /// Whether the `status` enum admits `value`.
    pub fn status_allows(&self, value: &str) -> bool {
        matches!(
            self.field("status").map(|f| f.ty),
            Some(FieldType::Enum(values)) if values.iter().any(|v| *v == value)
        )
    }
}

/// Kind → schema map resolved at startup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<EntityKind, EntitySchema>,
}

impl SchemaRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or replace a kind.
    pub fn register(&mut self, schema: EntitySchema) {
        self.schemas.insert(schema.kind, schema);
    }

    /// Look up a kind.
    pub fn get(&self, kind: EntityKind) -> Option<&EntitySchema> {
        self.schemas.get(&kind)
    }

    /// Registered kinds.
    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.schemas.keys().copied()
    }

    /// The shipped kinds.
    pub fn standard() -> Self {
        use FieldType::{Enum, Int, Json};

        fn subject() -> FieldSpec {
            FieldSpec::new("subject", FieldType::String).fragment()
        }
        fn status(values: &'static [&'static str]) -> FieldSpec {
            FieldSpec::new("status", Enum(values))
        }

        let mut registry = Self::new();
        let schemas = [
            EntitySchema::new(
                EntityKind::Alert,
                [
                    subject(),
                    FieldSpec::new("alertgroup_id", Int).immutable(),
                    status(PROMOTABLE),
                    FieldSpec::new("data", Json),
                ],
            ),
            EntitySchema::new(
                EntityKind::AlertGroup,
                [
                    subject(),
                    status(PROMOTABLE),
                    FieldSpec::new("alert_count", Int),
                ],
            ),
            EntitySchema::new(
                EntityKind::Checklist,
                [subject(), FieldSpec::new("description", FieldType::String).fragment()],
            ),
            EntitySchema::new(EntityKind::Dispatch, [subject(), status(PROMOTABLE)]),
            EntitySchema::new(
                EntityKind::Entity,
                [
                    FieldSpec::new("value", FieldType::String).immutable(),
                    FieldSpec::new("entity_type", FieldType::String).immutable(),
                    FieldSpec::new("description", FieldType::String).fragment(),
                ],
            ),
            EntitySchema::new(
                EntityKind::Entry,
                [
                    FieldSpec::new("body", FieldType::String).fragment(),
                    FieldSpec::new("entry_class", Enum(&["entry", "summary", "task", "alert"])),
                ],
            ),
            EntitySchema::new(
                EntityKind::Event,
                [subject(), status(PROMOTABLE), FieldSpec::new("view_count", Int)],
            ),
            EntitySchema::new(
                EntityKind::File,
                [
                    FieldSpec::new("filename", FieldType::String).fragment(),
                    FieldSpec::new("size", Int).immutable(),
                    FieldSpec::new("sha256", FieldType::String).immutable(),
                    FieldSpec::new("blob", Json).immutable(),
                    FieldSpec::new("description", FieldType::String).fragment(),
                ],
            )
            .with_blob(),
            EntitySchema::new(
                EntityKind::Guide,
                [subject(), status(&["current", "outdated"])],
            ),
            EntitySchema::new(
                EntityKind::Incident,
                [
                    subject(),
                    status(OPEN_CLOSED),
                    FieldSpec::new("severity", Enum(&["low", "medium", "high", "critical"])),
                    FieldSpec::new("category", FieldType::String),
                    FieldSpec::new("occurred", FieldType::DateTime),
                    FieldSpec::new("discovered", FieldType::DateTime),
                ],
            ),
            EntitySchema::new(EntityKind::Intel, [subject(), status(PROMOTABLE)]),
            EntitySchema::new(EntityKind::Product, [subject(), status(OPEN_CLOSED)]),
            EntitySchema::new(
                EntityKind::Signature,
                [
                    FieldSpec::new("name", FieldType::String).fragment(),
                    FieldSpec::new("description", FieldType::String).fragment(),
                    FieldSpec::new("signature_type", FieldType::String),
                    status(&["enabled", "disabled"]),
                ],
            ),
            EntitySchema::new(EntityKind::Sighting, [subject(), status(OPEN_CLOSED)]),
            EntitySchema::new(
                EntityKind::Source,
                [
                    FieldSpec::new("name", FieldType::String),
                    FieldSpec::new("description", FieldType::String).fragment(),
                ],
            ),
            EntitySchema::new(
                EntityKind::Tag,
                [
                    FieldSpec::new("name", FieldType::String),
                    FieldSpec::new("description", FieldType::String).fragment(),
                ],
            ),
            EntitySchema::new(EntityKind::Threat, [subject(), status(OPEN_CLOSED)]),
            EntitySchema::new(EntityKind::VulnFeed, [subject(), status(PROMOTABLE)]),
            EntitySchema::new(EntityKind::VulnTrack, [subject(), status(OPEN_CLOSED)]),
        ];
        for schema in schemas {
            registry.register(schema);
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_standard_registry_covers_every_kind() {
        let registry = SchemaRegistry::standard();
        for kind in EntityKind::all() {
            let schema = registry.get(kind).unwrap();
            assert!(schema.field("id").is_some(), "{} lacks id", kind);
            assert!(!schema.is_mutable("id"));
            assert!(schema.is_mutable("owner"));
        }
        assert!(registry.get(EntityKind::File).unwrap().blob_backed);
        assert!(!registry.get(EntityKind::Event).unwrap().blob_backed);
    }

    #[test]
    fn test_status_allows_promoted() {
        let registry = SchemaRegistry::standard();
        assert!(registry.get(EntityKind::Alert).unwrap().status_allows("promoted"));
        assert!(!registry.get(EntityKind::Incident).unwrap().status_allows("promoted"));
        assert!(!registry.get(EntityKind::Tag).unwrap().status_allows("promoted"));
    }

    #[test]
    fn test_coerce_int() {
        assert_eq!(FieldType::Int.coerce("id", &json!("42")).unwrap(), json!(42));
        assert_eq!(FieldType::Int.coerce("id", &json!(7)).unwrap(), json!(7));
        let err = FieldType::Int.coerce("id", &json!("abc")).unwrap_err();
        assert!(matches!(err, CoreError::TypeMismatch { .. }));
    }

    #[test]
    fn test_coerce_enum_is_case_insensitive() {
        let ty = FieldType::Enum(PROMOTABLE);
        assert_eq!(ty.coerce("status", &json!("Open")).unwrap(), json!("open"));
        assert!(ty.coerce("status", &json!("archived")).is_err());
        assert!(ty.coerce("status", &json!(3)).is_err());
    }

    #[test]
    fn test_coerce_datetime() {
        let ty = FieldType::DateTime;
        let v = ty.coerce("occurred", &json!("2024-03-01")).unwrap();
        assert_eq!(v, json!("2024-03-01T00:00:00Z"));
        let v = ty.coerce("occurred", &json!("2024-03-01T10:15:00+02:00")).unwrap();
        assert_eq!(v, json!("2024-03-01T08:15:00Z"));
        assert!(ty.coerce("occurred", &json!("yesterday")).is_err());
    }

    #[test]
    fn test_null_clears() {
        assert_eq!(FieldType::Int.coerce("x", &Value::Null).unwrap(), Value::Null);
    }
}
