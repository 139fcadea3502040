//! Stored records and the paging types used to list them.

use casebook_rbac::{EntityKind, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Traffic Light Protocol marking.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tlp {
    /// No marking assigned
    #[default]
    Unset,
    Clear,
    White,
    Green,
    AmberStrict,
    Amber,
    Red,
    Black,
}

impl Tlp {
    /// Every marking name, in order.
    pub const NAMES: &'static [&'static str] = &[
        "unset",
        "clear",
        "white",
        "green",
        "amber_strict",
        "amber",
        "red",
        "black",
    ];

    /// Get the marking name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Tlp::Unset => "unset",
            Tlp::Clear => "clear",
            Tlp::White => "white",
            Tlp::Green => "green",
            Tlp::AmberStrict => "amber_strict",
            Tlp::Amber => "amber",
            Tlp::Red => "red",
            Tlp::Black => "black",
        }
    }

    /// Parse a marking name, accepting `amber+strict` as well.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('+', "_").as_str() {
            "unset" => Some(Tlp::Unset),
            "clear" => Some(Tlp::Clear),
            "white" => Some(Tlp::White),
            "green" => Some(Tlp::Green),
            "amber_strict" => Some(Tlp::AmberStrict),
            "amber" => Some(Tlp::Amber),
            "red" => Some(Tlp::Red),
            "black" => Some(Tlp::Black),
            _ => None,
        }
    }
}

impl fmt::Display for Tlp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One stored instance of an entity kind.
///
/// Built-in columns are struct fields; kind-specific columns live in `data`,
/// already coerced to their declared types.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub id: i64,

    #[serde(rename = "type")]
    pub kind: EntityKind,

    pub owner: String,

    #[serde(default)]
    pub tlp: Tlp,

    pub created: DateTime<Utc>,

    pub modified: DateTime<Utc>,

    /// Soft-delete flag
    #[serde(default)]
    pub deleted: bool,

    /// Kind-specific fields
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Record {
    /// Handle for this record.
    pub fn target(&self) -> TargetRef {
        TargetRef::new(self.kind, self.id)
    }

    /// Read a field by name, built-ins included.
    ///
    /// Datetimes are returned as RFC 3339 strings so callers compare them
    /// the same way whether they are built-in or kind-specific.
    pub fn field(&self, name: &str) -> Option<Value> {
        match name {
            "id" => Some(Value::from(self.id)),
            "owner" => Some(Value::from(self.owner.clone())),
            "tlp" => Some(Value::from(self.tlp.as_str())),
            "created" => Some(Value::from(self.created.to_rfc3339())),
            "modified" => Some(Value::from(self.modified.to_rfc3339())),
            other => self.data.get(other).cloned(),
        }
    }

    /// Convenience accessor for a string field.
    pub fn str_field(&self, name: &str) -> Option<String> {
        match self.field(name)? {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Flat JSON view of the record, as recorded in audit snapshots.
    pub fn snapshot(&self) -> Value {
        let mut map = Map::new();
        map.insert("id".into(), Value::from(self.id));
        map.insert("type".into(), Value::from(self.kind.as_str()));
        map.insert("owner".into(), Value::from(self.owner.clone()));
        map.insert("tlp".into(), Value::from(self.tlp.as_str()));
        map.insert("created".into(), Value::from(self.created.to_rfc3339()));
        map.insert("modified".into(), Value::from(self.modified.to_rfc3339()));
        for (key, value) in &self.data {
            map.insert(key.clone(), value.clone());
        }
        Value::Object(map)
    }
}

/// Offset pagination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Rows to skip
    #[serde(default)]
    pub skip: usize,

    /// Rows to return; the configured default when absent
    #[serde(default)]
    pub limit: Option<usize>,
}

impl Page {
    /// Creates a page.
    pub fn new(skip: usize, limit: usize) -> Self {
        Self {
            skip,
            limit: Some(limit),
        }
    }
}

/// Result ordering. Rows are ordered by ascending id when no sort is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    pub field: String,

    #[serde(default)]
    pub descending: bool,
}

impl Sort {
    /// Ascending on `field`.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    /// Descending on `field`.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }
}

/// A page of rows plus the count of every row matching the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub rows: Vec<Record>,

    /// Matches before paging
    pub total: usize,
}

impl QueryResult {
    /// Ids of the returned rows, in order.
    pub fn ids(&self) -> Vec<i64> {
        self.rows.iter().map(|r| r.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> Record {
        let now = Utc::now();
        let mut data = Map::new();
        data.insert("subject".into(), Value::from("Phishing wave"));
        Record {
            id: 9,
            kind: EntityKind::Event,
            owner: "alice".into(),
            tlp: Tlp::Amber,
            created: now,
            modified: now,
            deleted: false,
            data,
        }
    }

    #[test]
    fn test_tlp_parse() {
        assert_eq!(Tlp::parse("AMBER+STRICT"), Some(Tlp::AmberStrict));
        assert_eq!(Tlp::parse("green"), Some(Tlp::Green));
        assert_eq!(Tlp::parse("purple"), None);
        assert_eq!(Tlp::default(), Tlp::Unset);
        assert_eq!(Tlp::NAMES.len(), 8);
    }

    #[test]
    fn test_field_access() {
        let rec = record();
        assert_eq!(rec.field("id"), Some(Value::from(9)));
        assert_eq!(rec.field("tlp"), Some(Value::from("amber")));
        assert_eq!(rec.str_field("subject").as_deref(), Some("Phishing wave"));
        assert_eq!(rec.field("missing"), None);
        assert_eq!(rec.target().to_string(), "event:9");
    }

    #[test]
    fn test_snapshot_flattens_data() {
        let snap = record().snapshot();
        assert_eq!(snap["type"], "event");
        assert_eq!(snap["owner"], "alice");
        assert_eq!(snap["subject"], "Phishing wave");
    }
}
