//! Polymorphic `(kind, id)` handle used by every shared table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RbacError;
use crate::kinds::EntityKind;

/// Reference to a single record of any kind.
///
/// Permission, audit, link and promotion rows address their subject through
/// a `TargetRef` rather than a typed foreign key.
///
/// # Example
///
/// ```
/// use casebook_rbac::{EntityKind, TargetRef};
///
/// let target = TargetRef::new(EntityKind::Alert, 123);
/// assert_eq!(target.to_string(), "alert:123");
///
/// let parsed: TargetRef = "event:5".parse().unwrap();
/// assert_eq!(parsed, TargetRef::new(EntityKind::Event, 5));
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetRef {
    /// Kind of the referenced record.
    #[serde(rename = "type")]
    pub kind: EntityKind,
    /// Primary key within the kind.
    pub id: i64,
}

impl TargetRef {
    /// Create a reference.
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }

    /// Parse `kind:id`.
    ///
    /// Surrounding whitespace is ignored. The id must be a base-10 integer.
    pub fn parse(s: &str) -> Result<Self, RbacError> {
        let (kind, id) = s
            .trim()
            .split_once(':')
            .ok_or_else(|| RbacError::MalformedTarget(s.to_string()))?;
        let kind = EntityKind::parse(kind).ok_or_else(|| RbacError::UnknownKind(kind.to_string()))?;
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|_| RbacError::MalformedTarget(s.to_string()))?;
        Ok(Self { kind, id })
    }
}

impl fmt::Display for TargetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for TargetRef {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
