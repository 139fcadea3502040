//! # Permission Levels
//!
//! The four levels a role can hold on a target. Levels are granted
//! independently; holding `admin` on an object does not by itself
//! grant `read`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RbacError;

/// Permission level a role may hold on a single target.
///
/// - **Read**: View the record
/// - **Modify**: Change mutable fields
/// - **Delete**: Soft-delete and undelete the record
/// - **Admin**: Change the permission set of the record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PermissionLevel {
    /// View the record.
    Read,

    /// Change mutable fields of the record.
    Modify,

    /// Soft-delete or restore the record.
    Delete,

    /// Change who may access the record.
    Admin,
}

impl PermissionLevel {
    /// Get the string representation of the level.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionLevel::Read => "read",
            PermissionLevel::Modify => "modify",
            PermissionLevel::Delete => "delete",
            PermissionLevel::Admin => "admin",
        }
    }

    /// Parse a level from its string form.
    ///
    /// # Example
    ///
    /// ```
    /// use casebook_rbac::levels::PermissionLevel;
    ///
    /// assert_eq!(PermissionLevel::parse("read"), Some(PermissionLevel::Read));
    /// assert_eq!(PermissionLevel::parse("write"), Some(PermissionLevel::Modify)); // Alias
    /// assert_eq!(PermissionLevel::parse("bogus"), None);
    /// ```
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "read" | "view" => Some(PermissionLevel::Read),
            "modify" | "write" | "update" | "edit" => Some(PermissionLevel::Modify),
            "delete" | "remove" => Some(PermissionLevel::Delete),
            "admin" | "manage" => Some(PermissionLevel::Admin),
            _ => None,
        }
    }

    /// Get all levels, lowest first.
    pub fn all() -> Vec<Self> {
        vec![
            PermissionLevel::Read,
            PermissionLevel::Modify,
            PermissionLevel::Delete,
            PermissionLevel::Admin,
        ]
    }
}

impl fmt::Display for PermissionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PermissionLevel {
    type Err = RbacError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| RbacError::UnknownLevel(s.to_string()))
    }
}
