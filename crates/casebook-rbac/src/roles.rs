//! Roles and the principals that hold them
//!
//! A role is a named group. Users hold a set of roles; permissions are
//! granted to roles, never to users directly. The authentication layer
//! resolves a caller to a [`Principal`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Name of the role that bypasses object permissions.
pub const DEFAULT_ADMIN_ROLE: &str = "admin";

/// Named group of users.
///
/// # Examples
///
/// ```
/// use casebook_rbac::Role;
///
/// let role = Role::new(3, "incident-response").with_description("IR team");
/// assert_eq!(role.name, "incident-response");
/// assert!(!role.is_admin("admin"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Role {
    /// Role id
    pub id: i64,

    /// Unique role name
    pub name: String,

    /// Optional description
    pub description: Option<String>,
}

impl Role {
    /// Creates a role.
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: None,
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Check whether this is the admin role under the configured name.
    pub fn is_admin(&self, admin_role_name: &str) -> bool {
        self.name.eq_ignore_ascii_case(admin_role_name)
    }
}

/// Authenticated caller: a user name, its role set and the superuser flag.
///
/// # Examples
///
/// ```
/// use casebook_rbac::Principal;
///
/// let caller = Principal::new("alice").with_roles([1, 2]);
/// assert!(caller.has_role(2));
/// assert!(!caller.is_superuser);
///
/// let root = Principal::new("root").superuser();
/// assert!(root.is_superuser);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    /// Username, compared against record owners
    pub username: String,

    /// Role ids held by the user
    #[serde(default)]
    pub roles: BTreeSet<i64>,

    /// Superusers bypass every permission check
    #[serde(default)]
    pub is_superuser: bool,
}

impl Principal {
    /// Creates a principal with no roles.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            roles: BTreeSet::new(),
            is_superuser: false,
        }
    }

    /// Add roles.
    pub fn with_roles(mut self, roles: impl IntoIterator<Item = i64>) -> Self {
        self.roles.extend(roles);
        self
    }

    /// Mark as superuser.
    pub fn superuser(mut self) -> Self {
        self.is_superuser = true;
        self
    }

    /// Check whether the principal holds a role.
    pub fn has_role(&self, role_id: i64) -> bool {
        self.roles.contains(&role_id)
    }

    /// Check whether the principal owns a record with the given owner.
    pub fn owns(&self, owner: &str) -> bool {
        !owner.is_empty() && self.username == owner
    }
}
