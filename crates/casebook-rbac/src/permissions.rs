//! # Permissions
//!
//! A permission binds one role to one level on one target. A
//! [`PermissionGrid`] is the `{level: [role_ids]}` view of every permission
//! held on a single target.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::levels::PermissionLevel;
use crate::target::TargetRef;

/// A single `(role, target, level)` permission tuple.
///
/// Tuples are unique; the storage layer treats re-inserting an existing
/// tuple as a no-op.
///
/// # Example
///
/// ```
/// use casebook_rbac::{EntityKind, Permission, PermissionLevel, TargetRef};
///
/// let perm = Permission::new(7, TargetRef::new(EntityKind::Alert, 123), PermissionLevel::Read);
/// assert_eq!(perm.to_string(), "role:7 read alert:123");
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Permission {
    /// The role holding the permission.
    pub role_id: i64,
    /// The record the permission applies to.
    pub target: TargetRef,
    /// The level held.
    pub level: PermissionLevel,
}

impl Permission {
    /// Create a permission tuple.
    pub fn new(role_id: i64, target: TargetRef, level: PermissionLevel) -> Self {
        Self {
            role_id,
            target,
            level,
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "role:{} {} {}", self.role_id, self.level, self.target)
    }
}

/// Every permission on one target, grouped by level.
///
/// Serializes as `{"read": [1, 2], "modify": [2]}`. Levels with no roles are
/// dropped so two grids describing the same permissions compare equal.
///
/// # Example
///
/// ```
/// use casebook_rbac::{PermissionGrid, PermissionLevel};
///
/// let mut grid = PermissionGrid::new();
/// grid.add(PermissionLevel::Read, 1);
/// grid.add(PermissionLevel::Read, 2);
/// grid.add(PermissionLevel::Modify, 2);
///
/// assert!(grid.allows(PermissionLevel::Read, 1));
/// assert!(!grid.allows(PermissionLevel::Modify, 1));
/// assert_eq!(grid.len(), 3);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct PermissionGrid {
    levels: BTreeMap<PermissionLevel, BTreeSet<i64>>,
}

impl PermissionGrid {
    /// Create an empty grid.
    pub fn new() -> Self {
        Self {
            levels: BTreeMap::new(),
        }
    }

    /// Add a role to a level. Returns `false` if it was already present.
    pub fn add(&mut self, level: PermissionLevel, role_id: i64) -> bool {
        self.levels.entry(level).or_default().insert(role_id)
    }

    /// Builder form of [`add`](Self::add) taking several roles.
    pub fn with(mut self, level: PermissionLevel, role_ids: impl IntoIterator<Item = i64>) -> Self {
        for role_id in role_ids {
            self.add(level, role_id);
        }
        self
    }

    /// Remove a role from a level. Returns `true` if it was present.
    pub fn remove(&mut self, level: PermissionLevel, role_id: i64) -> bool {
        let removed = match self.levels.get_mut(&level) {
            Some(roles) => roles.remove(&role_id),
            None => false,
        };
        if self.levels.get(&level).is_some_and(BTreeSet::is_empty) {
            self.levels.remove(&level);
        }
        removed
    }

    /// Check whether `role_id` holds `level`.
    pub fn allows(&self, level: PermissionLevel, role_id: i64) -> bool {
        self.levels
            .get(&level)
            .is_some_and(|roles| roles.contains(&role_id))
    }

    /// Roles holding `level`.
    pub fn roles(&self, level: PermissionLevel) -> Vec<i64> {
        self.levels
            .get(&level)
            .map(|roles| roles.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Union of the levels held by any of `role_ids`.
    pub fn levels_for<'a, I>(&self, role_ids: I) -> BTreeSet<PermissionLevel>
    where
        I: IntoIterator<Item = &'a i64>,
    {
        let role_ids: BTreeSet<i64> = role_ids.into_iter().copied().collect();
        self.levels
            .iter()
            .filter(|(_, roles)| !roles.is_disjoint(&role_ids))
            .map(|(level, _)| *level)
            .collect()
    }

    /// Every role id mentioned in the grid.
    pub fn role_ids(&self) -> BTreeSet<i64> {
        self.levels.values().flatten().copied().collect()
    }

    /// Flatten into permission tuples for `target`.
    pub fn to_permissions(&self, target: TargetRef) -> Vec<Permission> {
        self.levels
            .iter()
            .flat_map(|(level, roles)| {
                roles
                    .iter()
                    .map(move |role_id| Permission::new(*role_id, target, *level))
            })
            .collect()
    }

    /// Iterate `(level, roles)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (PermissionLevel, &BTreeSet<i64>)> {
        self.levels.iter().map(|(level, roles)| (*level, roles))
    }

    /// Number of `(level, role)` pairs.
    pub fn len(&self) -> usize {
        self.levels.values().map(BTreeSet::len).sum()
    }

    /// Check if empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<Permission> for PermissionGrid {
    fn from_iter<T: IntoIterator<Item = Permission>>(iter: T) -> Self {
        let mut grid = PermissionGrid::new();
        for perm in iter {
            grid.add(perm.level, perm.role_id);
        }
        grid
    }
}
