//! # Permission Engine
//!
//! Stores `(role, target, level)` tuples and roles, resolves them per
//! target and evaluates access through [`casebook_rbac::decide`]. Bypass
//! rules are not evaluated anywhere else in the engine.

use casebook_rbac::{
    decide, AccessFacts, Decision, Permission, PermissionGrid, PermissionLevel, Principal, Role,
    TargetRef,
};
use std::collections::BTreeSet;
use tracing::instrument;

use crate::error::{CoreError, CoreResult};
use crate::store::{Tables, Transaction};

/// Levels held on `target` by any of `roles`.
pub(crate) fn resolve_in(
    tables: &Tables,
    roles: &BTreeSet<i64>,
    target: TargetRef,
) -> BTreeSet<PermissionLevel> {
    tables
        .permissions
        .iter()
        .filter(|p| p.target == target && roles.contains(&p.role_id))
        .map(|p| p.level)
        .collect()
}

pub(crate) fn admin_role_in(tables: &Tables, admin_role_name: &str) -> Option<i64> {
    tables
        .roles
        .values()
        .find(|r| r.is_admin(admin_role_name))
        .map(|r| r.id)
}

/// Role and permission storage plus the authorization entry point.
#[derive(Debug, Clone)]
pub struct PermissionEngine {
    admin_role_name: String,
}

impl PermissionEngine {
    /// Engine treating `admin_role_name` as the bypass role.
    pub fn new(admin_role_name: impl Into<String>) -> Self {
        Self {
            admin_role_name: admin_role_name.into(),
        }
    }

    pub fn admin_role_name(&self) -> &str {
        &self.admin_role_name
    }

    /// Create a role. Names are unique, compared case-insensitively.
    #[instrument(skip(self, tx))]
    pub fn create_role(
        &self,
        tx: &mut Transaction,
        name: &str,
        description: Option<&str>,
    ) -> CoreResult<Role> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation("role name must not be empty".into()));
        }
        if self.role_by_name(tx, name).is_some() {
            return Err(CoreError::Validation(format!("role '{}' already exists", name)));
        }

        let tables = tx.tables_mut();
        let mut role = Role::new(tables.next_role_id(), name);
        if let Some(description) = description {
            role = role.with_description(description);
        }
        tables.roles.insert(role.id, role.clone());
        tracing::info!(role_id = role.id, name = %role.name, "Role created");
        Ok(role)
    }

    /// Look up a role by id.
    pub fn role(&self, tx: &Transaction, role_id: i64) -> CoreResult<Role> {
        tx.tables()
            .roles
            .get(&role_id)
            .cloned()
            .ok_or_else(|| CoreError::NotFound(format!("role:{}", role_id)))
    }

    pub fn role_by_name(&self, tx: &Transaction, name: &str) -> Option<Role> {
        tx.tables()
            .roles
            .values()
            .find(|r| r.name.eq_ignore_ascii_case(name.trim()))
            .cloned()
    }

    /// Every role, ascending by id.
    pub fn roles(&self, tx: &Transaction) -> Vec<Role> {
        tx.tables().roles.values().cloned().collect()
    }

    /// Id of the configured admin role, if it has been created.
    pub fn admin_role_id(&self, tx: &Transaction) -> Option<i64> {
        admin_role_in(tx.tables(), &self.admin_role_name)
    }

    fn require_role(tx: &Transaction, role_id: i64) -> CoreResult<()> {
        if tx.tables().roles.contains_key(&role_id) {
            Ok(())
        } else {
            Err(CoreError::Validation(format!("role {} does not exist", role_id)))
        }
    }

    fn require_target(tx: &Transaction, target: TargetRef) -> CoreResult<()> {
        tx.tables()
            .record(target)
            .map(|_| ())
            .ok_or_else(|| CoreError::not_found(target))
    }

    /// Grant a level. Returns `false` when the tuple already existed.
    #[instrument(skip(self, tx, target, level), fields(object = %target, level = %level))]
    pub fn grant(
        &self,
        tx: &mut Transaction,
        role_id: i64,
        target: TargetRef,
        level: PermissionLevel,
    ) -> CoreResult<bool> {
        Self::require_role(tx, role_id)?;
        Self::require_target(tx, target)?;

        let inserted = tx
            .tables_mut()
            .permissions
            .insert(Permission::new(role_id, target, level));
        if inserted {
            tracing::debug!(role_id, "Permission granted");
        }
        Ok(inserted)
    }

    /// Revoke a level. Fails with NotFound when the tuple is absent.
    #[instrument(skip(self, tx, target, level), fields(object = %target, level = %level))]
    pub fn revoke(
        &self,
        tx: &mut Transaction,
        role_id: i64,
        target: TargetRef,
        level: PermissionLevel,
    ) -> CoreResult<()> {
        let permission = Permission::new(role_id, target, level);
        if !tx.tables().permissions.contains(&permission) {
            return Err(CoreError::NotFound(permission.to_string()));
        }
        tx.tables_mut().permissions.remove(&permission);
        tracing::debug!(role_id, "Permission revoked");
        Ok(())
    }

    /// Replace every permission on `target` with `grid`.
    ///
    /// All roles are checked before anything changes, so an unknown role
    /// leaves the existing permissions intact.
    #[instrument(skip(self, tx, target, grid), fields(object = %target))]
    pub fn set(&self, tx: &mut Transaction, target: TargetRef, grid: &PermissionGrid) -> CoreResult<()> {
        Self::require_target(tx, target)?;
        for role_id in grid.role_ids() {
            Self::require_role(tx, role_id)?;
        }

        let tables = tx.tables_mut();
        tables.permissions.retain(|p| p.target != target);
        tables.permissions.extend(grid.to_permissions(target));
        tracing::debug!(count = grid.len(), "Permissions replaced");
        Ok(())
    }

    /// Union of levels held on `target` by `roles`.
    pub fn resolve(
        &self,
        tx: &Transaction,
        roles: &BTreeSet<i64>,
        target: TargetRef,
    ) -> BTreeSet<PermissionLevel> {
        resolve_in(tx.tables(), roles, target)
    }

    /// Every permission on `target`, grouped by level.
    pub fn roles_for(&self, tx: &Transaction, target: TargetRef) -> PermissionGrid {
        tx.tables()
            .permissions
            .iter()
            .filter(|p| p.target == target)
            .copied()
            .collect()
    }

    /// Decide whether `principal` may exercise `level` on `target`.
    pub fn authorize(
        &self,
        tx: &Transaction,
        principal: &Principal,
        target: TargetRef,
        level: PermissionLevel,
    ) -> CoreResult<Decision> {
        let tables = tx.tables();
        let record = tables.live(target).ok_or_else(|| CoreError::not_found(target))?;
        let facts = AccessFacts {
            owner: Some(record.owner.as_str()),
            granted: resolve_in(tables, &principal.roles, target),
            admin_role_id: admin_role_in(tables, &self.admin_role_name),
        };
        let decision = decide(principal, level, &facts);
        tracing::trace!(
            user = %principal.username,
            object = %target,
            level = %level,
            allowed = decision.allowed,
            "Authorization decided"
        );
        Ok(decision)
    }

    /// Like [`PermissionEngine::authorize`], but a denial is an error.
    pub fn require(
        &self,
        tx: &Transaction,
        principal: &Principal,
        target: TargetRef,
        level: PermissionLevel,
    ) -> CoreResult<Decision> {
        let decision = self.authorize(tx, principal, target, level)?;
        if !decision.allowed {
            return Err(CoreError::Unauthorized(format!(
                "{} lacks {} on {}",
                principal.username, level, target
            )));
        }
        Ok(decision)
    }
}
