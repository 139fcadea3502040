//! # Authorization Decisions
//!
//! The one place bypass rules live. Callers gather the facts about a target
//! (its owner, the levels the caller's roles resolve to, the admin role id)
//! and ask [`decide`] for an allow/deny answer with the reason attached.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::levels::PermissionLevel;
use crate::roles::Principal;

/// Why a decision came out the way it did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "reason", content = "level", rename_all = "snake_case")]
pub enum DecisionReason {
    /// Caller is a superuser.
    Superuser,
    /// Caller holds the admin role.
    AdminRole,
    /// Caller owns the record.
    Owner,
    /// One of the caller's roles holds the level.
    Granted(PermissionLevel),
    /// None of the above.
    Denied,
}

/// Allow/deny answer for one `(principal, target, level)` question.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Decision {
    /// Whether access is allowed.
    pub allowed: bool,
    /// Why.
    pub reason: DecisionReason,
}

impl Decision {
    fn allow(reason: DecisionReason) -> Self {
        Self {
            allowed: true,
            reason,
        }
    }

    fn deny() -> Self {
        Self {
            allowed: false,
            reason: DecisionReason::Denied,
        }
    }

    /// Whether the decision came from a bypass rather than a grant.
    pub fn is_bypass(&self) -> bool {
        matches!(
            self.reason,
            DecisionReason::Superuser | DecisionReason::AdminRole | DecisionReason::Owner
        )
    }
}

/// Facts about a target needed to decide access.
#[derive(Debug, Clone, Default)]
pub struct AccessFacts<'a> {
    /// Owner of the record, when it has one.
    pub owner: Option<&'a str>,
    /// Levels resolved for the caller's roles on the target.
    pub granted: BTreeSet<PermissionLevel>,
    /// Id of the admin role, if one exists.
    pub admin_role_id: Option<i64>,
}

/// Decide whether `principal` may exercise `required` on a target.
///
/// Checked in order: superuser flag, admin role membership, ownership,
/// then the resolved grants.
///
/// # Example
///
/// ```
/// use casebook_rbac::{decide, AccessFacts, DecisionReason, PermissionLevel, Principal};
///
/// let analyst = Principal::new("alice").with_roles([2]);
/// let facts = AccessFacts {
///     owner: Some("bob"),
///     granted: [PermissionLevel::Read].into_iter().collect(),
///     admin_role_id: Some(1),
/// };
///
/// assert!(decide(&analyst, PermissionLevel::Read, &facts).allowed);
/// let denied = decide(&analyst, PermissionLevel::Modify, &facts);
/// assert_eq!(denied.reason, DecisionReason::Denied);
/// ```
pub fn decide(principal: &Principal, required: PermissionLevel, facts: &AccessFacts<'_>) -> Decision {
    if principal.is_superuser {
        return Decision::allow(DecisionReason::Superuser);
    }
    if facts
        .admin_role_id
        .is_some_and(|admin| principal.has_role(admin))
    {
        return Decision::allow(DecisionReason::AdminRole);
    }
    if facts.owner.is_some_and(|owner| principal.owns(owner)) {
        return Decision::allow(DecisionReason::Owner);
    }
    if facts.granted.contains(&required) {
        return Decision::allow(DecisionReason::Granted(required));
    }
    Decision::deny()
}

/// Whether `principal` bypasses object permissions entirely, independent of
/// any particular record.
pub fn bypasses_all(principal: &Principal, admin_role_id: Option<i64>) -> bool {
    principal.is_superuser || admin_role_id.is_some_and(|admin| principal.has_role(admin))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(granted: &[PermissionLevel]) -> AccessFacts<'static> {
        AccessFacts {
            owner: Some("owner"),
            granted: granted.iter().copied().collect(),
            admin_role_id: Some(1),
        }
    }

    #[test]
    fn test_superuser_bypass() {
        let p = Principal::new("root").superuser();
        let d = decide(&p, PermissionLevel::Admin, &facts(&[]));
        assert!(d.allowed);
        assert_eq!(d.reason, DecisionReason::Superuser);
        assert!(d.is_bypass());
    }

    #[test]
    fn test_admin_role_bypass() {
        let p = Principal::new("ops").with_roles([1]);
        let d = decide(&p, PermissionLevel::Delete, &facts(&[]));
        assert_eq!(d.reason, DecisionReason::AdminRole);
    }

    #[test]
    fn test_owner_bypass() {
        let p = Principal::new("owner");
        let d = decide(&p, PermissionLevel::Modify, &facts(&[]));
        assert_eq!(d.reason, DecisionReason::Owner);
    }

    #[test]
    fn test_granted_level() {
        let p = Principal::new("alice").with_roles([2]);
        let d = decide(&p, PermissionLevel::Read, &facts(&[PermissionLevel::Read]));
        assert_eq!(d.reason, DecisionReason::Granted(PermissionLevel::Read));
        assert!(!d.is_bypass());

        let d = decide(&p, PermissionLevel::Modify, &facts(&[PermissionLevel::Read]));
        assert!(!d.allowed);
    }

    #[test]
    fn test_missing_admin_role_means_no_admin_bypass() {
        let p = Principal::new("ops").with_roles([1]);
        let f = AccessFacts {
            admin_role_id: None,
            ..AccessFacts::default()
        };
        assert!(!decide(&p, PermissionLevel::Read, &f).allowed);
        assert!(!bypasses_all(&p, None));
        assert!(bypasses_all(&p, Some(1)));
    }
}
