//! # Casebook RBAC
//!
//! Identifiers and the role/object permission model shared by every
//! casebook entity kind.
//!
//! ## Overview
//!
//! The casebook-rbac crate handles:
//! - **Kinds**: Every record kind (alert, event, incident, ...) and the
//!   promotion paths between them
//! - **Targets**: The `(kind, id)` handle used instead of typed foreign keys
//! - **Levels**: `read`, `modify`, `delete`, `admin`
//! - **Permissions**: `(role, target, level)` tuples and per-target grids
//! - **Roles / Principals**: Named groups and the callers holding them
//! - **Decisions**: The single authorization function with its bypass rules
//!
//! ## Architecture
//!
//! ```text
//! Permission = Role + TargetRef + Level
//!
//! Examples:
//!   role:3 read alert:123
//!   role:3 modify event:5
//!
//! Decision = superuser | admin role | owner | level in resolve(roles, target)
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use casebook_rbac::{
//!     decide, AccessFacts, EntityKind, PermissionGrid, PermissionLevel, Principal, TargetRef,
//! };
//!
//! let target = TargetRef::new(EntityKind::Alert, 123);
//! let grid = PermissionGrid::new().with(PermissionLevel::Read, [3]);
//!
//! let caller = Principal::new("alice").with_roles([3]);
//! let facts = AccessFacts {
//!     owner: Some("bob"),
//!     granted: grid.levels_for(&caller.roles),
//!     admin_role_id: Some(1),
//! };
//!
//! assert_eq!(target.to_string(), "alert:123");
//! assert!(decide(&caller, PermissionLevel::Read, &facts).allowed);
//! assert!(!decide(&caller, PermissionLevel::Delete, &facts).allowed);
//! ```
//!
//! ## Integration with casebook-core
//!
//! casebook-core stores permission tuples, resolves them per target and
//! feeds the results into [`decide`]. No other code path grants bypasses.

pub mod decision;
pub mod error;
pub mod kinds;
pub mod levels;
pub mod permissions;
pub mod roles;
pub mod target;

// Re-export main types for convenience
pub use decision::{bypasses_all, decide, AccessFacts, Decision, DecisionReason};
pub use error::{RbacError, RbacResult};
pub use kinds::EntityKind;
pub use levels::PermissionLevel;
pub use permissions::{Permission, PermissionGrid};
pub use roles::{Principal, Role, DEFAULT_ADMIN_ROLE};
pub use target::TargetRef;
