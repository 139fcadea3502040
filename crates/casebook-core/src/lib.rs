//! # Casebook Core
//!
//! Storage, querying, authorization and lifecycle rules for the casebook
//! record kinds.
//!
//! ## Overview
//!
//! The casebook-core crate handles:
//! - **Store**: Snapshot transactions over in-memory tables
//! - **Schema**: Per-kind field declarations, coercion and mutability
//! - **Filters / Query**: The query-string filter grammar and its evaluation
//! - **Repository / Catalog**: Generic CRUD with soft delete, one per kind
//! - **Permissions**: Roles, `(role, target, level)` tuples and decisions
//! - **Audit**: Request-scoped audit contexts flushed into the ledger
//! - **Links / Promotion**: Generic associations and promotion lineage
//! - **Blobs**: The file lifecycle saga over an external blob store
//! - **Flair / Auth**: Collaborator seams for entity extraction and login
//!
//! ## Usage
//!
//! ```rust
//! use casebook_core::{AuditContext, Catalog, CoreConfig, Database, NewRecord, Page};
//! use casebook_rbac::EntityKind;
//!
//! # async fn demo() -> casebook_core::CoreResult<()> {
//! let db = Database::new();
//! let catalog = Catalog::standard(CoreConfig::default())?;
//! let alerts = catalog.repo(EntityKind::Alert)?;
//!
//! let mut tx = db.begin().await;
//! let mut audit = AuditContext::new("alice");
//! let alert = alerts.create(
//!     &mut tx,
//!     NewRecord::new().field("subject", "Suspicious login"),
//!     Some(&mut audit),
//! )?;
//! audit.flush(&mut tx);
//! tx.commit().await?;
//!
//! let tx = db.begin().await;
//! assert_eq!(alerts.get(&tx, alert.id)?.str_field("subject").as_deref(), Some("Suspicious login"));
//! assert_eq!(alerts.list(&tx, Page::default())?.total, 1);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod auth;
pub mod blob;
pub mod config;
pub mod error;
pub mod filter;
pub mod flair;
pub mod link;
pub mod permission;
pub mod promotion;
pub mod query;
pub mod record;
pub mod repository;
pub mod retry;
pub mod schema;
pub mod store;

// Re-export main types for convenience
pub use audit::{AuditAction, AuditContext, AuditLedger, AuditQuery, AuditRecord};
pub use auth::{AuthProvider, StaticAuthProvider};
pub use blob::{
    BlobArea, BlobError, BlobLifecycle, BlobPointer, BlobStore, FileUpload, MemoryBlobStore,
    ReconcileReport,
};
pub use config::{ConfigError, CoreConfig};
pub use error::{CoreError, CoreResult};
pub use filter::{parse_filters, Filter, FilterMap, Literal, Predicate};
pub use flair::{Flair, FlairHit, FlairService, FlairSummary};
pub use link::{Link, Links};
pub use permission::PermissionEngine;
pub use promotion::{parse_source, PromotionEdge, PromotionOutcome, PromotionRequest, Promotions};
pub use query::Scope;
pub use record::{Page, QueryResult, Record, Sort, Tlp};
pub use repository::{Catalog, Changes, NewRecord, Repository};
pub use retry::{retry_transient, RetryConfig};
pub use schema::{EntitySchema, FieldSpec, FieldType, SchemaRegistry};
pub use store::{Database, Transaction};

pub use casebook_rbac;
