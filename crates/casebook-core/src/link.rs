//! Generic many-to-many associations between records.
//!
//! A link points from `v0` to `v1`. Parent/child relations (entries of an
//! alertgroup, files of an event), tags, sources and flair entities all
//! use the same table with `v0` as the owning object.

use casebook_rbac::{EntityKind, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::audit::AuditContext;
use crate::error::{CoreError, CoreResult};
use crate::record::Record;
use crate::repository::{Catalog, NewRecord};
use crate::store::Transaction;

/// One directed association.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Link {
    pub id: i64,
    pub v0: TargetRef,
    pub v1: TargetRef,
    pub created: DateTime<Utc>,
}

/// Operations on the link table.
pub struct Links;

impl Links {
    /// Link `v0 → v1`. Both ends must be live; an existing link is returned
    /// unchanged.
    pub fn link(tx: &mut Transaction, v0: TargetRef, v1: TargetRef) -> CoreResult<Link> {
        for end in [v0, v1] {
            if tx.tables().live(end).is_none() {
                return Err(CoreError::not_found(end));
            }
        }
        if let Some(existing) = tx
            .tables()
            .links
            .iter()
            .find(|l| l.v0 == v0 && l.v1 == v1)
        {
            return Ok(existing.clone());
        }

        let tables = tx.tables_mut();
        let link = Link {
            id: tables.next_row_id(),
            v0,
            v1,
            created: Utc::now(),
        };
        tables.links.push(link.clone());
        tracing::debug!(v0 = %v0, v1 = %v1, "Linked");
        Ok(link)
    }

    /// Remove the link `v0 → v1`.
    pub fn unlink(tx: &mut Transaction, v0: TargetRef, v1: TargetRef) -> CoreResult<()> {
        if !Self::exists(tx, v0, v1) {
            return Err(CoreError::NotFound(format!("link {} -> {}", v0, v1)));
        }
        tx.tables_mut().links.retain(|l| !(l.v0 == v0 && l.v1 == v1));
        tracing::debug!(v0 = %v0, v1 = %v1, "Unlinked");
        Ok(())
    }

    pub fn exists(tx: &Transaction, v0: TargetRef, v1: TargetRef) -> bool {
        tx.tables().links.iter().any(|l| l.v0 == v0 && l.v1 == v1)
    }

    /// Targets linked from `parent`, in link order.
    pub fn children(tx: &Transaction, parent: TargetRef) -> Vec<TargetRef> {
        tx.tables()
            .links
            .iter()
            .filter(|l| l.v0 == parent)
            .map(|l| l.v1)
            .collect()
    }

    /// Targets linking to `child`, in link order.
    pub fn parents(tx: &Transaction, child: TargetRef) -> Vec<TargetRef> {
        tx.tables()
            .links
            .iter()
            .filter(|l| l.v1 == child)
            .map(|l| l.v0)
            .collect()
    }

    /// Find or create the tag `name` and link `target` to it.
    pub fn attach_tag(
        catalog: &Catalog,
        tx: &mut Transaction,
        target: TargetRef,
        name: &str,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        Self::attach_label(catalog, tx, EntityKind::Tag, target, name, audit)
    }

    /// Find or create the source `name` and link `target` to it.
    pub fn attach_source(
        catalog: &Catalog,
        tx: &mut Transaction,
        target: TargetRef,
        name: &str,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        Self::attach_label(catalog, tx, EntityKind::Source, target, name, audit)
    }

    fn attach_label(
        catalog: &Catalog,
        tx: &mut Transaction,
        kind: EntityKind,
        target: TargetRef,
        name: &str,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::Validation(format!("{} name must not be empty", kind)));
        }
        let repo = catalog.repo(kind)?;
        let label = match repo.find_first(tx, "name", name) {
            Some(existing) => existing,
            None => repo.create(tx, NewRecord::new().field("name", name), audit)?,
        };
        Self::link(tx, target, label.target())?;
        Ok(label)
    }
}
