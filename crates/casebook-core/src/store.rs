//! In-memory database with snapshot transactions
//!
//! One table per kind plus the shared permission, audit, promotion and link
//! tables, all keyed by [`TargetRef`]. A [`Transaction`] works on a private
//! copy of the committed tables and publishes it on commit if no other
//! transaction committed in between.

use casebook_rbac::{EntityKind, Permission, Role, TargetRef};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::audit::AuditRecord;
use crate::error::{CoreError, CoreResult};
use crate::link::Link;
use crate::promotion::PromotionEdge;
use crate::record::Record;

/// Every table the engine persists.
#[derive(Debug, Clone, Default)]
pub(crate) struct Tables {
    pub records: BTreeMap<EntityKind, BTreeMap<i64, Record>>,
    next_ids: BTreeMap<EntityKind, i64>,
    pub roles: BTreeMap<i64, Role>,
    next_role_id: i64,
    pub permissions: BTreeSet<Permission>,
    pub audits: Vec<AuditRecord>,
    pub promotions: Vec<PromotionEdge>,
    pub links: Vec<Link>,
    next_row_id: i64,
}

impl Tables {
    /// Allocate the next primary key for a kind. Ids start at 1 and are
    /// never reused, even after a soft delete.
    pub fn next_id(&mut self, kind: EntityKind) -> i64 {
        let next = self.next_ids.entry(kind).or_insert(0);
        *next += 1;
        *next
    }

    pub fn next_role_id(&mut self) -> i64 {
        self.next_role_id += 1;
        self.next_role_id
    }

    /// Allocate an id for a shared-table row (audit, edge, link).
    pub fn next_row_id(&mut self) -> i64 {
        self.next_row_id += 1;
        self.next_row_id
    }

    pub fn record(&self, target: TargetRef) -> Option<&Record> {
        self.records.get(&target.kind)?.get(&target.id)
    }

    pub fn record_mut(&mut self, target: TargetRef) -> Option<&mut Record> {
        self.records.get_mut(&target.kind)?.get_mut(&target.id)
    }

    /// Record that exists and is not soft-deleted.
    pub fn live(&self, target: TargetRef) -> Option<&Record> {
        self.record(target).filter(|r| !r.deleted)
    }

    pub fn put(&mut self, record: Record) {
        self.records
            .entry(record.kind)
            .or_default()
            .insert(record.id, record);
    }

    /// Every row of a kind, ascending by id, deleted rows included.
    pub fn rows(&self, kind: EntityKind) -> impl Iterator<Item = &Record> {
        self.records.get(&kind).into_iter().flat_map(|t| t.values())
    }
}

struct Committed {
    version: u64,
    tables: Tables,
}

/// Shared handle to the committed state.
#[derive(Clone)]
pub struct Database {
    inner: Arc<RwLock<Committed>>,
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl Database {
    /// Empty database.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Committed {
                version: 0,
                tables: Tables::default(),
            })),
        }
    }

    /// Start a transaction on a snapshot of the committed state.
    pub async fn begin(&self) -> Transaction {
        let committed = self.inner.read().await;
        let tx = Transaction {
            db: self.clone(),
            base_version: committed.version,
            tables: committed.tables.clone(),
            dirty: false,
            finished: false,
            id: Uuid::now_v7(),
        };
        tracing::trace!(tx = %tx.id, version = tx.base_version, "Transaction started");
        tx
    }

    /// Number of commits published so far.
    pub async fn version(&self) -> u64 {
        self.inner.read().await.version
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish_non_exhaustive()
    }
}

/// Unit of work over a private copy of the tables.
///
/// Nothing is visible to other transactions until [`Transaction::commit`].
/// Dropping an uncommitted transaction discards its changes.
pub struct Transaction {
    db: Database,
    base_version: u64,
    tables: Tables,
    dirty: bool,
    finished: bool,
    id: Uuid,
}

impl Transaction {
    /// Transaction id, for log correlation.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether anything has been written.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn tables(&self) -> &Tables {
        &self.tables
    }

    pub(crate) fn tables_mut(&mut self) -> &mut Tables {
        self.dirty = true;
        &mut self.tables
    }

    /// Publish the changes.
    ///
    /// Read-only transactions always succeed. A transaction that wrote
    /// anything fails with [`CoreError::Conflict`] if another commit landed
    /// after it began.
    pub async fn commit(mut self) -> CoreResult<u64> {
        self.finished = true;
        let mut committed = self.db.inner.write().await;
        if !self.dirty {
            return Ok(committed.version);
        }
        if committed.version != self.base_version {
            tracing::warn!(
                tx = %self.id,
                base = self.base_version,
                current = committed.version,
                "Commit conflict"
            );
            return Err(CoreError::Conflict(format!(
                "transaction {} began at version {} but database is at {}",
                self.id, self.base_version, committed.version
            )));
        }
        committed.version += 1;
        committed.tables = std::mem::take(&mut self.tables);
        tracing::debug!(tx = %self.id, version = committed.version, "Transaction committed");
        Ok(committed.version)
    }

    /// Discard the changes.
    pub fn rollback(mut self) {
        self.finished = true;
        tracing::debug!(tx = %self.id, "Transaction rolled back");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.finished && self.dirty {
            tracing::debug!(tx = %self.id, "Uncommitted transaction dropped, changes discarded");
        }
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("base_version", &self.base_version)
            .field("dirty", &self.dirty)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let db = Database::new();
        let mut tx = db.begin().await;
        let id = tx.tables_mut().next_id(EntityKind::Event);
        assert_eq!(id, 1);
        assert_eq!(tx.commit().await.unwrap(), 1);

        let mut tx = db.begin().await;
        assert_eq!(tx.tables_mut().next_id(EntityKind::Event), 2);
        assert_eq!(tx.tables_mut().next_id(EntityKind::Alert), 1);
    }

    #[tokio::test]
    async fn test_drop_discards_changes() {
        let db = Database::new();
        {
            let mut tx = db.begin().await;
            tx.tables_mut().next_role_id();
        }
        assert_eq!(db.version().await, 0);
        let mut tx = db.begin().await;
        assert_eq!(tx.tables_mut().next_role_id(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_writers_conflict() {
        let db = Database::new();
        let mut a = db.begin().await;
        let mut b = db.begin().await;
        a.tables_mut().next_row_id();
        b.tables_mut().next_row_id();

        a.commit().await.unwrap();
        let err = b.commit().await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_read_only_commit_never_conflicts() {
        let db = Database::new();
        let reader = db.begin().await;
        let mut writer = db.begin().await;
        writer.tables_mut().next_row_id();
        writer.commit().await.unwrap();
        assert_eq!(reader.commit().await.unwrap(), 1);
    }
}
