//! # Blob Lifecycle
//!
//! File records carry bytes held by an external [`BlobStore`]. Deleting or
//! restoring such a record is two steps that no transaction spans:
//!
//! ```text
//! remove:   relocate blob live → trash   then   flip deleted = true
//! undelete: relocate blob trash → live   then   flip deleted = false
//! ```
//!
//! Relocation is idempotent and retried on transient errors. If the flag
//! flip fails the relocation is undone. If the transaction later fails to
//! commit, [`BlobLifecycle::reconcile`] moves the blob back to the area the
//! committed flag calls for.

use async_trait::async_trait;
use base64::Engine;
use casebook_rbac::{EntityKind, TargetRef};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::audit::AuditContext;
use crate::error::{CoreError, CoreResult};
use crate::link::Links;
use crate::record::{Record, Tlp};
use crate::repository::{Catalog, NewRecord};
use crate::retry::{retry_transient, RetryConfig};
use crate::store::{Database, Transaction};

/// Where a blob currently lives.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BlobArea {
    Live,
    Trash,
}

impl BlobArea {
    fn for_deleted(deleted: bool) -> Self {
        if deleted {
            BlobArea::Trash
        } else {
            BlobArea::Live
        }
    }
}

/// Handle stored in a file record's `blob` field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct BlobPointer {
    pub key: String,
    pub area: BlobArea,
}

/// Blob storage errors.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BlobError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    /// Store could not be reached; worth retrying
    #[error("Blob store unavailable: {0}")]
    Unavailable(String),
}

impl BlobError {
    pub fn is_transient(&self) -> bool {
        matches!(self, BlobError::Unavailable(_))
    }
}

/// External blob storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes in the live area.
    async fn store(&self, bytes: &[u8]) -> Result<BlobPointer, BlobError>;

    async fn retrieve(&self, pointer: &BlobPointer) -> Result<Vec<u8>, BlobError>;

    /// Move a blob to `area`. Moving a blob to the area it is already in
    /// succeeds without doing anything.
    async fn relocate(&self, pointer: &BlobPointer, area: BlobArea) -> Result<BlobPointer, BlobError>;

    /// Current area of a key, `None` if the store does not hold it.
    async fn locate(&self, key: &str) -> Result<Option<BlobArea>, BlobError>;
}

/// In-memory [`BlobStore`] with fault injection for tests.
#[derive(Default)]
pub struct MemoryBlobStore {
    blobs: RwLock<HashMap<String, (BlobArea, Vec<u8>)>>,
    failing_relocations: AtomicU32,
    failing_locates: RwLock<HashSet<String>>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` relocations fail as unavailable.
    pub fn fail_next_relocations(&self, count: u32) {
        self.failing_relocations.store(count, Ordering::SeqCst);
    }

    /// Make the next lookup of `key` fail as unavailable.
    pub async fn fail_next_locate(&self, key: &str) {
        self.failing_locates.write().await.insert(key.to_string());
    }

    /// Drop a blob, simulating out-of-band loss.
    pub async fn forget(&self, key: &str) -> bool {
        self.blobs.write().await.remove(key).is_some()
    }

    pub async fn len(&self) -> usize {
        self.blobs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.blobs.read().await.is_empty()
    }
}

/// Content digest plus a unique suffix, so identical uploads stay
/// independent blobs.
fn blob_key(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!(
        "{}.{}",
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest),
        Uuid::now_v7().simple()
    )
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn store(&self, bytes: &[u8]) -> Result<BlobPointer, BlobError> {
        let key = blob_key(bytes);
        self.blobs
            .write()
            .await
            .insert(key.clone(), (BlobArea::Live, bytes.to_vec()));
        Ok(BlobPointer {
            key,
            area: BlobArea::Live,
        })
    }

    async fn retrieve(&self, pointer: &BlobPointer) -> Result<Vec<u8>, BlobError> {
        self.blobs
            .read()
            .await
            .get(&pointer.key)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| BlobError::NotFound(pointer.key.clone()))
    }

    async fn relocate(&self, pointer: &BlobPointer, area: BlobArea) -> Result<BlobPointer, BlobError> {
        let injected = self
            .failing_relocations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BlobError::Unavailable("injected relocation failure".into()));
        }

        let mut blobs = self.blobs.write().await;
        let entry = blobs
            .get_mut(&pointer.key)
            .ok_or_else(|| BlobError::NotFound(pointer.key.clone()))?;
        entry.0 = area;
        Ok(BlobPointer {
            key: pointer.key.clone(),
            area,
        })
    }

    async fn locate(&self, key: &str) -> Result<Option<BlobArea>, BlobError> {
        if self.failing_locates.write().await.remove(key) {
            return Err(BlobError::Unavailable("injected lookup failure".into()));
        }
        Ok(self.blobs.read().await.get(key).map(|(area, _)| *area))
    }
}

/// An uploaded file.
#[derive(Debug, Clone, Default)]
pub struct FileUpload {
    pub filename: String,
    pub bytes: Vec<u8>,
    pub description: Option<String>,
    pub owner: Option<String>,
    pub tlp: Option<Tlp>,
}

impl FileUpload {
    pub fn new(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }
}

/// Outcome of a reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// File records inspected
    pub checked: usize,
    /// Blobs moved to match their record
    pub moved: Vec<TargetRef>,
    /// Records whose blob the store does not hold
    pub missing: Vec<TargetRef>,
    /// Records that could not be checked or whose blob could not be moved
    pub failed: Vec<TargetRef>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.moved.is_empty() && self.missing.is_empty() && self.failed.is_empty()
    }
}

fn pointer_of(record: &Record) -> CoreResult<BlobPointer> {
    let raw = record.data.get("blob").cloned().ok_or_else(|| {
        CoreError::Validation(format!("{} has no blob pointer", record.target()))
    })?;
    Ok(serde_json::from_value(raw)?)
}

fn store_pointer(tx: &mut Transaction, target: TargetRef, pointer: &BlobPointer) -> CoreResult<()> {
    let value = serde_json::to_value(pointer)?;
    if let Some(record) = tx.tables_mut().record_mut(target) {
        record.data.insert("blob".to_string(), value);
    }
    Ok(())
}

/// Create, delete and restore blob-backed file records.
pub struct BlobLifecycle {
    store: Arc<dyn BlobStore>,
    retry: RetryConfig,
}

impl BlobLifecycle {
    pub fn new(store: Arc<dyn BlobStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    /// Lifecycle using the catalog's relocation retry policy.
    pub fn for_catalog(store: Arc<dyn BlobStore>, catalog: &Catalog) -> Self {
        Self::new(store, catalog.config().relocation_retry.clone())
    }

    async fn relocate(&self, pointer: &BlobPointer, area: BlobArea) -> Result<BlobPointer, BlobError> {
        retry_transient(
            &self.retry,
            "blob.relocate",
            || self.store.relocate(pointer, area),
            BlobError::is_transient,
        )
        .await
    }

    /// Store the bytes and create a file record pointing at them,
    /// optionally linked under `parent`.
    #[instrument(skip(self, catalog, tx, upload, audit), fields(filename = %upload.filename))]
    pub async fn create_file(
        &self,
        catalog: &Catalog,
        tx: &mut Transaction,
        upload: FileUpload,
        parent: Option<TargetRef>,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        if upload.filename.trim().is_empty() {
            return Err(CoreError::Validation("filename must not be empty".into()));
        }
        if let Some(parent) = parent {
            if tx.tables().live(parent).is_none() {
                return Err(CoreError::not_found(parent));
            }
        }
        let repo = catalog.repo(EntityKind::File)?;

        let pointer = retry_transient(
            &self.retry,
            "blob.store",
            || self.store.store(&upload.bytes),
            BlobError::is_transient,
        )
        .await?;

        let mut new = NewRecord::new()
            .field("filename", upload.filename.clone())
            .field("size", upload.bytes.len() as i64)
            .field("sha256", format!("{:x}", Sha256::digest(&upload.bytes)))
            .field("blob", serde_json::to_value(&pointer)?);
        if let Some(description) = upload.description {
            new = new.field("description", description);
        }
        new.owner = upload.owner;
        new.tlp = upload.tlp;

        let created = repo.insert(tx, new, audit).and_then(|record| {
            if let Some(parent) = parent {
                Links::link(tx, parent, record.target())?;
            }
            Ok(record)
        });
        match created {
            Ok(record) => Ok(record),
            Err(err) => {
                if let Err(undo) = self.relocate(&pointer, BlobArea::Trash).await {
                    tracing::error!(key = %pointer.key, error = %undo, "Orphaned blob left live");
                }
                Err(err)
            }
        }
    }

    /// Read the bytes of a live file record.
    pub async fn retrieve(&self, catalog: &Catalog, tx: &Transaction, id: i64) -> CoreResult<Vec<u8>> {
        let record = catalog.repo(EntityKind::File)?.get(tx, id)?;
        let pointer = pointer_of(&record)?;
        Ok(self.store.retrieve(&pointer).await?)
    }

    /// Soft-delete a file record, moving its blob to the trash first.
    /// Returns the pre-delete snapshot.
    #[instrument(skip(self, catalog, tx, audit))]
    pub async fn remove(
        &self,
        catalog: &Catalog,
        tx: &mut Transaction,
        id: i64,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        let repo = catalog.repo(EntityKind::File)?;
        let record = repo.get(tx, id)?;
        self.transition(catalog, tx, record, true, audit).await
    }

    /// Restore a soft-deleted file record, moving its blob back first.
    /// An active record is returned unchanged.
    #[instrument(skip(self, catalog, tx, audit))]
    pub async fn undelete(
        &self,
        catalog: &Catalog,
        tx: &mut Transaction,
        id: i64,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        let repo = catalog.repo(EntityKind::File)?;
        let record = repo
            .get_any(tx, id)
            .ok_or_else(|| CoreError::not_found(TargetRef::new(EntityKind::File, id)))?;
        if !record.deleted {
            return Ok(record);
        }
        self.transition(catalog, tx, record, false, audit).await
    }

    async fn transition(
        &self,
        catalog: &Catalog,
        tx: &mut Transaction,
        record: Record,
        deleted: bool,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        let target = record.target();
        let pointer = pointer_of(&record)?;
        let area = BlobArea::for_deleted(deleted);
        let step = if deleted {
            "relocate blob to trash"
        } else {
            "relocate blob to live"
        };

        let moved = self.relocate(&pointer, area).await.map_err(|err| {
            tracing::error!(object = %target, error = %err, "Blob relocation failed, flag left unchanged");
            err
        })?;

        // Delete returns the pre-delete snapshot, so the pointer moves after
        // the flag. Undelete returns the restored record, so it moves first.
        let repo = catalog.repo(EntityKind::File)?;
        let flipped = if deleted {
            repo.set_deleted(tx, record.id, true, audit)
                .and_then(|result| store_pointer(tx, target, &moved).map(|_| result))
        } else {
            store_pointer(tx, target, &moved)
                .and_then(|_| repo.set_deleted(tx, record.id, false, audit))
        };

        match flipped {
            Ok(result) => {
                tracing::info!(object = %target, deleted, "Blob-backed record transitioned");
                Ok(result)
            }
            Err(err) => match self.relocate(&moved, pointer.area).await {
                Ok(_) => {
                    store_pointer(tx, target, &pointer)?;
                    Err(err)
                }
                Err(undo) => {
                    tracing::error!(object = %target, error = %undo, "Compensating relocation failed");
                    Err(CoreError::PartialFailure {
                        completed: step.to_string(),
                        failed: "flip delete flag".to_string(),
                        message: format!("{}; compensation failed: {}", err, undo),
                    })
                }
            },
        }
    }

    /// Move every blob whose area disagrees with its record's committed
    /// delete flag, and fix stale pointers.
    #[instrument(skip(self, catalog, db))]
    pub async fn reconcile(&self, catalog: &Catalog, db: &Database) -> CoreResult<ReconcileReport> {
        let repo = catalog.repo(EntityKind::File)?;
        let mut tx = db.begin().await;
        let records: Vec<Record> = tx.tables().rows(repo.kind()).cloned().collect();

        let mut report = ReconcileReport::default();
        for record in records {
            report.checked += 1;
            let target = record.target();
            let pointer = match pointer_of(&record) {
                Ok(pointer) => pointer,
                Err(err) => {
                    tracing::error!(object = %target, error = %err, "Unreadable blob pointer");
                    report.failed.push(target);
                    continue;
                }
            };
            let wanted = BlobArea::for_deleted(record.deleted);

            let actual = match self.store.locate(&pointer.key).await {
                Ok(Some(area)) => area,
                Ok(None) => {
                    tracing::warn!(object = %target, key = %pointer.key, "Blob missing from store");
                    report.missing.push(target);
                    continue;
                }
                Err(err) => {
                    tracing::error!(object = %target, error = %err, "Blob lookup failed");
                    report.failed.push(target);
                    continue;
                }
            };

            if actual != wanted {
                match self.relocate(&pointer, wanted).await {
                    Ok(moved) => {
                        store_pointer(&mut tx, target, &moved)?;
                        report.moved.push(target);
                    }
                    Err(err) => {
                        tracing::error!(object = %target, error = %err, "Reconcile relocation failed");
                        report.failed.push(target);
                    }
                }
            } else if pointer.area != wanted {
                store_pointer(
                    &mut tx,
                    target,
                    &BlobPointer {
                        key: pointer.key.clone(),
                        area: wanted,
                    },
                )?;
            }
        }

        tx.commit().await?;
        tracing::info!(
            checked = report.checked,
            moved = report.moved.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "Blob reconciliation finished"
        );
        Ok(report)
    }
}
