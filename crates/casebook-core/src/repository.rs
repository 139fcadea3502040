//! # Generic Object Repository
//!
//! One [`Repository`] per kind, all built from the same code and
//! parametrized by the kind's [`EntitySchema`]. The [`Catalog`] resolves a
//! kind to its repository.
//!
//! Records move between two states:
//!
//! ```text
//! Active --remove--> SoftDeleted --undelete--> Active
//! ```
//!
//! Soft-deleted records are invisible to `get`, `list` and `query` but keep
//! their id so `undelete` can restore them.

use casebook_rbac::{EntityKind, Permission, PermissionGrid, Principal, TargetRef};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::instrument;

use crate::audit::{AuditContext, AuditLedger, AuditRecord};
use crate::config::CoreConfig;
use crate::error::{CoreError, CoreResult};
use crate::filter::{parse_filters, Filter, FilterMap};
use crate::link::Links;
use crate::permission::PermissionEngine;
use crate::query::{self, Scope};
use crate::record::{Page, QueryResult, Record, Sort, Tlp};
use crate::schema::{EntitySchema, SchemaRegistry, BUILTIN_FIELDS};
use crate::store::Transaction;

/// Payload for a new record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewRecord {
    /// Defaults to the audit actor, then the configured fallback owner
    #[serde(default)]
    pub owner: Option<String>,

    /// Defaults to `unset`
    #[serde(default)]
    pub tlp: Option<Tlp>,

    /// Kind-specific fields
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl NewRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_tlp(mut self, tlp: Tlp) -> Self {
        self.tlp = Some(tlp);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Split a flat JSON object into owner, tlp and kind fields.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        let Value::Object(mut map) = value else {
            return Err(CoreError::Validation("record payload must be an object".into()));
        };
        let owner = match map.remove("owner") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s),
            Some(other) => return Err(CoreError::mismatch("owner", "string", other)),
        };
        let tlp = match map.remove("tlp") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => {
                Some(Tlp::parse(&s).ok_or_else(|| CoreError::mismatch("tlp", "tlp marking", &s))?)
            }
            Some(other) => return Err(CoreError::mismatch("tlp", "tlp marking", other)),
        };
        Ok(Self {
            owner,
            tlp,
            fields: map,
        })
    }
}

/// Partial update: a raw mapping or any serializable partial struct.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changes(Map<String, Value>);

impl Changes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    /// Build from a partial struct. `None` fields serialize to null and are
    /// dropped, so only the fields that were set are applied.
    pub fn from_serialize<T: Serialize>(partial: &T) -> CoreResult<Self> {
        match serde_json::to_value(partial)? {
            Value::Object(map) => Ok(Self(map.into_iter().filter(|(_, v)| !v.is_null()).collect())),
            _ => Err(CoreError::Validation("changes must serialize to an object".into())),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl From<Map<String, Value>> for Changes {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Persistence for one kind.
#[derive(Debug, Clone)]
pub struct Repository {
    schema: Arc<EntitySchema>,
    config: Arc<CoreConfig>,
    permissions: PermissionEngine,
}

impl Repository {
    fn new(schema: EntitySchema, config: Arc<CoreConfig>, permissions: PermissionEngine) -> Self {
        Self {
            schema: Arc::new(schema),
            config,
            permissions,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.schema.kind
    }

    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    fn target(&self, id: i64) -> TargetRef {
        TargetRef::new(self.kind(), id)
    }

    fn reject_blob_kind(&self, operation: &str) -> CoreResult<()> {
        if self.schema.blob_backed {
            return Err(CoreError::Validation(format!(
                "{} records carry a blob; {} them through BlobLifecycle",
                self.kind(),
                operation
            )));
        }
        Ok(())
    }

    /// Create a record and apply the configured default grants.
    ///
    /// Blob-backed kinds are created through `BlobLifecycle::create_file`.
    #[instrument(skip(self, tx, new, audit), fields(kind = %self.kind()))]
    pub fn create(
        &self,
        tx: &mut Transaction,
        new: NewRecord,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        self.reject_blob_kind("create")?;
        let record = self.insert(tx, new, audit)?;
        self.apply_default_grants(tx, record.target());
        Ok(record)
    }

    /// Create a record with an explicit owner.
    pub fn create_with_owner(
        &self,
        tx: &mut Transaction,
        new: NewRecord,
        owner: &str,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        self.create(tx, new.with_owner(owner), audit)
    }

    /// Create a record and set its permissions in the same transaction.
    /// The default grants are not applied.
    #[instrument(skip(self, tx, new, grid, audit), fields(kind = %self.kind()))]
    pub fn create_with_permissions(
        &self,
        tx: &mut Transaction,
        new: NewRecord,
        grid: &PermissionGrid,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        self.reject_blob_kind("create")?;
        for role_id in grid.role_ids() {
            self.permissions.role(tx, role_id).map_err(|_| {
                CoreError::Validation(format!("role {} does not exist", role_id))
            })?;
        }
        let record = self.insert(tx, new, audit)?;
        self.permissions.set(tx, record.target(), grid)?;
        Ok(record)
    }

    /// Create a record linked under `parent`.
    #[instrument(skip(self, tx, new, parent, audit), fields(kind = %self.kind(), parent = %parent))]
    pub fn create_in_object(
        &self,
        tx: &mut Transaction,
        new: NewRecord,
        parent: TargetRef,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        if tx.tables().live(parent).is_none() {
            return Err(CoreError::not_found(parent));
        }
        let record = self.create(tx, new, audit)?;
        Links::link(tx, parent, record.target())?;
        Ok(record)
    }

    /// Validate and store a new record without the blob-kind check.
    pub(crate) fn insert(
        &self,
        tx: &mut Transaction,
        new: NewRecord,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        let mut data = Map::new();
        for (key, value) in &new.fields {
            let spec = self
                .schema
                .field(key)
                .filter(|f| !BUILTIN_FIELDS.contains(&f.name))
                .ok_or_else(|| {
                    CoreError::Validation(format!("unknown field '{}' for {}", key, self.kind()))
                })?;
            data.insert(key.clone(), spec.ty.coerce(key, value)?);
        }

        let owner = new
            .owner
            .filter(|o| !o.trim().is_empty())
            .or_else(|| audit.as_deref().map(|a| a.who().to_string()))
            .unwrap_or_else(|| self.config.fallback_owner.clone());

        let now = Utc::now();
        let tables = tx.tables_mut();
        let record = Record {
            id: tables.next_id(self.kind()),
            kind: self.kind(),
            owner,
            tlp: new.tlp.unwrap_or_default(),
            created: now,
            modified: now,
            deleted: false,
            data,
        };
        tables.put(record.clone());

        if let Some(audit) = audit {
            audit.record_create(&record);
        }
        tracing::info!(object = %record.target(), owner = %record.owner, "Record created");
        Ok(record)
    }

    fn apply_default_grants(&self, tx: &mut Transaction, target: TargetRef) {
        for (level, names) in &self.config.default_grants {
            for name in names {
                match self.permissions.role_by_name(tx, name) {
                    Some(role) => {
                        tx.tables_mut()
                            .permissions
                            .insert(Permission::new(role.id, target, *level));
                    }
                    None => {
                        tracing::warn!(role = %name, level = %level, "Default grant role missing, skipped");
                    }
                }
            }
        }
    }

    /// Fetch a live record.
    pub fn get(&self, tx: &Transaction, id: i64) -> CoreResult<Record> {
        let target = self.target(id);
        tx.tables()
            .live(target)
            .cloned()
            .ok_or_else(|| CoreError::not_found(target))
    }

    /// Fetch a record whether or not it is soft-deleted.
    pub fn get_any(&self, tx: &Transaction, id: i64) -> Option<Record> {
        tx.tables().record(self.target(id)).cloned()
    }

    /// Live records, ascending by id.
    pub fn list(&self, tx: &Transaction, page: Page) -> CoreResult<QueryResult> {
        self.run(tx, &[], page, None, Scope::All)
    }

    /// Live records matching `filters`.
    pub fn query(&self, tx: &Transaction, filters: &FilterMap, page: Page) -> CoreResult<QueryResult> {
        let parsed = parse_filters(&self.schema, filters)?;
        self.run(tx, &parsed, page, None, Scope::All)
    }

    /// Like [`Repository::query`] with an explicit ordering.
    pub fn query_sorted(
        &self,
        tx: &Transaction,
        filters: &FilterMap,
        page: Page,
        sort: &Sort,
    ) -> CoreResult<QueryResult> {
        let parsed = parse_filters(&self.schema, filters)?;
        self.run(tx, &parsed, page, Some(sort), Scope::All)
    }

    /// Live records the principal can read.
    pub fn get_with_roles(
        &self,
        tx: &Transaction,
        principal: &Principal,
        page: Page,
    ) -> CoreResult<QueryResult> {
        self.query_with_roles(tx, principal, &FilterMap::new(), page)
    }

    /// Live records matching `filters` that the principal can read.
    pub fn query_with_roles(
        &self,
        tx: &Transaction,
        principal: &Principal,
        filters: &FilterMap,
        page: Page,
    ) -> CoreResult<QueryResult> {
        let parsed = parse_filters(&self.schema, filters)?;
        let scope = Scope::Principal {
            principal,
            admin_role_id: self.permissions.admin_role_id(tx),
        };
        self.run(tx, &parsed, page, None, scope)
    }

    fn run(
        &self,
        tx: &Transaction,
        filters: &[Filter],
        page: Page,
        sort: Option<&Sort>,
        scope: Scope<'_>,
    ) -> CoreResult<QueryResult> {
        let limit = self.config.clamp_limit(page.limit);
        query::run(tx.tables(), &self.schema, filters, page, limit, sort, scope)
    }

    /// Live records of this kind linked under `parent`.
    pub fn get_by_parent(
        &self,
        tx: &Transaction,
        parent: TargetRef,
        page: Page,
    ) -> CoreResult<QueryResult> {
        let tables = tx.tables();
        if tables.record(parent).is_none() {
            return Err(CoreError::not_found(parent));
        }
        let mut children: Vec<Record> = Links::children(tx, parent)
            .into_iter()
            .filter(|t| t.kind == self.kind())
            .filter_map(|t| tables.live(t).cloned())
            .collect();
        children.sort_by_key(|r| r.id);
        children.dedup_by_key(|r| r.id);

        let total = children.len();
        let limit = self.config.clamp_limit(page.limit);
        let rows = children.into_iter().skip(page.skip).take(limit).collect();
        Ok(QueryResult { rows, total })
    }

    /// Apply changes to the mutable fields of a live record.
    ///
    /// Keys outside the mutable set are ignored. Returns the record
    /// unchanged, without touching `modified` or the audit, when nothing
    /// actually changes.
    #[instrument(skip(self, tx, changes, audit), fields(kind = %self.kind()))]
    pub fn update(
        &self,
        tx: &mut Transaction,
        id: i64,
        changes: impl Into<Changes>,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        let changes = changes.into();
        let current = self.get(tx, id)?;
        if changes.is_empty() {
            return Ok(current);
        }

        let mut updated = current.clone();
        let mut diff = Map::new();
        for (key, value) in changes.iter() {
            let Some(spec) = self.schema.field(key).filter(|f| f.mutable) else {
                tracing::debug!(field = %key, "Ignoring non-mutable field");
                continue;
            };
            let coerced = spec.ty.coerce(key, value)?;
            let before = current.field(key).unwrap_or(Value::Null);
            match key.as_str() {
                "owner" => match &coerced {
                    Value::String(owner) if !owner.trim().is_empty() => updated.owner = owner.clone(),
                    _ => return Err(CoreError::mismatch("owner", "non-empty string", value)),
                },
                "tlp" => {
                    updated.tlp = coerced
                        .as_str()
                        .and_then(Tlp::parse)
                        .ok_or_else(|| CoreError::mismatch("tlp", "tlp marking", value))?;
                }
                _ if coerced.is_null() => {
                    updated.data.remove(key);
                }
                _ => {
                    updated.data.insert(key.clone(), coerced.clone());
                }
            }
            let after = updated.field(key).unwrap_or(Value::Null);
            if before != after {
                diff.insert(key.clone(), json!({"before": before, "after": after}));
            }
        }

        if diff.is_empty() {
            return Ok(current);
        }

        updated.modified = Utc::now();
        tx.tables_mut().put(updated.clone());
        if let Some(audit) = audit {
            audit.record_update(updated.target(), diff);
        }
        tracing::info!(object = %updated.target(), "Record updated");
        Ok(updated)
    }

    /// Soft-delete a live record, returning its state before the delete.
    #[instrument(skip(self, tx, audit), fields(kind = %self.kind()))]
    pub fn remove(
        &self,
        tx: &mut Transaction,
        id: i64,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        self.reject_blob_kind("remove")?;
        self.set_deleted(tx, id, true, audit)
    }

    /// Restore a soft-deleted record. An active record is returned as-is.
    #[instrument(skip(self, tx, audit), fields(kind = %self.kind()))]
    pub fn undelete(
        &self,
        tx: &mut Transaction,
        id: i64,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        self.reject_blob_kind("undelete")?;
        match self.get_any(tx, id) {
            Some(record) if !record.deleted => Ok(record),
            Some(_) => self.set_deleted(tx, id, false, audit),
            None => Err(CoreError::not_found(self.target(id))),
        }
    }

    /// Flip the delete flag. Removing returns the pre-delete snapshot;
    /// restoring returns the restored record.
    pub(crate) fn set_deleted(
        &self,
        tx: &mut Transaction,
        id: i64,
        deleted: bool,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<Record> {
        let target = self.target(id);
        let before = match self.get_any(tx, id) {
            Some(record) if record.deleted != deleted => record,
            _ => return Err(CoreError::not_found(target)),
        };

        let mut after = before.clone();
        after.deleted = deleted;
        after.modified = Utc::now();
        tx.tables_mut().put(after.clone());

        if let Some(audit) = audit {
            if deleted {
                audit.record_delete(&before);
            } else {
                audit.record_undelete(&after);
            }
        }
        tracing::info!(object = %target, deleted, "Delete flag changed");
        Ok(if deleted { before } else { after })
    }

    /// First live record whose string field equals `value`.
    pub(crate) fn find_first(&self, tx: &Transaction, field: &str, value: &str) -> Option<Record> {
        tx.tables()
            .rows(self.kind())
            .filter(|r| !r.deleted)
            .find(|r| r.str_field(field).as_deref() == Some(value))
            .cloned()
    }

    /// Audit history of one record, most recent first.
    pub fn history(&self, tx: &Transaction, id: i64) -> Vec<AuditRecord> {
        AuditLedger::history(tx, self.target(id))
    }
}

/// Kind → repository registry resolved at startup.
#[derive(Debug, Clone)]
pub struct Catalog {
    repos: BTreeMap<EntityKind, Repository>,
    config: Arc<CoreConfig>,
    permissions: PermissionEngine,
}

impl Catalog {
    /// Build a repository for every registered kind.
    pub fn new(registry: SchemaRegistry, config: CoreConfig) -> CoreResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let permissions = PermissionEngine::new(config.admin_role_name.clone());
        let repos = registry
            .kinds()
            .filter_map(|kind| registry.get(kind).cloned())
            .map(|schema| {
                (
                    schema.kind,
                    Repository::new(schema, config.clone(), permissions.clone()),
                )
            })
            .collect();
        Ok(Self {
            repos,
            config,
            permissions,
        })
    }

    /// Catalog of the shipped kinds.
    pub fn standard(config: CoreConfig) -> CoreResult<Self> {
        Self::new(SchemaRegistry::standard(), config)
    }

    /// Repository for a kind.
    pub fn repo(&self, kind: EntityKind) -> CoreResult<&Repository> {
        self.repos
            .get(&kind)
            .ok_or_else(|| CoreError::Validation(format!("kind '{}' is not registered", kind)))
    }

    pub fn kinds(&self) -> impl Iterator<Item = EntityKind> + '_ {
        self.repos.keys().copied()
    }

    pub fn permissions(&self) -> &PermissionEngine {
        &self.permissions
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }
}
