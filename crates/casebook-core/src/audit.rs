//! # Audit Ledger
//!
//! Mutations append [`AuditRecord`]s to a request-scoped [`AuditContext`]
//! that the caller passes explicitly through every call. The caller flushes
//! it once into the transaction that carried the mutations, so the records
//! commit or roll back together with the data they describe.
//!
//! Records are never updated or removed once written.

use casebook_rbac::{EntityKind, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use uuid::Uuid;

use crate::record::Record;
use crate::store::Transaction;

/// What happened to the target.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    Create,
    Update,
    Delete,
    Undelete,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::Create => "create",
            AuditAction::Update => "update",
            AuditAction::Delete => "delete",
            AuditAction::Undelete => "undelete",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One immutable ledger entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditRecord {
    /// Assigned on flush
    pub id: i64,

    pub what: AuditAction,

    pub target: TargetRef,

    pub who: String,

    pub when: DateTime<Utc>,

    pub source_ip: Option<String>,

    pub user_agent: Option<String>,

    /// Shared by every record flushed from the same context
    pub correlation_id: Uuid,

    /// Snapshot on create, changed-field diff on update, existence
    /// transition on delete/undelete
    pub data: Value,
}

/// Request-scoped accumulator of audit records.
///
/// Dropping a context with unflushed records logs a warning and discards
/// them; nothing is written implicitly.
///
/// ```
/// use casebook_core::AuditContext;
///
/// let audit = AuditContext::new("alice")
///     .with_source_ip("10.0.0.7")
///     .with_user_agent("casebook-cli/1.0");
/// assert_eq!(audit.who(), "alice");
/// assert_eq!(audit.pending(), 0);
/// ```
#[derive(Debug)]
pub struct AuditContext {
    who: String,
    source_ip: Option<String>,
    user_agent: Option<String>,
    correlation_id: Uuid,
    pending: Vec<AuditRecord>,
}

impl AuditContext {
    /// Context for an actor, with a fresh correlation id.
    pub fn new(who: impl Into<String>) -> Self {
        Self {
            who: who.into(),
            source_ip: None,
            user_agent: None,
            correlation_id: Uuid::now_v7(),
            pending: Vec::new(),
        }
    }

    pub fn with_source_ip(mut self, ip: impl Into<String>) -> Self {
        self.source_ip = Some(ip.into());
        self
    }

    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Reuse an upstream correlation id.
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = id;
        self
    }

    pub fn who(&self) -> &str {
        &self.who
    }

    pub fn correlation_id(&self) -> Uuid {
        self.correlation_id
    }

    /// Records waiting for [`AuditContext::flush`].
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn push(&mut self, what: AuditAction, target: TargetRef, data: Value) {
        tracing::trace!(what = %what, object = %target, "Audit record queued");
        self.pending.push(AuditRecord {
            id: 0,
            what,
            target,
            who: self.who.clone(),
            when: Utc::now(),
            source_ip: self.source_ip.clone(),
            user_agent: self.user_agent.clone(),
            correlation_id: self.correlation_id,
            data,
        });
    }

    /// Full initial state.
    pub fn record_create(&mut self, record: &Record) {
        self.push(AuditAction::Create, record.target(), record.snapshot());
    }

    /// Changed fields only, as `{field: {"before": .., "after": ..}}`.
    pub fn record_update(&mut self, target: TargetRef, diff: Map<String, Value>) {
        self.push(AuditAction::Update, target, Value::Object(diff));
    }

    pub fn record_delete(&mut self, record: &Record) {
        self.push(
            AuditAction::Delete,
            record.target(),
            json!({
                "before": {"exists": true},
                "after": {"exists": false},
                "snapshot": record.snapshot(),
            }),
        );
    }

    pub fn record_undelete(&mut self, record: &Record) {
        self.push(
            AuditAction::Undelete,
            record.target(),
            json!({
                "before": {"exists": false},
                "after": {"exists": true},
            }),
        );
    }

    /// Write every pending record into `tx`. Returns how many were written.
    pub fn flush(&mut self, tx: &mut Transaction) -> usize {
        let count = self.pending.len();
        if count == 0 {
            return 0;
        }
        let tables = tx.tables_mut();
        for mut record in self.pending.drain(..) {
            record.id = tables.next_row_id();
            tables.audits.push(record);
        }
        tracing::debug!(
            correlation_id = %self.correlation_id,
            who = %self.who,
            count,
            "Audit records flushed"
        );
        count
    }
}

impl Drop for AuditContext {
    fn drop(&mut self) {
        if !self.pending.is_empty() {
            tracing::warn!(
                correlation_id = %self.correlation_id,
                who = %self.who,
                discarded = self.pending.len(),
                "Audit context dropped without flush"
            );
        }
    }
}

/// Filter for cross-object audit review. Unset fields match everything.
#[derive(Debug, Default, Clone)]
pub struct AuditQuery {
    pub who: Option<String>,
    pub what: Option<AuditAction>,
    pub kind: Option<EntityKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn with_who(mut self, who: &str) -> Self {
        self.who = Some(who.to_string());
        self
    }

    pub fn with_action(mut self, what: AuditAction) -> Self {
        self.what = Some(what);
        self
    }

    pub fn with_kind(mut self, kind: EntityKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Inclusive time window.
    pub fn with_time_range(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, record: &AuditRecord) -> bool {
        self.who.as_deref().map_or(true, |w| record.who == w)
            && self.what.map_or(true, |w| record.what == w)
            && self.kind.map_or(true, |k| record.target.kind == k)
            && self.since.map_or(true, |t| record.when >= t)
            && self.until.map_or(true, |t| record.when <= t)
    }
}

/// Read access to the committed ledger.
pub struct AuditLedger;

impl AuditLedger {
    /// Every record for a target, most recent first.
    pub fn history(tx: &Transaction, target: TargetRef) -> Vec<AuditRecord> {
        tx.tables()
            .audits
            .iter()
            .rev()
            .filter(|r| r.target == target)
            .cloned()
            .collect()
    }

    /// Records matching a query, most recent first.
    pub fn query(tx: &Transaction, query: &AuditQuery) -> Vec<AuditRecord> {
        let matching = tx
            .tables()
            .audits
            .iter()
            .rev()
            .filter(|r| query.matches(r))
            .cloned();
        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }
}
