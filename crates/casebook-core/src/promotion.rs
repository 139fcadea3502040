//! # Promotion Engine
//!
//! Promotion turns one or more lower-maturity records into a record of a
//! higher kind (alert → event → incident, dispatch → intel → product,
//! vuln_feed → vuln_track) and records a lineage edge per source.
//!
//! ```text
//! p0 (source) ──edge──▶ p1 (destination)
//! alert:3 ─┐
//! alert:4 ─┴──────────▶ event:9
//! ```

use casebook_rbac::{EntityKind, TargetRef};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::instrument;

use crate::audit::AuditContext;
use crate::error::{CoreError, CoreResult};
use crate::link::Links;
use crate::record::Record;
use crate::repository::{Catalog, Changes, NewRecord};
use crate::schema::coerce_int;
use crate::store::Transaction;

const PROMOTED: &str = "promoted";

/// Directed lineage edge from source `p0` to destination `p1`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromotionEdge {
    pub id: i64,
    pub p0: TargetRef,
    pub p1: TargetRef,
    pub created: DateTime<Utc>,
}

/// A promotion as submitted by a caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PromotionRequest {
    /// `"kind:id"` strings or `{"type": kind, "id": n}` objects
    pub sources: Vec<Value>,

    pub destination_kind: EntityKind,

    /// Promote into an existing record instead of creating one
    #[serde(default)]
    pub destination_id: Option<i64>,

    /// Owner of a newly created destination; defaults to the first source's
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Source labels (kind `source`), not promotion sources
    #[serde(default)]
    pub sources_list: Vec<String>,
}

impl PromotionRequest {
    pub fn new(destination_kind: EntityKind) -> Self {
        Self {
            sources: Vec::new(),
            destination_kind,
            destination_id: None,
            owner: None,
            tags: Vec::new(),
            sources_list: Vec::new(),
        }
    }

    /// Add a source by handle.
    pub fn with_source(mut self, source: TargetRef) -> Self {
        self.sources
            .push(json!({"type": source.kind.as_str(), "id": source.id}));
        self
    }

    /// Add a source in raw form.
    pub fn with_raw_source(mut self, source: Value) -> Self {
        self.sources.push(source);
        self
    }

    pub fn into_existing(mut self, destination_id: i64) -> Self {
        self.destination_id = Some(destination_id);
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn with_source_label(mut self, name: impl Into<String>) -> Self {
        self.sources_list.push(name.into());
        self
    }

    /// Parse a request body.
    pub fn from_value(value: Value) -> CoreResult<Self> {
        serde_json::from_value(value)
            .map_err(|e| CoreError::Validation(format!("malformed promotion request: {}", e)))
    }
}

/// Parse one source element.
pub fn parse_source(value: &Value) -> CoreResult<TargetRef> {
    match value {
        Value::String(s) => TargetRef::parse(s)
            .map_err(|e| CoreError::Validation(format!("malformed promotion source: {}", e))),
        Value::Object(map) => {
            let kind = map
                .get("type")
                .and_then(Value::as_str)
                .and_then(EntityKind::parse);
            let id = map.get("id").and_then(coerce_int);
            match (kind, id) {
                (Some(kind), Some(id)) => Ok(TargetRef::new(kind, id)),
                _ => Err(CoreError::Validation(format!(
                    "malformed promotion source: {}",
                    value
                ))),
            }
        }
        other => Err(CoreError::Validation(format!(
            "malformed promotion source: {}",
            other
        ))),
    }
}

/// What a promotion produced.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionOutcome {
    pub destination: Record,
    /// One edge per source, pre-existing edges included
    pub edges: Vec<PromotionEdge>,
    /// Whether the destination was created by this promotion
    pub created: bool,
}

/// Promotion and lineage queries.
pub struct Promotions;

impl Promotions {
    /// Promote `request.sources` into a new or existing destination.
    ///
    /// Re-promoting a source into the same destination is a no-op for the
    /// edge table.
    #[instrument(skip(catalog, tx, request, audit), fields(destination = %request.destination_kind))]
    pub fn promote(
        catalog: &Catalog,
        tx: &mut Transaction,
        request: &PromotionRequest,
        mut audit: Option<&mut AuditContext>,
    ) -> CoreResult<PromotionOutcome> {
        if request.sources.is_empty() {
            return Err(CoreError::Validation("promotion needs at least one source".into()));
        }

        let mut sources: Vec<TargetRef> = Vec::with_capacity(request.sources.len());
        for raw in &request.sources {
            let source = parse_source(raw)?;
            if !sources.contains(&source) {
                sources.push(source);
            }
        }

        let destination_kind = request.destination_kind;
        for source in &sources {
            if !source.kind.can_promote_to(destination_kind) {
                return Err(CoreError::Validation(format!(
                    "{} cannot be promoted to {}",
                    source.kind, destination_kind
                )));
            }
        }

        let mut source_records = Vec::with_capacity(sources.len());
        for source in &sources {
            let record = tx
                .tables()
                .live(*source)
                .cloned()
                .ok_or_else(|| CoreError::not_found(*source))?;
            source_records.push(record);
        }

        let repo = catalog.repo(destination_kind)?;
        let (destination, created) = match request.destination_id {
            Some(id) => (repo.get(tx, id)?, false),
            None => {
                let first = &source_records[0];
                let mut new = NewRecord::new()
                    .with_owner(request.owner.clone().unwrap_or_else(|| first.owner.clone()))
                    .with_tlp(first.tlp);
                if repo.schema().field("subject").is_some() {
                    if let Some(subject) = first.str_field("subject") {
                        new = new.field("subject", subject);
                    }
                }
                if repo.schema().status_allows("open") {
                    new = new.field("status", "open");
                }
                (repo.create(tx, new, audit.as_deref_mut())?, true)
            }
        };
        let destination_ref = destination.target();

        let mut edges = Vec::with_capacity(sources.len());
        for source in &sources {
            let existing = tx
                .tables()
                .promotions
                .iter()
                .find(|e| e.p0 == *source && e.p1 == destination_ref)
                .cloned();
            let edge = match existing {
                Some(edge) => edge,
                None => {
                    let tables = tx.tables_mut();
                    let edge = PromotionEdge {
                        id: tables.next_row_id(),
                        p0: *source,
                        p1: destination_ref,
                        created: Utc::now(),
                    };
                    tables.promotions.push(edge.clone());
                    edge
                }
            };
            edges.push(edge);
        }

        for record in &source_records {
            let source_repo = catalog.repo(record.kind)?;
            let already = record.str_field("status").as_deref() == Some(PROMOTED);
            if source_repo.schema().status_allows(PROMOTED) && !already {
                source_repo.update(
                    tx,
                    record.id,
                    Changes::new().with("status", PROMOTED),
                    audit.as_deref_mut(),
                )?;
            }
        }

        for tag in &request.tags {
            Links::attach_tag(catalog, tx, destination_ref, tag, audit.as_deref_mut())?;
        }
        for name in &request.sources_list {
            Links::attach_source(catalog, tx, destination_ref, name, audit.as_deref_mut())?;
        }

        tracing::info!(
            destination = %destination_ref,
            sources = sources.len(),
            created,
            "Promotion recorded"
        );
        Ok(PromotionOutcome {
            destination,
            edges,
            created,
        })
    }

    /// Every edge touching `target`, from either end, ascending by id.
    pub fn lineage(tx: &Transaction, target: TargetRef) -> Vec<PromotionEdge> {
        tx.tables()
            .promotions
            .iter()
            .filter(|e| e.p0 == target || e.p1 == target)
            .cloned()
            .collect()
    }

    /// Destinations `target` was promoted into.
    pub fn promoted_to_of(tx: &Transaction, target: TargetRef) -> Vec<TargetRef> {
        tx.tables()
            .promotions
            .iter()
            .filter(|e| e.p0 == target)
            .map(|e| e.p1)
            .collect()
    }

    /// Sources that were promoted into `target`.
    pub fn promoted_from_of(tx: &Transaction, target: TargetRef) -> Vec<TargetRef> {
        tx.tables()
            .promotions
            .iter()
            .filter(|e| e.p1 == target)
            .map(|e| e.p0)
            .collect()
    }
}
