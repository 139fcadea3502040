//! Flair: entities extracted from free text, persisted as links.
//!
//! Extraction itself is an external [`FlairService`]. This module stores
//! what it finds: one `entity` record per `(entity_type, value)` pair and a
//! link from the annotated record to each entity it mentions.

use async_trait::async_trait;
use casebook_rbac::{EntityKind, TargetRef};
use serde::{Deserialize, Serialize};

use crate::audit::AuditContext;
use crate::error::{CoreError, CoreResult};
use crate::link::Links;
use crate::repository::{Catalog, NewRecord};
use crate::schema::FieldType;
use crate::store::Transaction;

/// One extracted entity mention.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FlairHit {
    /// Record the mention was found in
    pub target: TargetRef,
    /// e.g. `ipaddr`, `domain`, `md5`
    pub entity_type: String,
    pub value: String,
}

impl FlairHit {
    pub fn new(target: TargetRef, entity_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            target,
            entity_type: entity_type.into(),
            value: value.into(),
        }
    }
}

/// External entity extraction.
#[async_trait]
pub trait FlairService: Send + Sync {
    /// Extract mentions from `text`, which belongs to `target`.
    async fn extract(&self, target: TargetRef, text: &str) -> CoreResult<Vec<FlairHit>>;
}

/// What a persist call wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlairSummary {
    /// Entities referenced by the hits, in first-seen order
    pub entities: Vec<TargetRef>,
    pub entities_created: usize,
    pub links_created: usize,
}

/// Flair persistence.
pub struct Flair;

impl Flair {
    /// Find or create an entity per hit and link the hit's target to it.
    /// Running the same hits twice writes nothing the second time.
    pub fn persist(
        catalog: &Catalog,
        tx: &mut Transaction,
        hits: &[FlairHit],
        mut audit: Option<&mut AuditContext>,
    ) -> CoreResult<FlairSummary> {
        let repo = catalog.repo(EntityKind::Entity)?;
        let mut summary = FlairSummary::default();

        for hit in hits {
            let entity_type = hit.entity_type.trim().to_lowercase();
            let value = hit.value.trim();
            if entity_type.is_empty() || value.is_empty() {
                return Err(CoreError::Validation(format!(
                    "flair hit on {} needs an entity type and value",
                    hit.target
                )));
            }
            if tx.tables().live(hit.target).is_none() {
                return Err(CoreError::not_found(hit.target));
            }

            let existing = tx
                .tables()
                .rows(EntityKind::Entity)
                .filter(|r| !r.deleted)
                .find(|r| {
                    r.str_field("entity_type").as_deref() == Some(entity_type.as_str())
                        && r.str_field("value").as_deref() == Some(value)
                })
                .cloned();
            let entity = match existing {
                Some(entity) => entity,
                None => {
                    summary.entities_created += 1;
                    repo.create(
                        tx,
                        NewRecord::new()
                            .field("entity_type", entity_type.clone())
                            .field("value", value),
                        audit.as_deref_mut(),
                    )?
                }
            };

            let entity_ref = entity.target();
            if !Links::exists(tx, hit.target, entity_ref) {
                Links::link(tx, hit.target, entity_ref)?;
                summary.links_created += 1;
            }
            if !summary.entities.contains(&entity_ref) {
                summary.entities.push(entity_ref);
            }
        }

        tracing::debug!(
            hits = hits.len(),
            created = summary.entities_created,
            linked = summary.links_created,
            "Flair persisted"
        );
        Ok(summary)
    }

    /// Run `service` over a record's free-text fields and persist the hits.
    pub async fn annotate(
        service: &dyn FlairService,
        catalog: &Catalog,
        tx: &mut Transaction,
        target: TargetRef,
        audit: Option<&mut AuditContext>,
    ) -> CoreResult<FlairSummary> {
        let schema = catalog.repo(target.kind)?.schema();
        let record = tx
            .tables()
            .live(target)
            .cloned()
            .ok_or_else(|| CoreError::not_found(target))?;

        let text = schema
            .fields
            .iter()
            .filter(|f| f.fragment && f.ty == FieldType::String)
            .filter_map(|f| record.str_field(f.name))
            .collect::<Vec<_>>()
            .join("\n");
        if text.is_empty() {
            return Ok(FlairSummary::default());
        }

        let hits = service.extract(target, &text).await?;
        Self::persist(catalog, tx, &hits, audit)
    }
}
