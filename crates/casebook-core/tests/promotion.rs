//! Promotion between kinds and the lineage it records.

mod common;

use casebook_core::{
    AuditAction, AuditContext, CoreError, Links, Page, PromotionRequest, Promotions, Transaction,
};
use casebook_rbac::{EntityKind, TargetRef};
use common::TestFixture;
use serde_json::json;

#[tokio::test]
async fn test_event_promoted_to_new_incident() {
    let fixture = TestFixture::new();
    fixture
        .seed(EntityKind::Event, &["a", "b", "c", "d", "Credential theft"])
        .await;
    let source = TargetRef::new(EntityKind::Event, 5);

    let mut tx = fixture.begin().await;
    let mut audit = AuditContext::new("alice");
    let request = PromotionRequest::new(EntityKind::Incident)
        .with_source(source)
        .with_tag("credential-access")
        .with_source_label("edr");
    let outcome = Promotions::promote(&fixture.catalog, &mut tx, &request, Some(&mut audit)).unwrap();
    audit.flush(&mut tx);
    tx.commit().await.unwrap();

    assert!(outcome.created);
    assert_eq!(outcome.edges.len(), 1);
    assert_eq!(outcome.edges[0].p0, source);
    assert_eq!(outcome.edges[0].p1, outcome.destination.target());

    let destination = &outcome.destination;
    assert_eq!(destination.kind, EntityKind::Incident);
    assert_eq!(destination.str_field("subject").as_deref(), Some("Credential theft"));
    assert_eq!(destination.str_field("status").as_deref(), Some("open"));
    assert_eq!(destination.owner, "seeder");

    let tx = fixture.begin().await;
    let events = fixture.catalog.repo(EntityKind::Event).unwrap();
    let promoted = events.get(&tx, 5).unwrap();
    assert_eq!(promoted.str_field("status").as_deref(), Some("promoted"));
    assert_eq!(events.history(&tx, 5)[0].what, AuditAction::Update);

    assert_eq!(
        Promotions::promoted_to_of(&tx, source),
        vec![destination.target()]
    );
    assert_eq!(
        Promotions::promoted_from_of(&tx, destination.target()),
        vec![source]
    );
    assert_eq!(Promotions::lineage(&tx, source).len(), 1);

    let tags = fixture.catalog.repo(EntityKind::Tag).unwrap();
    let tag = tags.list(&tx, Page::default()).unwrap().rows.remove(0);
    assert_eq!(tag.str_field("name").as_deref(), Some("credential-access"));
    assert!(Links::exists(&tx, destination.target(), tag.target()));

    let sources = fixture.catalog.repo(EntityKind::Source).unwrap();
    assert_eq!(sources.list(&tx, Page::default()).unwrap().total, 1);
}

#[tokio::test]
async fn test_promotion_into_existing_destination_is_idempotent() {
    let fixture = TestFixture::new();
    fixture.seed(EntityKind::Alert, &["a1", "a2"]).await;
    let target_event = fixture.seed(EntityKind::Event, &["rollup"]).await.remove(0);

    let request = PromotionRequest::new(EntityKind::Event)
        .with_source(TargetRef::new(EntityKind::Alert, 1))
        .with_raw_source(json!("alert:2"))
        .with_raw_source(json!({"type": "alert", "id": "1"}))
        .into_existing(target_event.id);

    let mut tx = fixture.begin().await;
    let first = Promotions::promote(&fixture.catalog, &mut tx, &request, None).unwrap();
    assert!(!first.created);
    assert_eq!(first.destination.id, target_event.id);
    assert_eq!(first.edges.len(), 2);

    let second = Promotions::promote(&fixture.catalog, &mut tx, &request, None).unwrap();
    assert_eq!(second.edges, first.edges);
    assert_eq!(Promotions::lineage(&tx, target_event.target()).len(), 2);

    let events = fixture.catalog.repo(EntityKind::Event).unwrap();
    assert_eq!(events.list(&tx, Page::default()).unwrap().total, 1);
}

#[tokio::test]
async fn test_promotion_rejects_bad_requests() {
    let fixture = TestFixture::new();
    fixture.seed(EntityKind::Alert, &["a1"]).await;
    let alert = TargetRef::new(EntityKind::Alert, 1);
    let mut tx = fixture.begin().await;

    let promote = |tx: &mut Transaction, request: PromotionRequest| {
        Promotions::promote(&fixture.catalog, tx, &request, None)
    };

    assert!(matches!(
        promote(&mut tx, PromotionRequest::new(EntityKind::Event)),
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        promote(&mut tx, PromotionRequest::new(EntityKind::Incident).with_source(alert)),
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        promote(
            &mut tx,
            PromotionRequest::new(EntityKind::Event).with_raw_source(json!({"kind": "alert"}))
        ),
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        promote(
            &mut tx,
            PromotionRequest::new(EntityKind::Event).with_source(TargetRef::new(EntityKind::Alert, 9))
        ),
        Err(CoreError::NotFound(_))
    ));
    assert!(matches!(
        promote(
            &mut tx,
            PromotionRequest::new(EntityKind::Event)
                .with_source(alert)
                .into_existing(77)
        ),
        Err(CoreError::NotFound(_))
    ));

    let events = fixture.catalog.repo(EntityKind::Event).unwrap();
    assert_eq!(events.list(&tx, Page::default()).unwrap().total, 0);
    assert!(Promotions::lineage(&tx, alert).is_empty());
}

#[tokio::test]
async fn test_promotion_request_from_json() {
    let fixture = TestFixture::new();
    fixture.seed(EntityKind::Dispatch, &["tip"]).await;

    let request = PromotionRequest::from_value(json!({
        "sources": ["dispatch:1"],
        "destination_kind": "intel",
        "owner": "carol",
    }))
    .unwrap();

    let mut tx = fixture.begin().await;
    let outcome = Promotions::promote(&fixture.catalog, &mut tx, &request, None).unwrap();
    assert_eq!(outcome.destination.kind, EntityKind::Intel);
    assert_eq!(outcome.destination.owner, "carol");
}
