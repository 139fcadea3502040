//! Generic repository lifecycle: create, update, soft delete, links and
//! the audit trail each step leaves.

mod common;

use casebook_core::{
    AuditAction, AuditContext, AuditLedger, AuditQuery, Changes, CoreError, Links, NewRecord,
    Page, Tlp,
};
use casebook_rbac::{EntityKind, TargetRef};
use common::TestFixture;
use serde::Serialize;
use serde_json::json;

#[tokio::test]
async fn test_remove_and_undelete_round_trip() {
    let fixture = TestFixture::new();
    let repo = fixture.catalog.repo(EntityKind::Checklist).unwrap();

    let mut tx = fixture.begin().await;
    let mut audit = AuditContext::new("alice");
    let created = repo
        .create(
            &mut tx,
            NewRecord::new()
                .field("subject", "Triage")
                .field("description", "Steps for first response"),
            Some(&mut audit),
        )
        .unwrap();
    assert_eq!(created.owner, "alice");

    let snapshot = repo.remove(&mut tx, created.id, Some(&mut audit)).unwrap();
    assert_eq!(snapshot, created);
    assert!(matches!(repo.get(&tx, created.id), Err(CoreError::NotFound(_))));
    assert!(repo.get_any(&tx, created.id).unwrap().deleted);
    assert!(matches!(
        repo.remove(&mut tx, created.id, None),
        Err(CoreError::NotFound(_))
    ));

    let restored = repo.undelete(&mut tx, created.id, Some(&mut audit)).unwrap();
    assert!(!restored.deleted);
    assert_eq!(restored.data, created.data);
    assert_eq!(restored.owner, created.owner);
    assert_eq!(repo.undelete(&mut tx, created.id, None).unwrap(), restored);

    audit.flush(&mut tx);
    tx.commit().await.unwrap();

    let tx = fixture.begin().await;
    let actions: Vec<AuditAction> = repo
        .history(&tx, created.id)
        .into_iter()
        .map(|r| r.what)
        .collect();
    assert_eq!(
        actions,
        vec![AuditAction::Undelete, AuditAction::Delete, AuditAction::Create]
    );
    assert!(matches!(
        repo.undelete(&mut fixture.begin().await, 99, None),
        Err(CoreError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_update_applies_mutable_fields_only() {
    let fixture = TestFixture::new();
    let repo = fixture.catalog.repo(EntityKind::Incident).unwrap();

    let mut tx = fixture.begin().await;
    let mut audit = AuditContext::new("alice");
    let incident = repo
        .create(
            &mut tx,
            NewRecord::new()
                .field("subject", "Exfil")
                .field("severity", "low"),
            Some(&mut audit),
        )
        .unwrap();

    let changes = Changes::new()
        .with("severity", "HIGH")
        .with("id", 42)
        .with("nonsense", "ignored")
        .with("tlp", "amber");
    let updated = repo
        .update(&mut tx, incident.id, changes, Some(&mut audit))
        .unwrap();
    assert_eq!(updated.id, incident.id);
    assert_eq!(updated.str_field("severity").as_deref(), Some("high"));
    assert_eq!(updated.tlp, Tlp::Amber);
    assert!(updated.data.get("nonsense").is_none());
    assert!(updated.modified >= incident.modified);

    let unchanged = repo
        .update(
            &mut tx,
            incident.id,
            Changes::new().with("severity", "high"),
            Some(&mut audit),
        )
        .unwrap();
    assert_eq!(unchanged, updated);

    assert!(matches!(
        repo.update(&mut tx, incident.id, Changes::new().with("severity", "extreme"), None),
        Err(CoreError::TypeMismatch { .. })
    ));

    audit.flush(&mut tx);
    let history = repo.history(&tx, incident.id);
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].what, AuditAction::Update);
    assert_eq!(
        history[0].data,
        json!({
            "severity": {"before": "low", "after": "high"},
            "tlp": {"before": "unset", "after": "amber"},
        })
    );
}

#[tokio::test]
async fn test_update_from_partial_struct() {
    #[derive(Serialize)]
    struct IncidentPatch {
        subject: Option<String>,
        category: Option<String>,
    }

    let fixture = TestFixture::new();
    let repo = fixture.catalog.repo(EntityKind::Incident).unwrap();
    let mut tx = fixture.begin().await;
    let incident = repo
        .create(&mut tx, NewRecord::new().field("subject", "Old"), None)
        .unwrap();

    let patch = Changes::from_serialize(&IncidentPatch {
        subject: None,
        category: Some("malware".into()),
    })
    .unwrap();
    let updated = repo.update(&mut tx, incident.id, patch, None).unwrap();
    assert_eq!(updated.str_field("subject").as_deref(), Some("Old"));
    assert_eq!(updated.str_field("category").as_deref(), Some("malware"));
}

#[tokio::test]
async fn test_create_validates_payload() {
    let fixture = TestFixture::new();
    let repo = fixture.catalog.repo(EntityKind::Event).unwrap();
    let mut tx = fixture.begin().await;

    assert!(matches!(
        repo.create(&mut tx, NewRecord::new().field("colour", "red"), None),
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        repo.create(&mut tx, NewRecord::new().field("id", 7), None),
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        repo.create(&mut tx, NewRecord::new().field("view_count", "many"), None),
        Err(CoreError::TypeMismatch { .. })
    ));

    let anonymous = repo
        .create(&mut tx, NewRecord::new().field("view_count", "3"), None)
        .unwrap();
    assert_eq!(anonymous.owner, fixture.catalog.config().fallback_owner);
    assert_eq!(anonymous.field("view_count"), Some(json!(3)));

    let payload = NewRecord::from_value(json!({"owner": "bob", "subject": "raw"})).unwrap();
    assert_eq!(repo.create(&mut tx, payload, None).unwrap().owner, "bob");
}

#[tokio::test]
async fn test_uncommitted_work_is_rolled_back() {
    let fixture = TestFixture::new();
    let repo = fixture.catalog.repo(EntityKind::Guide).unwrap();

    {
        let mut tx = fixture.begin().await;
        let mut audit = AuditContext::new("alice");
        repo.create(&mut tx, NewRecord::new().field("subject", "draft"), Some(&mut audit))
            .unwrap();
        audit.flush(&mut tx);
    }

    let tx = fixture.begin().await;
    assert_eq!(repo.list(&tx, Page::default()).unwrap().total, 0);
    assert!(AuditLedger::query(&tx, &AuditQuery::default()).is_empty());
}

#[tokio::test]
async fn test_concurrent_writers_conflict() {
    let fixture = TestFixture::new();
    let repo = fixture.catalog.repo(EntityKind::Sighting).unwrap();

    let mut first = fixture.begin().await;
    let mut second = fixture.begin().await;
    repo.create(&mut first, NewRecord::new().field("subject", "a"), None)
        .unwrap();
    repo.create(&mut second, NewRecord::new().field("subject", "b"), None)
        .unwrap();

    first.commit().await.unwrap();
    assert!(matches!(second.commit().await, Err(CoreError::Conflict(_))));

    let tx = fixture.begin().await;
    let rows = repo.list(&tx, Page::default()).unwrap();
    assert_eq!(rows.total, 1);
    assert_eq!(rows.rows[0].str_field("subject").as_deref(), Some("a"));
}

#[tokio::test]
async fn test_children_and_labels() {
    let fixture = TestFixture::new();
    let incident = fixture.seed(EntityKind::Incident, &["Case"]).await.remove(0);
    let entries = fixture.catalog.repo(EntityKind::Entry).unwrap();

    let mut tx = fixture.begin().await;
    let mut audit = AuditContext::new("alice");
    let first = entries
        .create_in_object(
            &mut tx,
            NewRecord::new().field("body", "Initial triage"),
            incident.target(),
            Some(&mut audit),
        )
        .unwrap();
    let second = entries
        .create_in_object(
            &mut tx,
            NewRecord::new().field("body", "Containment"),
            incident.target(),
            Some(&mut audit),
        )
        .unwrap();
    entries
        .create(&mut tx, NewRecord::new().field("body", "Orphan"), None)
        .unwrap();

    let children = entries
        .get_by_parent(&tx, incident.target(), Page::default())
        .unwrap();
    assert_eq!(children.ids(), vec![first.id, second.id]);

    entries.remove(&mut tx, first.id, None).unwrap();
    let children = entries
        .get_by_parent(&tx, incident.target(), Page::default())
        .unwrap();
    assert_eq!(children.ids(), vec![second.id]);

    assert!(matches!(
        entries.create_in_object(
            &mut tx,
            NewRecord::new(),
            TargetRef::new(EntityKind::Incident, 404),
            None
        ),
        Err(CoreError::NotFound(_))
    ));

    let tag = Links::attach_tag(&fixture.catalog, &mut tx, incident.target(), "ransomware", Some(&mut audit))
        .unwrap();
    let again = Links::attach_tag(&fixture.catalog, &mut tx, incident.target(), "ransomware", None)
        .unwrap();
    assert_eq!(tag.id, again.id);
    assert!(Links::exists(&tx, incident.target(), tag.target()));
    assert_eq!(Links::parents(&tx, tag.target()), vec![incident.target()]);

    Links::unlink(&mut tx, incident.target(), tag.target()).unwrap();
    assert!(matches!(
        Links::unlink(&mut tx, incident.target(), tag.target()),
        Err(CoreError::NotFound(_))
    ));
    audit.flush(&mut tx);
}

#[tokio::test]
async fn test_audit_query_across_objects() {
    let fixture = TestFixture::new();
    fixture.seed(EntityKind::Threat, &["a", "b"]).await;
    let repo = fixture.catalog.repo(EntityKind::Threat).unwrap();

    let mut tx = fixture.begin().await;
    let mut audit = AuditContext::new("bob")
        .with_source_ip("10.1.2.3")
        .with_user_agent("casebook-tests");
    repo.remove(&mut tx, 1, Some(&mut audit)).unwrap();
    audit.flush(&mut tx);
    tx.commit().await.unwrap();

    let tx = fixture.begin().await;
    let by_seeder = AuditLedger::query(&tx, &AuditQuery::default().with_who("seeder"));
    assert_eq!(by_seeder.len(), 2);
    assert!(by_seeder.iter().all(|r| r.what == AuditAction::Create));

    let deletes = AuditLedger::query(
        &tx,
        &AuditQuery::default()
            .with_kind(EntityKind::Threat)
            .with_action(AuditAction::Delete),
    );
    assert_eq!(deletes.len(), 1);
    assert_eq!(deletes[0].who, "bob");
    assert_eq!(deletes[0].source_ip.as_deref(), Some("10.1.2.3"));
    assert_eq!(deletes[0].user_agent.as_deref(), Some("casebook-tests"));
    assert_eq!(deletes[0].data["snapshot"]["subject"], "a");
}
