//! Filter grammar evaluated end to end through the repositories.

mod common;

use casebook_core::{
    AuditContext, Changes, CoreError, FilterMap, NewRecord, Page, PromotionRequest, Promotions, Sort,
};
use casebook_rbac::{EntityKind, TargetRef};
use common::TestFixture;
use proptest::prelude::*;
use serde_json::{json, Value};

fn filters(value: Value) -> FilterMap {
    match value {
        Value::Object(map) => map,
        other => panic!("filter must be an object, got {}", other),
    }
}

async fn events(fixture: &TestFixture) {
    fixture
        .seed(
            EntityKind::Event,
            &[
                "Phishing campaign",
                "Beaconing host",
                "Credential stuffing",
                "Phishing follow-up",
                "Port scan",
                "Ransomware note",
            ],
        )
        .await;
}

#[tokio::test]
async fn test_id_set_returns_ascending_with_total() {
    let fixture = TestFixture::new();
    events(&fixture).await;
    let repo = fixture.catalog.repo(EntityKind::Event).unwrap();
    let tx = fixture.begin().await;

    let result = repo
        .query(&tx, &filters(json!({"id": "[1,5,3]"})), Page::default())
        .unwrap();
    assert_eq!(result.ids(), vec![1, 3, 5]);
    assert_eq!(result.total, 3);
}

#[tokio::test]
async fn test_total_is_counted_before_paging() {
    let fixture = TestFixture::new();
    events(&fixture).await;
    let repo = fixture.catalog.repo(EntityKind::Event).unwrap();
    let tx = fixture.begin().await;

    let page = repo.list(&tx, Page::new(2, 2)).unwrap();
    assert_eq!(page.ids(), vec![3, 4]);
    assert_eq!(page.total, 6);

    let past_end = repo.list(&tx, Page::new(10, 2)).unwrap();
    assert!(past_end.rows.is_empty());
    assert_eq!(past_end.total, 6);
}

#[tokio::test]
async fn test_range_is_inclusive_and_negation_is_complement() {
    let fixture = TestFixture::new();
    events(&fixture).await;
    let repo = fixture.catalog.repo(EntityKind::Event).unwrap();
    let tx = fixture.begin().await;

    let inside = repo
        .query(&tx, &filters(json!({"id": "(2,4)"})), Page::default())
        .unwrap();
    assert_eq!(inside.ids(), vec![2, 3, 4]);

    let outside = repo
        .query(&tx, &filters(json!({"id": "!(2,4)"})), Page::default())
        .unwrap();
    assert_eq!(outside.ids(), vec![1, 5, 6]);

    let nested = repo
        .query(&tx, &filters(json!({"not": {"id": "(2,4)"}})), Page::default())
        .unwrap();
    assert_eq!(nested.ids(), outside.ids());
}

#[tokio::test]
async fn test_soft_deleted_rows_are_outside_every_universe() {
    let fixture = TestFixture::new();
    events(&fixture).await;
    let repo = fixture.catalog.repo(EntityKind::Event).unwrap();

    let mut tx = fixture.begin().await;
    repo.remove(&mut tx, 2, None).unwrap();
    tx.commit().await.unwrap();

    let tx = fixture.begin().await;
    let positive = repo
        .query(&tx, &filters(json!({"id": "(1,3)"})), Page::default())
        .unwrap();
    let negative = repo
        .query(&tx, &filters(json!({"id": "!(1,3)"})), Page::default())
        .unwrap();
    assert_eq!(positive.ids(), vec![1, 3]);
    assert_eq!(negative.ids(), vec![4, 5, 6]);
    assert_eq!(positive.total + negative.total, repo.list(&tx, Page::default()).unwrap().total);
}

#[tokio::test]
async fn test_fragment_and_glob_matching() {
    let fixture = TestFixture::new();
    events(&fixture).await;
    let repo = fixture.catalog.repo(EntityKind::Event).unwrap();
    let tx = fixture.begin().await;

    let substring = repo
        .query(&tx, &filters(json!({"subject": "PHISH"})), Page::default())
        .unwrap();
    assert_eq!(substring.ids(), vec![1, 4]);

    let glob = repo
        .query(&tx, &filters(json!({"subject": "*%host"})), Page::default())
        .unwrap();
    assert_eq!(glob.ids(), vec![2]);

    let single = repo
        .query(&tx, &filters(json!({"subject": "*port_scan"})), Page::default())
        .unwrap();
    assert_eq!(single.ids(), vec![5]);
}

#[tokio::test]
async fn test_filters_are_conjunctive() {
    let fixture = TestFixture::new();
    events(&fixture).await;
    let repo = fixture.catalog.repo(EntityKind::Event).unwrap();

    let mut tx = fixture.begin().await;
    repo.update(&mut tx, 4, Changes::new().with("status", "closed"), None)
        .unwrap();
    tx.commit().await.unwrap();

    let tx = fixture.begin().await;
    let result = repo
        .query(
            &tx,
            &filters(json!({"subject": "phishing", "status": "!closed"})),
            Page::default(),
        )
        .unwrap();
    assert_eq!(result.ids(), vec![1]);
}

#[tokio::test]
async fn test_sort_and_validation_errors() {
    let fixture = TestFixture::new();
    events(&fixture).await;
    let repo = fixture.catalog.repo(EntityKind::Event).unwrap();
    let tx = fixture.begin().await;

    let sorted = repo
        .query_sorted(&tx, &FilterMap::new(), Page::default(), &Sort::desc("id"))
        .unwrap();
    assert_eq!(sorted.ids(), vec![6, 5, 4, 3, 2, 1]);

    let by_subject = repo
        .query_sorted(&tx, &FilterMap::new(), Page::new(0, 2), &Sort::asc("subject"))
        .unwrap();
    assert_eq!(by_subject.ids(), vec![2, 3]);

    assert!(matches!(
        repo.query_sorted(&tx, &FilterMap::new(), Page::default(), &Sort::asc("bogus")),
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        repo.query(&tx, &filters(json!({"bogus": "x"})), Page::default()),
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        repo.query(&tx, &filters(json!({"id": "abc"})), Page::default()),
        Err(CoreError::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn test_datetime_sort_orders_by_instant() {
    let fixture = TestFixture::new();
    let repo = fixture.catalog.repo(EntityKind::Incident).unwrap();
    let mut tx = fixture.begin().await;
    for occurred in [
        "2024-01-01T00:00:00.500Z",
        "2024-01-01T00:00:00Z",
        "2023-12-31T23:00:00-02:00",
    ] {
        repo.create(
            &mut tx,
            NewRecord::new().field("subject", "x").field("occurred", occurred),
            None,
        )
        .unwrap();
    }

    let ascending = repo
        .query_sorted(&tx, &FilterMap::new(), Page::default(), &Sort::asc("occurred"))
        .unwrap();
    assert_eq!(ascending.ids(), vec![2, 1, 3]);

    let descending = repo
        .query_sorted(&tx, &FilterMap::new(), Page::default(), &Sort::desc("occurred"))
        .unwrap();
    assert_eq!(descending.ids(), vec![3, 1, 2]);
}

#[tokio::test]
async fn test_promoted_from_filter() {
    let fixture = TestFixture::new();
    events(&fixture).await;
    let incidents = fixture.catalog.repo(EntityKind::Incident).unwrap();

    let mut tx = fixture.begin().await;
    let mut audit = AuditContext::new("alice");
    let request = PromotionRequest::new(EntityKind::Incident)
        .with_source(TargetRef::new(EntityKind::Event, 5));
    let outcome = Promotions::promote(&fixture.catalog, &mut tx, &request, Some(&mut audit)).unwrap();
    incidents
        .create(&mut tx, NewRecord::new().field("subject", "unrelated"), Some(&mut audit))
        .unwrap();
    audit.flush(&mut tx);
    tx.commit().await.unwrap();

    let tx = fixture.begin().await;
    let promoted = incidents
        .query(&tx, &filters(json!({"promoted_from": "event:5"})), Page::default())
        .unwrap();
    assert_eq!(promoted.ids(), vec![outcome.destination.id]);

    let others = incidents
        .query(&tx, &filters(json!({"promoted_from": "!event:5"})), Page::default())
        .unwrap();
    assert_eq!(others.total, 1);
    assert_ne!(others.ids(), promoted.ids());

    let events = fixture.catalog.repo(EntityKind::Event).unwrap();
    let promoted_to = events
        .query(
            &tx,
            &filters(json!({"promoted_to": format!("incident:{}", outcome.destination.id)})),
            Page::default(),
        )
        .unwrap();
    assert_eq!(promoted_to.ids(), vec![5]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Positive and negated forms of any id range partition the live rows.
    #[test]
    fn prop_negation_partitions_live_rows(
        count in 1usize..12,
        lo in 0i64..14,
        width in 0i64..8,
        deleted in proptest::collection::btree_set(1i64..12, 0..4),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let fixture = TestFixture::new();
            let subjects: Vec<String> = (0..count).map(|i| format!("event {}", i)).collect();
            let subjects: Vec<&str> = subjects.iter().map(String::as_str).collect();
            fixture.seed(EntityKind::Event, &subjects).await;
            let repo = fixture.catalog.repo(EntityKind::Event).unwrap();

            let mut tx = fixture.begin().await;
            for id in deleted.iter().filter(|id| **id <= count as i64) {
                repo.remove(&mut tx, *id, None).unwrap();
            }
            tx.commit().await.unwrap();

            let tx = fixture.begin().await;
            let range = format!("({},{})", lo, lo + width);
            let positive = repo
                .query(&tx, &filters(json!({"id": range.clone()})), Page::default())
                .unwrap();
            let negative = repo
                .query(&tx, &filters(json!({"id": format!("!{}", range)})), Page::default())
                .unwrap();
            let live = repo.list(&tx, Page::default()).unwrap();

            let mut union: Vec<i64> = positive.ids().into_iter().chain(negative.ids()).collect();
            union.sort_unstable();
            prop_assert_eq!(union, live.ids());
            prop_assert_eq!(positive.total + negative.total, live.total);
            prop_assert!(positive.ids().iter().all(|id| !negative.ids().contains(id)));
            Ok::<(), TestCaseError>(())
        })?;
    }

    /// Results are always ascending by id without an explicit sort.
    #[test]
    fn prop_default_order_is_ascending(ids in proptest::collection::vec(1i64..10, 1..6)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let fixture = TestFixture::new();
            let subjects = ["a", "b", "c", "d", "e", "f", "g", "h", "i"];
            fixture.seed(EntityKind::Event, &subjects).await;
            let repo = fixture.catalog.repo(EntityKind::Event).unwrap();
            let tx = fixture.begin().await;

            let set = ids.iter().map(i64::to_string).collect::<Vec<_>>().join(",");
            let result = repo
                .query(&tx, &filters(json!({"id": format!("[{}]", set)})), Page::default())
                .unwrap();
            let mut expected = ids.clone();
            expected.sort_unstable();
            expected.dedup();
            prop_assert_eq!(result.ids(), expected);
            Ok::<(), TestCaseError>(())
        })?;
    }
}
