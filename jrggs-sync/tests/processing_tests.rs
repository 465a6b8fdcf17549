//! Processing queue and derivation tests over a scripted source

mod helpers;

use std::time::Duration;

use helpers::{
    as_source, engine_with, issue, rejection_history, reviewer, settle, status_event, FakeSource,
};
use jrggs_sync::models::{ItemKind, OverridePatch, SyncParams, SyncStatus, UserMetrics};

async fn rejection_engine() -> (jrggs_sync::Engine, std::sync::Arc<FakeSource>) {
    let source = FakeSource::new(ItemKind::Issue, "KEY");
    let mut item = issue("KEY-1", 1_000);
    item.snapshot.story_points = Some(5);
    item.snapshot.assignee = Some("dave".to_string());
    source.put_item(item);
    source.push_events("KEY-1", rejection_history());

    let engine = engine_with(vec![as_source(&source)]).await;
    engine.upsert_contributor(&reviewer("alice")).await.unwrap();
    engine.upsert_contributor(&reviewer("bob")).await.unwrap();
    (engine, source)
}

#[tokio::test]
async fn test_rejections_attributed_to_last_reviewer() {
    let (engine, _source) = rejection_engine().await;
    engine.sync_scope("KEY").await.unwrap();
    settle(&engine).await;

    let item = engine.item("KEY-1").await.unwrap();
    assert_eq!(item.sync_status, SyncStatus::Success);
    assert_eq!(item.history.len(), 4);

    let metrics = &item.derived.metrics;
    assert_eq!(
        metrics["alice"],
        UserMetrics {
            story_points: 3,
            n_rejections: 1,
            n_code_reviews: 1,
            n_defects: 0
        }
    );
    assert_eq!(
        metrics["bob"],
        UserMetrics {
            story_points: 2,
            n_rejections: 1,
            n_code_reviews: 1,
            n_defects: 0
        }
    );
    assert!(item.last_sync_at.is_some());
}

#[tokio::test]
async fn test_reprocessing_is_idempotent() {
    let (engine, source) = rejection_engine().await;
    engine.sync_scope("KEY").await.unwrap();
    settle(&engine).await;
    let first = engine.item("KEY-1").await.unwrap();

    engine.mark_pending("KEY-1", SyncParams::full()).await.unwrap();
    settle(&engine).await;
    let second = engine.item("KEY-1").await.unwrap();

    assert_eq!(second.history, first.history);
    assert_eq!(second.derived, first.derived);
    assert_eq!(
        serde_json::to_string(&second.derived).unwrap(),
        serde_json::to_string(&first.derived).unwrap()
    );
    // The second pass asked only for events past the stored history
    assert_eq!(source.event_offsets("KEY-1"), vec![0, 4]);
}

#[tokio::test]
async fn test_forced_resync_refetches_without_duplicates() {
    let (engine, source) = rejection_engine().await;
    engine.sync_scope("KEY").await.unwrap();
    settle(&engine).await;

    let marked = engine.force_resync("KEY").await.unwrap();
    assert_eq!(marked, 1);
    settle(&engine).await;

    let item = engine.item("KEY-1").await.unwrap();
    assert_eq!(item.history.len(), 4);
    assert_eq!(source.event_offsets("KEY-1").last(), Some(&0));
}

#[tokio::test]
async fn test_new_events_are_appended_incrementally() {
    let (engine, source) = rejection_engine().await;
    engine.sync_scope("KEY").await.unwrap();
    settle(&engine).await;

    source.push_events("KEY-1", vec![status_event("e5", "alice", 500, "Code Review")]);
    engine.mark_pending("KEY-1", SyncParams::full()).await.unwrap();
    settle(&engine).await;

    let item = engine.item("KEY-1").await.unwrap();
    let ids: Vec<&str> = item.history.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["e1", "e2", "e3", "e4", "e5"]);
    assert_eq!(item.derived.metrics["alice"].n_code_reviews, 2);
}

#[tokio::test]
async fn test_invalidated_rejection_stops_counting() {
    let (engine, _source) = rejection_engine().await;
    engine.sync_scope("KEY").await.unwrap();
    settle(&engine).await;

    engine
        .set_override("KEY-1", OverridePatch::InvalidateEvent("e2".to_string()))
        .await
        .unwrap();
    settle(&engine).await;

    let item = engine.item("KEY-1").await.unwrap();
    assert_eq!(item.derived.metrics["alice"].n_rejections, 0);
    assert_eq!(item.derived.metrics["bob"].n_rejections, 1);
    let e2 = item
        .derived
        .rejections
        .iter()
        .find(|r| r.event_id == "e2")
        .unwrap();
    assert!(!e2.active);
}

#[tokio::test]
async fn test_failures_are_isolated_and_not_retried() {
    let source = FakeSource::new(ItemKind::Issue, "KEY");
    source.put_item(issue("KEY-1", 100));
    source.put_item(issue("KEY-2", 200));
    source.put_item(issue("KEY-3", 300));
    source.hang_events("KEY-1");
    source.fail_events("KEY-3");

    let engine = engine_with(vec![as_source(&source)]).await;
    engine.sync_scope("KEY").await.unwrap();
    settle(&engine).await;

    let status = |key: &'static str| {
        let engine = &engine;
        async move { engine.item(key).await.unwrap().sync_status }
    };
    assert_eq!(status("KEY-1").await, SyncStatus::Failed);
    assert_eq!(status("KEY-2").await, SyncStatus::Success);
    assert_eq!(status("KEY-3").await, SyncStatus::Failed);

    // Later ticks leave FAILED items alone
    let stats = engine.process_pending(ItemKind::Issue).await.unwrap();
    assert_eq!(stats.claimed, 0);
    assert_eq!(status("KEY-1").await, SyncStatus::Failed);

    // An explicit reset is the only way back in
    source.heal("KEY-1");
    engine.mark_pending("KEY-1", SyncParams::full()).await.unwrap();
    settle(&engine).await;
    assert_eq!(status("KEY-1").await, SyncStatus::Success);
    assert_eq!(status("KEY-3").await, SyncStatus::Failed);
}

#[tokio::test]
async fn test_defect_child_attributed_to_first_reviewer() {
    let source = FakeSource::new(ItemKind::Issue, "KEY");
    source.put_item(issue("KEY-10", 100));
    let mut child = issue("KEY-11", 200);
    child.snapshot.title = Some("Defect: crash on save".to_string());
    child.snapshot.parent_key = Some("KEY-10".to_string());
    source.put_item(child);
    source.push_events(
        "KEY-11",
        vec![status_event("c1", "alice", 150, "Code Review")],
    );

    let engine = engine_with(vec![as_source(&source)]).await;
    engine.upsert_contributor(&reviewer("alice")).await.unwrap();
    engine.sync_scope("KEY").await.unwrap();
    settle(&engine).await;

    let parent = engine.item("KEY-10").await.unwrap();
    assert_eq!(parent.derived.defects.len(), 1);
    assert_eq!(parent.derived.defects[0].child_key, "KEY-11");
    assert_eq!(parent.derived.defects[0].actor, "alice");
    assert_eq!(parent.derived.metrics["alice"].n_defects, 1);

    // Excluding the child removes the defect from the parent
    engine
        .set_override("KEY-11", OverridePatch::Excluded(true))
        .await
        .unwrap();
    engine
        .mark_pending("KEY-10", SyncParams::light())
        .await
        .unwrap();
    settle(&engine).await;
    assert!(engine.item("KEY-10").await.unwrap().derived.defects.is_empty());
}

#[tokio::test]
async fn test_ingestion_wakes_the_queue() {
    let source = FakeSource::new(ItemKind::Issue, "KEY");
    source.put_item(issue("KEY-1", 100));
    let engine = engine_with(vec![as_source(&source)]).await;

    engine.sync_scope("KEY").await.unwrap();

    let mut status = SyncStatus::Pending;
    for _ in 0..200 {
        status = engine.item("KEY-1").await.unwrap().sync_status;
        if status == SyncStatus::Success {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, SyncStatus::Success);
}
