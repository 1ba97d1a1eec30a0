//! Integration tests for replicas driven by a scripted producer.

use replicadb_core::flatten::FlattenMode;
use replicadb_core::{Aggregation, CacheReader, StartupState};
use replicadb_storage::{Filter, InMemoryTableStore, TableStore};
use replicadb_sync_engine::{
    DeltaRequest, MockProducer, Replica, ReplicaConfig, SyncError, WriteCall,
};
use replicadb_sync_protocol::{
    DeltaBatch, Entry, PullDeltaResponse, PullDumpResponse, ReasonKind,
};
use replicadb_testkit::{post_entry, posts_schema, record, tagged_schema, user_entry, users_schema};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn store() -> Arc<dyn TableStore> {
    Arc::new(InMemoryTableStore::new())
}

fn tagged(id: i64, tags: &[&str]) -> Entry {
    Entry::new("root", record(json!({"id": id, "tags": tags})))
}

fn rows(reader: &CacheReader, table: &str) -> usize {
    reader
        .collection(table)
        .unwrap()
        .list(&Filter::All, None)
        .unwrap()
        .len()
}

fn tagged_config() -> ReplicaConfig {
    ReplicaConfig::new("tags")
        .with_schema(vec![tagged_schema("root")])
        .with_flatten_mode(FlattenMode::Auto)
}

// ============================================================================
// Dumps
// ============================================================================

#[tokio::test]
async fn startup_dump_flattens_arrays() {
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(
        vec![tagged(1, &["a", "b"]), tagged(2, &["c"])],
        Some(json!("d0")),
    ));

    let replica = Replica::start(tagged_config(), mock.producer(), store())
        .await
        .unwrap();

    let reader = replica.reader();
    assert_eq!(rows(&reader, "root"), 2);
    assert_eq!(rows(&reader, "root_tags"), 3);
    assert_eq!(replica.metadata().delta_state().unwrap(), Some(json!("d0")));
    assert_eq!(
        replica.metadata().startup_state().unwrap(),
        StartupState::Done
    );

    let mut names: Vec<_> = replica
        .collections()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["root", "root_tags"]);
}

#[tokio::test]
async fn failed_dump_resumes_from_last_page() {
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::more(vec![tagged(1, &["a"])], json!("p2")));
    mock.fail_next_dump("connection reset");

    let replica = Replica::start(tagged_config(), mock.producer(), store())
        .await
        .unwrap();
    let metadata = replica.metadata();
    assert_eq!(rows(&replica.reader(), "root"), 1);
    assert_eq!(metadata.dump_state().unwrap(), Some(json!("p2")));
    assert_eq!(metadata.startup_state().unwrap(), StartupState::InProgress);
    assert_eq!(replica.scheduler().stats().failures, 1);

    mock.push_dump_page(PullDumpResponse::done(vec![tagged(2, &[])], Some(json!(1))));
    let result = replica.sync_dump().await.unwrap();
    assert!(result.success);

    let requests = mock.dump_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].previous_dump_state, Some(json!("p2")));
    assert_eq!(rows(&replica.reader(), "root"), 2);
    assert_eq!(metadata.dump_state().unwrap(), None);
    assert_eq!(metadata.startup_state().unwrap(), StartupState::Done);
}

#[tokio::test]
async fn completed_dump_is_not_repeated_on_restart() {
    let store = store();
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(vec![tagged(1, &["a"])], None));
    let first = Replica::start(tagged_config(), mock.producer(), store.clone())
        .await
        .unwrap();
    first.shutdown().await;

    let second = Replica::start(tagged_config(), mock.producer(), store)
        .await
        .unwrap();
    assert_eq!(mock.dump_requests().len(), 1);
    assert_eq!(rows(&second.reader(), "root_tags"), 1);
}

// ============================================================================
// Deltas
// ============================================================================

#[tokio::test]
async fn delta_cursor_advances_batch_by_batch() {
    let mock = MockProducer::new();
    for cursor in 1..=4 {
        mock.push_delta(PullDeltaResponse::new(
            cursor < 4,
            json!(cursor),
            vec![tagged(cursor, &["x"])],
            vec![],
        ));
    }

    let replica = Replica::start(tagged_config(), mock.producer(), store())
        .await
        .unwrap();
    let result = replica.sync_delta().await.unwrap();
    assert!(result.success);
    assert_eq!(result.handler_calls, 4);

    let previous: Vec<_> = mock
        .delta_requests()
        .into_iter()
        .map(|r| r.previous_delta_state)
        .collect();
    assert_eq!(previous, vec![None, Some(json!(1)), Some(json!(2)), Some(json!(3))]);
    assert_eq!(replica.metadata().delta_state().unwrap(), Some(json!(4)));
    assert_eq!(rows(&replica.reader(), "root"), 4);
}

#[tokio::test]
async fn dump_hands_over_to_delta() {
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(vec![tagged(1, &["a"])], Some(json!("after-dump"))));
    mock.push_delta(PullDeltaResponse::new(
        false,
        json!("d1"),
        vec![tagged(1, &["b", "c"])],
        vec![],
    ));

    let replica = Replica::start(
        tagged_config().with_pull_delta_on_restart(true),
        mock.producer(),
        store(),
    )
    .await
    .unwrap();

    let requests = mock.delta_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].previous_delta_state, Some(json!("after-dump")));
    assert_eq!(rows(&replica.reader(), "root_tags"), 2);
}

#[tokio::test]
async fn deleted_root_removes_its_children() {
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(
        vec![tagged(1, &["a", "b"]), tagged(2, &["c"])],
        None,
    ));
    mock.push_delta(PullDeltaResponse::new(
        false,
        json!(1),
        vec![],
        vec![Entry::new("root", record(json!({"id": 1})))],
    ));

    let replica = Replica::start(tagged_config(), mock.producer(), store())
        .await
        .unwrap();
    replica.sync_delta().await.unwrap();

    let reader = replica.reader();
    assert_eq!(rows(&reader, "root"), 1);
    let tags = reader
        .collection("root_tags")
        .unwrap()
        .list(&Filter::All, Some(&["value"][..]))
        .unwrap();
    assert_eq!(tags, vec![record(json!({"value": "c"}))]);
}

#[tokio::test(start_paused = true)]
async fn reads_within_the_delay_share_one_delta() {
    let mock = MockProducer::new();
    let config = tagged_config()
        .with_pull_delta_on_before_access(true)
        .with_before_access_delay(Duration::from_millis(50));
    let replica = Replica::start(config, mock.producer(), store()).await.unwrap();

    let roots = replica.collection("root").unwrap();
    let tags = replica.collection("root_tags").unwrap();
    let count = Aggregation::count();
    let (listed, counted) = tokio::join!(
        roots.list(&Filter::All, None),
        tags.aggregate(&Filter::All, &count, None),
    );
    listed.unwrap();
    counted.unwrap();

    let requests: Vec<DeltaRequest> = mock.delta_requests();
    assert_eq!(requests.len(), 1);
    let kinds: Vec<_> = requests[0].reasons.iter().map(|r| r.kind).collect();
    assert!(kinds.contains(&ReasonKind::BeforeList));
    assert!(kinds.contains(&ReasonKind::BeforeAggregate));
    assert!(requests[0].affected_collections.contains("root"));
}

#[tokio::test]
async fn failed_delta_still_serves_cached_rows() {
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(vec![tagged(1, &["a"])], None));
    mock.fail_next_delta("timeout");
    let replica = Replica::start(
        tagged_config().with_pull_delta_on_before_access(true),
        mock.producer(),
        store(),
    )
    .await
    .unwrap();

    let listed = replica
        .collection("root")
        .unwrap()
        .list(&Filter::All, None)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(replica.scheduler().stats().failures, 1);
}

#[tokio::test]
async fn pushed_batches_reach_the_cache() {
    let mock = MockProducer::new();
    let producer = mock.producer().with_push(mock.clone());
    let replica = Replica::start(tagged_config(), producer, store()).await.unwrap();

    let sink = mock.sink().unwrap();
    let result = sink
        .send(DeltaBatch::new(vec![tagged(5, &["p"])], vec![], Some(json!("push-1"))))
        .await
        .unwrap();
    assert!(result.success);
    assert_eq!(rows(&replica.reader(), "root_tags"), 1);
    assert_eq!(
        replica.metadata().delta_state().unwrap(),
        Some(json!("push-1"))
    );
}

// ============================================================================
// Schema discovery and changes
// ============================================================================

#[tokio::test]
async fn schema_is_discovered_from_the_first_dump() {
    let mock = MockProducer::new();
    let config = ReplicaConfig::new("discovered").with_flatten_mode(FlattenMode::Auto);
    let replica = Replica::start(config, mock.producer(), store()).await.unwrap();
    assert!(matches!(
        replica.collections(),
        Err(SyncError::SchemaUnavailable)
    ));

    mock.push_dump_page(PullDumpResponse::more(vec![user_entry(1)], json!(2)));
    mock.push_dump_page(PullDumpResponse::done(vec![user_entry(2)], Some(json!(0))));
    let result = replica.sync_dump().await.unwrap();
    assert!(result.success);

    let schema = replica.schema().unwrap();
    assert_eq!(schema.collection("users").unwrap().primary_key, "id");
    let reader = replica.reader();
    assert_eq!(rows(&reader, "users"), 2);
    assert_eq!(rows(&reader, "users_tags"), 4);
}

#[tokio::test]
async fn discovered_schema_is_reused_after_restart() {
    let store = store();
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(vec![tagged(1, &["a"])], None));
    let config = ReplicaConfig::new("tags").with_flatten_mode(FlattenMode::Auto);
    let first = Replica::start(config.clone(), mock.producer(), store.clone())
        .await
        .unwrap();
    first.shutdown().await;

    let second = Replica::start(config, mock.producer(), store).await.unwrap();
    assert!(second.collection("root_tags").is_ok());
    assert_eq!(mock.dump_requests().len(), 1);
}

#[tokio::test]
async fn changed_flattening_resets_the_cache() {
    let store = store();
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(vec![tagged(1, &["a"])], Some(json!(3))));
    let first = Replica::start(tagged_config(), mock.producer(), store.clone())
        .await
        .unwrap();
    first.shutdown().await;

    mock.push_dump_page(PullDumpResponse::done(vec![tagged(1, &["a"])], None));
    let config = tagged_config().with_flatten_mode(FlattenMode::None);
    let second = Replica::start(config, mock.producer(), store.clone())
        .await
        .unwrap();

    assert!(!store.has_table("root_tags").unwrap());
    assert_eq!(mock.dump_requests().len(), 2);
    assert_eq!(mock.dump_requests()[1].previous_dump_state, None);
    assert_eq!(rows(&second.reader(), "root"), 1);
}

// ============================================================================
// Write-through
// ============================================================================

fn writable_config() -> ReplicaConfig {
    ReplicaConfig::new("crm")
        .with_schema(vec![users_schema(), posts_schema()])
        .with_pull_delta_on_after_write(true)
}

#[tokio::test]
async fn writes_without_handlers_are_rejected() {
    let mock = MockProducer::new();
    let replica = Replica::start(
        ReplicaConfig::new("crm").with_schema(vec![users_schema()]),
        mock.producer(),
        store(),
    )
    .await
    .unwrap();

    let err = replica
        .collection("users")
        .unwrap()
        .create(vec![record(json!({"name": "x"}))])
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Unsupported { operation: "create", .. }));
    assert!(mock.writes().is_empty());
}

#[tokio::test]
async fn writes_cannot_be_combined_with_flattening() {
    let mock = MockProducer::new();
    let err = Replica::start(
        writable_config().with_flatten_mode(FlattenMode::Auto),
        mock.full_producer(),
        store(),
    )
    .await
    .unwrap_err();
    assert!(err.is_configuration());
}

#[tokio::test]
async fn created_records_take_producer_ids() {
    let mock = MockProducer::new();
    let replica = Replica::start(writable_config(), mock.full_producer(), store())
        .await
        .unwrap();
    let users = replica.collection("users").unwrap();

    let created = users
        .create(vec![record(json!({"name": "ada"})), record(json!({"id": 7, "name": "bob"}))])
        .await
        .unwrap();
    assert_eq!(created[0]["id"], json!(1000));
    assert_eq!(created[1]["id"], json!(7));

    let cached = replica
        .reader()
        .collection("users")
        .unwrap()
        .list(&Filter::eq("id", 1000), None)
        .unwrap();
    assert_eq!(cached[0]["name"], json!("ada"));
    assert_eq!(mock.writes().len(), 2);
}

#[tokio::test]
async fn updates_reach_producer_and_cache() {
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(vec![user_entry(1), user_entry(2)], None));
    let replica = Replica::start(writable_config(), mock.full_producer(), store())
        .await
        .unwrap();

    let updated = replica
        .collection("users")
        .unwrap()
        .update(&Filter::eq("id", 2), &record(json!({"name": "renamed"})))
        .await
        .unwrap();
    assert_eq!(updated, 1);

    match &mock.writes()[0] {
        WriteCall::Update { collection, record } => {
            assert_eq!(collection, "users");
            assert_eq!(record["name"], json!("renamed"));
            assert_eq!(record["id"], json!(2));
        }
        other => panic!("unexpected write {other:?}"),
    }
    let cached = replica
        .reader()
        .collection("users")
        .unwrap()
        .list(&Filter::eq("id", 2), None)
        .unwrap();
    assert_eq!(cached[0]["name"], json!("renamed"));
}

#[tokio::test]
async fn deletes_queue_a_delta_for_related_collections() {
    let mock = MockProducer::new();
    mock.push_dump_page(PullDumpResponse::done(
        vec![user_entry(1), post_entry(10, 1), post_entry(11, 1)],
        None,
    ));
    let replica = Replica::start(writable_config(), mock.full_producer(), store())
        .await
        .unwrap();

    let deleted = replica
        .collection("posts")
        .unwrap()
        .delete(&Filter::eq("id", 10))
        .await
        .unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(rows(&replica.reader(), "posts"), 1);

    replica.sync_delta().await.unwrap();
    let after_delete = mock
        .delta_requests()
        .into_iter()
        .find(|r| r.reasons.iter().any(|reason| reason.kind == ReasonKind::AfterDelete))
        .unwrap();
    assert!(after_delete.affected_collections.contains("posts"));
    assert!(after_delete.affected_collections.contains("users"));
}

#[tokio::test]
async fn failed_write_keeps_earlier_records() {
    let mock = MockProducer::new();
    let replica = Replica::start(writable_config(), mock.full_producer(), store())
        .await
        .unwrap();
    mock.fail_writes("quota exceeded");

    let err = replica
        .collection("users")
        .unwrap()
        .create(vec![record(json!({"id": 1, "name": "a"}))])
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(rows(&replica.reader(), "users"), 0);
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn shutdown_stops_scheduling() {
    let mock = MockProducer::new();
    let config = tagged_config().with_delta_schedule("*/5 * * * *");
    let replica = Replica::start(config, mock.producer(), store()).await.unwrap();
    assert_eq!(replica.scheduler().schedule_count(), 1);

    replica.shutdown().await;
    assert_eq!(replica.scheduler().schedule_count(), 0);
    assert!(matches!(
        replica.sync_delta().await,
        Err(SyncError::Shutdown)
    ));
}

#[tokio::test]
async fn invalid_schedules_are_rejected_at_start() {
    let mock = MockProducer::new();
    let err = Replica::start(
        tagged_config().with_dump_schedule("every tuesday"),
        mock.producer(),
        store(),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, SyncError::InvalidSchedule { .. }));
}
