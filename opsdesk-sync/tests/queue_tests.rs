//! Offline queue semantics: drain order, retry accounting, staleness.

use opsdesk_store::LocalStore;
use opsdesk_sync::{EventBus, OfflineQueue, SyncConfig, SyncEvent};
use opsdesk_types::{
    ContentHash, DeviceId, EntityKey, OperationId, OperationKind, QueuedOperation, Timestamp,
    Version, VersionRecord,
};
use serde_json::json;

fn make_queue() -> (LocalStore, OfflineQueue, EventBus) {
    let store = LocalStore::open_in_memory().unwrap();
    let events = EventBus::default();
    let queue = OfflineQueue::new(store.clone(), events.clone(), &SyncConfig::default());
    (store, queue, events)
}

fn key(id: &str) -> EntityKey {
    EntityKey::new("sale", id)
}

#[test]
fn enqueue_assigns_the_configured_priority_per_kind() {
    let (_store, queue, _events) = make_queue();
    let device = DeviceId::generate();

    let create = queue
        .enqueue(OperationKind::Create, key("a"), json!({"total": 1}), device)
        .unwrap();
    let update = queue
        .enqueue(OperationKind::Update, key("b"), json!({"total": 2}), device)
        .unwrap();
    let delete = queue
        .enqueue(OperationKind::Delete, key("c"), json!(null), device)
        .unwrap();

    assert_eq!(create.priority, 3);
    assert_eq!(update.priority, 2);
    assert_eq!(delete.priority, 1);
}

#[test]
fn drain_order_is_priority_first_then_fifo() {
    let (_store, queue, _events) = make_queue();
    let device = DeviceId::generate();

    // Submitted as delete, create, update; drained as create, update, delete.
    queue
        .enqueue(OperationKind::Delete, key("d"), json!(null), device)
        .unwrap();
    queue
        .enqueue(OperationKind::Create, key("c"), json!({"total": 9}), device)
        .unwrap();
    queue
        .enqueue(OperationKind::Update, key("u"), json!({"total": 5}), device)
        .unwrap();

    let kinds: Vec<OperationKind> = queue.pending().unwrap().iter().map(|op| op.kind).collect();
    assert_eq!(
        kinds,
        vec![
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete
        ]
    );
}

#[test]
fn equal_priority_preserves_submission_order() {
    let (_store, queue, _events) = make_queue();
    let device = DeviceId::generate();

    for id in ["first", "second", "third"] {
        queue
            .enqueue(OperationKind::Update, key(id), json!({"id": id}), device)
            .unwrap();
    }

    let ids: Vec<String> = queue
        .pending()
        .unwrap()
        .iter()
        .map(|op| op.key.entity_id.clone())
        .collect();
    assert_eq!(ids, vec!["first", "second", "third"]);
}

#[test]
fn mark_completed_removes_the_operation() {
    let (_store, queue, _events) = make_queue();
    let device = DeviceId::generate();

    let op = queue
        .enqueue(OperationKind::Create, key("a"), json!({"total": 1}), device)
        .unwrap();

    assert!(queue.mark_completed(op.id).unwrap());
    assert_eq!(queue.pending_count().unwrap(), 0);
    assert!(!queue.mark_completed(op.id).unwrap());
}

#[test]
fn failures_below_the_limit_keep_the_operation_queued() {
    let (_store, queue, _events) = make_queue();
    let device = DeviceId::generate();

    let op = queue
        .enqueue(OperationKind::Update, key("a"), json!({"total": 7}), device)
        .unwrap();

    assert!(queue.record_failure(op.id, "503 from remote").unwrap().is_none());
    assert!(queue.record_failure(op.id, "503 from remote").unwrap().is_none());

    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].retry_count, 2);
    assert_eq!(pending[0].last_error.as_deref(), Some("503 from remote"));
}

#[test]
fn exhausted_retries_convert_the_operation_into_a_conflict() {
    let (store, queue, events) = make_queue();
    let device = DeviceId::generate();
    let k = key("a");
    let payload = json!({"total": 7, "items": 2});

    // The entity was synced at v2 before this update started failing.
    store
        .put_version_record(&VersionRecord::new(
            k.clone(),
            Version::new(2),
            ContentHash::of(&json!({"total": 5})),
        ))
        .unwrap();

    let op = queue
        .enqueue(OperationKind::Update, k.clone(), payload.clone(), device)
        .unwrap();
    let mut rx = events.subscribe();

    assert!(queue.record_failure(op.id, "timeout").unwrap().is_none());
    assert!(queue.record_failure(op.id, "timeout").unwrap().is_none());
    let conflict = queue
        .record_failure(op.id, "timeout")
        .unwrap()
        .expect("third failure should convert");

    // Exactly once in the conflict table, gone from the queue.
    assert_eq!(queue.pending_count().unwrap(), 0);
    let open = store.list_conflicts().unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].id, conflict.id);
    assert_eq!(open[0].key, k);
    assert_eq!(open[0].local_data, payload);
    assert_eq!(open[0].local_version, Version::new(2));
    assert_eq!(open[0].remote_data, None);
    assert_eq!(open[0].remote_version, None);

    match rx.try_recv().unwrap() {
        SyncEvent::ConflictDetected(event_conflict) => {
            assert_eq!(event_conflict.id, conflict.id);
        }
        other => panic!("expected ConflictDetected, got {other:?}"),
    }
}

#[test]
fn failure_for_an_unknown_operation_is_a_noop() {
    let (store, queue, _events) = make_queue();

    assert!(queue.record_failure(OperationId::new(), "whatever").unwrap().is_none());
    assert!(store.list_conflicts().unwrap().is_empty());
}

#[test]
fn sweep_purges_operations_older_than_the_staleness_bound() {
    let (store, queue, _events) = make_queue();
    let device = DeviceId::generate();

    // One op from the distant past, one fresh.
    let stale = QueuedOperation::create(key("old"), json!({"total": 1}), device)
        .with_enqueued_at(Timestamp::from_millis(0));
    store.enqueue(&stale).unwrap();
    queue
        .enqueue(OperationKind::Create, key("new"), json!({"total": 2}), device)
        .unwrap();

    assert_eq!(queue.sweep_stale().unwrap(), 1);

    let pending = queue.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].key, key("new"));
}

#[test]
fn sweep_with_nothing_stale_removes_nothing() {
    let (_store, queue, _events) = make_queue();
    let device = DeviceId::generate();

    queue
        .enqueue(OperationKind::Update, key("a"), json!({"total": 3}), device)
        .unwrap();

    assert_eq!(queue.sweep_stale().unwrap(), 0);
    assert_eq!(queue.pending_count().unwrap(), 1);
}
