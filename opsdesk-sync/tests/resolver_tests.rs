//! Conflict detection rules and resolution round trips.

use std::sync::Arc;

use opsdesk_store::LocalStore;
use opsdesk_sync::remote::mock::MockRemote;
use opsdesk_sync::resolver::detect;
use opsdesk_sync::{
    ChangeTracker, ConflictResolver, EventBus, RemoteChange, Resolution, SyncError, SyncEvent,
};
use opsdesk_types::{
    Conflict, ConflictId, ContentHash, DeviceId, EntityKey, EntitySnapshot, ResolutionChoice,
    Version, VersionRecord,
};
use serde_json::{Value, json};

struct Rig {
    store: LocalStore,
    tracker: ChangeTracker,
    remote: MockRemote,
    events: EventBus,
    resolver: ConflictResolver,
    device: DeviceId,
}

fn make_rig() -> Rig {
    let store = LocalStore::open_in_memory().unwrap();
    let tracker = ChangeTracker::new(store.clone());
    let remote = MockRemote::new();
    let events = EventBus::default();
    let device = DeviceId::generate();
    let resolver = ConflictResolver::new(
        store.clone(),
        tracker.clone(),
        Arc::new(remote.clone()),
        events.clone(),
        device,
    );
    Rig {
        store,
        tracker,
        remote,
        events,
        resolver,
        device,
    }
}

fn key() -> EntityKey {
    EntityKey::new("sale", "s-1")
}

fn local_data() -> Value {
    json!({"total": 75, "note": "local edit"})
}

fn remote_data() -> Value {
    json!({"total": 90, "note": "remote edit"})
}

fn snapshot_at(version: u64) -> EntitySnapshot {
    EntitySnapshot::new(key(), local_data(), Version::new(version))
}

fn remote_change_at(version: u64) -> RemoteChange {
    RemoteChange {
        entity_type: "sale".into(),
        entity_id: "s-1".into(),
        data: remote_data(),
        version: Version::new(version),
    }
}

/// Seeds a dirty entity at committed v5 plus an open clash against
/// remote v6, the way a sync cycle would have recorded it.
fn seed_clash(rig: &Rig) -> Conflict {
    rig.tracker.record_local_write(&key(), &local_data()).unwrap();
    rig.store
        .put_version_record(&VersionRecord::new(
            key(),
            Version::new(5),
            ContentHash::of(&json!({"total": 70})),
        ))
        .unwrap();
    let conflict = Conflict::version_clash(
        key(),
        local_data(),
        Version::new(5),
        remote_data(),
        Version::new(6),
        rig.device,
    );
    rig.store.save_conflict(&conflict).unwrap();
    conflict
}

#[test]
fn detect_flags_newer_remote_against_dirty_local() {
    let device = DeviceId::generate();

    let conflict = detect(&snapshot_at(5), true, &remote_change_at(6), device)
        .expect("newer remote against dirty local must clash");

    assert_eq!(conflict.key, key());
    assert_eq!(conflict.local_version, Version::new(5));
    assert_eq!(conflict.remote_version, Some(Version::new(6)));
    assert_eq!(conflict.local_data, local_data());
    assert_eq!(conflict.remote_data, Some(remote_data()));
    assert_eq!(conflict.origin_device, device);
}

#[test]
fn detect_passes_clean_local_copies() {
    let device = DeviceId::generate();
    assert!(detect(&snapshot_at(5), false, &remote_change_at(6), device).is_none());
}

#[test]
fn detect_passes_equal_versions() {
    let device = DeviceId::generate();
    assert!(detect(&snapshot_at(5), true, &remote_change_at(5), device).is_none());
}

#[test]
fn detect_passes_stale_remote_changes() {
    let device = DeviceId::generate();
    assert!(detect(&snapshot_at(5), true, &remote_change_at(4), device).is_none());
}

#[tokio::test]
async fn resolve_local_keeps_the_local_data() {
    let rig = make_rig();
    let conflict = seed_clash(&rig);
    let mut rx = rig.events.subscribe();

    let winner = rig
        .resolver
        .resolve(conflict.id, Resolution::Local)
        .await
        .unwrap();

    assert_eq!(winner, local_data());
    let snapshot = rig.store.get_snapshot(&key()).unwrap().unwrap();
    assert_eq!(snapshot.data, local_data());
    // Past both v5 (local) and v6 (remote).
    assert_eq!(snapshot.version, Version::new(7));
    assert!(rig.store.list_conflicts().unwrap().is_empty());

    let sent = rig.remote.resolutions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, conflict.id);
    assert_eq!(sent[0].1.resolution, ResolutionChoice::Local);
    assert_eq!(sent[0].1.selected_data, local_data());

    match rx.try_recv().unwrap() {
        SyncEvent::ConflictResolved { id, key: event_key } => {
            assert_eq!(id, conflict.id);
            assert_eq!(event_key, key());
        }
        other => panic!("expected ConflictResolved, got {other:?}"),
    }
}

#[tokio::test]
async fn resolve_remote_adopts_the_remote_data() {
    let rig = make_rig();
    let conflict = seed_clash(&rig);

    let winner = rig
        .resolver
        .resolve(conflict.id, Resolution::Remote)
        .await
        .unwrap();

    assert_eq!(winner, remote_data());
    let snapshot = rig.store.get_snapshot(&key()).unwrap().unwrap();
    assert_eq!(snapshot.data, remote_data());
    assert_eq!(snapshot.version, Version::new(7));
    assert!(!rig.tracker.is_dirty(&key()).unwrap());
}

#[tokio::test]
async fn resolve_merge_applies_the_supplied_data() {
    let rig = make_rig();
    let conflict = seed_clash(&rig);
    let merged = json!({"total": 90, "note": "local edit"});

    let winner = rig
        .resolver
        .resolve(conflict.id, Resolution::Merge(merged.clone()))
        .await
        .unwrap();

    assert_eq!(winner, merged);
    assert_eq!(rig.store.get_snapshot(&key()).unwrap().unwrap().data, merged);
    let sent = rig.remote.resolutions();
    assert_eq!(sent[0].1.resolution, ResolutionChoice::Merge);
}

#[tokio::test]
async fn resolution_leaves_the_entity_clean() {
    let rig = make_rig();
    let conflict = seed_clash(&rig);

    rig.resolver
        .resolve(conflict.id, Resolution::Local)
        .await
        .unwrap();

    // The winner is committed at its new version; nothing left to push.
    assert!(!rig.tracker.is_dirty(&key()).unwrap());
    assert_eq!(rig.store.committed_version(&key()).unwrap(), Version::new(7));
}

#[tokio::test]
async fn remote_resolution_needs_known_remote_data() {
    let rig = make_rig();
    let conflict = Conflict::retries_exhausted(key(), local_data(), Version::new(3), rig.device);
    rig.store.save_conflict(&conflict).unwrap();

    let error = rig
        .resolver
        .resolve(conflict.id, Resolution::Remote)
        .await
        .unwrap_err();

    assert!(matches!(error, SyncError::InvalidResolution(_)));
    // Still open, nothing sent.
    assert_eq!(rig.store.list_conflicts().unwrap().len(), 1);
    assert!(rig.remote.resolutions().is_empty());
}

#[tokio::test]
async fn exhausted_conflict_resolves_locally_past_its_own_version() {
    let rig = make_rig();
    let conflict = Conflict::retries_exhausted(key(), local_data(), Version::new(3), rig.device);
    rig.store.save_conflict(&conflict).unwrap();

    rig.resolver
        .resolve(conflict.id, Resolution::Local)
        .await
        .unwrap();

    // No remote version to clear: just one past the local version.
    assert_eq!(rig.store.committed_version(&key()).unwrap(), Version::new(4));
    assert!(rig.store.list_conflicts().unwrap().is_empty());
}

#[tokio::test]
async fn resolving_an_unknown_conflict_errors() {
    let rig = make_rig();
    let missing = ConflictId::new();

    let error = rig
        .resolver
        .resolve(missing, Resolution::Local)
        .await
        .unwrap_err();

    match error {
        SyncError::UnknownConflict(id) => assert_eq!(id, missing),
        other => panic!("expected UnknownConflict, got {other:?}"),
    }
}

#[tokio::test]
async fn failed_remote_notification_keeps_the_conflict_for_retry() {
    let rig = make_rig();
    let conflict = seed_clash(&rig);
    rig.remote.set_reachable(false);

    let error = rig
        .resolver
        .resolve(conflict.id, Resolution::Local)
        .await
        .unwrap_err();
    assert!(matches!(error, SyncError::Network(_)));

    // Applied locally, but the record stays until the remote hears of it.
    assert_eq!(rig.store.committed_version(&key()).unwrap(), Version::new(7));
    assert_eq!(rig.store.list_conflicts().unwrap().len(), 1);

    // The retry goes through and re-applying is a no-op.
    rig.remote.set_reachable(true);
    rig.resolver
        .resolve(conflict.id, Resolution::Local)
        .await
        .unwrap();
    assert_eq!(rig.store.committed_version(&key()).unwrap(), Version::new(7));
    assert!(rig.store.list_conflicts().unwrap().is_empty());
    assert_eq!(rig.remote.resolutions().len(), 1);
}

#[tokio::test]
async fn open_conflicts_lists_oldest_first() {
    let rig = make_rig();
    let first = seed_clash(&rig);
    let mut second = Conflict::retries_exhausted(
        EntityKey::new("sale", "s-2"),
        json!({"total": 1}),
        Version::ZERO,
        rig.device,
    );
    second.detected_at = first.detected_at + std::time::Duration::from_secs(1);
    rig.store.save_conflict(&second).unwrap();

    let open = rig.resolver.open_conflicts().await.unwrap();
    assert_eq!(open.len(), 2);
    assert_eq!(open[0].id, first.id);
    assert_eq!(open[1].id, second.id);
}
