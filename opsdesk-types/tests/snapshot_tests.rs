use opsdesk_types::{ContentHash, EntityKey, EntitySnapshot, Version, VersionRecord};
use serde_json::json;

// ── EntitySnapshot ───────────────────────────────────────────────

#[test]
fn snapshot_hashes_its_data() {
    let data = json!({"name": "Acme", "stage": "quoted"});
    let snapshot = EntitySnapshot::new(EntityKey::new("project", "p1"), data.clone(), Version::ZERO);

    assert_eq!(snapshot.content_hash, ContentHash::of(&data));
    assert_eq!(snapshot.version, Version::ZERO);
}

#[test]
fn identical_data_produces_identical_hashes() {
    let key = EntityKey::new("project", "p1");
    let a = EntitySnapshot::new(key.clone(), json!({"n": 1}), Version::new(2));
    let b = EntitySnapshot::new(key, json!({"n": 1}), Version::new(2));

    assert_eq!(a.content_hash, b.content_hash);
}

#[test]
fn snapshot_serialization_roundtrip() {
    let snapshot = EntitySnapshot::new(
        EntityKey::new("sale", "s-3"),
        json!({"total": 49.5, "items": [1, 2]}),
        Version::new(4),
    );
    let encoded = serde_json::to_string(&snapshot).unwrap();
    let decoded: EntitySnapshot = serde_json::from_str(&encoded).unwrap();
    assert_eq!(snapshot, decoded);
}

// ── VersionRecord ────────────────────────────────────────────────

#[test]
fn version_record_carries_committed_hash() {
    let data = json!({"name": "Acme"});
    let hash = ContentHash::of(&data);
    let record = VersionRecord::new(EntityKey::new("project", "p1"), Version::new(3), hash.clone());

    assert_eq!(record.content_hash, hash);
    assert_eq!(record.version, Version::new(3));
}

#[test]
fn dirty_means_snapshot_hash_differs_from_committed_hash() {
    let key = EntityKey::new("project", "p1");
    let committed = json!({"name": "Acme"});
    let record = VersionRecord::new(key.clone(), Version::new(1), ContentHash::of(&committed));

    // Unedited snapshot matches the committed hash.
    let clean = EntitySnapshot::new(key.clone(), committed, Version::new(1));
    assert_eq!(clean.content_hash, record.content_hash);

    // A local edit changes the snapshot hash and nothing else.
    let edited = EntitySnapshot::new(key, json!({"name": "Acme Ltd"}), Version::new(1));
    assert_ne!(edited.content_hash, record.content_hash);
    assert_eq!(edited.version, record.version);
}
