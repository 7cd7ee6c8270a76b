use opsdesk_types::{ConflictId, DeviceId, EntityKey, OperationId};
use std::collections::HashSet;
use std::str::FromStr;

// ── DeviceId ─────────────────────────────────────────────────────

#[test]
fn device_id_generate_is_unique() {
    let a = DeviceId::generate();
    let b = DeviceId::generate();
    assert_ne!(a, b);
}

#[test]
fn device_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::new_v4();
    let id = DeviceId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
}

#[test]
fn device_id_display_and_parse() {
    let id = DeviceId::generate();
    let s = id.to_string();
    let parsed = DeviceId::from_str(&s).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn device_id_from_str_invalid() {
    assert!(DeviceId::from_str("not-a-uuid").is_err());
}

#[test]
fn device_id_serialization_roundtrip() {
    let id = DeviceId::generate();
    let json = serde_json::to_string(&id).unwrap();
    let parsed: DeviceId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, parsed);
}

// ── OperationId / ConflictId ─────────────────────────────────────

#[test]
fn operation_id_new_is_unique() {
    let a = OperationId::new();
    let b = OperationId::new();
    assert_ne!(a, b);
}

#[test]
fn operation_id_display_and_parse() {
    let id = OperationId::new();
    let parsed = OperationId::from_str(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn operation_ids_are_time_ordered() {
    // UUID v7 embeds a timestamp; ids minted in sequence sort in mint order.
    let ids: Vec<String> = (0..8).map(|_| OperationId::new().to_string()).collect();
    let mut sorted = ids.clone();
    sorted.sort();
    assert_eq!(ids, sorted);
}

#[test]
fn conflict_id_new_is_unique() {
    let a = ConflictId::new();
    let b = ConflictId::new();
    assert_ne!(a, b);
}

#[test]
fn conflict_id_from_str_invalid() {
    assert!(ConflictId::from_str("garbage").is_err());
}

#[test]
fn conflict_id_hash_and_eq() {
    let id = ConflictId::new();
    let mut set = HashSet::new();
    set.insert(id);
    set.insert(id);
    assert_eq!(set.len(), 1);
}

// ── EntityKey ────────────────────────────────────────────────────

#[test]
fn entity_key_new_and_fields() {
    let key = EntityKey::new("project", "42");
    assert_eq!(key.entity_type, "project");
    assert_eq!(key.entity_id, "42");
}

#[test]
fn entity_key_display() {
    let key = EntityKey::new("sale", "8f31");
    assert_eq!(key.to_string(), "sale/8f31");
}

#[test]
fn entity_key_parse_roundtrip() {
    let key = EntityKey::new("appointment", "2024-118");
    let parsed: EntityKey = key.to_string().parse().unwrap();
    assert_eq!(key, parsed);
}

#[test]
fn entity_key_parse_id_may_contain_slashes() {
    let parsed: EntityKey = "note/a/b/c".parse().unwrap();
    assert_eq!(parsed.entity_type, "note");
    assert_eq!(parsed.entity_id, "a/b/c");
}

#[test]
fn entity_key_parse_rejects_missing_parts() {
    assert!(EntityKey::from_str("no-slash").is_err());
    assert!(EntityKey::from_str("/id-only").is_err());
    assert!(EntityKey::from_str("type-only/").is_err());
}

#[test]
fn entity_key_usable_as_map_key() {
    let mut set = HashSet::new();
    set.insert(EntityKey::new("project", "1"));
    set.insert(EntityKey::new("project", "1"));
    set.insert(EntityKey::new("project", "2"));
    assert_eq!(set.len(), 2);
}

#[test]
fn entity_key_serialization_roundtrip() {
    let key = EntityKey::new("quote", "q-77");
    let json = serde_json::to_string(&key).unwrap();
    let parsed: EntityKey = serde_json::from_str(&json).unwrap();
    assert_eq!(key, parsed);
}
