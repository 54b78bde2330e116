use civicsync_types::EntityId;
use std::collections::HashSet;

#[test]
fn entity_id_from_str_and_string() {
    let a = EntityId::from("job-1");
    let b = EntityId::from("job-1".to_string());
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "job-1");
}

#[test]
fn entity_id_display() {
    let id = EntityId::new("device/42");
    assert_eq!(id.to_string(), "device/42");
}

#[test]
fn entity_id_empty() {
    assert!(EntityId::new("").is_empty());
    assert!(!EntityId::new("x").is_empty());
}

#[test]
fn entity_id_hash_and_lookup_by_str() {
    let mut set = HashSet::new();
    set.insert(EntityId::new("a"));
    set.insert(EntityId::new("a"));
    set.insert(EntityId::new("b"));
    assert_eq!(set.len(), 2);
    assert!(set.contains("a"));
    assert!(!set.contains("c"));
}

#[test]
fn entity_id_serde_is_transparent() {
    let id = EntityId::new("17");
    let json = serde_json::to_string(&id).unwrap();
    assert_eq!(json, "\"17\"");
    let back: EntityId = serde_json::from_str(&json).unwrap();
    assert_eq!(back, id);
}

#[test]
fn entity_id_into_inner() {
    assert_eq!(EntityId::new("k").into_inner(), "k");
}
