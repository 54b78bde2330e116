use civicsync_sync::{ChangeDetector, CollectionSnapshot, Entity, ObservedAt};
use serde_json::json;

fn entity(id: &str) -> Entity {
    Entity::new(id, json!({ "id": id }))
}

fn stamped(id: &str, wall: u64) -> Entity {
    entity(id).observed(ObservedAt::new(wall, 0))
}

fn snapshot(entities: Vec<Entity>) -> CollectionSnapshot {
    CollectionSnapshot::network(entities)
}

// ── Counting ────────────────────────────────────────────────────

#[test]
fn identical_snapshots_have_nothing_new() {
    let a = snapshot(vec![entity("1"), entity("2")]);
    let summary = ChangeDetector::diff(&a, &a.clone());
    assert_eq!(summary.new_count, 0);
    assert!(summary.newest.is_none());
    assert!(!summary.has_new());
}

#[test]
fn counts_only_unseen_ids() {
    let previous = snapshot(vec![entity("1"), entity("2")]);
    let current = snapshot(vec![entity("2"), entity("3"), entity("4")]);
    let summary = ChangeDetector::diff(&previous, &current);
    assert_eq!(summary.new_count, 2);
}

#[test]
fn removals_are_not_changes() {
    let previous = snapshot(vec![entity("1"), entity("2")]);
    let current = snapshot(vec![entity("1")]);
    assert_eq!(ChangeDetector::diff(&previous, &current).new_count, 0);
}

#[test]
fn everything_is_new_against_empty() {
    let current = snapshot(vec![entity("a"), entity("b")]);
    let summary = ChangeDetector::diff(&CollectionSnapshot::default(), &current);
    assert_eq!(summary.new_count, 2);
}

// ── Newest ──────────────────────────────────────────────────────

#[test]
fn newest_is_latest_observed() {
    let previous = snapshot(vec![stamped("1", 10)]);
    let current = snapshot(vec![stamped("1", 10), stamped("2", 20), stamped("3", 30)]);
    let summary = ChangeDetector::diff(&previous, &current);
    assert_eq!(summary.newest.unwrap().id.as_str(), "3");
}

#[test]
fn ties_go_to_first_in_order() {
    let current = snapshot(vec![stamped("x", 5), stamped("y", 5)]);
    let summary = ChangeDetector::diff(&CollectionSnapshot::default(), &current);
    assert_eq!(summary.newest.unwrap().id.as_str(), "x");
}

#[test]
fn unstamped_ranks_lowest() {
    let current = snapshot(vec![entity("plain"), stamped("dated", 1)]);
    let summary = ChangeDetector::diff(&CollectionSnapshot::default(), &current);
    assert_eq!(summary.newest.unwrap().id.as_str(), "dated");
}

#[test]
fn newest_ignores_known_entities() {
    let previous = snapshot(vec![stamped("old", 100)]);
    let current = snapshot(vec![stamped("old", 100), stamped("fresh", 1)]);
    let summary = ChangeDetector::diff(&previous, &current);
    assert_eq!(summary.newest.unwrap().id.as_str(), "fresh");
}

// ── Properties ──────────────────────────────────────────────────

mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    fn ids() -> impl Strategy<Value = HashSet<u8>> {
        proptest::collection::hash_set(0u8..40, 0..20)
    }

    proptest! {
        #[test]
        fn new_count_is_set_difference(prev in ids(), curr in ids()) {
            let previous = snapshot(prev.iter().map(|i| entity(&i.to_string())).collect());
            let current = snapshot(curr.iter().map(|i| entity(&i.to_string())).collect());

            let summary = ChangeDetector::diff(&previous, &current);
            prop_assert_eq!(summary.new_count, curr.difference(&prev).count());
            prop_assert_eq!(summary.newest.is_some(), summary.new_count > 0);
        }

        #[test]
        fn newest_is_never_previously_known(prev in ids(), curr in ids()) {
            let previous = snapshot(prev.iter().map(|i| stamped(&i.to_string(), u64::from(*i))).collect());
            let current = snapshot(curr.iter().map(|i| stamped(&i.to_string(), u64::from(*i))).collect());

            if let Some(newest) = ChangeDetector::diff(&previous, &current).newest {
                let id: u8 = newest.id.as_str().parse().unwrap();
                prop_assert!(!prev.contains(&id));
                let max_new = curr.difference(&prev).max().copied().unwrap();
                prop_assert_eq!(id, max_new);
            }
        }
    }
}
