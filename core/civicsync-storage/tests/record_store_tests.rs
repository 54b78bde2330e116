use civicsync_storage::{
    table_name_for, BoundedStore, SqliteRecordStore, StorageError, StoreConfig,
};
use civicsync_types::{ObservedAt, StoreRecord};
use serde_json::json;
use std::collections::HashSet;

fn record(id: &str, wall: u64) -> StoreRecord {
    StoreRecord::new(id, json!({ "id": id, "title": format!("job {id}") }), ObservedAt::new(wall, 0))
}

fn store() -> SqliteRecordStore {
    SqliteRecordStore::open_in_memory("jobs", StoreConfig::default()).unwrap()
}

fn small_store(capacity: usize, chunk_size: usize) -> SqliteRecordStore {
    SqliteRecordStore::open_in_memory("jobs", StoreConfig { capacity, chunk_size }).unwrap()
}

async fn ids(store: &SqliteRecordStore) -> Vec<String> {
    store
        .get_all()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.id.into_inner())
        .collect()
}

// ── Config & naming ─────────────────────────────────────────────

#[test]
fn default_config() {
    let cfg = StoreConfig::default();
    assert_eq!(cfg.capacity, 100);
    assert_eq!(cfg.chunk_size, 50);
}

#[test]
fn zero_capacity_is_rejected() {
    let result = SqliteRecordStore::open_in_memory(
        "jobs",
        StoreConfig {
            capacity: 0,
            ..Default::default()
        },
    );
    assert!(matches!(result, Err(StorageError::InvalidData(_))));
}

#[test]
fn zero_chunk_size_is_rejected() {
    let cfg = StoreConfig {
        chunk_size: 0,
        ..Default::default()
    };
    assert!(cfg.validate().is_err());
}

#[test]
fn table_names_are_validated() {
    assert_eq!(table_name_for("live_devices").unwrap(), "records_live_devices");
    assert!(table_name_for("").is_err());
    assert!(table_name_for("Jobs").is_err());
    assert!(table_name_for("jobs; DROP TABLE x").is_err());
    assert!(table_name_for(&"a".repeat(49)).is_err());
}

// ── Basic operations ────────────────────────────────────────────

#[tokio::test]
async fn upsert_and_get_all() {
    let store = store();
    let report = store
        .upsert_many(vec![record("a", 1), record("b", 2)])
        .await
        .unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.evicted, 0);

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].payload["title"], "job a");
    assert_eq!(all[1].observed_at, ObservedAt::new(2, 0));
}

#[tokio::test]
async fn empty_upsert_is_noop() {
    let store = store();
    let report = store.upsert_many(Vec::new()).await.unwrap();
    assert_eq!(report.written, 0);
    assert_eq!(store.count().await.unwrap(), 0);
}

#[tokio::test]
async fn get_all_orders_by_observation() {
    let store = store();
    store
        .upsert_many(vec![record("late", 300), record("early", 100), record("mid", 200)])
        .await
        .unwrap();
    assert_eq!(ids(&store).await, vec!["early", "mid", "late"]);
}

#[tokio::test]
async fn shared_stamp_keeps_batch_order() {
    let store = store();
    store
        .upsert_many(vec![record("c", 5), record("a", 5), record("b", 5)])
        .await
        .unwrap();
    assert_eq!(ids(&store).await, vec!["c", "a", "b"]);
}

#[tokio::test]
async fn upsert_replaces_by_id() {
    let store = store();
    store.upsert_many(vec![record("a", 1)]).await.unwrap();
    let updated = StoreRecord::new("a", json!({ "id": "a", "title": "renamed" }), ObservedAt::new(9, 0));
    store.upsert_many(vec![updated]).await.unwrap();

    let all = store.get_all().await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].payload["title"], "renamed");
    assert_eq!(all[0].observed_at, ObservedAt::new(9, 0));
}

#[tokio::test]
async fn upsert_is_idempotent() {
    let store = store();
    let batch: Vec<_> = (0..30).map(|i| record(&format!("r{i}"), i)).collect();
    store.upsert_many(batch.clone()).await.unwrap();
    let once = store.get_all().await.unwrap();
    store.upsert_many(batch).await.unwrap();
    let twice = store.get_all().await.unwrap();
    assert_eq!(once, twice);
}

#[tokio::test]
async fn clear_removes_everything() {
    let store = store();
    store.upsert_many(vec![record("a", 1), record("b", 2)]).await.unwrap();
    store.clear().await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(store.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn stores_per_resource_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cache.db");
    let jobs = SqliteRecordStore::open(&path, "jobs", StoreConfig::default()).unwrap();
    let devices = SqliteRecordStore::open(&path, "devices", StoreConfig::default()).unwrap();

    jobs.upsert_many(vec![record("a", 1)]).await.unwrap();
    assert_eq!(jobs.count().await.unwrap(), 1);
    assert_eq!(devices.count().await.unwrap(), 0);
    assert_eq!(devices.table_name(), "records_devices");
}

// ── Durability ──────────────────────────────────────────────────

#[tokio::test]
async fn records_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("cache.db");
    {
        let store = SqliteRecordStore::open(&path, "jobs", StoreConfig::default()).unwrap();
        store
            .upsert_many(vec![record("a", 1), record("b", 2), record("c", 3)])
            .await
            .unwrap();
    }
    let reopened = SqliteRecordStore::open(&path, "jobs", StoreConfig::default()).unwrap();
    assert_eq!(ids(&reopened).await, vec!["a", "b", "c"]);
}

// ── Eviction ────────────────────────────────────────────────────

#[tokio::test]
async fn capacity_rollover_one_at_a_time() {
    let store = store();
    for i in 1..=120u64 {
        store.upsert_many(vec![record(&format!("r{i}"), i)]).await.unwrap();
        assert!(store.count().await.unwrap() <= 100);
    }
    let expected: Vec<String> = (21..=120).map(|i| format!("r{i}")).collect();
    assert_eq!(ids(&store).await, expected);
}

#[tokio::test]
async fn capacity_plus_k_in_one_batch_keeps_most_recent() {
    let store = store();
    let batch: Vec<_> = (0..107u64).map(|i| record(&format!("r{i}"), i)).collect();
    let report = store.upsert_many(batch).await.unwrap();
    assert_eq!(report.written, 107);
    assert_eq!(report.evicted, 7);

    let kept: HashSet<String> = ids(&store).await.into_iter().collect();
    let expected: HashSet<String> = (7..107).map(|i| format!("r{i}")).collect();
    assert_eq!(kept, expected);
}

#[tokio::test]
async fn refreshed_record_is_not_evicted() {
    let store = small_store(3, 50);
    store
        .upsert_many(vec![record("a", 1), record("b", 2), record("c", 3)])
        .await
        .unwrap();
    // `a` is seen again, so `b` is now the oldest.
    store.upsert_many(vec![record("a", 4)]).await.unwrap();
    store.upsert_many(vec![record("d", 5)]).await.unwrap();
    assert_eq!(ids(&store).await, vec!["c", "a", "d"]);
}

#[tokio::test]
async fn shared_stamp_evicts_later_batch_positions_first() {
    let store = small_store(2, 50);
    store
        .upsert_many(vec![record("first", 7), record("second", 7), record("third", 7)])
        .await
        .unwrap();
    assert_eq!(ids(&store).await, vec!["first", "second"]);
}

// ── Chunking ────────────────────────────────────────────────────

#[tokio::test]
async fn failing_chunk_keeps_earlier_chunks() {
    let store = small_store(100, 50);
    let mut batch: Vec<_> = (0..60u64).map(|i| record(&format!("r{i}"), i)).collect();
    // The empty id violates the table's CHECK constraint.
    batch[55] = record("", 55);

    let result = store.upsert_many(batch).await;
    assert!(matches!(result, Err(StorageError::Database(_))));

    let kept = ids(&store).await;
    assert_eq!(kept.len(), 50);
    assert_eq!(kept.first().map(String::as_str), Some("r0"));
    assert_eq!(kept.last().map(String::as_str), Some("r49"));
}

#[tokio::test]
async fn eviction_runs_after_failed_chunk() {
    let store = small_store(10, 20);
    let mut batch: Vec<_> = (0..40u64).map(|i| record(&format!("r{i}"), i)).collect();
    batch[30] = record("", 30);

    assert!(store.upsert_many(batch).await.is_err());
    let kept = ids(&store).await;
    let expected: Vec<String> = (10..20).map(|i| format!("r{i}")).collect();
    assert_eq!(kept, expected);
}

#[tokio::test]
async fn out_of_range_stamp_is_rejected() {
    let store = small_store(100, 50);
    store.upsert_many(vec![record("old", 1)]).await.unwrap();

    let too_new = record("far", u64::MAX);
    let result = store.upsert_many(vec![record("ok", 2), too_new]).await;
    assert!(matches!(result, Err(StorageError::InvalidData(_))));

    assert_eq!(ids(&store).await, vec!["old".to_string()]);
}

#[tokio::test]
async fn largest_representable_stamp_sorts_last() {
    let store = store();
    let max = u64::try_from(i64::MAX).unwrap();
    store
        .upsert_many(vec![record("newest", max), record("older", 5)])
        .await
        .unwrap();

    assert_eq!(ids(&store).await, vec!["older".to_string(), "newest".to_string()]);
    let all = store.get_all().await.unwrap();
    assert_eq!(all[1].observed_at.wall_time(), max);
}

#[tokio::test]
async fn small_chunks_write_everything() {
    let store = small_store(100, 3);
    let batch: Vec<_> = (0..10u64).map(|i| record(&format!("r{i}"), i)).collect();
    let report = store.upsert_many(batch).await.unwrap();
    assert_eq!(report.written, 10);
    assert_eq!(store.count().await.unwrap(), 10);
}

// ── Concurrency ─────────────────────────────────────────────────

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn readers_never_see_partial_batches() {
    let store = std::sync::Arc::new(small_store(1_000, 10));
    let writer = {
        let store = store.clone();
        tokio::spawn(async move {
            for round in 0..5u64 {
                let batch: Vec<_> = (0..100u64)
                    .map(|i| record(&format!("r{round}_{i}"), round * 100 + i))
                    .collect();
                store.upsert_many(batch).await.unwrap();
            }
        })
    };
    while !writer.is_finished() {
        let count = store.count().await.unwrap();
        assert_eq!(count % 100, 0, "observed partial batch of {count}");
        tokio::task::yield_now().await;
    }
    writer.await.unwrap();
    assert_eq!(store.count().await.unwrap(), 500);
}

// ── Properties ──────────────────────────────────────────────────

mod properties {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn run<F: std::future::Future>(f: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(f)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn retains_the_most_recent_capacity_records(
            batches in prop::collection::vec(prop::collection::vec(0u8..25, 0..12), 1..12)
        ) {
            let capacity = 8;
            let store = small_store(capacity, 4);
            // id -> (stamp, batch position) of its latest write
            let mut model: HashMap<String, (u64, usize)> = HashMap::new();

            for (stamp, ids_in_batch) in batches.iter().enumerate() {
                let stamp = stamp as u64 + 1;
                let batch: Vec<_> = ids_in_batch
                    .iter()
                    .map(|id| record(&format!("e{id}"), stamp))
                    .collect();
                for (pos, r) in batch.iter().enumerate() {
                    model.insert(r.id.to_string(), (stamp, pos));
                }

                run(store.upsert_many(batch)).unwrap();

                let mut ranked: Vec<_> = model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                ranked.sort_by(|a, b| b.1.0.cmp(&a.1.0).then(a.1.1.cmp(&b.1.1)));
                ranked.truncate(capacity);
                model = ranked.iter().cloned().collect();

                let expected: HashSet<String> = ranked.into_iter().map(|(k, _)| k).collect();
                let actual: HashSet<String> = run(ids(&store)).into_iter().collect();
                prop_assert!(actual.len() <= capacity);
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
