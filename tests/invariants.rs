//! Property tests for the snapshot invariants.

mod common;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use common::*;
use pgcache::{
    CachePolicy, FromRow, PgCacheConfig, PostgresCache, UpdateHandler, UpdateKind,
    UpdateStatsScope,
};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build test runtime")
}

async fn drive<P>(cache: &PostgresCache<P, MockShard>, kind: UpdateKind) -> UpdateStatsScope
where
    P: CachePolicy,
    P::Raw: FromRow<TestRow>,
{
    let mut stats = UpdateStatsScope::new();
    cache
        .update(kind, Utc::now(), Utc::now(), &mut stats)
        .await
        .expect("mock update should not fail");
    stats
}

fn entry_strategy() -> impl Strategy<Value = (i64, String)> {
    (0i64..16, "[a-z]{1,6}")
}

fn entries_strategy() -> impl Strategy<Value = Vec<(i64, String)>> {
    prop::collection::vec(entry_strategy(), 0..12)
}

fn to_rows(entries: &[(i64, String)]) -> Vec<TestRow> {
    entries.iter().map(|(id, name)| row(*id, name)).collect()
}

fn to_model(entries: &[(i64, String)]) -> HashMap<i64, String> {
    let mut model = HashMap::new();
    for (id, name) in entries {
        model.insert(*id, name.clone());
    }
    model
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Starting from snapshot S, an incremental update yielding rows R
    /// produces exactly `upsert(S, R)`.
    #[test]
    fn prop_incremental_update_is_upsert(
        base in entries_strategy(),
        delta in entries_strategy(),
    ) {
        runtime().block_on(async {
            let provider = MockProvider::new(1);
            let shard = provider.shard(0);
            shard.push_rows(to_rows(&base));
            shard.push_rows(to_rows(&delta));

            let cache = PostgresCache::<EmployeePolicy, _>::new(
                PgCacheConfig::new("pg-main"),
                &provider,
            )
            .unwrap();
            drive(&cache, UpdateKind::Full).await;
            drive(&cache, UpdateKind::Incremental).await;

            let mut model = to_model(&base);
            model.extend(to_model(&delta));

            let snapshot = cache.snapshot().unwrap();
            prop_assert_eq!(snapshot.len(), model.len());
            for (id, name) in &model {
                prop_assert_eq!(&snapshot.get(id).unwrap().name, name);
            }
            Ok(())
        })?;
    }

    /// A full update's key set is exactly the key set of its result rows.
    #[test]
    fn prop_full_update_resets_key_set(
        first in entries_strategy(),
        second in entries_strategy(),
    ) {
        runtime().block_on(async {
            let provider = MockProvider::new(1);
            let shard = provider.shard(0);
            shard.push_rows(to_rows(&first));
            shard.push_rows(to_rows(&second));

            let cache = PostgresCache::<RosterPolicy, _>::new(
                PgCacheConfig::new("pg-main"),
                &provider,
            )
            .unwrap();
            drive(&cache, UpdateKind::Full).await;
            drive(&cache, UpdateKind::Full).await;

            let model = to_model(&second);
            let snapshot = cache.snapshot().unwrap();
            prop_assert_eq!(snapshot.len(), model.len());
            for id in model.keys() {
                prop_assert!(snapshot.contains_key(id));
            }
            Ok(())
        })?;
    }

    /// Two back-to-back updates over the same result set produce equal
    /// snapshots.
    #[test]
    fn prop_updates_are_idempotent(entries in entries_strategy()) {
        runtime().block_on(async {
            let provider = MockProvider::new(1);
            let shard = provider.shard(0);
            shard.push_rows(to_rows(&entries));
            shard.push_rows(to_rows(&entries));

            let cache = PostgresCache::<RosterPolicy, _>::new(
                PgCacheConfig::new("pg-main"),
                &provider,
            )
            .unwrap();
            drive(&cache, UpdateKind::Full).await;
            let first = cache.snapshot().unwrap();
            drive(&cache, UpdateKind::Full).await;
            let second = cache.snapshot().unwrap();

            prop_assert_eq!(&*first, &*second);
            Ok(())
        })?;
    }

    /// An incremental update returning no rows leaves the published
    /// snapshot untouched, same reference included.
    #[test]
    fn prop_empty_delta_retains_snapshot(base in entries_strategy()) {
        runtime().block_on(async {
            let provider = MockProvider::new(1);
            let shard = provider.shard(0);
            shard.push_rows(to_rows(&base));
            shard.push_rows(Vec::new());

            let cache = PostgresCache::<EmployeePolicy, _>::new(
                PgCacheConfig::new("pg-main"),
                &provider,
            )
            .unwrap();
            drive(&cache, UpdateKind::Full).await;
            let before = cache.snapshot().unwrap();
            drive(&cache, UpdateKind::Incremental).await;
            let after = cache.snapshot().unwrap();

            prop_assert!(Arc::ptr_eq(&before, &after));
            Ok(())
        })?;
    }

    /// A decoding failure on row i skips only that row and counts exactly
    /// one parse failure.
    #[test]
    fn prop_parse_failure_is_isolated(row_count in 1usize..10, poisoned in 0usize..10) {
        let poisoned = poisoned % row_count;
        runtime().block_on(async {
            let rows: Vec<TestRow> = (0..row_count)
                .map(|i| {
                    if i == poisoned {
                        poisoned_row(i as i64)
                    } else {
                        row(i as i64, "x")
                    }
                })
                .collect();

            let provider = MockProvider::new(1);
            provider.shard(0).push_rows(rows);

            let cache = PostgresCache::<RosterPolicy, _>::new(
                PgCacheConfig::new("pg-main"),
                &provider,
            )
            .unwrap();
            let stats = drive(&cache, UpdateKind::Full).await;

            let snapshot = cache.snapshot().unwrap();
            prop_assert_eq!(snapshot.len(), row_count - 1);
            prop_assert!(!snapshot.contains_key(&(poisoned as i64)));
            prop_assert_eq!(stats.parse_failures(), 1);
            prop_assert_eq!(stats.documents_read(), row_count as u64);
            Ok(())
        })?;
    }
}
