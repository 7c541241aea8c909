//! Property-Based Tests for the Memory Store
//!
//! Uses proptest to check store invariants the coordinator relies on.

use proptest::prelude::*;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::context::Context;
use crate::error::CacheError;
use crate::store::{MemoryStore, Store};

// == Test Configuration ==
const TEST_MAX_ENTRIES: usize = 50;

// == Strategies ==
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:]{1,64}"
}

fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{1,256}"
}

#[derive(Debug, Clone)]
enum StoreOp {
    Set { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn store_op_strategy() -> impl Strategy<Value = StoreOp> {
    prop_oneof![
        (valid_key_strategy(), valid_value_strategy())
            .prop_map(|(key, value)| StoreOp::Set { key, value }),
        valid_key_strategy().prop_map(|key| StoreOp::Get { key }),
        valid_key_strategy().prop_map(|key| StoreOp::Delete { key }),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

async fn set(store: &MemoryStore, key: &str, value: &str) {
    let items = HashMap::from([(key.to_string(), value.to_string())]);
    store
        .mset_raw(&Context::background(), items, Duration::ZERO)
        .await
        .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // The store agrees with a plain HashMap model for any op sequence, and
    // del only counts keys that were actually present.
    #[test]
    fn prop_matches_hashmap_model(ops in prop::collection::vec(store_op_strategy(), 1..60)) {
        let rt = runtime();
        rt.block_on(async {
            let store = MemoryStore::new();
            let ctx = Context::background();
            let mut model: HashMap<String, String> = HashMap::new();
            let mut expected_hits = 0u64;
            let mut expected_misses = 0u64;

            for op in ops {
                match op {
                    StoreOp::Set { key, value } => {
                        set(&store, &key, &value).await;
                        model.insert(key, value);
                    }
                    StoreOp::Get { key } => {
                        let got = store.get_raw(&ctx, &key).await.unwrap();
                        match model.get(&key) {
                            Some(_) => expected_hits += 1,
                            None => expected_misses += 1,
                        }
                        prop_assert_eq!(got.as_ref(), model.get(&key));
                    }
                    StoreOp::Delete { key } => {
                        let removed = store.del(&ctx, &[key.clone()]).await.unwrap();
                        let expected = i64::from(model.remove(&key).is_some());
                        prop_assert_eq!(removed, expected);
                    }
                }
            }

            let stats = store.stats().await;
            prop_assert_eq!(stats.hits, expected_hits);
            prop_assert_eq!(stats.misses, expected_misses);
            prop_assert_eq!(stats.total_entries, model.len());
            Ok(())
        })?;
    }

    // Batch reads return exactly the present subset of the requested keys.
    #[test]
    fn prop_mget_returns_present_subset(
        stored in prop::collection::hash_map(valid_key_strategy(), valid_value_strategy(), 0..20),
        extra in prop::collection::vec(valid_key_strategy(), 0..10)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = MemoryStore::new();
            let ctx = Context::background();
            store.mset_raw(&ctx, stored.clone(), Duration::ZERO).await.unwrap();

            let requested: Vec<String> = stored.keys().cloned().chain(extra).collect();
            let found = store.mget_raw(&ctx, &requested).await.unwrap();
            prop_assert_eq!(&found, &stored);

            let flags = store.exists(&ctx, &requested).await.unwrap();
            let requested_set: HashSet<&String> = requested.iter().collect();
            prop_assert_eq!(flags.len(), requested_set.len());
            for (key, present) in flags {
                prop_assert_eq!(present, stored.contains_key(&key));
            }
            Ok(())
        })?;
    }

    // A bounded store never holds more than its capacity.
    #[test]
    fn prop_capacity_enforcement(
        entries in prop::collection::vec((valid_key_strategy(), valid_value_strategy()), 1..200)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = MemoryStore::with_capacity(TEST_MAX_ENTRIES);
            for (key, value) in entries {
                set(&store, &key, &value).await;
                prop_assert!(store.len().await <= TEST_MAX_ENTRIES);
            }
            Ok(())
        })?;
    }

    // Filling a bounded store and adding one more key evicts the key that
    // was read least recently.
    #[test]
    fn prop_lru_access_tracking(
        keys in prop::collection::hash_set(valid_key_strategy(), 3..8),
        new_key in valid_key_strategy(),
    ) {
        prop_assume!(!keys.contains(&new_key));
        let keys: Vec<String> = keys.into_iter().collect();

        let rt = runtime();
        rt.block_on(async {
            let ctx = Context::background();
            let store = MemoryStore::with_capacity(keys.len());
            for key in &keys {
                set(&store, key, "v").await;
            }

            // Reading the oldest key protects it; the second key becomes the victim
            prop_assert!(store.get_raw(&ctx, &keys[0]).await.unwrap().is_some());
            set(&store, &new_key, "v").await;

            prop_assert!(store.get_raw(&ctx, &keys[0]).await.unwrap().is_some());
            prop_assert!(store.get_raw(&ctx, &keys[1]).await.unwrap().is_none());
            prop_assert!(store.get_raw(&ctx, &new_key).await.unwrap().is_some());
            Ok(())
        })?;
    }
}

// A bounded store either keeps every key of a batch or rejects the batch untouched.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_bounded_batch_is_all_or_nothing(
        capacity in 1usize..10,
        existing in prop::collection::hash_map(valid_key_strategy(), valid_value_strategy(), 0..10),
        batch in prop::collection::hash_map(valid_key_strategy(), valid_value_strategy(), 1..15)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = MemoryStore::with_capacity(capacity);
            let ctx = Context::background();
            for (key, value) in &existing {
                set(&store, key, value).await;
            }
            let before = store.len().await;
            let keys: Vec<String> = batch.keys().cloned().collect();

            let result = store.mset_raw(&ctx, batch.clone(), Duration::ZERO).await;

            if batch.len() > capacity {
                prop_assert!(matches!(result, Err(CacheError::CacheFull(_))));
                prop_assert_eq!(store.len().await, before);
            } else {
                prop_assert!(result.is_ok());
                let found = store.mget_raw(&ctx, &keys).await.unwrap();
                prop_assert_eq!(&found, &batch);
                prop_assert!(store.len().await <= capacity);
            }
            Ok(())
        })?;
    }
}

// Separate block with few cases for time-sensitive TTL checks
proptest! {
    #![proptest_config(ProptestConfig::with_cases(5))]

    #[test]
    fn prop_ttl_expiration_behavior(
        key in valid_key_strategy(),
        value in valid_value_strategy()
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = MemoryStore::new();
            let ctx = Context::background();
            let items = HashMap::from([(key.clone(), value.clone())]);
            store.mset_raw(&ctx, items, Duration::from_millis(50)).await.unwrap();

            prop_assert_eq!(store.get_raw(&ctx, &key).await.unwrap(), Some(value));

            tokio::time::sleep(Duration::from_millis(80)).await;

            prop_assert_eq!(store.get_raw(&ctx, &key).await.unwrap(), None);
            prop_assert!(!store.exists(&ctx, &[key.clone()]).await.unwrap()[&key]);
            Ok(())
        })?;
    }
}
