//! Property-Based Tests for the LRU Cache
//!
//! # Test Properties
//!
//! 1. **Byte Accounting**: tracked bytes equal Σ(key + value) and stay within budget
//! 2. **Structure**: the recency list and the key index always agree
//! 3. **Recency**: a key read just before each insert is never the one evicted

#![cfg(test)]

use proptest::prelude::*;

use super::lru::LruCache;

#[derive(Debug, Clone)]
enum Op {
    Add(String, Vec<u8>),
    Get(String),
    Remove(String),
    RemoveOldest,
}

/// Small key space so operations collide often.
fn key_strategy() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["a", "b", "c", "d", "e", "f", "gg", "hhh", "iiii", "jjjjj"])
        .prop_map(str::to_string)
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (key_strategy(), prop::collection::vec(any::<u8>(), 0..48))
            .prop_map(|(k, v)| Op::Add(k, v)),
        3 => key_strategy().prop_map(Op::Get),
        1 => key_strategy().prop_map(Op::Remove),
        1 => Just(Op::RemoveOldest),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Property: after every operation the byte total matches the entries and the budget holds.
    #[test]
    fn prop_byte_accounting(
        budget in prop_oneof![Just(0u64), 1u64..256],
        ops in prop::collection::vec(op_strategy(), 1..200),
    ) {
        let mut cache = LruCache::new(budget);

        for op in ops {
            match op {
                Op::Add(k, v) => cache.add(k, v),
                Op::Get(k) => {
                    cache.get(&k);
                }
                Op::Remove(k) => {
                    cache.remove(&k);
                }
                Op::RemoveOldest => {
                    cache.remove_oldest();
                }
            }
            cache.assert_consistent();
            if budget > 0 {
                prop_assert!(cache.bytes() <= budget);
            }
        }
    }

    /// Property: touching a key right before inserting another never evicts it
    /// while the two entries together fit the budget.
    #[test]
    fn prop_recently_read_key_survives(
        inserts in prop::collection::vec((key_strategy(), prop::collection::vec(any::<u8>(), 0..8)), 1..100),
    ) {
        // "hot" + 8 bytes plus the largest possible insert fits comfortably.
        let mut cache = LruCache::new(64);
        cache.add("hot", vec![0u8; 8]);

        for (k, v) in inserts {
            prop_assert!(cache.get("hot").is_some());
            cache.add(k, v);
            prop_assert!(cache.contains("hot"));
        }
    }
}
