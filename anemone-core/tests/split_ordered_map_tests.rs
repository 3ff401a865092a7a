//! Integration tests for the split-ordered map with deferred reclamation.

use rstest::rstest;

use anemone_core::common_tests::map_stress_tests::*;
use anemone_core::common_tests::IdentityState;
use anemone_core::DeferredGuard;
use anemone_core::SplitOrderedMap;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

type DeferredMap<V> = SplitOrderedMap<V, DeferredGuard>;

// ============================================================================
// Common bodies under DeferredGuard
// ============================================================================

#[test]
fn stress_concurrent_distinct_inserts() {
    test_concurrent_distinct_inserts::<DeferredGuard>();
}

#[test]
fn stress_reader_sees_value_or_nothing() {
    test_reader_sees_value_or_nothing::<DeferredGuard>();
}

#[test]
fn stress_thundering_herd() {
    test_thundering_herd::<DeferredGuard>();
}

#[test]
fn stress_memory_ordering() {
    test_memory_ordering::<DeferredGuard>();
}

#[test]
fn stress_concurrent_remove_same_key_once() {
    test_concurrent_remove_same_key_once::<DeferredGuard>();
}

#[test]
fn stress_growth_under_concurrent_inserts() {
    test_growth_under_concurrent_inserts::<DeferredGuard>();
}

// ============================================================================
// Growth across configurations
// ============================================================================

#[rstest]
#[case::minimal_fanout(1, 2)]
#[case::small_fanout(2, 4)]
#[case::default_fanout(4, 16)]
fn growth_preserves_all_keys(#[case] load: usize, #[case] branch: usize) {
    let map: SplitOrderedMap<usize, DeferredGuard, IdentityState> =
        SplitOrderedMap::with_config(IdentityState, load, branch);

    let n = 5000;
    for k in 0..n {
        assert!(map.insert(k, k * 3));
    }

    assert_eq!(map.len(), n);
    for k in 0..n {
        assert_eq!(map.get(k), Some(k * 3), "key {k} lost (load {load}, branch {branch})");
    }

    let mut values = map.values();
    values.sort_unstable();
    assert_eq!(values.len(), n);
}

#[rstest]
#[case::adjacent(2, 4)]
#[case::wide(4, 16)]
fn interleaved_insert_remove_converges(#[case] load: usize, #[case] branch: usize) {
    let map: SplitOrderedMap<usize, DeferredGuard, IdentityState> =
        SplitOrderedMap::with_config(IdentityState, load, branch);

    for k in 0..2000 {
        map.insert(k, k);
        if k % 2 == 0 {
            map.remove(k);
        }
    }

    assert_eq!(map.len(), 1000);
    for k in 0..2000 {
        if k % 2 == 0 {
            assert_eq!(map.get(k), None);
        } else {
            assert_eq!(map.get(k), Some(k));
        }
    }
}

// ============================================================================
// Randomized chaos
// ============================================================================

#[test]
fn chaos_random_ops_stay_consistent() {
    let map: Arc<DeferredMap<usize>> = Arc::new(SplitOrderedMap::new());
    let num_threads = 8;
    let ops_per_thread = 20_000;
    let key_space = 4096;

    let inserted = Arc::new(AtomicUsize::new(0));
    let removed = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let map = Arc::clone(&map);
            let inserted = Arc::clone(&inserted);
            let removed = Arc::clone(&removed);
            thread::spawn(move || {
                for _ in 0..ops_per_thread {
                    let key = rand::random::<usize>() % key_space;
                    match rand::random::<usize>() % 3 {
                        0 => {
                            if map.insert(key, key.wrapping_mul(31)) {
                                inserted.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        1 => {
                            if let Some(v) = map.get(key) {
                                assert_eq!(v, key.wrapping_mul(31));
                            }
                        }
                        2 => {
                            if map.remove(key).is_some() {
                                removed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        _ => unreachable!(),
                    }
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let net = inserted.load(Ordering::Relaxed) - removed.load(Ordering::Relaxed);
    assert_eq!(map.len(), net);
    assert_eq!(map.entries().len(), net);

    for (key, value) in map.entries() {
        assert!(key < key_space);
        assert_eq!(value, key.wrapping_mul(31));
    }
}

#[test]
fn rapid_growth_single_thread() {
    let map: DeferredMap<usize> = SplitOrderedMap::new();
    let n = 100_000;

    for k in 0..n {
        map.insert(k, k * k);
    }

    assert_eq!(map.len(), n);
    for k in (0..n).step_by(997) {
        assert_eq!(map.get(k), Some(k * k));
    }
}
