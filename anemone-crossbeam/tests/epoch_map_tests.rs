//! Common map bodies under epoch-based reclamation.
//!
//! The epoch collector is process-global, so the heavier bodies run
//! serialized to keep their timing honest.

use rstest::rstest;
use serial_test::serial;

use anemone_core::common_tests::map_stress_tests::*;
use anemone_core::common_tests::IdentityState;
use anemone_core::SplitOrderedMap;
use anemone_crossbeam::EpochGuard;

#[test]
fn epoch_map_basic_operations() {
    let map: SplitOrderedMap<String, EpochGuard> = SplitOrderedMap::new();

    assert!(map.insert(5, "five".to_string()));
    assert!(map.insert(3, "three".to_string()));
    assert!(!map.insert(5, "FIVE".to_string()));

    assert_eq!(map.get(5).as_deref(), Some("five"));
    assert_eq!(map.get(3).as_deref(), Some("three"));
    assert_eq!(map.get(10), None);

    assert_eq!(map.remove(3).as_deref(), Some("three"));
    assert_eq!(map.remove(3), None);
    assert_eq!(map.len(), 1);
}

#[rstest]
#[case::small_fanout(2, 4)]
#[case::default_fanout(4, 16)]
#[serial]
fn epoch_map_growth_preserves_keys(#[case] load: usize, #[case] branch: usize) {
    let map: SplitOrderedMap<usize, EpochGuard, IdentityState> =
        SplitOrderedMap::with_config(IdentityState, load, branch);

    for k in 0..3000 {
        assert!(map.insert(k, k + 1));
    }

    for k in 0..3000 {
        assert_eq!(map.get(k), Some(k + 1));
    }
    assert_eq!(map.len(), 3000);
}

#[test]
#[serial]
fn stress_concurrent_distinct_inserts() {
    test_concurrent_distinct_inserts::<EpochGuard>();
}

#[test]
#[serial]
fn stress_reader_sees_value_or_nothing() {
    test_reader_sees_value_or_nothing::<EpochGuard>();
}

#[test]
#[serial]
fn stress_thundering_herd() {
    test_thundering_herd::<EpochGuard>();
}

#[test]
#[serial]
fn stress_memory_ordering() {
    test_memory_ordering::<EpochGuard>();
}

#[test]
#[serial]
fn stress_concurrent_remove_same_key_once() {
    test_concurrent_remove_same_key_once::<EpochGuard>();
}

#[test]
#[serial]
fn stress_growth_under_concurrent_inserts() {
    test_growth_under_concurrent_inserts::<EpochGuard>();
}
