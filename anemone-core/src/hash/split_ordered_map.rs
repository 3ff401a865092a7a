use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::sync::atomic::{AtomicPtr, AtomicUsize, Ordering};

use crossbeam_utils::Backoff;

use crate::guard::Guard;
use crate::hash::bucket_trie::{capacity_of, CellArray, CellState};
use crate::hash::split_entry::SplitEntry;
use crate::internal::ordered_collection::{CollectionNode, NodePosition, OrderedCollection};
use crate::sorted::{HarrisList, ListNode, ListPosition};

const DEFAULT_LOAD: usize = 4;
const DEFAULT_BRANCH: usize = 16;
const INITIAL_SIZE: usize = 2;

type MapNode<V> = ListNode<SplitEntry<V>>;

/// Lock-free hash map for machine-word keys, built on split-ordered lists
/// (Shalev & Shavit, "Split-Ordered Lists: Lock-Free Extensible Hash
/// Tables").
///
/// All entries live in one sorted linked list, ordered by the bit-reversed
/// hash. A bucket is a segment of that list starting at a payload-less
/// *anchor* node. Because of the reverse-bit order, doubling the bucket
/// count never moves an entry: bucket `b` splits into `b` and `b + size`
/// purely by inserting the new anchor between the two halves of the old
/// segment.
///
/// Buckets are addressed through a lazy `branch`-ary directory tree of
/// atomic cells. A vacant leaf cell is filled on first use: the parent
/// bucket's anchor (the index with its top bit cleared) is resolved first,
/// the new anchor is inserted into the list starting from it, and the cell
/// is CASed to the anchor's address. Interior levels materialize the same
/// way with child arrays.
///
/// Growth is cooperative. When the load factor trips, the logical modulus
/// doubles for free while the directory still has room; when it does not,
/// a growth target is published in `resize` and every thread that sees it
/// helps commit the same three idempotent steps: swap in a new root that
/// adopts the old tree at slot 0, raise `access_size`, clear the request.
/// Anchors keep their directory position across growth, so readers racing a
/// resize see the same anchors throughout.
///
/// `content` is a plain fetch-add counter, deliberately decoupled from the
/// list's linearization: it only drives the resize heuristic and `len()`.
pub struct SplitOrderedMap<V, G: Guard, S = RandomState> {
    /// The single sorted list holding anchors and items.
    store: HarrisList<SplitEntry<V>, G>,
    /// Root of the bucket directory tree.
    access: AtomicPtr<CellArray<MapNode<V>>>,
    /// Logical modulus: number of buckets currently in use. Power of two,
    /// `<= access_size`, never decreases.
    size: AtomicUsize,
    /// Approximate live-item count.
    content: AtomicUsize,
    /// Bucket capacity of the directory, `branch^depth`. Never decreases.
    access_size: AtomicUsize,
    /// Pending growth target for `access_size`; 0 when none.
    resize: AtomicUsize,
    /// Directory fan-out. Fixed at construction, power of two.
    branch: usize,
    /// Resize threshold: average items per bucket.
    load: usize,
    hasher: S,
}

impl<V, G> SplitOrderedMap<V, G, RandomState>
where
    V: Clone,
    G: Guard,
{
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<V, G> Default for SplitOrderedMap<V, G, RandomState>
where
    V: Clone,
    G: Guard,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V, G, S> SplitOrderedMap<V, G, S>
where
    V: Clone,
    G: Guard,
    S: BuildHasher,
{
    pub fn with_hasher(hasher: S) -> Self {
        Self::with_config(hasher, DEFAULT_LOAD, DEFAULT_BRANCH)
    }

    /// Full-control constructor. `load` is the average bucket depth that
    /// triggers growth; `branch` is the directory fan-out.
    ///
    /// # Panics
    ///
    /// If `load < 1` or `branch` is not a power of two `>= 2`.
    pub fn with_config(hasher: S, load: usize, branch: usize) -> Self {
        assert!(load >= 1, "load factor must be at least 1");
        assert!(
            branch >= 2 && branch.is_power_of_two(),
            "directory fan-out must be a power of two >= 2"
        );

        let store: HarrisList<SplitEntry<V>, G> = HarrisList::new();

        // Anchors for the two initial buckets; inserting into a fresh
        // private list cannot fail.
        let anchor_0 = store
            .insert_from_internal(SplitEntry::bucket(0), None)
            .expect("fresh list rejected anchor 0");
        let anchor_1 = store
            .insert_from_internal(SplitEntry::bucket(1), Some(&anchor_0))
            .expect("fresh list rejected anchor 1");

        let root = CellArray::alloc(branch);
        unsafe {
            (*root).cell(0).try_resolve(anchor_0.node_ptr());
            (*root).cell(1).try_resolve(anchor_1.node_ptr());
        }

        SplitOrderedMap {
            store,
            access: AtomicPtr::new(root),
            size: AtomicUsize::new(INITIAL_SIZE),
            content: AtomicUsize::new(0),
            access_size: AtomicUsize::new(branch),
            resize: AtomicUsize::new(0),
            branch,
            load,
            hasher,
        }
    }

    fn hash_key(&self, key: usize) -> usize {
        self.hasher.hash_one(key) as usize
    }

    /// Bucket index of `hash` under the modulus read once here.
    fn bucket_index(&self, hash: usize) -> usize {
        hash % self.size.load(Ordering::Acquire)
    }

    /// Parent of bucket `index`: the index with its highest set bit cleared.
    /// Bucket 5 (101) descends from 1 (001), bucket 6 (110) from 2 (010).
    fn parent_bucket(index: usize) -> usize {
        let highest_bit = 1usize << (usize::BITS - 1 - index.leading_zeros());
        index & !highest_bit
    }

    /// Resolve the anchor node for bucket `hk`, materializing directory
    /// levels and the anchor itself on first use.
    ///
    /// The capacity is derived from the root actually loaded (slot-0 depth
    /// probe), not from `access_size`: the resize steps commit in any order,
    /// so the counter and the root pointer can be observed mid-transition.
    /// If `hk` is not yet addressable in the loaded root, its ancestor under
    /// the root's capacity is resolved instead; the ancestor's segment
    /// contains the bucket's segment, so searches from it stay correct.
    fn bucket_head(&self, hk: usize) -> *mut MapNode<V> {
        let root = self.access.load(Ordering::Acquire);
        let capacity = unsafe { capacity_of(root, self.branch) };

        let full = hk % capacity;
        let mut array = root;
        let mut level_cap = capacity / self.branch;
        let mut index = full;

        loop {
            let slot = index / level_cap;
            let rest = index % level_cap;
            let cell = unsafe { (*array).cell(slot) };

            match cell.load() {
                CellState::Resolved(node) => return node,
                CellState::Interior(child) => {
                    array = child;
                    index = rest;
                    level_cap /= self.branch;
                }
                CellState::Vacant => {
                    if level_cap > 1 {
                        let fresh = CellArray::alloc(self.branch);
                        if !cell.try_install_interior(fresh) {
                            // Another thread allocated this level first.
                            unsafe { CellArray::release(fresh) };
                        }
                        // Re-read the cell; the winner's array is used.
                    } else {
                        let anchor = self.create_anchor(full);
                        // A lost CAS means an equivalent handle to the same
                        // list node was installed; ours is still valid.
                        let _ = cell.try_resolve(anchor);
                        return anchor;
                    }
                }
            }
        }
    }

    /// Insert the anchor for bucket `index` into the list, after its
    /// parent's anchor, and return its node.
    fn create_anchor(&self, index: usize) -> *mut MapNode<V> {
        debug_assert!(index > 1, "buckets 0 and 1 are resolved at construction");

        let parent = Self::parent_bucket(index);
        let parent_node = self.bucket_head(parent);
        let hint = ListPosition::from_node(parent_node);

        match self
            .store
            .insert_from_internal(SplitEntry::bucket(index), Some(&hint))
        {
            Some(pos) => pos.node_ptr(),
            None => {
                // Lost to a concurrent initializer; the anchor is in the
                // list and, being an anchor, will never leave it.
                let probe = SplitEntry::bucket(index);
                match self.store.find_from_internal(Some(&hint), &probe, true) {
                    Some(pos) => pos.node_ptr(),
                    None => panic!("bucket anchor {index} vanished from the list"),
                }
            }
        }
    }

    /// Grow if the average bucket depth exceeds the configured load.
    ///
    /// Doubling the modulus is the fast path while the directory still has
    /// room. Otherwise a growth target is published and helped to
    /// completion, then the load check runs again.
    fn check_size(&self) {
        loop {
            let size = self.size.load(Ordering::Acquire);
            let content = self.content.load(Ordering::Acquire);

            // The counter can transiently wrap below zero when a remove's
            // decrement lands before the paired insert's increment; a wrapped
            // reading must not drive growth.
            if (content as isize) <= 0 || content / size <= self.load {
                return;
            }

            let access_size = self.access_size.load(Ordering::Acquire);
            let doubled = size
                .checked_mul(2)
                .unwrap_or_else(|| panic!("bucket count overflow at {size}"));

            if doubled <= access_size {
                let _ = self.size.compare_exchange(
                    size,
                    doubled,
                    Ordering::Release,
                    Ordering::Relaxed,
                );
                continue;
            }

            // Directory is full: request one more level. Win or lose, help
            // whatever growth is in flight, then re-check.
            let target = access_size
                .checked_mul(self.branch)
                .unwrap_or_else(|| panic!("directory capacity overflow at {access_size}"));
            let _ = self
                .resize
                .compare_exchange(0, target, Ordering::Release, Ordering::Relaxed);

            self.help_resize(self.access.load(Ordering::Acquire), access_size);
        }
    }

    /// Commit a directory growth from `old_access_size` to
    /// `old_access_size * branch`.
    ///
    /// Three idempotent steps, each guarded by "already past target" so any
    /// number of helpers converge without duplicate effect, in any order:
    /// swap the root, raise `access_size`, clear the request word.
    fn help_resize(&self, old_access: *mut CellArray<MapNode<V>>, old_access_size: usize) {
        let target = old_access_size
            .checked_mul(self.branch)
            .unwrap_or_else(|| panic!("directory capacity overflow at {old_access_size}"));

        // Every helper builds a candidate root adopting the current tree at
        // slot 0; existing anchors keep their directory position.
        let new_root = CellArray::alloc(self.branch);
        unsafe { (*new_root).cell(0).set_interior(old_access) };
        let mut adopted = false;

        let backoff = Backoff::new();
        loop {
            let deep_enough =
                unsafe { capacity_of(self.access.load(Ordering::Acquire), self.branch) } >= target;
            let counted = self.access_size.load(Ordering::Acquire) >= target;
            let cleared = self.resize.load(Ordering::Acquire) != target;

            if deep_enough && counted && cleared {
                break;
            }

            let mut progressed = false;

            if !deep_enough
                && self
                    .access
                    .compare_exchange(old_access, new_root, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
            {
                adopted = true;
                progressed = true;
            }

            if !counted
                && self
                    .access_size
                    .compare_exchange(old_access_size, target, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
            {
                progressed = true;
            }

            if !cleared
                && self
                    .resize
                    .compare_exchange(target, 0, Ordering::Release, Ordering::Relaxed)
                    .is_ok()
            {
                progressed = true;
            }

            if !progressed {
                backoff.snooze();
            }
        }

        if !adopted {
            // Never published; detach the shared subtree before freeing.
            unsafe {
                (*new_root).cell(0).reset();
                CellArray::release(new_root);
            }
        }
    }

    // =========================================================================
    // Public operations
    // =========================================================================

    /// Look up `key` and return a clone of its value.
    pub fn get(&self, key: usize) -> Option<V> {
        let _guard = G::pin();
        self.check_size();

        let hash = self.hash_key(key);
        let anchor = ListPosition::from_node(self.bucket_head(self.bucket_index(hash)));
        let probe = SplitEntry::probe(hash, key);

        let pos = self.store.find_from_internal(Some(&anchor), &probe, true)?;
        self.store
            .apply_on_internal(pos.node_ptr(), |entry| match entry {
                SplitEntry::Item { value: Some(v), .. } => Some(v.clone()),
                _ => None,
            })
            .flatten()
    }

    /// Membership test.
    pub fn contains(&self, key: usize) -> bool {
        let _guard = G::pin();
        self.check_size();

        let hash = self.hash_key(key);
        let anchor = ListPosition::from_node(self.bucket_head(self.bucket_index(hash)));
        let probe = SplitEntry::probe(hash, key);

        self.store
            .find_from_internal(Some(&anchor), &probe, true)
            .is_some()
    }

    /// Insert `key -> value`. Returns `false` and leaves the existing value
    /// untouched when the key is already present.
    pub fn insert(&self, key: usize, value: V) -> bool {
        let _guard = G::pin();
        self.check_size();

        let hash = self.hash_key(key);
        let anchor = ListPosition::from_node(self.bucket_head(self.bucket_index(hash)));
        let entry = SplitEntry::item(hash, key, value);

        if self.store.insert_from_internal(entry, Some(&anchor)).is_some() {
            self.content.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Remove `key`, returning its value. Absent keys are a no-op.
    pub fn remove(&self, key: usize) -> Option<V> {
        let _guard = G::pin();
        self.check_size();

        let hash = self.hash_key(key);
        let anchor = ListPosition::from_node(self.bucket_head(self.bucket_index(hash)));
        let probe = SplitEntry::probe(hash, key);

        let pos = self.store.remove_from_internal(Some(&anchor), &probe)?;
        self.content.fetch_sub(1, Ordering::Relaxed);

        let node = pos.node_ptr();
        let value = self
            .store
            .apply_on_internal(node, |entry| match entry {
                SplitEntry::Item { value, .. } => value.clone(),
                SplitEntry::Bucket { .. } => None,
            })
            .flatten();

        unsafe {
            self.store
                .guard()
                .defer_destroy(node, <MapNode<V> as CollectionNode<SplitEntry<V>>>::dealloc_ptr);
        }

        value
    }

    /// Approximate number of live entries.
    pub fn len(&self) -> usize {
        self.content.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Best-effort traversal of all live values. Not an atomic snapshot:
    /// entries inserted or removed during the walk may or may not appear.
    pub fn values(&self) -> Vec<V> {
        let _guard = G::pin();
        let mut out = Vec::new();
        let mut current = self.store.first_node_internal();
        while let Some(node) = current {
            self.store.apply_on_internal(node, |entry| {
                if let SplitEntry::Item { value: Some(v), .. } = entry {
                    out.push(v.clone());
                }
            });
            current = self.store.next_node_internal(node);
        }
        out
    }

    /// Best-effort traversal of all live `(key, value)` pairs.
    pub fn entries(&self) -> Vec<(usize, V)> {
        let _guard = G::pin();
        let mut out = Vec::new();
        let mut current = self.store.first_node_internal();
        while let Some(node) = current {
            self.store.apply_on_internal(node, |entry| {
                if let SplitEntry::Item {
                    key,
                    value: Some(v),
                    ..
                } = entry
                {
                    out.push((*key, v.clone()));
                }
            });
            current = self.store.next_node_internal(node);
        }
        out
    }

    /// Debug render of the physical list: bucket anchors as `|b<i>|`,
    /// items as `key=value` through `render`. Cold path only.
    pub fn render_with<F>(&self, render: F) -> String
    where
        F: Fn(&V) -> String,
    {
        let _guard = G::pin();
        let mut out = String::new();
        let mut current = self.store.first_node_internal();
        while let Some(node) = current {
            self.store.apply_on_internal(node, |entry| match entry {
                SplitEntry::Bucket { index, .. } => {
                    out.push_str(&format!("|b{index}| "));
                }
                SplitEntry::Item {
                    key,
                    value: Some(v),
                    ..
                } => {
                    out.push_str(&format!("{key}={} ", render(v)));
                }
                SplitEntry::Item { value: None, .. } => {}
            });
            current = self.store.next_node_internal(node);
        }
        out.trim_end().to_string()
    }
}

impl<V, G: Guard, S> Drop for SplitOrderedMap<V, G, S> {
    fn drop(&mut self) {
        // Directory arrays are arena-owned by the map; old roots stay
        // reachable at slot 0 of their successor, so one walk frees them
        // all. List nodes are freed by the list's own Drop.
        unsafe {
            CellArray::release(self.access.load(Ordering::Relaxed));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common_tests::IdentityState;
    use crate::guard::DeferredGuard;

    type Map<V> = SplitOrderedMap<V, DeferredGuard>;
    type IdentityMap<V> = SplitOrderedMap<V, DeferredGuard, IdentityState>;

    fn identity_map<V: Clone>(load: usize, branch: usize) -> IdentityMap<V> {
        SplitOrderedMap::with_config(IdentityState, load, branch)
    }

    #[test]
    fn empty_map_has_nothing() {
        let map: Map<&str> = SplitOrderedMap::new();

        for k in [0usize, 1, 7, 1000] {
            assert!(!map.contains(k));
            assert_eq!(map.get(k), None);
        }
        assert!(map.is_empty());
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn insert_then_lookup() {
        let map: IdentityMap<&str> = identity_map(2, 4);

        assert!(map.insert(1, "a"));
        assert!(map.insert(2, "b"));

        assert_eq!(map.get(1), Some("a"));
        assert_eq!(map.get(2), Some("b"));
        assert_eq!(map.get(3), None);
        assert!(map.contains(1));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn remove_is_idempotent() {
        let map: IdentityMap<&str> = identity_map(2, 4);

        assert!(map.insert(5, "x"));
        assert!(map.insert(9, "y"));

        assert_eq!(map.remove(5), Some("x"));
        assert_eq!(map.remove(5), None);
        assert_eq!(map.get(5), None);
        assert_eq!(map.get(9), Some("y"));

        // Removing an absent key is a no-op.
        assert_eq!(map.remove(1234), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn insert_does_not_overwrite() {
        let map: Map<&str> = SplitOrderedMap::new();

        assert!(map.insert(7, "old"));
        assert!(!map.insert(7, "new"));
        assert_eq!(map.get(7), Some("old"));
        assert_eq!(map.len(), 1);

        // Remove-then-insert is the replacement idiom.
        assert_eq!(map.remove(7), Some("old"));
        assert!(map.insert(7, "new"));
        assert_eq!(map.get(7), Some("new"));
    }

    #[test]
    fn growth_keeps_every_key() {
        let map: IdentityMap<usize> = identity_map(2, 4);

        for k in 0..20 {
            assert!(map.insert(k, k));
        }

        // 20 items over load 2 must have grown past the initial 2 buckets.
        assert!(map.size.load(Ordering::Relaxed) >= 8);
        // Average bucket depth settles at or under load + 1.
        let size = map.size.load(Ordering::Relaxed);
        assert!(map.len() / size <= 2 + 1);

        for k in 0..20 {
            assert_eq!(map.get(k), Some(k), "key {k} lost across growth");
        }
    }

    #[test]
    fn growth_raises_directory_and_clears_request() {
        let map: IdentityMap<usize> = identity_map(1, 4);

        // Push well past branch^1 buckets so the directory must deepen.
        for k in 0..64 {
            map.insert(k, k);
        }

        assert!(map.access_size.load(Ordering::Relaxed) >= 16);
        assert_eq!(map.resize.load(Ordering::Relaxed), 0);
        assert!(
            map.size.load(Ordering::Relaxed) <= map.access_size.load(Ordering::Relaxed),
            "modulus must never outrun the directory"
        );

        for k in 0..64 {
            assert_eq!(map.get(k), Some(k));
        }
    }

    #[test]
    fn colliding_buckets_do_not_crosstalk() {
        let map: IdentityMap<&str> = identity_map(2, 4);

        // size starts at 2: keys 3 and 5 share bucket 1, 4 shares bucket 0
        // with 0.
        map.insert(3, "three");
        map.insert(5, "five");
        map.insert(4, "four");
        map.insert(0, "zero");

        assert_eq!(map.get(3), Some("three"));
        assert_eq!(map.get(5), Some("five"));
        assert_eq!(map.get(4), Some("four"));
        assert_eq!(map.get(0), Some("zero"));
    }

    #[test]
    fn values_is_the_live_multiset() {
        let map: IdentityMap<usize> = identity_map(2, 4);

        for k in 0..10 {
            map.insert(k, k * 10);
        }
        map.remove(3);
        map.remove(7);

        let mut values = map.values();
        values.sort_unstable();
        let expected: Vec<usize> = (0..10)
            .filter(|k| *k != 3 && *k != 7)
            .map(|k| k * 10)
            .collect();
        assert_eq!(values, expected);

        let mut entries = map.entries();
        entries.sort_unstable();
        assert_eq!(entries.len(), 8);
        assert!(entries.iter().all(|(k, v)| *v == k * 10));
    }

    #[test]
    fn render_shows_anchors_and_items() {
        let map: IdentityMap<usize> = identity_map(2, 4);
        map.insert(2, 20);

        let rendered = map.render_with(|v| v.to_string());
        assert!(rendered.contains("|b0|"));
        assert!(rendered.contains("|b1|"));
        assert!(rendered.contains("2=20"));
    }

    #[test]
    #[should_panic(expected = "load factor")]
    fn zero_load_is_rejected() {
        let _ = identity_map::<usize>(0, 4);
    }

    #[test]
    #[should_panic(expected = "fan-out")]
    fn non_power_of_two_branch_is_rejected() {
        let _ = identity_map::<usize>(2, 6);
    }
}
