use std::cmp::Ordering;

// Split-order key encoding, after Shalev & Shavit.
//
// The order key is the hash with its bits reversed, so that for any
// power-of-two modulus m, all hashes with the same `hash % m` are contiguous
// in increasing key order: `hash % m` is the low m-bits of the hash, i.e. the
// HIGH bits of the reversed word, i.e. the most significant comparison
// digits. Doubling the modulus splits each such range in two without moving
// anything.
//
// Bit 0 of the order key is the node kind. A bucket index is always below
// 2^63, so its reversed form has bit 0 clear; items set it. A bucket anchor
// therefore sorts strictly before every item of its bucket and never
// compares equal to one.
//
//   bucket anchor:  index.reverse_bits() & !1      (even)
//   item:           hash.reverse_bits() | 1        (odd)

/// An element of the single sorted list backing the map: either a bucket
/// anchor or a key-value item.
#[derive(Clone, Debug)]
pub enum SplitEntry<V> {
    /// Anchor marking the start of a bucket's segment. Carries no payload
    /// and is never removed once inserted.
    Bucket { order_key: usize, index: usize },
    /// A user entry. `value` is `None` only for probe entries built to
    /// search the list; stored items always carry `Some`.
    Item {
        order_key: usize,
        hash: usize,
        key: usize,
        value: Option<V>,
    },
}

impl<V> SplitEntry<V> {
    /// Anchor entry for bucket `index`.
    pub fn bucket(index: usize) -> Self {
        SplitEntry::Bucket {
            order_key: index.reverse_bits() & !1,
            index,
        }
    }

    /// Stored item for `key` hashed to `hash`.
    pub fn item(hash: usize, key: usize, value: V) -> Self {
        SplitEntry::Item {
            order_key: hash.reverse_bits() | 1,
            hash,
            key,
            value: Some(value),
        }
    }

    /// Payload-less probe that compares like the stored item for `key`.
    pub fn probe(hash: usize, key: usize) -> Self {
        SplitEntry::Item {
            order_key: hash.reverse_bits() | 1,
            hash,
            key,
            value: None,
        }
    }

    fn order_key(&self) -> usize {
        match self {
            SplitEntry::Bucket { order_key, .. } => *order_key,
            SplitEntry::Item { order_key, .. } => *order_key,
        }
    }
}

impl<V> PartialEq for SplitEntry<V> {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (
                SplitEntry::Bucket {
                    order_key: o1,
                    index: i1,
                },
                SplitEntry::Bucket {
                    order_key: o2,
                    index: i2,
                },
            ) => o1 == o2 && i1 == i2,
            (
                SplitEntry::Item {
                    order_key: o1,
                    hash: h1,
                    key: k1,
                    ..
                },
                SplitEntry::Item {
                    order_key: o2,
                    hash: h2,
                    key: k2,
                    ..
                },
            ) => o1 == o2 && h1 == h2 && k1 == k2,
            _ => false,
        }
    }
}

impl<V> Eq for SplitEntry<V> {}

impl<V> PartialOrd for SplitEntry<V> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<V> Ord for SplitEntry<V> {
    fn cmp(&self, other: &Self) -> Ordering {
        match self.order_key().cmp(&other.order_key()) {
            Ordering::Equal => match (self, other) {
                // Equal order keys with distinct kinds cannot happen (the
                // kind bit is part of the key), but the order stays total.
                (SplitEntry::Bucket { .. }, SplitEntry::Item { .. }) => Ordering::Less,
                (SplitEntry::Item { .. }, SplitEntry::Bucket { .. }) => Ordering::Greater,
                (
                    SplitEntry::Bucket { index: i1, .. },
                    SplitEntry::Bucket { index: i2, .. },
                ) => i1.cmp(i2),
                (
                    SplitEntry::Item {
                        hash: h1, key: k1, ..
                    },
                    SplitEntry::Item {
                        hash: h2, key: k2, ..
                    },
                ) => match h1.cmp(h2) {
                    Ordering::Equal => k1.cmp(k2),
                    ord => ord,
                },
            },
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Entry = SplitEntry<&'static str>;

    #[test]
    fn anchor_sorts_before_its_items() {
        for hash in [0usize, 1, 5, 9, 42, usize::MAX >> 1] {
            let anchor: Entry = SplitEntry::bucket(hash);
            let item: Entry = SplitEntry::item(hash, hash, "v");
            assert!(anchor < item, "anchor({hash}) must precede item({hash})");
            assert_ne!(anchor, item);
        }
    }

    #[test]
    fn probe_equals_stored_item() {
        let stored: Entry = SplitEntry::item(17, 17, "v");
        let probe: Entry = SplitEntry::probe(17, 17);
        assert_eq!(stored, probe);
        assert_eq!(stored.cmp(&probe), Ordering::Equal);
    }

    #[test]
    fn items_with_same_hash_tiebreak_on_key() {
        let a: Entry = SplitEntry::item(9, 1, "a");
        let b: Entry = SplitEntry::item(9, 2, "b");
        assert!(a < b);
        assert_ne!(a, b);
    }

    // Anchors for buckets 0..8 in list order follow the bit-reversed
    // sequence 0, 4, 2, 6, 1, 5, 3, 7.
    #[test]
    fn anchor_order_is_bit_reversed() {
        let sequence = [0usize, 4, 2, 6, 1, 5, 3, 7];
        let anchors: Vec<Entry> = sequence.iter().map(|&b| SplitEntry::bucket(b)).collect();

        for pair in anchors.windows(2) {
            assert!(pair[0] < pair[1], "{:?} !< {:?}", pair[0], pair[1]);
        }
    }

    // For any power-of-two modulus, items of the same residue class occupy a
    // contiguous range of the order.
    #[test]
    fn residue_classes_are_contiguous() {
        for m in [2usize, 4, 8, 16] {
            let mut items: Vec<Entry> =
                (0..64).map(|k| SplitEntry::item(k, k, "v")).collect();
            items.sort();

            let residues: Vec<usize> = items
                .iter()
                .map(|e| match e {
                    SplitEntry::Item { hash, .. } => hash % m,
                    SplitEntry::Bucket { .. } => unreachable!(),
                })
                .collect();

            let mut seen = std::collections::HashSet::new();
            let mut last = None;
            for r in residues {
                if last != Some(r) {
                    assert!(seen.insert(r), "residue {r} (mod {m}) not contiguous");
                    last = Some(r);
                }
            }
        }
    }

    #[test]
    fn order_is_total_and_antisymmetric() {
        let entries: Vec<Entry> = (0..16)
            .map(|k| SplitEntry::item(k, k, "v"))
            .chain((0..8).map(SplitEntry::bucket))
            .collect();

        for a in &entries {
            assert_eq!(a.cmp(a), Ordering::Equal);
            for b in &entries {
                assert_eq!(a.cmp(b), b.cmp(a).reverse());
                for c in &entries {
                    if a <= b && b <= c {
                        assert!(a <= c);
                    }
                }
            }
        }
    }
}
