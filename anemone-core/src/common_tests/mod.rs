//! Shared test bodies.
//!
//! The map is generic over its reclamation guard, and every guard must pass
//! the same battery. The bodies live here, in the library, so that each
//! guard crate's integration tests can run them against its own guard type.


use std::hash::{BuildHasher, Hasher};

/// `BuildHasher` that hashes a `usize` key to itself. Deterministic bucket
/// placement for scenario tests.
#[derive(Clone, Copy, Default)]
pub struct IdentityState;

pub struct IdentityHasher(u64);

impl Hasher for IdentityHasher {
    fn finish(&self) -> u64 {
        self.0
    }

    fn write(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 = (self.0 << 8) | u64::from(b);
        }
    }

    fn write_usize(&mut self, i: usize) {
        self.0 = i as u64;
    }

    fn write_u64(&mut self, i: u64) {
        self.0 = i;
    }
}

impl BuildHasher for IdentityState {
    type Hasher = IdentityHasher;

    fn build_hasher(&self) -> IdentityHasher {
        IdentityHasher(0)
    }
}
