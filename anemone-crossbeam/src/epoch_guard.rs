//! `Guard` implementation backed by `crossbeam-epoch`.

use crossbeam_epoch::{self as epoch, Guard as CrossbeamGuard};

use anemone_core::guard::Guard;

/// Epoch-based reclamation guard.
///
/// Zero-sized: all state lives in the global epoch collector. Removed nodes
/// are deferred at the epoch current when `defer_destroy` runs and freed
/// once every thread has moved past it, so collections stay `Send + Sync`
/// without storing any reclamation state of their own.
///
/// The collections uphold the one property epoch reclamation needs from
/// them: a node is deferred only after its physical unlink, so no new
/// traversal can reach it by the time the deferral is queued.
#[derive(Clone, Copy, Default)]
pub struct EpochGuard;

impl EpochGuard {
    pub fn new() -> Self {
        EpochGuard
    }
}

impl Guard for EpochGuard {
    /// A pinned crossbeam epoch; node reads stay valid while it is held.
    type ReadGuard = CrossbeamGuard;

    fn pin() -> Self::ReadGuard {
        epoch::pin()
    }

    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N)) {
        // Pin, queue the destruction behind the current epoch, unpin.
        let guard = epoch::pin();
        unsafe {
            guard.defer_unchecked(move || {
                dealloc(node);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defer_destroy_runs_eventually() {
        let guard = EpochGuard::default();

        let ptr = Box::into_raw(Box::new(42i32));
        unsafe {
            guard.defer_destroy(ptr, |p| {
                drop(Box::from_raw(p));
            });
        }
        // Reclaimed by the global collector once all epochs advance.
    }

    #[test]
    fn pin_protects_reads() {
        let _read = EpochGuard::pin();

        let guard = EpochGuard::default();
        let ptr = Box::into_raw(Box::new(1u64));
        unsafe {
            // Still safe to read `ptr` here: the deferral cannot run while
            // this thread is pinned.
            guard.defer_destroy(ptr, |p| drop(Box::from_raw(p)));
            assert_eq!(*ptr, 1);
        }
    }
}
