//! Memory reclamation guards.
//!
//! Collections in this crate never free a removed node directly: another
//! thread may still be traversing it. Instead they hand the unlinked node to
//! a [`Guard`], which decides when deallocation is safe. Collections are
//! generic over the guard type:
//!
//! ```text
//! SplitOrderedMap<V, G: Guard>
//!     │
//!     ├── SplitOrderedMap<V, EpochGuard>      (production, anemone-crossbeam)
//!     └── SplitOrderedMap<V, DeferredGuard>   (tests, short-lived maps)
//! ```

mod deferred_guard;

pub use deferred_guard::DeferredGuard;

/// A memory reclamation strategy.
///
/// The guard stored inside a collection schedules deferred destruction;
/// read protection is taken per operation via [`Guard::pin`].
///
/// # Safety contract
///
/// Implementations must not run a deferred `dealloc` while any thread that
/// could still observe the node holds a [`Guard::pin`] guard taken before
/// the node was unlinked.
pub trait Guard: Sized + Default + Send + Sync {
    /// An active read guard; node pointers read while it is alive stay valid.
    ///
    /// Epoch-based implementations hold a pinned epoch here. Implementations
    /// that defer everything until the collection drops can use `()`.
    type ReadGuard: Sized;

    /// Pin the calling thread for a batch of reads.
    fn pin() -> Self::ReadGuard;

    /// Schedule an unlinked node for destruction.
    ///
    /// # Safety
    ///
    /// - `node` must have been allocated by the collection and already be
    ///   physically unlinked (unreachable by new traversals)
    /// - `dealloc` must be the matching deallocation function
    /// - must be called at most once per node
    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N));
}
