use std::marker::PhantomData;
use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::internal::TaggedPtr;

// Storage for the lazy bucket directory: a `branch`-ary tree of atomic
// cells addressed by bucket index. Each cell is one atomic word holding one
// of three states, discriminated by nullness and the low tag bit:
//
//   null               vacant
//   pointer | tag      interior: child cell array
//   pointer, untagged  resolved: handle to the bucket's anchor node
//
// Cells move only forward: vacant -> interior or vacant -> resolved, decided
// by a single CAS; a resolved cell never changes again. Child arrays are
// owned by the tree and freed only when it is torn down, so a reader never
// races a free on the path it is walking. Anchor handles are non-owning
// pointers into the list, valid for the map's lifetime because anchors are
// never deleted.

/// One atomic slot of the directory tree.
pub(crate) struct TrieCell<N> {
    slot: AtomicPtr<u8>,
    _marker: PhantomData<*mut N>,
}

// The raw pointers are published only via CAS/Release and owned as described
// above; sharing cells across threads is the point.
unsafe impl<N> Send for TrieCell<N> {}
unsafe impl<N> Sync for TrieCell<N> {}

/// Decoded state of a [`TrieCell`].
pub(crate) enum CellState<N> {
    Vacant,
    Interior(*mut CellArray<N>),
    Resolved(*mut N),
}

impl<N> TrieCell<N> {
    fn vacant() -> Self {
        TrieCell {
            slot: AtomicPtr::new(ptr::null_mut()),
            _marker: PhantomData,
        }
    }

    pub(crate) fn load(&self) -> CellState<N> {
        let raw = self.slot.load(Ordering::Acquire);
        if raw.is_null() {
            CellState::Vacant
        } else {
            let tagged = TaggedPtr::new(raw);
            if tagged.is_tagged() {
                CellState::Interior(tagged.as_ptr() as *mut CellArray<N>)
            } else {
                CellState::Resolved(raw as *mut N)
            }
        }
    }

    /// CAS vacant -> interior. A lost race leaves the winner's array in
    /// place; the caller must discard its own.
    pub(crate) fn try_install_interior(&self, child: *mut CellArray<N>) -> bool {
        let raw = TaggedPtr::new(child as *mut u8).tagged().as_raw();
        self.slot
            .compare_exchange(ptr::null_mut(), raw, Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }

    /// CAS vacant -> resolved. A lost race means another thread installed an
    /// equivalent anchor handle; the loser's handle is simply dropped.
    pub(crate) fn try_resolve(&self, node: *mut N) -> bool {
        self.slot
            .compare_exchange(
                ptr::null_mut(),
                node as *mut u8,
                Ordering::Release,
                Ordering::Relaxed,
            )
            .is_ok()
    }

    /// Plain store of an interior link, for arrays not yet published.
    pub(crate) fn set_interior(&self, child: *mut CellArray<N>) {
        let raw = TaggedPtr::new(child as *mut u8).tagged().as_raw();
        self.slot.store(raw, Ordering::Release);
    }

    /// Reset to vacant. Only valid on arrays that were never published.
    pub(crate) fn reset(&self) {
        self.slot.store(ptr::null_mut(), Ordering::Relaxed);
    }
}

/// A heap-allocated array of cells; one level of the directory tree.
pub(crate) struct CellArray<N> {
    cells: Box<[TrieCell<N>]>,
}

impl<N> CellArray<N> {
    /// Allocate an all-vacant array of `branch` cells and leak it to a raw
    /// pointer; ownership transfers to the tree.
    pub(crate) fn alloc(branch: usize) -> *mut CellArray<N> {
        let cells: Box<[TrieCell<N>]> = (0..branch).map(|_| TrieCell::vacant()).collect();
        Box::into_raw(Box::new(CellArray { cells }))
    }

    pub(crate) fn cell(&self, slot: usize) -> &TrieCell<N> {
        &self.cells[slot]
    }

    /// Free `array` and every interior array below it. Resolved handles are
    /// list-owned and skipped.
    ///
    /// # Safety
    /// - `array` must come from [`CellArray::alloc`] and be unreachable by
    ///   other threads
    /// - must be called once per array
    pub(crate) unsafe fn release(array: *mut CellArray<N>) {
        let boxed = unsafe { Box::from_raw(array) };
        for cell in boxed.cells.iter() {
            if let CellState::Interior(child) = cell.load() {
                unsafe { Self::release(child) };
            }
        }
    }
}

/// Physical capacity of the tree rooted at `root`: `branch` per level of the
/// slot-0 chain.
///
/// Exact for every root this map ever installs: creation resolves slot 0
/// directly and each growth links the previous root at slot 0 of the new
/// one, so the chain never passes through a vacant cell.
///
/// # Safety
/// `root` must be a live root of this tree.
pub(crate) unsafe fn capacity_of<N>(root: *mut CellArray<N>, branch: usize) -> usize {
    let mut capacity = branch;
    let mut array = root;

    loop {
        match unsafe { (*array).cell(0).load() } {
            CellState::Interior(child) => {
                capacity *= branch;
                array = child;
            }
            _ => return capacity,
        }
    }
}
