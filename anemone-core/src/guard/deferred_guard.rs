//! Defer-until-drop reclamation.

use std::sync::Mutex;

use super::Guard;

/// A guard that holds every deferred node until it is dropped.
///
/// Destruction timing is fully predictable, which is what tests want; memory
/// accumulates for the life of the collection, so long-running production
/// maps should use an epoch guard instead.
pub struct DeferredGuard {
    deferred: Mutex<Vec<Deferred>>,
}

struct Deferred {
    ptr: *mut (),
    dealloc: unsafe fn(*mut ()),
}

// The pointer is only touched at drop time, under the mutex.
unsafe impl Send for Deferred {}

impl DeferredGuard {
    pub fn new() -> Self {
        DeferredGuard {
            deferred: Mutex::new(Vec::new()),
        }
    }
}

impl Default for DeferredGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeferredGuard {
    fn drop(&mut self) {
        let nodes = self.deferred.get_mut().unwrap();

        #[cfg(debug_assertions)]
        {
            // A pointer deferred twice would be a double free below.
            let mut seen = std::collections::HashSet::new();
            for node in nodes.iter() {
                assert!(
                    seen.insert(node.ptr as usize),
                    "node {:#x} deferred more than once",
                    node.ptr as usize
                );
            }
        }

        for node in nodes.drain(..) {
            unsafe {
                (node.dealloc)(node.ptr);
            }
        }
    }
}

impl Guard for DeferredGuard {
    /// Reads are protected by the collection's stored guard itself, so the
    /// per-operation read guard carries no state.
    type ReadGuard = ();

    fn pin() -> Self::ReadGuard {}

    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N)) {
        let node = Deferred {
            ptr: node as *mut (),
            dealloc: unsafe {
                std::mem::transmute::<unsafe fn(*mut N), unsafe fn(*mut ())>(dealloc)
            },
        };
        self.deferred.lock().unwrap().push(node);
    }
}
