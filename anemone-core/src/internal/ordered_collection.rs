use std::ptr;

use crate::guard::Guard;

/// A node owned by an ordered collection.
pub trait CollectionNode<T> {
    fn key(&self) -> &T;

    /// Deallocate this node.
    ///
    /// # Safety
    /// - The pointer must have been allocated by the collection that created it
    /// - Must only be called once
    /// - Node must not be accessed after this call
    ///
    /// The default is correct for nodes allocated with `Box::new`.
    unsafe fn dealloc_ptr(ptr: *mut Self)
    where
        Self: Sized,
    {
        unsafe { drop(Box::from_raw(ptr)) };
    }
}

/// A position inside an ordered collection: a node plus the predecessor the
/// search went through.
///
/// Positions double as search hints. Starting an operation from a position
/// confines the traversal to the list segment behind it, which is what gives
/// bucket-local cost when the caller hands in a bucket sentinel.
pub trait NodePosition<T>: Clone {
    type Node: CollectionNode<T>;

    /// The node at this position, `None` if empty/invalid.
    fn node(&self) -> Option<*mut Self::Node>;

    fn node_ptr(&self) -> *mut Self::Node {
        self.node().unwrap_or(ptr::null_mut())
    }

    /// A position naming just a node, with no predecessor knowledge.
    fn from_node(node: *mut Self::Node) -> Self;

    fn is_valid(&self) -> bool {
        self.node().is_some()
    }
}

/// Contract of a lock-free ordered collection.
///
/// The element type's `Ord` impl is the comparator: it decides both placement
/// and equality, so compound element types can encode any total order they
/// need (the split-ordered map's entries encode bit-reversed hash order).
///
/// All `*_internal` methods are linearizable and lock-free. They return raw
/// node pointers; callers are responsible for read-pinning via the guard and
/// for deferring destruction of removed nodes.
pub trait OrderedCollection<T: Eq + Ord> {
    type Guard: Guard;
    type Node: CollectionNode<T>;
    type NodePosition: NodePosition<T, Node = Self::Node>;

    /// The stored guard used for deferred destruction of removed nodes.
    fn guard(&self) -> &Self::Guard;

    /// Insert `key`, searching from `position` when given.
    ///
    /// Returns the new node's position, or `None` if an equal element already
    /// exists (the existing element is left untouched).
    fn insert_from_internal(
        &self,
        key: T,
        position: Option<&Self::NodePosition>,
    ) -> Option<Self::NodePosition>;

    /// Logically delete the element equal to `key` and complete its physical
    /// unlink. Returns the removed node's position, or `None` if absent.
    ///
    /// The returned node is fully unlinked and may be handed to the guard.
    fn remove_from_internal(
        &self,
        position: Option<&Self::NodePosition>,
        key: &T,
    ) -> Option<Self::NodePosition>;

    /// Locate the first element `>= key` from `position`.
    ///
    /// With `exact`, only an element equal to `key` is returned.
    fn find_from_internal(
        &self,
        position: Option<&Self::NodePosition>,
        key: &T,
        exact: bool,
    ) -> Option<Self::NodePosition>;

    /// Apply `f` to the element stored in `node`, if it carries one.
    fn apply_on_internal<F, R>(&self, node: *mut Self::Node, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R;

    /// First live element, or `None` when empty.
    fn first_node_internal(&self) -> Option<*mut Self::Node>;

    /// Next live element after `node`, skipping logically deleted ones.
    fn next_node_internal(&self, node: *mut Self::Node) -> Option<*mut Self::Node>;

    // =========================================================================
    // Safe wrappers
    // =========================================================================

    /// Insert a value. Returns `false` if an equal element already exists.
    fn insert(&self, key: T) -> bool {
        let _guard = Self::Guard::pin();
        self.insert_from_internal(key, None).is_some()
    }

    /// Delete a value. Returns whether it was present.
    fn delete(&self, key: &T) -> bool {
        let _guard = Self::Guard::pin();
        if let Some(pos) = self.remove_from_internal(None, key) {
            unsafe {
                self.guard()
                    .defer_destroy(pos.node_ptr(), Self::Node::dealloc_ptr);
            }
            true
        } else {
            false
        }
    }

    /// Delete a value and return it.
    fn remove(&self, key: &T) -> Option<T>
    where
        T: Clone,
    {
        let _guard = Self::Guard::pin();
        let pos = self.remove_from_internal(None, key)?;
        let node_ptr = pos.node_ptr();

        // Clone out before the node is scheduled for destruction.
        let data = self.apply_on_internal(node_ptr, |entry| entry.clone());

        unsafe {
            self.guard()
                .defer_destroy(node_ptr, Self::Node::dealloc_ptr);
        }

        data
    }

    fn contains(&self, key: &T) -> bool {
        let _guard = Self::Guard::pin();
        self.find_from_internal(None, key, true).is_some()
    }

    /// Find a value and apply a function to it.
    fn find_and_apply<F, R>(&self, key: &T, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let _guard = Self::Guard::pin();
        match self.find_from_internal(None, key, true) {
            Some(pos) => self.apply_on_internal(pos.node_ptr(), f),
            None => None,
        }
    }

    fn is_empty(&self) -> bool {
        let _guard = Self::Guard::pin();
        self.first_node_internal().is_none()
    }

    /// Best-effort traversal into a `Vec`; not an atomic snapshot.
    fn to_vec(&self) -> Vec<T>
    where
        T: Clone,
    {
        let _guard = Self::Guard::pin();
        let mut result = Vec::new();
        let mut current = self.first_node_internal();
        while let Some(node) = current {
            unsafe {
                result.push((*node).key().clone());
            }
            current = self.next_node_internal(node);
        }
        result
    }

    fn len(&self) -> usize {
        let _guard = Self::Guard::pin();
        let mut count = 0;
        let mut current = self.first_node_internal();
        while let Some(node) = current {
            count += 1;
            current = self.next_node_internal(node);
        }
        count
    }
}
