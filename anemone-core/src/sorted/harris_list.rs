use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::guard::Guard;
use crate::internal::ordered_collection::{CollectionNode, NodePosition, OrderedCollection};
use crate::internal::TaggedPtr;

type NodePtr<T> = *mut ListNode<T>;

// Lock-free sorted linked list after Harris, 'A Pragmatic Implementation of
// Non-Blocking Linked-Lists'.
//
// The deletion mark lives in bit 0 of a node's `next` pointer: a tagged
// `next` means the node holding it is logically deleted. Removal is
// two-phase:
//
//   Phase 1 - logical delete: CAS curr.next from succ to succ|TAG
//   Phase 2 - physical unlink: CAS pred.next from curr to succ
//
// Phase 2 MUST complete before the node is handed to the guard; epoch-based
// reclamation is only sound for nodes that no new traversal can reach.
//
// Traversals snip tagged nodes as they pass. When a snip CAS fails the
// predecessor itself may have been tagged, so the search restarts from the
// caller's start node (not HEAD) - callers hand in bucket sentinels, and a
// sentinel is never deleted, so it stays a valid restart point.
//
// CAS-failure cases during the unlink, with actual = pred.next after failure:
//
//   actual == curr|TAG     pred was tagged; re-find the predecessor
//   actual.key > curr.key  curr already unlinked by a helper; done
//   actual.key < curr.key  a node was inserted between pred and curr;
//                          advance and retry
#[derive(Debug)]
pub struct ListNode<T> {
    data: Option<T>,
    next: AtomicPtr<ListNode<T>>,
}

impl<T> ListNode<T> {
    fn new(key: T) -> Self {
        ListNode {
            data: Some(key),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// The head node carries no data.
    fn new_head() -> Self {
        ListNode {
            data: None,
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    fn is_head(&self) -> bool {
        self.data.is_none()
    }

    #[inline]
    pub(crate) fn get_next(&self) -> NodePtr<T> {
        self.next.load(Ordering::Acquire)
    }

    #[inline]
    fn set_next(&self, ptr: NodePtr<T>) {
        self.next.store(ptr, Ordering::Release)
    }

    #[inline]
    fn cas_next(&self, expected: NodePtr<T>, new: NodePtr<T>) -> Result<NodePtr<T>, NodePtr<T>> {
        self.next
            .compare_exchange(expected, new, Ordering::Release, Ordering::Relaxed)
    }

    #[inline]
    fn cas_next_weak(
        &self,
        expected: NodePtr<T>,
        new: NodePtr<T>,
    ) -> Result<NodePtr<T>, NodePtr<T>> {
        self.next
            .compare_exchange_weak(expected, new, Ordering::Release, Ordering::Relaxed)
    }
}

impl<T> CollectionNode<T> for ListNode<T> {
    fn key(&self) -> &T {
        self.data.as_ref().expect("head node carries no key")
    }
}

/// pred/curr/next triple produced by a search.
#[derive(Debug, Copy, Clone)]
struct NodeLocation<T> {
    pred: NodePtr<T>,
    curr: NodePtr<T>,
}

/// A position in a [`HarrisList`]: the node plus the predecessor the search
/// passed through. Used as a start hint for segment-local operations.
pub struct ListPosition<T> {
    pred: NodePtr<T>,
    node: NodePtr<T>,
}

// Manual impls to avoid requiring T: Clone/Copy.
impl<T> Copy for ListPosition<T> {}

impl<T> Clone for ListPosition<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> NodePosition<T> for ListPosition<T> {
    type Node = ListNode<T>;

    fn node(&self) -> Option<*mut Self::Node> {
        if self.node.is_null() {
            None
        } else {
            Some(self.node)
        }
    }

    fn from_node(node: *mut Self::Node) -> Self {
        ListPosition {
            pred: ptr::null_mut(),
            node,
        }
    }
}

impl<T> ListPosition<T> {
    pub fn new(pred: NodePtr<T>, node: NodePtr<T>) -> Self {
        ListPosition { pred, node }
    }

    pub fn pred(&self) -> NodePtr<T> {
        self.pred
    }
}

pub struct HarrisList<T, G: Guard> {
    pub(crate) head: AtomicPtr<ListNode<T>>,
    /// Removed nodes are deferred here and freed when the guard drops.
    guard: G,
}

impl<T, G> HarrisList<T, G>
where
    T: Eq + Ord,
    G: Guard,
{
    pub fn new() -> Self {
        let head = Box::into_raw(Box::new(ListNode::new_head()));
        HarrisList {
            head: AtomicPtr::new(head),
            guard: G::default(),
        }
    }

    /// Resolve the start hint of a position: the predecessor when known,
    /// otherwise the node itself.
    fn start_of(position: Option<&ListPosition<T>>) -> Option<NodePtr<T>> {
        position.and_then(|pos| {
            let pred = pos.pred();
            if !pred.is_null() {
                Some(pred)
            } else {
                pos.node()
            }
        })
    }

    /// Complete the physical unlink of a tagged node, retrying until it is
    /// confirmed out of the list. Returns the final predecessor.
    ///
    /// # Safety
    /// - `marked_node` must be valid and already tagged
    /// - `successor` must be `marked_node`'s untagged successor
    /// - `start_node`, when given, must point into this list
    unsafe fn unlink_tagged_node(
        &self,
        mut pred: NodePtr<T>,
        marked_node: NodePtr<T>,
        successor: NodePtr<T>,
        start_node: Option<NodePtr<T>>,
    ) -> NodePtr<T> {
        let key = unsafe { (*marked_node).key() };
        // Once invalidated the hint stays unusable for every later retry.
        let mut start_node = start_node;

        loop {
            let cas_result = unsafe { (*pred).cas_next(marked_node, successor) };

            if cas_result.is_ok() {
                return pred;
            }

            // CAS failed: pred was tagged, something was inserted after it,
            // or a helper already snipped marked_node.
            let actual = cas_result.unwrap_err();
            let actual_ptr = TaggedPtr::untag(actual);

            if actual_ptr != marked_node {
                if actual_ptr.is_null() {
                    return pred;
                }
                let actual_key = unsafe { (*actual_ptr).key() };
                if actual_key > key {
                    // pred already points past marked_node.
                    return pred;
                }
                // Something was inserted between pred and marked_node; fall
                // through and re-find the predecessor.
            }

            // The hint is unusable if it IS the node being unlinked, or if it
            // has itself been tagged meanwhile; fall back to HEAD then.
            let mut start = match start_node {
                Some(s) => {
                    let s_clean = TaggedPtr::untag(s);
                    if s_clean == marked_node {
                        start_node = None;
                        self.head.load(Ordering::Acquire)
                    } else {
                        let s_next = unsafe { (*s_clean).get_next() };
                        if TaggedPtr::new(s_next).is_tagged() {
                            start_node = None;
                            self.head.load(Ordering::Acquire)
                        } else {
                            s_clean
                        }
                    }
                }
                None => self.head.load(Ordering::Acquire),
            };

            pred = start;
            let mut curr = unsafe { (*pred).get_next() };

            loop {
                curr = TaggedPtr::untag(curr);

                if curr.is_null() {
                    // End of list: a helper finished the unlink.
                    return pred;
                }

                if curr == marked_node {
                    // Found it; retry the CAS with the fresh predecessor.
                    break;
                }

                let next = unsafe { (*curr).get_next() };
                let next_tagged = TaggedPtr::new(next);

                if next_tagged.is_tagged() {
                    // Help snip this tagged node on the way.
                    let snip = unsafe { (*pred).cas_next(curr, next_tagged.as_ptr()) };

                    if snip.is_err() {
                        let pred_next = unsafe { (*pred).get_next() };
                        if TaggedPtr::new(pred_next).is_tagged() {
                            // pred itself is being deleted; restart from a
                            // node that is still linked.
                            let start_next = unsafe { (*start).get_next() };
                            if TaggedPtr::new(start_next).is_tagged() {
                                start_node = None;
                                start = self.head.load(Ordering::Acquire);
                            }
                            pred = start;
                            curr = unsafe { (*pred).get_next() };
                            continue;
                        }
                    }

                    curr = unsafe { (*pred).get_next() };
                    continue;
                }

                let curr_key = unsafe { (*curr).key() };
                if curr_key > key {
                    // Past marked_node's slot: already unlinked.
                    return pred;
                }

                pred = curr;
                curr = next;
            }
        }
    }

    // Core search: locate the first node >= key, snipping tagged nodes on
    // the way. Failed snips restart from start_node so bucket-hinted callers
    // stay within their segment.
    fn node_location_from_internal(
        &self,
        key: &T,
        start_node: Option<NodePtr<T>>,
    ) -> NodeLocation<T> {
        'retry: loop {
            let mut pred_node = match start_node {
                Some(start) => TaggedPtr::untag(start),
                None => self.head.load(Ordering::Acquire),
            };

            let mut curr_node = unsafe { (*pred_node).get_next() };

            loop {
                curr_node = TaggedPtr::untag(curr_node);

                if curr_node.is_null() {
                    return NodeLocation {
                        pred: pred_node,
                        curr: curr_node,
                    };
                }

                let next_node = unsafe { (*curr_node).get_next() };
                let next_tagged = TaggedPtr::new(next_node);

                if next_tagged.is_tagged() {
                    let snip = unsafe { (*pred_node).cas_next(curr_node, next_tagged.as_ptr()) };

                    if snip.is_err() {
                        // pred_node changed under us; either a helper snipped
                        // first or pred_node is itself tagged.
                        continue 'retry;
                    }

                    curr_node = next_tagged.as_ptr();
                } else {
                    unsafe {
                        if !(*curr_node).is_head() && (*curr_node).key() >= key {
                            // The node may have been tagged while we compared.
                            let recheck = (*curr_node).get_next();
                            if TaggedPtr::new(recheck).is_tagged() {
                                continue 'retry;
                            }
                            return NodeLocation {
                                pred: pred_node,
                                curr: curr_node,
                            };
                        }
                    }

                    pred_node = curr_node;
                    curr_node = next_tagged.as_ptr();
                }
            }
        }
    }
}

impl<T, G> OrderedCollection<T> for HarrisList<T, G>
where
    T: Eq + Ord,
    G: Guard,
{
    type Guard = G;
    type Node = ListNode<T>;
    type NodePosition = ListPosition<T>;

    fn guard(&self) -> &G {
        &self.guard
    }

    fn insert_from_internal(
        &self,
        key: T,
        position: Option<&Self::NodePosition>,
    ) -> Option<Self::NodePosition> {
        let new_node = Box::into_raw(Box::new(ListNode::new(key)));

        loop {
            let key = unsafe { (*new_node).key() };

            let start_node = Self::start_of(position);

            // The hint itself may hold an equal key; the search below starts
            // strictly after it and would miss the duplicate.
            if let Some(hint) = start_node {
                let hint = TaggedPtr::untag(hint);
                unsafe {
                    if !(*hint).is_head() && (*hint).key() == key {
                        ListNode::dealloc_ptr(new_node);
                        return None;
                    }
                }
            }

            let loc = self.node_location_from_internal(key, start_node);
            let (pred, curr) = (loc.pred, loc.curr);

            if !curr.is_null() {
                unsafe {
                    if (*curr).key() == key {
                        ListNode::dealloc_ptr(new_node);
                        return None;
                    }
                }
            }

            unsafe {
                (*new_node).set_next(curr);
            }

            let result = unsafe { (*pred).cas_next_weak(curr, new_node) };

            if result.is_ok() {
                return Some(ListPosition::new(pred, new_node));
            }
            // Lost the link CAS; retry from the hint.
        }
    }

    fn remove_from_internal(
        &self,
        position: Option<&Self::NodePosition>,
        key: &T,
    ) -> Option<Self::NodePosition> {
        let start_node = Self::start_of(position);

        loop {
            let location = self.node_location_from_internal(key, start_node);
            let (mut pred, curr) = (location.pred, location.curr);

            if curr.is_null() {
                return None;
            }

            unsafe {
                if (*curr).key() != key {
                    return None;
                }

                pred = TaggedPtr::untag(pred);

                let curr_next = (*curr).get_next();
                let curr_next_tagged = TaggedPtr::new(curr_next);

                if curr_next_tagged.is_tagged() {
                    // Another thread won the delete.
                    return None;
                }

                // Phase 1: logical delete.
                let tagged = curr_next_tagged.tagged();
                if (*curr).cas_next_weak(curr_next, tagged.as_raw()).is_err() {
                    continue;
                }

                // Phase 2: physical unlink, completed before the node can be
                // handed to the guard.
                let successor = curr_next_tagged.as_ptr();
                let final_pred = self.unlink_tagged_node(pred, curr, successor, start_node);
                return Some(ListPosition::new(final_pred, curr));
            }
        }
    }

    fn find_from_internal(
        &self,
        position: Option<&Self::NodePosition>,
        key: &T,
        exact: bool,
    ) -> Option<Self::NodePosition> {
        let start_node = Self::start_of(position);

        let location = self.node_location_from_internal(key, start_node);

        if location.curr.is_null() {
            return None;
        }

        if exact && unsafe { (*location.curr).key() != key } {
            return None;
        }

        Some(ListPosition::new(location.pred, location.curr))
    }

    fn apply_on_internal<F, R>(&self, node: *mut Self::Node, f: F) -> Option<R>
    where
        F: FnOnce(&T) -> R,
    {
        let curr = TaggedPtr::untag(node);

        if curr.is_null() {
            return None;
        }

        unsafe {
            let node_ref = &*curr;

            if node_ref.is_head() {
                return None;
            }

            Some(f(node_ref.key()))
        }
    }

    fn first_node_internal(&self) -> Option<*mut Self::Node> {
        let head = self.head.load(Ordering::Acquire);
        let mut curr = unsafe { (*head).get_next() };

        while !curr.is_null() {
            let tagged = TaggedPtr::new(unsafe { (*curr).get_next() });

            if !tagged.is_tagged() {
                return Some(curr);
            }

            curr = tagged.as_ptr();
        }

        None
    }

    fn next_node_internal(&self, node: *mut Self::Node) -> Option<*mut Self::Node> {
        if node.is_null() {
            return None;
        }

        let node = TaggedPtr::untag(node);

        unsafe {
            let mut curr = TaggedPtr::untag((*node).get_next());

            while !curr.is_null() {
                let next_tagged = TaggedPtr::new((*curr).get_next());
                if !next_tagged.is_tagged() {
                    return Some(curr);
                }

                // Logically deleted; step over it.
                curr = next_tagged.as_ptr();
            }

            None
        }
    }
}

impl<T, G> Default for HarrisList<T, G>
where
    T: Eq + Ord,
    G: Guard,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, G: Guard> Drop for HarrisList<T, G> {
    fn drop(&mut self) {
        let mut curr = self.head.load(Ordering::Acquire);

        while !curr.is_null() {
            unsafe {
                let next_raw = (*curr).get_next();
                let next_tagged = TaggedPtr::new(next_raw);

                // Tagged nodes at drop time mean a remove returned without
                // finishing its physical unlink.
                if next_tagged.is_tagged() && !(*curr).is_head() {
                    panic!("logically deleted node still linked at drop time");
                }

                let next = next_tagged.as_ptr();
                ListNode::dealloc_ptr(curr);

                curr = next;
            }
        }
    }
}
