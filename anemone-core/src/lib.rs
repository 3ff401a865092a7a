//! Lock-free concurrent containers built around a single split-ordered list.
//!
//! The centerpiece is [`SplitOrderedMap`], a resizable hash map for
//! machine-word keys in which every entry lives in one Harris-style sorted
//! linked list and buckets are just anchored segments of it. Growth never
//! moves an entry.
//!
//! Memory reclamation is pluggable: collections are generic over
//! [`guard::Guard`]. This crate ships [`DeferredGuard`] (free everything
//! when the collection drops); `anemone-crossbeam` provides an epoch-based
//! guard for long-running maps.

pub mod common_tests;
pub mod guard;
pub mod hash;
pub mod internal;
pub mod sorted;

pub use guard::{DeferredGuard, Guard};
pub use hash::{SplitEntry, SplitOrderedMap};
pub use internal::{CollectionNode, NodePosition, OrderedCollection};
pub use sorted::{HarrisList, ListNode, ListPosition};
