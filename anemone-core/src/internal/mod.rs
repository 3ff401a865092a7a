//! Internal building blocks: pointer tagging and the ordered-collection
//! contract the hash map is built against.

pub mod ordered_collection;
pub mod tagged_ptr;

pub(crate) use tagged_ptr::TaggedPtr;
// Public so external guard crates can wrap collections.
pub use ordered_collection::{CollectionNode, NodePosition, OrderedCollection};
