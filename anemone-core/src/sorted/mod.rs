//! Lock-free sorted collections.

pub mod harris_list;

pub use harris_list::{HarrisList, ListNode, ListPosition};
