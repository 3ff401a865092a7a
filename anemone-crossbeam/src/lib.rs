//! Epoch-based memory reclamation for anemone collections.
//!
//! Provides [`EpochGuard`], an implementation of the core `Guard` trait on
//! top of `crossbeam-epoch`, suitable for long-running maps:
//!
//! ```ignore
//! use anemone_core::SplitOrderedMap;
//! use anemone_crossbeam::EpochGuard;
//!
//! let map: SplitOrderedMap<String, EpochGuard> = SplitOrderedMap::new();
//! map.insert(42, "value".to_string());
//! ```

pub mod epoch_guard;

pub use epoch_guard::EpochGuard;
