//! Address pool model and allocation.
//!
//! This module holds the range model ([`Range`], [`RangeSet`]), the
//! round-robin candidate iterator and the allocator that combines them with a
//! [`Store`](crate::store::Store).

pub mod range;
pub mod range_set;
pub mod iterator;
pub mod allocator;

// Re-export commonly used types
pub use range::{AddressFamily, Range, RangeDescriptor};
pub use range_set::RangeSet;
pub use iterator::RangeIter;
pub use allocator::{allocate, check, release, RangeAllocator};
