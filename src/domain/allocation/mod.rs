//! Unique short code allocation.
//!
//! - [`code_space`] - code space model and the counter ⇄ code bijection
//! - [`allocator`] - range allocator lending counter ranges to concurrent callers
//! - [`lease`] - scoped ownership of one borrowed range
//! - [`facade`] - single "next code" entry point for the application layer
//!
//! # Allocation Flow
//!
//! 1. [`CodeAllocator::next_code`] borrows a range from [`RangeAllocator`]
//! 2. One counter is drawn from the [`RangeLease`]
//! 3. The lease is released, persisting the new watermark via
//!    [`crate::domain::repositories::RangeLedger`]
//! 4. The counter is encoded by [`CodeSpace::encode`]

pub mod allocator;
pub mod code_space;
pub mod error;
pub mod facade;
pub mod lease;

pub use allocator::{AllocatorOptions, AllocatorStats, RangeAllocator};
pub use code_space::{CodeSpace, CodeSpaceError, DecodeError};
pub use error::{AllocationError, UsageError};
pub use facade::{CodeAllocator, ShortCodeSource};
pub use lease::RangeLease;

#[cfg(test)]
pub use facade::MockShortCodeSource;
