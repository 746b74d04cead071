//! Core domain entities representing the business data model.
//!
//! # Entity Types
//!
//! - [`Link`] - A shortened URL mapping
//! - [`CounterRange`] - A persisted slice of the short code counter space
//!
//! `NewLink` carries the fields needed to create a link record.

pub mod counter_range;
pub mod link;

pub use counter_range::{CounterRange, partition};
pub use link::{Link, NewLink};
