//! Repository trait definitions for the domain layer.
//!
//! These traits abstract data access and are implemented by concrete
//! repositories in `crate::infrastructure::persistence`. Mock implementations
//! are auto-generated via `mockall` for testing.
//!
//! # Available Repositories
//!
//! - [`LinkRepository`] - Short link storage
//! - [`RangeLedger`] - Persisted counter range watermarks

pub mod link_repository;
pub mod range_ledger;

pub use link_repository::LinkRepository;
pub use range_ledger::{LedgerError, RangeLedger};

#[cfg(test)]
pub use link_repository::MockLinkRepository;
#[cfg(test)]
pub use range_ledger::MockRangeLedger;
