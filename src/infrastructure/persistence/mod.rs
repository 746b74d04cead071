//! Storage implementations of the domain repository traits.
//!
//! PostgreSQL repositories use SQLx runtime queries against the schema in
//! `migrations/`.
//!
//! # Repositories
//!
//! - [`PgLinkRepository`] - Link storage and retrieval
//! - [`PgRangeLedger`] - Durable counter range watermarks
//! - [`MemoryRangeLedger`] - In-process range ledger for tests and ephemeral runs

pub mod memory_range_ledger;
pub mod pg_link_repository;
pub mod pg_range_ledger;

pub use memory_range_ledger::MemoryRangeLedger;
pub use pg_link_repository::PgLinkRepository;
pub use pg_range_ledger::PgRangeLedger;
