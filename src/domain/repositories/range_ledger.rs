//! Storage contract for the persisted counter range ledger.

use crate::domain::entities::CounterRange;
use async_trait::async_trait;

/// Errors raised by ledger implementations.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("counter value {0} does not fit the ledger's storage type")]
    OutOfRange(u64),

    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),

    /// The ledger holds a range that is not part of the requested partition,
    /// typically because it was seeded with another range size or code space.
    #[error(
        "recorded range starting at {start} does not belong to a partition of {space_size} counters into ranges of {range_size}"
    )]
    PartitionMismatch {
        start: u64,
        range_size: u64,
        space_size: u64,
    },
}

/// Durable mapping from range start to [`CounterRange`].
///
/// The allocator is the only writer while it runs; the ledger is the source of
/// truth across restarts.
///
/// # Implementations
///
/// - [`crate::infrastructure::persistence::PgRangeLedger`] - PostgreSQL implementation
/// - [`crate::infrastructure::persistence::MemoryRangeLedger`] - in-process implementation
/// - Test mocks available with `cfg(test)`
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RangeLedger: Send + Sync {
    /// Number of ranges ever recorded, exhausted ones included.
    ///
    /// Zero means a fresh deployment that still needs seeding.
    async fn count_ranges(&self) -> Result<u64, LedgerError>;

    /// Ranges whose watermark has reached neither their own ceiling nor
    /// `space_size - 1`, ordered by start.
    async fn load_active_ranges(&self, space_size: u64) -> Result<Vec<CounterRange>, LedgerError>;

    /// Partitions `[0, space_size)` into contiguous ranges of `range_size` and
    /// persists all of them before returning them ordered by start.
    ///
    /// Ranges that already exist are left untouched, so seeding twice with the
    /// same arguments is a no-op. Any recorded range that is not part of this
    /// partition fails the call with [`LedgerError::PartitionMismatch`] and
    /// nothing is written: mixing partitions would lend overlapping ranges.
    async fn seed_all_ranges(
        &self,
        range_size: u64,
        space_size: u64,
    ) -> Result<Vec<CounterRange>, LedgerError>;

    /// Durably records the range's current watermark.
    ///
    /// Must never lower a watermark that was stored earlier.
    async fn persist(&self, range: &CounterRange) -> Result<(), LedgerError>;

    /// Every range in the ledger, exhausted ones included, ordered by start.
    async fn list_ranges(&self) -> Result<Vec<CounterRange>, LedgerError>;
}
