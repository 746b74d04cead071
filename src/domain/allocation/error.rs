//! Error types for short code allocation.

use crate::domain::repositories::LedgerError;

/// Programmer errors in how a lease is used.
///
/// Surfaced immediately and never retried; allocator state is left intact.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("a counter was already drawn from the lease on range {start}")]
    CounterAlreadyDrawn { start: u64 },

    #[error("range {start} is not tracked by this allocator")]
    UnknownRange { start: u64 },

    #[error("range {start} was lent out after reaching its ceiling")]
    RangeExhausted { start: u64 },
}

#[derive(Debug, thiserror::Error)]
pub enum AllocationError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error("failed to persist watermark of range {start}")]
    Storage {
        start: u64,
        #[source]
        source: LedgerError,
    },

    #[error("failed to load the range ledger")]
    Bootstrap(#[source] LedgerError),

    /// Every partitioned range has reached its ceiling.
    #[error("short code space exhausted: every counter range has reached its ceiling")]
    SpaceExhausted,

    /// No range can ever be lent again because the remaining ones leaked after
    /// persistence failures.
    #[error("no usable counter ranges remain ({leaked} leaked after storage failures)")]
    NoUsableRanges { leaked: usize },

    #[error("allocator is shutting down")]
    ShuttingDown,

    #[error("release task did not complete: {0}")]
    ReleaseAborted(String),

    /// A permit was granted while no range was idle. The stray permit is
    /// discarded, so the next borrower sees a consistent pool again.
    #[error("allocator state out of sync: permit granted with no idle range")]
    Desynchronized,
}

impl AllocationError {
    /// Returns true for failures that will not go away by retrying.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::SpaceExhausted | Self::NoUsableRanges { .. } | Self::ShuttingDown
        )
    }
}
