//! Scoped ownership of one counter range.

use std::sync::Arc;

use tokio::sync::OwnedSemaphorePermit;
use tracing::{error, warn};

use super::allocator::Shared;
use super::error::{AllocationError, UsageError};
use crate::domain::entities::CounterRange;

/// A lease on its way back to the allocator.
///
/// Holds the permit until the range is back in the working set. If it is
/// dropped before that (a panicking ledger, a cancelled or never-polled
/// release task) the range is taken out of rotation instead, so no slot is
/// ever left leased without an owner.
pub(super) struct LeaseParts {
    pub(super) shared: Arc<Shared>,
    pub(super) range: CounterRange,
    pub(super) drawn: Option<u64>,
    pub(super) permit: Option<OwnedSemaphorePermit>,
}

impl LeaseParts {
    /// Persists a drawn watermark, then returns the range.
    pub(super) async fn finish(mut self) -> Result<(), AllocationError> {
        let shared = Arc::clone(&self.shared);
        shared.complete_release(&mut self).await
    }

    /// Returns a range nothing was drawn from; there is nothing to persist.
    fn return_undrawn(mut self) -> Result<(), AllocationError> {
        match self.permit.take() {
            Some(permit) => self.shared.return_range(self.range.clone(), permit),
            None => Ok(()),
        }
    }
}

impl Drop for LeaseParts {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            error!(
                range_start = self.range.start,
                "Release did not complete; range leaked"
            );
            self.shared.mark_leaked(self.range.clone(), permit);
        }
    }
}

/// Exclusive possession of one counter range, obtained from
/// [`RangeAllocator::borrow`](super::RangeAllocator::borrow).
///
/// At most one counter may be drawn per lease. Call [`RangeLease::release`]
/// when done; a lease that is dropped instead (early return, cancelled task,
/// panic) is still released: immediately when nothing was drawn, otherwise on
/// a background task that persists the watermark first.
#[must_use = "a lease holds a counter range until it is released"]
pub struct RangeLease {
    shared: Arc<Shared>,
    range: CounterRange,
    drawn: Option<u64>,
    /// Taken exactly once, by `release` or `drop`.
    permit: Option<OwnedSemaphorePermit>,
}

impl RangeLease {
    pub(super) fn new(
        shared: Arc<Shared>,
        range: CounterRange,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            shared,
            range,
            drawn: None,
            permit: Some(permit),
        }
    }

    pub(super) fn is_issued_by(&self, shared: &Arc<Shared>) -> bool {
        Arc::ptr_eq(&self.shared, shared)
    }

    /// Start of the leased range.
    pub fn start(&self) -> u64 {
        self.range.start
    }

    /// Current in-memory state of the leased range.
    pub fn range(&self) -> &CounterRange {
        &self.range
    }

    /// Counter drawn from this lease, if any.
    pub fn drawn(&self) -> Option<u64> {
        self.drawn
    }

    /// Advances the range's watermark by one and returns the new counter.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::CounterAlreadyDrawn`] on a second call.
    pub fn next(&mut self) -> Result<u64, UsageError> {
        let start = self.range.start;
        if self.drawn.is_some() {
            return Err(UsageError::CounterAlreadyDrawn { start });
        }

        let counter = self
            .range
            .advance(self.shared.space_size())
            .ok_or(UsageError::RangeExhausted { start })?;
        self.drawn = Some(counter);
        Ok(counter)
    }

    fn take_parts(&mut self) -> Option<LeaseParts> {
        let permit = self.permit.take()?;
        Some(LeaseParts {
            shared: Arc::clone(&self.shared),
            range: self.range.clone(),
            drawn: self.drawn,
            permit: Some(permit),
        })
    }

    /// Persists the drawn watermark (if any) and returns the range to the
    /// allocator.
    ///
    /// The release runs on its own task, so cancelling the returned future
    /// does not leave the range half-released.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Storage`] when the watermark could not be
    /// persisted; the range is then taken out of rotation.
    pub async fn release(mut self) -> Result<(), AllocationError> {
        let Some(parts) = self.take_parts() else {
            return Ok(());
        };

        if parts.drawn.is_none() {
            return parts.return_undrawn();
        }

        tokio::spawn(parts.finish())
            .await
            .map_err(|e| AllocationError::ReleaseAborted(e.to_string()))?
    }
}

impl Drop for RangeLease {
    fn drop(&mut self) {
        let Some(parts) = self.take_parts() else {
            return;
        };

        if parts.drawn.is_none() {
            if let Err(e) = parts.return_undrawn() {
                error!(error = %e, "Failed to return dropped lease");
            }
            return;
        }

        let start = parts.range.start;
        warn!(
            range_start = start,
            "Lease dropped without release; releasing in background"
        );
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = parts.finish().await {
                        error!(range_start = start, error = %e, "Background release failed");
                    }
                });
            }
            Err(_) => {
                error!(
                    range_start = start,
                    "No runtime to persist dropped lease"
                );
                drop(parts);
            }
        }
    }
}
