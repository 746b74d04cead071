//! Range allocator: lends counter ranges to concurrent callers.
//!
//! Every usable range is backed by exactly one permit of a Tokio semaphore.
//! A caller waits for a permit, then picks an idle range under a short mutex
//! section and owns it through a [`RangeLease`] until it is released. The
//! watermark is persisted before the range becomes idle again, so a crash can
//! only skip counters, never reissue one.
//!
//! The permit pool only ever shrinks: a range that reaches its ceiling is
//! retired together with one permit. Once no usable range remains the pool is
//! closed and waiting callers fail with [`AllocationError::SpaceExhausted`].

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, error, info, warn};

use super::error::{AllocationError, UsageError};
use super::lease::{LeaseParts, RangeLease};
use crate::domain::entities::CounterRange;
use crate::domain::repositories::{LedgerError, RangeLedger};

/// Tuning knobs for [`RangeAllocator`].
#[derive(Debug, Clone)]
pub struct AllocatorOptions {
    /// Size of each range when the ledger is seeded for the first time.
    pub range_size: u64,
    /// Extra persistence attempts after the first one fails.
    pub persist_retries: usize,
    /// Base delay of the exponential backoff between persistence attempts.
    pub persist_backoff: Duration,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            range_size: 1_000_000_000,
            persist_retries: 3,
            persist_backoff: Duration::from_millis(10),
        }
    }
}

/// Point-in-time view of the working set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatorStats {
    pub idle: usize,
    pub leased: usize,
    pub leaked: usize,
    pub retired: usize,
    pub available_permits: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    Idle,
    Leased,
    /// Persistence failed for good; the range is never lent again in this process.
    Leaked,
}

#[derive(Debug)]
struct Slot {
    range: CounterRange,
    state: SlotState,
}

#[derive(Debug, Default)]
struct WorkingSet {
    slots: BTreeMap<u64, Slot>,
    idle: BTreeSet<u64>,
    retired: usize,
    shutting_down: bool,
}

impl WorkingSet {
    fn usable(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.state != SlotState::Leaked)
            .count()
    }

    fn leaked(&self) -> usize {
        self.slots.len() - self.usable()
    }

    fn retire(&mut self, start: u64) {
        self.idle.remove(&start);
        if self.slots.remove(&start).is_some() {
            self.retired += 1;
            metrics::counter!("shortcode_ranges_retired_total").increment(1);
        }
    }
}

/// State shared between the allocator and the leases it hands out.
pub(super) struct Shared {
    ledger: Arc<dyn RangeLedger>,
    space_size: u64,
    permits: Arc<Semaphore>,
    working_set: Mutex<WorkingSet>,
    options: AllocatorOptions,
}

/// Lends exclusive access to one counter range at a time per caller.
///
/// Construct one instance per deployment with [`RangeAllocator::bootstrap`]
/// and share it by reference.
pub struct RangeAllocator {
    shared: Arc<Shared>,
}

impl RangeAllocator {
    /// Loads the working set from the ledger, seeding the ledger on a fresh
    /// deployment.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::Bootstrap`] if the ledger cannot be read or
    /// seeded, and [`AllocationError::SpaceExhausted`] if every recorded range
    /// has already reached its ceiling.
    pub async fn bootstrap(
        ledger: Arc<dyn RangeLedger>,
        space_size: u64,
        options: AllocatorOptions,
    ) -> Result<Self, AllocationError> {
        let recorded = ledger
            .count_ranges()
            .await
            .map_err(AllocationError::Bootstrap)?;

        let ranges = if recorded == 0 {
            info!(
                range_size = options.range_size,
                space_size, "Seeding empty counter range ledger"
            );
            ledger
                .seed_all_ranges(options.range_size, space_size)
                .await
                .map_err(AllocationError::Bootstrap)?
        } else {
            ledger
                .load_active_ranges(space_size)
                .await
                .map_err(AllocationError::Bootstrap)?
        };

        Self::from_ranges(ledger, space_size, ranges, options)
    }

    /// Builds an allocator over an already loaded set of ranges.
    ///
    /// Exhausted ranges are dropped before the permit pool is sized.
    ///
    /// # Errors
    ///
    /// Returns [`AllocationError::SpaceExhausted`] if no usable range is left.
    pub fn from_ranges(
        ledger: Arc<dyn RangeLedger>,
        space_size: u64,
        ranges: Vec<CounterRange>,
        options: AllocatorOptions,
    ) -> Result<Self, AllocationError> {
        let mut working_set = WorkingSet::default();
        for range in ranges {
            if range.is_exhausted(space_size) {
                continue;
            }
            working_set.idle.insert(range.start);
            working_set.slots.insert(
                range.start,
                Slot {
                    range,
                    state: SlotState::Idle,
                },
            );
        }

        let active = working_set.slots.len();
        if active == 0 {
            return Err(AllocationError::SpaceExhausted);
        }

        info!(active_ranges = active, "Range allocator ready");
        metrics::gauge!("shortcode_active_ranges").set(active as f64);

        Ok(Self {
            shared: Arc::new(Shared {
                ledger,
                space_size,
                permits: Arc::new(Semaphore::new(active)),
                working_set: Mutex::new(working_set),
                options,
            }),
        })
    }

    /// Waits until a range is free and leases it to the caller.
    ///
    /// Callers queue without spinning when every range is lent out.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::SpaceExhausted`] once every range has retired
    /// - [`AllocationError::NoUsableRanges`] if the remaining ranges leaked
    /// - [`AllocationError::ShuttingDown`] after [`Self::shutdown`]
    pub async fn borrow(&self) -> Result<RangeLease, AllocationError> {
        loop {
            let permit = match self.shared.permits.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Err(self.shared.closed_reason()),
            };

            if let Some(lease) = Shared::select(&self.shared, permit)? {
                return Ok(lease);
            }
        }
    }

    /// Releases a lease issued by this allocator, persisting its watermark.
    ///
    /// # Errors
    ///
    /// Returns [`UsageError::UnknownRange`] if the lease came from another
    /// allocator; the lease then goes back to the allocator that issued it.
    /// See [`RangeLease::release`] for the remaining cases.
    pub async fn release(&self, lease: RangeLease) -> Result<(), AllocationError> {
        if !lease.is_issued_by(&self.shared) {
            return Err(UsageError::UnknownRange {
                start: lease.start(),
            }
            .into());
        }
        lease.release().await
    }

    /// Closes the permit pool. Queued and future borrowers fail with
    /// [`AllocationError::ShuttingDown`]; outstanding leases still release.
    pub fn shutdown(&self) {
        self.shared.lock().shutting_down = true;
        self.shared.permits.close();
        info!("Range allocator shut down");
    }

    pub fn stats(&self) -> AllocatorStats {
        let set = self.shared.lock();
        let mut stats = AllocatorStats {
            idle: 0,
            leased: 0,
            leaked: 0,
            retired: set.retired,
            available_permits: self.shared.permits.available_permits(),
        };
        for slot in set.slots.values() {
            match slot.state {
                SlotState::Idle => stats.idle += 1,
                SlotState::Leased => stats.leased += 1,
                SlotState::Leaked => stats.leaked += 1,
            }
        }
        stats
    }

    /// Size of the code space the allocator draws counters from.
    pub fn space_size(&self) -> u64 {
        self.shared.space_size
    }

    /// Copy of the in-memory watermark of a range still in the working set.
    pub fn range(&self, start: u64) -> Option<CounterRange> {
        self.shared
            .lock()
            .slots
            .get(&start)
            .map(|slot| slot.range.clone())
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, WorkingSet> {
        self.working_set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(super) fn space_size(&self) -> u64 {
        self.space_size
    }

    /// Picks an idle range for a caller that holds a permit.
    ///
    /// Returns `Ok(None)` when the caller's permit was spent retiring an
    /// exhausted range and it has to queue for a permit again.
    fn select(
        this: &Arc<Self>,
        permit: OwnedSemaphorePermit,
    ) -> Result<Option<RangeLease>, AllocationError> {
        let mut set = this.lock();
        if set.shutting_down {
            return Err(AllocationError::ShuttingDown);
        }

        loop {
            let Some(start) = set.idle.pop_first() else {
                if set.usable() == 0 {
                    this.permits.close();
                    return Err(this.exhaustion_error(&set));
                }
                // Every idle range has exactly one free permit, so this permit
                // stands for no range at all. Drop it from the pool for good.
                permit.forget();
                error!(
                    leased = set.usable(),
                    "Permit granted with no idle range; allocator state out of sync"
                );
                return Err(AllocationError::Desynchronized);
            };

            let Some(slot) = set.slots.get_mut(&start) else {
                continue;
            };

            if slot.range.is_exhausted(this.space_size) {
                info!(range_start = start, "Retiring exhausted range");
                set.retire(start);
                metrics::gauge!("shortcode_active_ranges").set(set.usable() as f64);
                // The permit stands for a range slot, not a specific range:
                // keep it if an idle permit can be retired in its place.
                if this.permits.forget_permits(1) == 1 {
                    continue;
                }
                permit.forget();
                if set.usable() == 0 {
                    this.permits.close();
                    return Err(this.exhaustion_error(&set));
                }
                return Ok(None);
            }

            slot.state = SlotState::Leased;
            let range = slot.range.clone();
            drop(set);

            debug!(range_start = start, "Range leased");
            return Ok(Some(RangeLease::new(Arc::clone(this), range, permit)));
        }
    }

    /// Finishes a lease: persists a drawn watermark, then returns the range to
    /// the idle pool or retires it.
    ///
    /// The permit stays inside `parts` until the range is back in the working
    /// set; see [`LeaseParts`] for what happens when this future never
    /// completes.
    pub(super) async fn complete_release(
        &self,
        parts: &mut LeaseParts,
    ) -> Result<(), AllocationError> {
        let start = parts.range.start;

        if parts.drawn.is_some()
            && let Err(source) = self.persist(&parts.range).await
        {
            error!(
                range_start = start,
                error = %source,
                "Giving up on persisting range watermark; range leaked"
            );
            metrics::counter!("shortcode_persist_failures_total").increment(1);
            if let Some(permit) = parts.permit.take() {
                self.mark_leaked(parts.range.clone(), permit);
            }
            return Err(AllocationError::Storage { start, source });
        }

        match parts.permit.take() {
            Some(permit) => self.return_range(parts.range.clone(), permit),
            None => Ok(()),
        }
    }

    /// Puts a range back into the idle pool, or retires it when it is spent.
    ///
    /// The caller guarantees the watermark is already durable.
    pub(super) fn return_range(
        &self,
        range: CounterRange,
        permit: OwnedSemaphorePermit,
    ) -> Result<(), AllocationError> {
        let start = range.start;
        let mut set = self.lock();
        let Some(slot) = set.slots.get_mut(&start) else {
            permit.forget();
            return Err(UsageError::UnknownRange { start }.into());
        };

        if range.is_exhausted(self.space_size) {
            set.retire(start);
            permit.forget();
            let usable = set.usable();
            metrics::gauge!("shortcode_active_ranges").set(usable as f64);
            info!(
                range_start = start,
                active_ranges = usable,
                "Range reached its ceiling and was retired"
            );
            if usable == 0 {
                warn!("Every counter range is exhausted; closing the allocator");
                self.permits.close();
            }
            return Ok(());
        }

        slot.range = range;
        slot.state = SlotState::Idle;
        set.idle.insert(start);
        drop(set);
        // The range must be idle before its permit becomes available.
        drop(permit);
        Ok(())
    }

    /// Takes a range out of rotation for the rest of the process lifetime.
    pub(super) fn mark_leaked(&self, range: CounterRange, permit: OwnedSemaphorePermit) {
        let mut set = self.lock();
        if let Some(slot) = set.slots.get_mut(&range.start) {
            slot.range = range;
            slot.state = SlotState::Leaked;
        }
        permit.forget();
        if set.usable() == 0 {
            self.permits.close();
        }
    }

    async fn persist(&self, range: &CounterRange) -> Result<(), LedgerError> {
        let base = self.options.persist_backoff.as_millis().max(1) as u64;
        let strategy = ExponentialBackoff::from_millis(base)
            .map(jitter)
            .take(self.options.persist_retries);

        Retry::spawn(strategy, || async move {
            self.ledger.persist(range).await.inspect_err(|e| {
                warn!(range_start = range.start, error = %e, "Failed to persist range watermark");
            })
        })
        .await
    }

    fn closed_reason(&self) -> AllocationError {
        let set = self.lock();
        if set.shutting_down {
            AllocationError::ShuttingDown
        } else {
            self.exhaustion_error(&set)
        }
    }

    fn exhaustion_error(&self, set: &WorkingSet) -> AllocationError {
        match set.leaked() {
            0 => AllocationError::SpaceExhausted,
            leaked => AllocationError::NoUsableRanges { leaked },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repositories::MockRangeLedger;
    use mockall::Sequence;

    const SPACE: u64 = 1_000;

    fn options() -> AllocatorOptions {
        AllocatorOptions {
            range_size: 100,
            persist_retries: 2,
            persist_backoff: Duration::from_millis(1),
        }
    }

    fn accepting_ledger() -> Arc<dyn RangeLedger> {
        let mut ledger = MockRangeLedger::new();
        ledger.expect_persist().returning(|_| Ok(()));
        Arc::new(ledger)
    }

    #[tokio::test]
    async fn test_bootstrap_seeds_empty_ledger() {
        let mut ledger = MockRangeLedger::new();
        ledger.expect_count_ranges().times(1).returning(|| Ok(0));
        ledger
            .expect_seed_all_ranges()
            .withf(|range_size, space_size| *range_size == 100 && *space_size == SPACE)
            .times(1)
            .returning(|range_size, space_size| {
                Ok(crate::domain::entities::partition(range_size, space_size))
            });
        ledger.expect_load_active_ranges().times(0);

        let allocator = RangeAllocator::bootstrap(Arc::new(ledger), SPACE, options())
            .await
            .unwrap();

        assert_eq!(allocator.stats().idle, 10);
        assert_eq!(allocator.stats().available_permits, 10);
    }

    #[tokio::test]
    async fn test_bootstrap_loads_existing_ledger() {
        let mut ledger = MockRangeLedger::new();
        ledger.expect_count_ranges().times(1).returning(|| Ok(10));
        ledger.expect_seed_all_ranges().times(0);
        ledger
            .expect_load_active_ranges()
            .times(1)
            .returning(|_| Ok(vec![CounterRange::with_watermark(300, 400, Some(350))]));

        let allocator = RangeAllocator::bootstrap(Arc::new(ledger), SPACE, options())
            .await
            .unwrap();

        assert_eq!(allocator.stats().idle, 1);
        assert_eq!(allocator.range(300).unwrap().last_used, Some(350));
    }

    #[tokio::test]
    async fn test_bootstrap_fails_when_everything_is_exhausted() {
        let mut ledger = MockRangeLedger::new();
        ledger.expect_count_ranges().returning(|| Ok(10));
        ledger.expect_load_active_ranges().returning(|_| Ok(vec![]));

        let result = RangeAllocator::bootstrap(Arc::new(ledger), SPACE, options()).await;

        assert!(matches!(result, Err(AllocationError::SpaceExhausted)));
    }

    #[tokio::test]
    async fn test_bootstrap_reports_ledger_errors() {
        let mut ledger = MockRangeLedger::new();
        ledger
            .expect_count_ranges()
            .returning(|| Err(LedgerError::Unavailable("down".to_string())));

        let result = RangeAllocator::bootstrap(Arc::new(ledger), SPACE, options()).await;

        assert!(matches!(result, Err(AllocationError::Bootstrap(_))));
    }

    #[test]
    fn test_from_ranges_skips_exhausted_ranges() {
        let ranges = vec![
            CounterRange::with_watermark(0, 100, Some(99)),
            CounterRange::new(100, 200),
        ];

        let allocator =
            RangeAllocator::from_ranges(accepting_ledger(), SPACE, ranges, options()).unwrap();

        assert_eq!(allocator.stats().idle, 1);
        assert!(allocator.range(0).is_none());
    }

    #[tokio::test]
    async fn test_borrow_draw_release_persists_before_idle() {
        let mut ledger = MockRangeLedger::new();
        ledger
            .expect_persist()
            .withf(|range| range.start == 0 && range.last_used == Some(0))
            .times(1)
            .returning(|_| Ok(()));
        let allocator = RangeAllocator::from_ranges(
            Arc::new(ledger),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let mut lease = allocator.borrow().await.unwrap();
        assert_eq!(allocator.stats().leased, 1);
        assert_eq!(allocator.stats().available_permits, 0);

        assert_eq!(lease.next().unwrap(), 0);
        allocator.release(lease).await.unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.available_permits, 1);
        assert_eq!(allocator.range(0).unwrap().last_used, Some(0));
    }

    #[tokio::test]
    async fn test_next_only_once_per_lease() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let mut lease = allocator.borrow().await.unwrap();
        lease.next().unwrap();
        assert_eq!(
            lease.next(),
            Err(UsageError::CounterAlreadyDrawn { start: 0 })
        );
        lease.release().await.unwrap();
        assert_eq!(allocator.range(0).unwrap().last_used, Some(0));
    }

    #[tokio::test]
    async fn test_release_without_draw_skips_persistence() {
        let mut ledger = MockRangeLedger::new();
        ledger.expect_persist().times(0);
        let allocator = RangeAllocator::from_ranges(
            Arc::new(ledger),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let lease = allocator.borrow().await.unwrap();
        lease.release().await.unwrap();

        assert_eq!(allocator.stats().idle, 1);
        assert_eq!(allocator.range(0).unwrap().last_used, None);
    }

    #[tokio::test]
    async fn test_release_to_foreign_allocator_is_rejected() {
        let first = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();
        let second = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let lease = first.borrow().await.unwrap();
        let result = second.release(lease).await;

        assert!(matches!(
            result,
            Err(AllocationError::Usage(UsageError::UnknownRange { start: 0 }))
        ));
        // The rejected lease went back to the allocator that issued it.
        assert_eq!(first.stats().idle, 1);
        assert_eq!(second.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_without_draw_returns_immediately() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let lease = allocator.borrow().await.unwrap();
        drop(lease);

        assert_eq!(allocator.stats().idle, 1);
        assert_eq!(allocator.stats().available_permits, 1);
    }

    #[tokio::test]
    async fn test_dropped_lease_after_draw_still_persists() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        {
            let mut lease = allocator.borrow().await.unwrap();
            lease.next().unwrap();
        }

        // The background release completes before the next lease is granted.
        let mut lease = allocator.borrow().await.unwrap();
        assert_eq!(lease.next().unwrap(), 1);
        lease.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_range_is_retired_on_release() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![
                CounterRange::with_watermark(0, 100, Some(98)),
                CounterRange::new(100, 200),
            ],
            options(),
        )
        .unwrap();

        let mut lease = allocator.borrow().await.unwrap();
        assert_eq!(lease.start(), 0);
        assert_eq!(lease.next().unwrap(), 99);
        lease.release().await.unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.retired, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.available_permits, 1);

        for expected in 100..105 {
            let mut lease = allocator.borrow().await.unwrap();
            assert_eq!(lease.start(), 100);
            assert_eq!(lease.next().unwrap(), expected);
            lease.release().await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_space_exhaustion_fails_fast() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::with_watermark(0, 100, Some(98))],
            options(),
        )
        .unwrap();

        let mut lease = allocator.borrow().await.unwrap();
        lease.next().unwrap();
        lease.release().await.unwrap();

        let result = allocator.borrow().await;
        assert!(matches!(result, Err(AllocationError::SpaceExhausted)));
    }

    #[tokio::test]
    async fn test_queued_borrower_wakes_with_exhaustion() {
        let allocator = Arc::new(
            RangeAllocator::from_ranges(
                accepting_ledger(),
                SPACE,
                vec![CounterRange::with_watermark(0, 100, Some(98))],
                options(),
            )
            .unwrap(),
        );

        let mut lease = allocator.borrow().await.unwrap();
        let waiter = tokio::spawn({
            let allocator = Arc::clone(&allocator);
            async move { allocator.borrow().await.map(|lease| lease.start()) }
        });
        tokio::task::yield_now().await;

        lease.next().unwrap();
        lease.release().await.unwrap();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(AllocationError::SpaceExhausted)));
    }

    #[tokio::test]
    async fn test_storage_failure_leaks_range() {
        let mut ledger = MockRangeLedger::new();
        ledger
            .expect_persist()
            .times(3)
            .returning(|_| Err(LedgerError::Unavailable("disk full".to_string())));
        let allocator = RangeAllocator::from_ranges(
            Arc::new(ledger),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let mut lease = allocator.borrow().await.unwrap();
        lease.next().unwrap();
        let result = lease.release().await;

        assert!(matches!(
            result,
            Err(AllocationError::Storage { start: 0, .. })
        ));
        let stats = allocator.stats();
        assert_eq!(stats.leaked, 1);
        assert_eq!(stats.idle, 0);
        assert!(matches!(
            allocator.borrow().await,
            Err(AllocationError::NoUsableRanges { leaked: 1 })
        ));
    }

    #[tokio::test]
    async fn test_storage_failure_recovers_within_retries() {
        let mut ledger = MockRangeLedger::new();
        let mut seq = Sequence::new();
        ledger
            .expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(LedgerError::Unavailable("timeout".to_string())));
        ledger
            .expect_persist()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));
        let allocator = RangeAllocator::from_ranges(
            Arc::new(ledger),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let mut lease = allocator.borrow().await.unwrap();
        lease.next().unwrap();
        lease.release().await.unwrap();

        assert_eq!(allocator.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_borrowers() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let mut lease = allocator.borrow().await.unwrap();
        allocator.shutdown();

        assert!(matches!(
            allocator.borrow().await,
            Err(AllocationError::ShuttingDown)
        ));
        lease.next().unwrap();
        lease.release().await.unwrap();
    }

    /// Ledger whose driver blows up mid-write.
    struct PanickingLedger;

    #[async_trait::async_trait]
    impl RangeLedger for PanickingLedger {
        async fn count_ranges(&self) -> Result<u64, LedgerError> {
            Ok(1)
        }

        async fn load_active_ranges(
            &self,
            _space_size: u64,
        ) -> Result<Vec<CounterRange>, LedgerError> {
            Ok(vec![CounterRange::new(0, 100)])
        }

        async fn seed_all_ranges(
            &self,
            range_size: u64,
            space_size: u64,
        ) -> Result<Vec<CounterRange>, LedgerError> {
            Ok(crate::domain::entities::partition(range_size, space_size))
        }

        async fn persist(&self, _range: &CounterRange) -> Result<(), LedgerError> {
            panic!("driver bug")
        }

        async fn list_ranges(&self) -> Result<Vec<CounterRange>, LedgerError> {
            Ok(vec![])
        }
    }

    /// Moves an idle range's watermark to its ceiling behind the allocator's back.
    fn exhaust_in_place(allocator: &RangeAllocator, start: u64) {
        let mut set = allocator.shared.lock();
        let slot = set.slots.get_mut(&start).unwrap();
        slot.range.last_used = Some(slot.range.ceiling(SPACE));
    }

    #[tokio::test]
    async fn test_panicking_ledger_leaks_range_instead_of_orphaning_it() {
        let allocator = RangeAllocator::from_ranges(
            Arc::new(PanickingLedger),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let mut lease = allocator.borrow().await.unwrap();
        lease.next().unwrap();
        let result = lease.release().await;
        assert!(matches!(result, Err(AllocationError::ReleaseAborted(_))));

        let stats = allocator.stats();
        assert_eq!(stats.leased, 0);
        assert_eq!(stats.leaked, 1);
        assert_eq!(stats.available_permits, 0);

        let next = tokio::time::timeout(Duration::from_secs(1), allocator.borrow()).await;
        assert!(matches!(
            next,
            Ok(Err(AllocationError::NoUsableRanges { leaked: 1 }))
        ));
    }

    #[tokio::test]
    async fn test_panicking_ledger_leaves_other_ranges_in_rotation() {
        let allocator = RangeAllocator::from_ranges(
            Arc::new(PanickingLedger),
            SPACE,
            vec![CounterRange::new(0, 100), CounterRange::new(100, 200)],
            options(),
        )
        .unwrap();

        {
            let mut lease = allocator.borrow().await.unwrap();
            lease.next().unwrap();
        }
        // The dropped lease panics on a background task.
        let lease = allocator.borrow().await.unwrap();
        assert_eq!(lease.start(), 100);
        lease.release().await.unwrap();

        tokio::time::timeout(Duration::from_secs(1), async {
            while allocator.stats().leaked == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        let stats = allocator.stats();
        assert_eq!(stats.leaked, 1);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.available_permits, 1);
    }

    #[tokio::test]
    async fn test_stray_permit_is_reported_not_retried() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();

        let lease = allocator.borrow().await.unwrap();
        allocator.shared.permits.add_permits(1);

        let result = tokio::time::timeout(Duration::from_secs(1), allocator.borrow()).await;
        assert!(matches!(result, Ok(Err(AllocationError::Desynchronized))));
        assert_eq!(allocator.stats().available_permits, 0);

        lease.release().await.unwrap();
        let lease = allocator.borrow().await.unwrap();
        assert_eq!(lease.start(), 0);
        lease.release().await.unwrap();
    }

    #[tokio::test]
    async fn test_exhausted_idle_range_is_retired_during_selection() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100), CounterRange::new(100, 200)],
            options(),
        )
        .unwrap();
        exhaust_in_place(&allocator, 0);

        let lease = allocator.borrow().await.unwrap();
        assert_eq!(lease.start(), 100);

        let stats = allocator.stats();
        assert_eq!(stats.retired, 1);
        assert_eq!(stats.leased, 1);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.available_permits, 0);

        lease.release().await.unwrap();
        assert_eq!(allocator.stats().available_permits, 1);
    }

    #[tokio::test]
    async fn test_last_idle_range_exhausted_during_selection() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100)],
            options(),
        )
        .unwrap();
        exhaust_in_place(&allocator, 0);

        assert!(matches!(
            allocator.borrow().await,
            Err(AllocationError::SpaceExhausted)
        ));
        assert_eq!(allocator.stats().retired, 1);
        assert_eq!(allocator.stats().available_permits, 0);
    }

    #[tokio::test]
    async fn test_borrower_requeues_after_spending_its_permit_on_retirement() {
        let allocator = RangeAllocator::from_ranges(
            accepting_ledger(),
            SPACE,
            vec![CounterRange::new(0, 100), CounterRange::new(100, 200)],
            options(),
        )
        .unwrap();

        let held = allocator.borrow().await.unwrap();
        assert_eq!(held.start(), 0);
        exhaust_in_place(&allocator, 100);

        // The only free permit goes with the retired range; the borrower waits.
        let waiting = tokio::time::timeout(Duration::from_millis(50), allocator.borrow()).await;
        assert!(waiting.is_err());
        assert_eq!(allocator.stats().retired, 1);
        assert_eq!(allocator.stats().available_permits, 0);

        held.release().await.unwrap();
        let lease = allocator.borrow().await.unwrap();
        assert_eq!(lease.start(), 0);
        lease.release().await.unwrap();
    }
}
