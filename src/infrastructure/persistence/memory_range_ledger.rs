//! In-process range ledger.
//!
//! Keeps the ledger in a map guarded by a mutex. Nothing survives the process,
//! so it suits tests and throwaway deployments; sharing one instance between
//! two allocators simulates a restart against the same durable store.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::domain::entities::{CounterRange, partition};
use crate::domain::repositories::{LedgerError, RangeLedger};

#[derive(Default)]
pub struct MemoryRangeLedger {
    ranges: Mutex<BTreeMap<u64, CounterRange>>,
    failing_persists: AtomicUsize,
    persist_calls: AtomicUsize,
}

impl MemoryRangeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` calls to [`RangeLedger::persist`] fail.
    pub fn fail_next_persists(&self, count: usize) {
        self.failing_persists.store(count, Ordering::SeqCst);
    }

    /// Number of persist calls received so far, failed ones included.
    pub fn persist_calls(&self) -> usize {
        self.persist_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<u64, CounterRange>> {
        self.ranges.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RangeLedger for MemoryRangeLedger {
    async fn count_ranges(&self) -> Result<u64, LedgerError> {
        Ok(self.lock().len() as u64)
    }

    async fn load_active_ranges(&self, space_size: u64) -> Result<Vec<CounterRange>, LedgerError> {
        Ok(self
            .lock()
            .values()
            .filter(|range| !range.is_exhausted(space_size))
            .cloned()
            .collect())
    }

    async fn seed_all_ranges(
        &self,
        range_size: u64,
        space_size: u64,
    ) -> Result<Vec<CounterRange>, LedgerError> {
        if range_size == 0 || range_size > space_size {
            return Err(LedgerError::OutOfRange(range_size));
        }

        let mut ranges = self.lock();
        if let Some(stray) = ranges
            .values()
            .find(|range| !range.belongs_to_partition(range_size, space_size))
        {
            return Err(LedgerError::PartitionMismatch {
                start: stray.start,
                range_size,
                space_size,
            });
        }
        for range in partition(range_size, space_size) {
            ranges.entry(range.start).or_insert(range);
        }
        Ok(ranges.values().cloned().collect())
    }

    async fn persist(&self, range: &CounterRange) -> Result<(), LedgerError> {
        self.persist_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_persists
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(LedgerError::Unavailable("injected persist failure".to_string()));
        }

        let mut ranges = self.lock();
        let stored = ranges
            .entry(range.start)
            .or_insert_with(|| CounterRange::new(range.start, range.end));
        // Watermarks only move forward.
        if range.last_used > stored.last_used {
            stored.last_used = range.last_used;
        }
        Ok(())
    }

    async fn list_ranges(&self) -> Result<Vec<CounterRange>, LedgerError> {
        Ok(self.lock().values().cloned().collect())
    }
}
