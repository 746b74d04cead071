//! Counter range entity: one contiguous slice of the counter space.

/// A contiguous, exclusively-lent slice `[start, end)` of the counter space.
///
/// `last_used` is the watermark: the highest counter already issued from this
/// range. `None` means nothing has been issued yet (the `start - 1` watermark).
/// `end` is exclusive and already clamped to the size of the code space, so
/// the final range of a partition may be shorter than the others.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterRange {
    pub start: u64,
    pub end: u64,
    pub last_used: Option<u64>,
}

impl CounterRange {
    /// Creates an untouched range covering `[start, end)`.
    pub fn new(start: u64, end: u64) -> Self {
        Self {
            start,
            end,
            last_used: None,
        }
    }

    /// Restores a range with a previously persisted watermark.
    pub fn with_watermark(start: u64, end: u64, last_used: Option<u64>) -> Self {
        Self {
            start,
            end,
            last_used,
        }
    }

    /// Highest counter this range may ever issue, bounded by `space_size - 1`.
    pub fn ceiling(&self, space_size: u64) -> u64 {
        self.end.min(space_size).saturating_sub(1)
    }

    /// Returns true once the watermark has reached the range's own ceiling or
    /// the ceiling of the whole space.
    pub fn is_exhausted(&self, space_size: u64) -> bool {
        if self.end <= self.start || space_size <= self.start {
            return true;
        }
        self.last_used
            .is_some_and(|used| used >= self.ceiling(space_size))
    }

    /// Advances the watermark by one and returns the new counter.
    ///
    /// Returns `None` when the range is exhausted; the watermark is then left
    /// untouched.
    pub fn advance(&mut self, space_size: u64) -> Option<u64> {
        if self.is_exhausted(space_size) {
            return None;
        }
        let next = self.last_used.map_or(self.start, |used| used + 1);
        self.last_used = Some(next);
        Some(next)
    }

    /// Returns true if this range is exactly one of the ranges
    /// [`partition`]`(range_size, space_size)` produces.
    pub fn belongs_to_partition(&self, range_size: u64, space_size: u64) -> bool {
        range_size != 0
            && self.start < space_size
            && self.start % range_size == 0
            && self.end == self.start.saturating_add(range_size).min(space_size)
    }

    /// Number of counters still available in this range.
    pub fn remaining(&self, space_size: u64) -> u64 {
        if self.is_exhausted(space_size) {
            return 0;
        }
        let next = self.last_used.map_or(self.start, |used| used + 1);
        self.ceiling(space_size) - next + 1
    }
}

/// Deterministically partitions `[0, space_size)` into ranges of `range_size`.
///
/// Starts are `0, range_size, 2 * range_size, ...`; the last range is clamped
/// to `space_size`.
pub fn partition(range_size: u64, space_size: u64) -> Vec<CounterRange> {
    if range_size == 0 {
        return Vec::new();
    }

    let mut ranges = Vec::with_capacity(space_size.div_ceil(range_size) as usize);
    let mut start = 0u64;
    while start < space_size {
        let end = start.saturating_add(range_size).min(space_size);
        ranges.push(CounterRange::new(start, end));
        start = end;
    }
    ranges
}
