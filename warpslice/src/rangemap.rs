//! An address-keyed index of disjoint half-open ranges.

use std::collections::BTreeMap;

/// Maps disjoint `[start, end)` address ranges to values.
///
/// Ranges are keyed by their start address, so lookups and updates
/// are logarithmic in the number of ranges. Inserting a range that
/// overlaps a stored one is a contract violation and panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeMap<T> {
    // start -> (end, value)
    ranges: BTreeMap<u64, (u64, T)>,
}

impl<T> Default for RangeMap<T> {
    fn default() -> Self {
        Self {
            ranges: BTreeMap::new(),
        }
    }
}

impl<T> RangeMap<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `[start, start + size)` with `value`.
    ///
    /// # Panics
    ///
    /// Panics if the range overlaps a stored range, or if its end does
    /// not fit in 64 bits. Adjacent ranges do not overlap. An empty
    /// range overlaps any range with the same start.
    pub fn insert(&mut self, start: u64, size: u64, value: T) {
        let end = start
            .checked_add(size)
            .unwrap_or_else(|| panic!("range {start:#x}+{size:#x} overflows"));

        if let Some(&(prev_end, _)) = self.ranges.get(&start) {
            panic!("range [{start:#x}, {end:#x}) overlaps [{start:#x}, {prev_end:#x})");
        }

        // The last range starting before `end` (or at `start`, for an
        // empty range) is the only one that can overlap.
        let probe = end.max(start.saturating_add(1));
        if let Some((&prev_start, &(prev_end, _))) = self.ranges.range(..probe).next_back() {
            assert!(
                prev_end <= start,
                "range [{start:#x}, {end:#x}) overlaps [{prev_start:#x}, {prev_end:#x})"
            );
        }
        self.ranges.insert(start, (end, value));
    }

    /// Remove the range containing `addr`, returning its value.
    pub fn remove_containing(&mut self, addr: u64) -> Option<T> {
        let start = self.find(addr)?;
        self.ranges.remove(&start).map(|(_, value)| value)
    }

    /// The value of the range containing `addr`.
    pub fn get(&self, addr: u64) -> Option<&T> {
        let start = self.find(addr)?;
        self.ranges.get(&start).map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Iterate over `(start, end, value)` in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, &T)> {
        self.ranges
            .iter()
            .map(|(&start, (end, value))| (start, *end, value))
    }

    fn find(&self, addr: u64) -> Option<u64> {
        let (&start, &(end, _)) = self.ranges.range(..=addr).next_back()?;
        (addr < end).then_some(start)
    }
}
