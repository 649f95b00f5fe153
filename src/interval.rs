//! Byte intervals and the merged interval set backing the cache index.
//!
//! [`IntervalSet`] keeps its members sorted, disjoint and non-adjacent: every
//! insert coalesces the new interval with any member it overlaps or touches.
//! Lookups use binary search on the member boundaries, so `insert`, `gaps`
//! and `covered` cost `O(log n + k)` for `k` members touched.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// Half-open byte range `[start, end)` with `end > start`
///
/// An interval whose end is `u64::MAX` is *open-ended*: it stands for
/// "from `start` to the end of the resource, whatever that turns out to be".
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawInterval", into = "RawInterval")]
pub struct Interval {
    start: u64,
    end: u64,
}

#[derive(Serialize, Deserialize)]
struct RawInterval {
    start: u64,
    end: u64,
}

impl TryFrom<RawInterval> for Interval {
    type Error = Error;

    fn try_from(raw: RawInterval) -> Result<Self> {
        Interval::new(raw.start, raw.end)
    }
}

impl From<Interval> for RawInterval {
    fn from(interval: Interval) -> Self {
        Self {
            start: interval.start,
            end: interval.end,
        }
    }
}

impl Interval {
    /// Create `[start, end)`; rejects empty and inverted ranges
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if end <= start {
            return Err(Error::InvalidInterval { start, end });
        }
        Ok(Self { start, end })
    }

    /// Create `[offset, offset + length)`; rejects `length == 0`
    pub fn from_offset(offset: u64, length: u64) -> Result<Self> {
        Self::new(offset, offset.saturating_add(length))
    }

    /// Create the open-ended interval `[start, ∞)`
    pub fn open_ended(start: u64) -> Result<Self> {
        Self::new(start, u64::MAX)
    }

    /// First byte offset (inclusive)
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last byte offset (exclusive)
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of bytes in the interval
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Whether the end is still unknown
    pub fn is_open_ended(&self) -> bool {
        self.end == u64::MAX
    }

    /// Whether `offset` lies inside the interval
    pub fn contains(&self, offset: u64) -> bool {
        offset >= self.start && offset < self.end
    }

    /// Overlapping part of two intervals, if any
    pub fn intersect(&self, other: &Interval) -> Option<Interval> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        Interval::new(start, end).ok()
    }

    /// Cut the interval at `limit`; `None` if nothing remains below it
    pub fn clamp_end(&self, limit: u64) -> Option<Interval> {
        Interval::new(self.start, self.end.min(limit)).ok()
    }

    /// The part of the interval from `offset` onwards; `None` once exhausted
    pub fn remainder_from(&self, offset: u64) -> Option<Interval> {
        Interval::new(self.start.max(offset), self.end).ok()
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_open_ended() {
            write!(f, "[{}, ..)", self.start)
        } else {
            write!(f, "[{}, {})", self.start, self.end)
        }
    }
}

/// Sorted set of disjoint, non-adjacent intervals
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IntervalSet {
    intervals: Vec<Interval>,
}

impl IntervalSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Members in ascending order
    pub fn intervals(&self) -> &[Interval] {
        &self.intervals
    }

    /// Whether no bytes are recorded
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Merge `interval` into the set, coalescing overlapping or touching members
    pub fn insert(&mut self, interval: Interval) {
        // first member that overlaps or touches on the left
        let first = self
            .intervals
            .partition_point(|member| member.end < interval.start);
        // first member lying strictly to the right (no contact)
        let last = self
            .intervals
            .partition_point(|member| member.start <= interval.end);

        if first == last {
            self.intervals.insert(first, interval);
            return;
        }

        let merged = Interval {
            start: interval.start.min(self.intervals[first].start),
            end: interval.end.max(self.intervals[last - 1].end),
        };
        self.intervals.splice(first..last, std::iter::once(merged));
    }

    /// Cached sub-intervals of `within`, ascending
    pub fn covered(&self, within: Interval) -> Vec<Interval> {
        self.overlapping(within)
            .iter()
            .filter_map(|member| member.intersect(&within))
            .collect()
    }

    /// Maximal uncached sub-intervals of `within`, ascending
    pub fn gaps(&self, within: Interval) -> Vec<Interval> {
        let mut gaps = Vec::new();
        let mut cursor = within.start;

        for member in self.overlapping(within) {
            if member.start > cursor {
                gaps.push(Interval {
                    start: cursor,
                    end: member.start,
                });
            }
            cursor = cursor.max(member.end);
        }

        if cursor < within.end {
            gaps.push(Interval {
                start: cursor,
                end: within.end,
            });
        }

        gaps
    }

    /// Whether every byte of `within` is cached
    pub fn covers(&self, within: Interval) -> bool {
        self.gaps(within).is_empty()
    }

    /// Length of the contiguous cached prefix starting at offset 0
    pub fn downloaded_byte_count(&self) -> u64 {
        match self.intervals.first() {
            Some(first) if first.start == 0 => first.len(),
            _ => 0,
        }
    }

    /// Sum of all cached bytes
    pub fn total_byte_count(&self) -> u64 {
        self.intervals.iter().map(Interval::len).sum()
    }

    fn overlapping(&self, within: Interval) -> &[Interval] {
        let from = self
            .intervals
            .partition_point(|member| member.end <= within.start);
        let to = self
            .intervals
            .partition_point(|member| member.start < within.end);
        &self.intervals[from..to.max(from)]
    }
}
