//! Ordered set of disjoint byte intervals over the weave address space.
//!
//! Intervals are `(start, end]`: offsets name the last byte of a range, so
//! a chunk spanning offsets `start+1 ..= end` is the interval `(start, end]`,
//! matching weave addressing everywhere else in the engine. Internally the
//! set is a `BTreeMap` keyed by interval end, which makes point queries and
//! neighbour scans a single `range` call.

use std::collections::BTreeMap;
use std::ops::Bound;

use serde::{Deserialize, Serialize};

/// Disjoint, non-touching `(start, end]` intervals over u64 offsets.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntervalSet {
    /// end → start.
    map: BTreeMap<u64, u64>,
}

impl IntervalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from `(start, end)` pairs, merging as needed.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u64, u64)>) -> Self {
        let mut set = Self::new();
        for (start, end) in pairs {
            set.add(start, end);
        }
        set
    }

    /// Add `(start, end]`. Overlapping and touching intervals are merged.
    pub fn add(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        let mut new_start = start;
        let mut new_end = end;
        // Any interval with its end >= start either overlaps or touches us;
        // collect until one starts past our end.
        let absorbed: Vec<u64> = self
            .map
            .range((Bound::Included(start), Bound::Unbounded))
            .take_while(|(_, &s)| s <= end)
            .map(|(&e, &s)| {
                new_start = new_start.min(s);
                new_end = new_end.max(e);
                e
            })
            .collect();
        for e in absorbed {
            self.map.remove(&e);
        }
        self.map.insert(new_end, new_start);
    }

    /// Remove `(start, end]` from the set, splitting intervals as needed.
    pub fn delete(&mut self, start: u64, end: u64) {
        if start >= end {
            return;
        }
        // Intervals intersecting (start, end]: end > start and start < end.
        let affected: Vec<(u64, u64)> = self
            .map
            .range((Bound::Excluded(start), Bound::Unbounded))
            .take_while(|(_, &s)| s < end)
            .map(|(&e, &s)| (s, e))
            .collect();
        for (s, e) in affected {
            self.map.remove(&e);
            if s < start {
                self.map.insert(start, s);
            }
            if e > end {
                self.map.insert(e, end);
            }
        }
    }

    /// Drop everything above offset `at` (every byte with offset > `at`).
    pub fn cut(&mut self, at: u64) {
        self.delete(at, u64::MAX);
    }

    /// Whether offset `x` lies inside the set (some interval `(s, e]` has
    /// `s < x <= e`).
    pub fn is_inside(&self, x: u64) -> bool {
        self.map
            .range((Bound::Included(x), Bound::Unbounded))
            .next()
            .is_some_and(|(_, &s)| s < x)
    }

    /// The interval containing offset `x`, if any.
    pub fn find(&self, x: u64) -> Option<(u64, u64)> {
        self.map
            .range((Bound::Included(x), Bound::Unbounded))
            .next()
            .and_then(|(&e, &s)| (s < x).then_some((s, e)))
    }

    /// Total number of bytes covered.
    pub fn sum(&self) -> u64 {
        self.map.iter().map(|(e, s)| e - s).sum()
    }

    /// Number of disjoint intervals.
    pub fn count(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Intervals in ascending order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u64, u64)> + '_ {
        self.map.iter().map(|(&e, &s)| (s, e))
    }

    /// The pieces of `other` this set does not cover — the byte ranges a
    /// peer advertises that we still need.
    pub fn outer_join(&self, other: &IntervalSet) -> IntervalSet {
        let mut result = IntervalSet::new();
        for (start, end) in other.iter() {
            // Carve our intervals out of (start, end].
            let mut pos = start;
            for (s, e) in self
                .map
                .range((Bound::Excluded(start), Bound::Unbounded))
                .take_while(|(_, &s)| s < end)
                .map(|(&e, &s)| (s, e))
            {
                if s > pos {
                    result.add(pos, s.min(end));
                }
                pos = pos.max(e);
                if pos >= end {
                    break;
                }
            }
            if pos < end {
                result.add(pos, end);
            }
        }
        result
    }

    /// Merge the closest neighbours until `count() <= max_count`. Returns
    /// the gaps that were swallowed (now covered by the set although no
    /// data backs them), largest last.
    pub fn compact(&mut self, max_count: usize) -> Vec<(u64, u64)> {
        if self.count() <= max_count {
            return Vec::new();
        }
        let excess = self.count() - max_count;

        // Gap between interval i and i+1: (end_i, start_{i+1}].
        let intervals: Vec<(u64, u64)> = self.iter().collect();
        let mut gaps: Vec<(u64, u64, u64)> = intervals
            .windows(2)
            .map(|w| {
                let (_, left_end) = w[0];
                let (right_start, _) = w[1];
                (right_start - left_end, left_end, right_start)
            })
            .collect();
        gaps.sort_unstable();
        gaps.truncate(excess);

        let mut swallowed: Vec<(u64, u64)> = gaps.into_iter().map(|(_, s, e)| (s, e)).collect();
        swallowed.sort_unstable_by_key(|&(s, e)| e - s);
        for &(s, e) in &swallowed {
            self.add(s, e);
        }
        swallowed
    }
}
