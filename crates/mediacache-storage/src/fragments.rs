#![forbid(unsafe_code)]

//! Fragment tracking for cached byte ranges.
//!
//! [`FragmentStore`] records which byte ranges of a resource are fully present
//! in the local cache file. It is backed by `rangemap::RangeSet`, which keeps
//! the stored ranges sorted and merges overlapping and adjacent inserts, so
//! the store's invariant (sorted, pairwise non-overlapping, non-adjacent)
//! holds by construction.

use std::ops::Range;

use rangemap::RangeSet;
use serde::{Deserialize, Serialize};

/// Sorted, merged set of cached byte ranges for one resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FragmentStore {
    ranges: RangeSet<u64>,
}

impl FragmentStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            ranges: RangeSet::new(),
        }
    }

    /// Record a fully-cached range.
    ///
    /// Overlapping and end-to-end adjacent ranges are merged into a single
    /// fragment. Empty ranges are ignored.
    pub fn add(&mut self, range: Range<u64>) {
        if !range.is_empty() {
            self.ranges.insert(range);
        }
    }

    /// All fragments, ascending by offset.
    pub fn fragments(&self) -> Vec<Range<u64>> {
        self.ranges.iter().cloned().collect()
    }

    /// Intersections of the stored fragments with `range`, ascending and
    /// clamped to `range`.
    pub fn covered_within(&self, range: &Range<u64>) -> Vec<Range<u64>> {
        if range.is_empty() {
            return Vec::new();
        }
        self.ranges
            .overlapping(range)
            .map(|frag| frag.start.max(range.start)..frag.end.min(range.end))
            .filter(|r| !r.is_empty())
            .collect()
    }

    /// Sub-ranges of `range` not covered by any fragment, ascending.
    pub fn gaps_within(&self, range: &Range<u64>) -> Vec<Range<u64>> {
        if range.is_empty() {
            return Vec::new();
        }
        self.ranges.gaps(range).collect()
    }

    /// Whether `range` is fully covered.
    #[must_use]
    pub fn contains(&self, range: &Range<u64>) -> bool {
        !range.is_empty() && !self.ranges.gaps(range).any(|_| true)
    }

    /// Total number of cached bytes.
    #[must_use]
    pub fn cached_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Drop all fragments.
    pub fn clear(&mut self) {
        self.ranges = RangeSet::new();
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn store_with(ranges: &[Range<u64>]) -> FragmentStore {
        let mut s = FragmentStore::new();
        for r in ranges {
            s.add(r.clone());
        }
        s
    }

    /// Sorted, non-overlapping, non-adjacent — for any insertion order.
    fn assert_invariant(s: &FragmentStore) {
        let frags = s.fragments();
        for pair in frags.windows(2) {
            assert!(
                pair[0].end < pair[1].start,
                "fragments {:?} and {:?} overlap or touch",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn add_disjoint_keeps_both() {
        let s = store_with(&[0..100, 200..300]);
        assert_eq!(s.fragments(), vec![0..100, 200..300]);
        assert_invariant(&s);
    }

    #[test]
    fn add_adjacent_merges() {
        let s = store_with(&[0..100, 100..200]);
        assert_eq!(s.fragments(), vec![0..200]);
    }

    #[test]
    fn add_overlapping_merges() {
        let s = store_with(&[0..150, 100..200]);
        assert_eq!(s.fragments(), vec![0..200]);
    }

    #[test]
    fn insert_bridging_three_fragments_yields_one() {
        let mut s = store_with(&[0..100, 300..400, 900..1000]);
        s.add(100..900);
        assert_eq!(s.fragments(), vec![0..1000]);
    }

    #[test]
    fn out_of_order_inserts_stay_sorted() {
        let s = store_with(&[500..600, 0..100, 250..300]);
        assert_eq!(s.fragments(), vec![0..100, 250..300, 500..600]);
        assert_invariant(&s);
    }

    #[test]
    fn empty_range_ignored() {
        let mut s = FragmentStore::new();
        s.add(50..50);
        assert!(s.is_empty());
    }

    #[rstest]
    #[case::union_preserved(vec![0..10, 5..20, 30..40, 19..31], vec![0..41])]
    #[case::duplicates_collapse(vec![0..10, 0..10, 0..10], vec![0..10])]
    #[case::nested(vec![0..100, 20..30], vec![0..100])]
    fn merge_sequences(#[case] inserts: Vec<Range<u64>>, #[case] expected: Vec<Range<u64>>) {
        let mut s = FragmentStore::new();
        let mut last = s.fragments();
        for (i, r) in inserts.into_iter().enumerate() {
            s.add(r.clone());
            assert_invariant(&s);
            // Union only ever grows.
            let now = s.fragments();
            assert!(
                now.iter().map(|r| r.end - r.start).sum::<u64>()
                    >= last.iter().map(|r| r.end - r.start).sum::<u64>(),
                "coverage shrank after insert #{i} of {r:?}"
            );
            last = now;
        }
        assert_eq!(s.fragments(), expected);
    }

    #[test]
    fn covered_within_clamps_to_query() {
        let s = store_with(&[0..500]);
        assert_eq!(s.covered_within(&(100..1000)), vec![100..500]);
    }

    #[test]
    fn gaps_within_reports_uncovered() {
        let s = store_with(&[0..30, 70..100]);
        assert_eq!(s.gaps_within(&(0..100)), vec![30..70]);
        assert_eq!(s.gaps_within(&(0..120)), vec![30..70, 100..120]);
    }

    #[test]
    fn covered_and_gaps_on_empty_query() {
        let s = store_with(&[0..100]);
        assert!(s.covered_within(&(50..50)).is_empty());
        assert!(s.gaps_within(&(50..50)).is_empty());
    }

    #[test]
    fn contains_full_and_partial() {
        let s = store_with(&[0..100, 200..300]);
        assert!(s.contains(&(10..90)));
        assert!(!s.contains(&(50..250)));
        assert!(!s.contains(&(0..0)));
    }

    #[test]
    fn cached_bytes_sums_fragments() {
        let s = store_with(&[0..100, 200..250]);
        assert_eq!(s.cached_bytes(), 150);
    }

    #[test]
    fn clear_empties_store() {
        let mut s = store_with(&[0..100]);
        s.clear();
        assert!(s.is_empty());
        assert_eq!(s.cached_bytes(), 0);
    }
}
