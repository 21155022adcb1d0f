use splice_protocol::ByteRange;

use crate::UploadError;

/// Result of classifying or inserting a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The range was new. Carries the merged interval it became part of.
    Added(ByteRange),
    /// Every byte of the range was already received.
    Duplicate,
    /// The range partially intersects received bytes.
    Overlap,
}

/// Disjoint set of received byte ranges over `[0, total_size)`.
///
/// Intervals are kept sorted by `start`, and intervals that overlap or touch
/// are merged, so the set is always in its minimal form. A complete upload
/// is therefore a single interval `[0, total_size)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    total_size: u64,
    ranges: Vec<ByteRange>,
}

impl RangeSet {
    /// Creates an empty set bounded by `total_size`.
    pub fn new(total_size: u64) -> Self {
        Self {
            total_size,
            ranges: Vec::new(),
        }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Stored intervals in ascending order.
    pub fn ranges(&self) -> &[ByteRange] {
        &self.ranges
    }

    /// Decides what inserting `[start, end)` would do, without mutating.
    pub fn classify(&self, start: u64, end: u64) -> Result<InsertOutcome, UploadError> {
        let range = self.checked(start, end)?;
        let (lo, hi) = self.neighbors(range);
        Ok(self.outcome(range, lo, hi))
    }

    /// Inserts `[start, end)`.
    ///
    /// `Duplicate` and `Overlap` leave the set unchanged.
    pub fn insert(&mut self, start: u64, end: u64) -> Result<InsertOutcome, UploadError> {
        let range = self.checked(start, end)?;
        let (lo, hi) = self.neighbors(range);
        let outcome = self.outcome(range, lo, hi);
        if let InsertOutcome::Added(merged) = outcome {
            self.ranges.splice(lo..hi, std::iter::once(merged));
        }
        Ok(outcome)
    }

    /// Returns `true` if every byte of `range` has been received.
    pub fn contains(&self, range: &ByteRange) -> bool {
        if range.is_empty() {
            return true;
        }
        let idx = self.ranges.partition_point(|r| r.end <= range.start);
        self.ranges.get(idx).is_some_and(|r| r.contains(range))
    }

    /// Returns `true` once the whole of `[0, total_size)` has been received.
    pub fn is_complete(&self) -> bool {
        match self.ranges.as_slice() {
            [only] => only.start == 0 && only.end == self.total_size,
            _ => false,
        }
    }

    /// Total number of received bytes.
    pub fn covered_bytes(&self) -> u64 {
        self.ranges.iter().map(ByteRange::len).sum()
    }

    /// Gaps still missing, in ascending order.
    pub fn missing(&self) -> Vec<ByteRange> {
        let mut gaps = Vec::with_capacity(self.ranges.len() + 1);
        let mut cursor = 0;
        for r in &self.ranges {
            if r.start > cursor {
                gaps.push(ByteRange::new(cursor, r.start));
            }
            cursor = r.end;
        }
        if cursor < self.total_size {
            gaps.push(ByteRange::new(cursor, self.total_size));
        }
        gaps
    }

    fn checked(&self, start: u64, end: u64) -> Result<ByteRange, UploadError> {
        if start >= end {
            return Err(UploadError::InvalidRange(format!(
                "empty or reversed range [{start}, {end})"
            )));
        }
        if end > self.total_size {
            return Err(UploadError::InvalidRange(format!(
                "range [{start}, {end}) exceeds total size {}",
                self.total_size
            )));
        }
        Ok(ByteRange::new(start, end))
    }

    /// Index span `[lo, hi)` of stored intervals that touch or intersect
    /// `range`.
    fn neighbors(&self, range: ByteRange) -> (usize, usize) {
        let lo = self.ranges.partition_point(|r| r.end < range.start);
        let hi = lo
            + self.ranges[lo..]
                .iter()
                .take_while(|r| r.start <= range.end)
                .count();
        (lo, hi)
    }

    fn outcome(&self, range: ByteRange, lo: usize, hi: usize) -> InsertOutcome {
        let near = &self.ranges[lo..hi];
        if near.iter().any(|r| r.contains(&range)) {
            return InsertOutcome::Duplicate;
        }
        if near.iter().any(|r| r.intersects(&range)) {
            return InsertOutcome::Overlap;
        }
        // Only touching neighbors remain; they fold into the new interval.
        let start = near.first().map_or(range.start, |r| r.start.min(range.start));
        let end = near.last().map_or(range.end, |r| r.end.max(range.end));
        InsertOutcome::Added(ByteRange::new(start, end))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(start: u64, end: u64) -> InsertOutcome {
        InsertOutcome::Added(ByteRange::new(start, end))
    }

    #[test]
    fn new_set_is_empty() {
        let set = RangeSet::new(12);
        assert!(!set.is_complete());
        assert_eq!(set.covered_bytes(), 0);
        assert_eq!(set.missing(), vec![ByteRange::new(0, 12)]);
    }

    #[test]
    fn insert_then_duplicate_is_idempotent() {
        let mut set = RangeSet::new(12);
        assert_eq!(set.insert(0, 6).unwrap(), added(0, 6));
        let before = set.clone();
        assert_eq!(set.insert(0, 6).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(set, before);
    }

    #[test]
    fn partial_overlap_is_rejected_without_mutation() {
        let mut set = RangeSet::new(12);
        set.insert(0, 6).unwrap();
        let before = set.clone();
        assert_eq!(set.insert(3, 9).unwrap(), InsertOutcome::Overlap);
        assert_eq!(set, before);
    }

    #[test]
    fn sub_range_of_merged_interval_is_duplicate() {
        let mut set = RangeSet::new(12);
        set.insert(0, 6).unwrap();
        set.insert(6, 12).unwrap();
        assert_eq!(set.insert(3, 9).unwrap(), InsertOutcome::Duplicate);
    }

    #[test]
    fn range_spanning_a_gap_overlaps() {
        let mut set = RangeSet::new(30);
        set.insert(0, 10).unwrap();
        set.insert(20, 30).unwrap();
        assert_eq!(set.insert(5, 25).unwrap(), InsertOutcome::Overlap);
        assert_eq!(set.insert(10, 25).unwrap(), InsertOutcome::Overlap);
    }

    #[test]
    fn adjacent_ranges_merge() {
        let mut set = RangeSet::new(12);
        assert_eq!(set.insert(6, 12).unwrap(), added(6, 12));
        assert_eq!(set.insert(0, 6).unwrap(), added(0, 12));
        assert_eq!(set.ranges(), &[ByteRange::new(0, 12)]);
        assert!(set.is_complete());
    }

    #[test]
    fn gap_fill_merges_both_neighbors() {
        let mut set = RangeSet::new(30);
        set.insert(0, 10).unwrap();
        set.insert(20, 30).unwrap();
        assert_eq!(set.ranges().len(), 2);
        assert_eq!(set.insert(10, 20).unwrap(), added(0, 30));
        assert_eq!(set.ranges().len(), 1);
        assert!(set.is_complete());
    }

    #[test]
    fn disjoint_ranges_stay_sorted() {
        let mut set = RangeSet::new(100);
        set.insert(50, 60).unwrap();
        set.insert(10, 20).unwrap();
        set.insert(80, 90).unwrap();
        assert_eq!(
            set.ranges(),
            &[
                ByteRange::new(10, 20),
                ByteRange::new(50, 60),
                ByteRange::new(80, 90)
            ]
        );
        assert_eq!(set.covered_bytes(), 30);
        assert_eq!(
            set.missing(),
            vec![
                ByteRange::new(0, 10),
                ByteRange::new(20, 50),
                ByteRange::new(60, 80),
                ByteRange::new(90, 100)
            ]
        );
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let pieces = [(0, 3), (3, 5), (5, 9), (9, 10), (10, 16)];
        let orders: [[usize; 5]; 4] = [
            [0, 1, 2, 3, 4],
            [4, 3, 2, 1, 0],
            [2, 0, 4, 1, 3],
            [1, 3, 0, 4, 2],
        ];
        for order in orders {
            let mut set = RangeSet::new(16);
            for (i, idx) in order.iter().enumerate() {
                let (s, e) = pieces[*idx];
                assert!(matches!(set.insert(s, e).unwrap(), InsertOutcome::Added(_)));
                assert_eq!(set.is_complete(), i == order.len() - 1, "order {order:?}");
            }
            assert_eq!(set.ranges(), &[ByteRange::new(0, 16)]);
        }
    }

    #[test]
    fn out_of_bounds_is_invalid() {
        let mut set = RangeSet::new(12);
        assert!(matches!(
            set.insert(6, 13),
            Err(UploadError::InvalidRange(_))
        ));
        assert!(matches!(set.insert(5, 5), Err(UploadError::InvalidRange(_))));
        assert!(matches!(set.insert(9, 3), Err(UploadError::InvalidRange(_))));
        assert!(set.ranges().is_empty());
    }

    #[test]
    fn classify_does_not_mutate() {
        let mut set = RangeSet::new(12);
        set.insert(0, 6).unwrap();
        assert_eq!(set.classify(6, 12).unwrap(), added(0, 12));
        assert_eq!(set.classify(0, 6).unwrap(), InsertOutcome::Duplicate);
        assert_eq!(set.classify(4, 8).unwrap(), InsertOutcome::Overlap);
        assert_eq!(set.ranges(), &[ByteRange::new(0, 6)]);
    }

    #[test]
    fn contains_checks_full_coverage() {
        let mut set = RangeSet::new(20);
        set.insert(0, 5).unwrap();
        set.insert(10, 20).unwrap();
        assert!(set.contains(&ByteRange::new(1, 4)));
        assert!(set.contains(&ByteRange::new(10, 20)));
        assert!(!set.contains(&ByteRange::new(4, 11)));
        assert!(!set.contains(&ByteRange::new(5, 10)));
    }

    #[test]
    fn single_byte_upload() {
        let mut set = RangeSet::new(1);
        assert_eq!(set.insert(0, 1).unwrap(), added(0, 1));
        assert!(set.is_complete());
    }
}
