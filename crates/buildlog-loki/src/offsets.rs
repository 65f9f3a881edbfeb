//! Byte offset to line number mapping.
//!
//! Viewers address a log by byte range; [`LineOffsetMap`] translates such a
//! range back into the lines it covers.

use std::ops::Range;

/// Start offset of every line emitted by a stream, in emission order.
///
/// Line numbers start at 0. Offsets are strictly increasing because every
/// emitted line occupies at least its separator byte.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LineOffsetMap {
    starts: Vec<u64>,
    end: u64,
}

impl LineOffsetMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a line of `len` bytes (separator included) and returns its
    /// line number.
    pub fn record(&mut self, len: u64) -> usize {
        debug_assert!(len > 0, "an emitted line is never empty");
        let line = self.starts.len();
        self.starts.push(self.end);
        self.end = self.end.saturating_add(len.max(1));
        line
    }

    /// Number of lines recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    /// Returns true when no line was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Total bytes covered by the recorded lines.
    #[must_use]
    pub const fn total_bytes(&self) -> u64 {
        self.end
    }

    /// Line containing the byte at `offset`, if it was emitted.
    #[must_use]
    pub fn line_at(&self, offset: u64) -> Option<usize> {
        if offset >= self.end {
            return None;
        }
        Some(self.starts.partition_point(|&start| start <= offset) - 1)
    }

    /// Byte offset at which `line` starts.
    #[must_use]
    pub fn offset_of(&self, line: usize) -> Option<u64> {
        self.starts.get(line).copied()
    }

    /// Byte range occupied by `line`.
    #[must_use]
    pub fn span_of(&self, line: usize) -> Option<Range<u64>> {
        let start = self.offset_of(line)?;
        let end = self.offset_of(line + 1).unwrap_or(self.end);
        Some(start..end)
    }

    /// Lines touched by the byte range `bytes`, clamped to what was emitted.
    #[must_use]
    pub fn line_range(&self, bytes: Range<u64>) -> Range<usize> {
        let end = bytes.end.min(self.end);
        if bytes.start >= end {
            let at = self.starts.partition_point(|&start| start < bytes.start.min(self.end));
            return at..at;
        }
        let first = self.starts.partition_point(|&start| start <= bytes.start) - 1;
        let last = self.starts.partition_point(|&start| start < end);
        first..last
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(lengths: &[u64]) -> LineOffsetMap {
        let mut map = LineOffsetMap::new();
        for len in lengths {
            map.record(*len);
        }
        map
    }

    #[test]
    fn empty_map() {
        let map = LineOffsetMap::new();
        assert!(map.is_empty());
        assert_eq!(map.line_at(0), None);
        assert_eq!(map.offset_of(0), None);
        assert_eq!(map.line_range(0..10), 0..0);
    }

    #[test]
    fn record_returns_line_numbers() {
        let mut map = LineOffsetMap::new();
        assert_eq!(map.record(6), 0);
        assert_eq!(map.record(1), 1);
        assert_eq!(map.record(4), 2);
        assert_eq!(map.len(), 3);
        assert_eq!(map.total_bytes(), 11);
    }

    #[test]
    fn line_at_resolves_every_byte() {
        // "hello\n" "\n" "abc\n"
        let map = map(&[6, 1, 4]);
        assert_eq!(map.line_at(0), Some(0));
        assert_eq!(map.line_at(5), Some(0));
        assert_eq!(map.line_at(6), Some(1));
        assert_eq!(map.line_at(7), Some(2));
        assert_eq!(map.line_at(10), Some(2));
        assert_eq!(map.line_at(11), None);
    }

    #[test]
    fn offsets_and_spans() {
        let map = map(&[6, 1, 4]);
        assert_eq!(map.offset_of(2), Some(7));
        assert_eq!(map.span_of(0), Some(0..6));
        assert_eq!(map.span_of(2), Some(7..11));
        assert_eq!(map.span_of(3), None);
    }

    #[test]
    fn line_range_covers_partial_lines() {
        let map = map(&[6, 1, 4]);
        assert_eq!(map.line_range(0..6), 0..1);
        assert_eq!(map.line_range(3..8), 0..3);
        assert_eq!(map.line_range(6..7), 1..2);
        assert_eq!(map.line_range(7..100), 2..3);
        assert_eq!(map.line_range(4..4), 1..1);
        assert_eq!(map.line_range(50..60), 3..3);
    }

    proptest! {
        #[test]
        fn offsets_strictly_increase(lengths in prop::collection::vec(1u64..200, 1..50)) {
            let map = map(&lengths);
            for line in 1..map.len() {
                prop_assert!(map.offset_of(line - 1) < map.offset_of(line));
            }
        }

        #[test]
        fn line_at_inverts_offset_of(lengths in prop::collection::vec(1u64..200, 1..50)) {
            let map = map(&lengths);
            for line in 0..map.len() {
                let span = map.span_of(line).unwrap_or(0..0);
                prop_assert_eq!(map.line_at(span.start), Some(line));
                prop_assert_eq!(map.line_at(span.end - 1), Some(line));
                prop_assert_eq!(map.line_range(span), line..line + 1);
            }
        }
    }
}
