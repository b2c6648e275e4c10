//! Byte range planning
//!
//! Splits an object of known size into fixed-size inclusive byte ranges.

use serde::Serialize;

use crate::core::error::{Error, Result};

/// One planned chunk: ordinal plus inclusive byte offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RangeDescriptor {
    pub index: u64,
    pub start: u64,
    pub end: u64,
}

impl RangeDescriptor {
    /// Number of bytes covered by this range
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Always false, a descriptor covers at least one byte
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Value for the HTTP `Range` header
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// Number of chunks needed to cover `total_size` bytes
pub fn chunk_count(total_size: u64, chunk_size: u64) -> u64 {
    total_size.div_ceil(chunk_size)
}

/// Plan the ordered ranges tiling `[0, total_size)`.
pub fn plan(total_size: u64, chunk_size: u64) -> Result<Vec<RangeDescriptor>> {
    if chunk_size == 0 {
        return Err(Error::InvalidSpec("chunk size must be positive".to_string()));
    }
    if total_size == 0 {
        return Err(Error::InvalidSpec("total size must be positive".to_string()));
    }

    let ranges = (0..chunk_count(total_size, chunk_size))
        .map(|index| {
            let start = index * chunk_size;
            let end = start.saturating_add(chunk_size - 1).min(total_size - 1);
            RangeDescriptor { index, start, end }
        })
        .collect();

    Ok(ranges)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_tiles(total_size: u64, chunk_size: u64) {
        let ranges = plan(total_size, chunk_size).unwrap();
        assert_eq!(ranges.len() as u64, chunk_count(total_size, chunk_size));

        let mut next_start = 0;
        for (i, range) in ranges.iter().enumerate() {
            assert_eq!(range.index, i as u64);
            assert_eq!(range.start, next_start, "gap or overlap before range {i}");
            assert!(range.end >= range.start);
            next_start = range.end + 1;
        }
        assert_eq!(next_start, total_size);
        assert_eq!(ranges.iter().map(RangeDescriptor::len).sum::<u64>(), total_size);
    }

    #[test]
    fn test_plan_three_chunks_with_short_tail() {
        let ranges = plan(25_000_000, 10_000_000).unwrap();
        assert_eq!(
            ranges,
            vec![
                RangeDescriptor { index: 0, start: 0, end: 9_999_999 },
                RangeDescriptor { index: 1, start: 10_000_000, end: 19_999_999 },
                RangeDescriptor { index: 2, start: 20_000_000, end: 24_999_999 },
            ]
        );
    }

    #[test]
    fn test_plan_tiles_exactly() {
        for (total, chunk) in [(1, 1), (1, 10), (10, 1), (10, 10), (11, 10), (99, 7), (4096, 1000)] {
            assert_tiles(total, chunk);
        }
    }

    #[test]
    fn test_plan_exact_multiple_has_full_last_chunk() {
        let ranges = plan(30, 10).unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2].len(), 10);
        assert_eq!(ranges[2].end, 29);
    }

    #[test]
    fn test_plan_huge_chunk_size_does_not_overflow() {
        let ranges = plan(5, u64::MAX).unwrap();
        assert_eq!(ranges, vec![RangeDescriptor { index: 0, start: 0, end: 4 }]);
    }

    #[test]
    fn test_plan_rejects_zero_sizes() {
        assert!(matches!(plan(0, 10), Err(Error::InvalidSpec(_))));
        assert!(matches!(plan(10, 0), Err(Error::InvalidSpec(_))));
    }

    #[test]
    fn test_header_value() {
        let range = RangeDescriptor { index: 1, start: 10, end: 19 };
        assert_eq!(range.header_value(), "bytes=10-19");
        assert_eq!(range.len(), 10);
    }
}
