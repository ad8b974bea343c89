//! Copy plan from flattened uniform blocks into the packed arrays.

use std::fmt;

use crate::layout::PackedArray;

/// `size` components copied from a source uniform block into a packed array.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct CopyRange {
    /// Index of the block among the used blocks, in declaration order.
    pub source_buffer: u32,
    pub source_offset: u32,
    pub dest_array: PackedArray,
    pub dest_offset: u32,
    pub size: u32,
}

impl CopyRange {
    fn source_end(&self) -> u32 {
        self.source_offset + self.size
    }

    /// `true` when `next` continues this range in both source and destination.
    fn is_continued_by(&self, next: &Self) -> bool {
        self.source_buffer == next.source_buffer
            && self.dest_array == next.dest_array
            && self.source_end() == next.source_offset
            && self.dest_offset + self.size == next.dest_offset
    }

    /// `true` when `other` is a sub-range of this one: re-expanding this
    /// range yields exactly `other`'s source, destination and size.
    pub fn contains(&self, other: &Self) -> bool {
        self.source_buffer == other.source_buffer
            && self.dest_array == other.dest_array
            && other.source_offset >= self.source_offset
            && other.source_end() <= self.source_end()
            && other.dest_offset >= self.dest_offset
            && other.dest_offset - self.dest_offset == other.source_offset - self.source_offset
    }

    /// `true` when both ranges read a common source component.
    pub fn overlaps_source(&self, other: &Self) -> bool {
        self.source_buffer == other.source_buffer
            && self.source_offset < other.source_end()
            && other.source_offset < self.source_end()
    }
}

/// `source:offset-array:offset:size`, as in `@PackedUBGlobalCopies`.
impl fmt::Display for CopyRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{}:{}:{}",
            self.source_buffer, self.source_offset, self.dest_array, self.dest_offset, self.size
        )
    }
}

/// Sorts ranges by source and merges contiguous neighbours until no merge
/// applies.
pub fn merge_ranges(mut ranges: Vec<CopyRange>) -> Vec<CopyRange> {
    ranges.sort_by_key(|r| (r.source_buffer, r.source_offset));
    loop {
        let Some(at) = ranges
            .windows(2)
            .position(|pair| pair[0].is_continued_by(&pair[1]))
        else {
            return ranges;
        };
        let next = ranges.remove(at + 1);
        ranges[at].size += next.size;
    }
}
