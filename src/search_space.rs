//! Search space traversal
//!
//! The search space is the ordered set of disjoint byte ranges still eligible
//! for scanning. A [`Cursor`] walks it one block at a time; stepping past the
//! end of a range jumps to the start of the next one, and stepping past the
//! last range leaves the cursor [`Cursor::Exhausted`].

use std::ops::Range;
use tracing::debug;

use crate::types::Offset;

/// Position of the traversal inside a [`SearchSpace`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    At { range: usize, offset: Offset },
    Exhausted,
}

impl Cursor {
    #[inline]
    pub fn offset(&self) -> Option<Offset> {
        match self {
            Cursor::At { offset, .. } => Some(*offset),
            Cursor::Exhausted => None,
        }
    }

    #[inline]
    pub fn is_exhausted(&self) -> bool {
        matches!(self, Cursor::Exhausted)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchSpace {
    ranges: Vec<Range<Offset>>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    /// A search space covering a single range
    pub fn whole(range: Range<Offset>) -> Self {
        let mut space = Self::new();
        space.insert(range);
        space
    }

    pub fn from_ranges(ranges: impl IntoIterator<Item = Range<Offset>>) -> Self {
        let mut space = Self::new();
        for range in ranges {
            space.insert(range);
        }
        space
    }

    /// Adds a range, merging it with any range it overlaps or touches.
    pub fn insert(&mut self, range: Range<Offset>) {
        if range.start >= range.end {
            return;
        }

        let first = self.ranges.partition_point(|r| r.end < range.start);
        let last = self.ranges.partition_point(|r| r.start <= range.end);

        if first == last {
            self.ranges.insert(first, range);
            return;
        }

        let start = range.start.min(self.ranges[first].start);
        let end = range.end.max(self.ranges[last - 1].end);
        self.ranges.splice(first..last, std::iter::once(start..end));
    }

    /// Removes the bytes of `carved` from the search space, splitting ranges
    /// it falls inside of. Cursors taken before the call are invalidated.
    pub fn carve_out(&mut self, carved: Range<Offset>) {
        if carved.start >= carved.end {
            return;
        }

        let mut kept = Vec::with_capacity(self.ranges.len() + 1);
        for range in self.ranges.drain(..) {
            if range.end <= carved.start || range.start >= carved.end {
                kept.push(range);
                continue;
            }
            if range.start < carved.start {
                kept.push(range.start..carved.start);
            }
            if carved.end < range.end {
                kept.push(carved.end..range.end);
            }
        }
        self.ranges = kept;
    }

    /// Cursor on the first byte of the first range
    pub fn first(&self) -> Cursor {
        match self.ranges.first() {
            Some(range) => Cursor::At {
                range: 0,
                offset: range.start,
            },
            None => Cursor::Exhausted,
        }
    }

    /// Moves the cursor forward by one block.
    ///
    /// When the next block would start at or past the end of the current
    /// range, the cursor jumps to the start of the following range instead;
    /// the bytes in between are never visited.
    pub fn advance(&self, cursor: &mut Cursor, blocksize: u64) {
        let Cursor::At { range, offset } = *cursor else {
            return;
        };

        if let Some(current) = self.ranges.get(range) {
            let next = offset.saturating_add(blocksize);
            if next < current.end {
                *cursor = Cursor::At {
                    range,
                    offset: next,
                };
                return;
            }
        }

        *cursor = match self.ranges.get(range + 1) {
            Some(following) => Cursor::At {
                range: range + 1,
                offset: following.start,
            },
            None => Cursor::Exhausted,
        };
    }

    /// Splits the range under the cursor so that a new range starts at
    /// `offset`, and moves the cursor onto it. Used when a file header is
    /// found: the bytes before it stay a separate range.
    pub fn split_at(&mut self, cursor: &mut Cursor, offset: Offset) {
        let Cursor::At { range, offset: at } = *cursor else {
            return;
        };
        let Some(current) = self.ranges.get(range).cloned() else {
            return;
        };
        if offset <= current.start || offset >= current.end {
            return;
        }

        self.ranges[range] = current.start..offset;
        self.ranges.insert(range + 1, offset..current.end);

        *cursor = if at >= offset {
            Cursor::At {
                range: range + 1,
                offset: at,
            }
        } else {
            Cursor::At { range, offset: at }
        };
    }

    #[inline]
    pub fn ranges(&self) -> &[Range<Offset>] {
        &self.ranges
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn total_bytes(&self) -> u64 {
        self.ranges.iter().map(|r| r.end - r.start).sum()
    }

    pub fn log_summary(&self, cursor: &Cursor, sector_size: u32) {
        let sector_size = u64::from(sector_size.max(1));
        debug!(
            ranges = self.ranges.len(),
            bytes = self.total_bytes(),
            "search space"
        );
        for (idx, range) in self.ranges.iter().enumerate() {
            let marker = match cursor {
                Cursor::At { range: current, .. } if *current == idx => "*",
                _ => " ",
            };
            debug!(
                "{} {:>10} - {:>10}",
                marker,
                range.start / sector_size,
                range.end.saturating_sub(1) / sector_size
            );
        }
    }
}
