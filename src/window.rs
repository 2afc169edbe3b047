//! Sliding scan window
//!
//! One owned allocation of `blocksize + max(blocksize, read_chunk)` bytes
//! laid out as `[old_block | new_block | lookahead...]`. The scan slides the
//! two block positions forward; when the lookahead would run past the end of
//! the allocation, or the traversal jumps, the old block is moved back to the
//! front and the rest is refilled from storage.

use crate::error::{CarveError, Result};

/// Bytes a header check may look at past the start of a block
pub const HEADER_LOOKAHEAD: usize = 64 * 1024;

#[derive(Debug)]
pub struct SlidingWindow {
    buf: Vec<u8>,
    old: usize,
    blocksize: usize,
    lookahead: usize,
}

impl SlidingWindow {
    /// Allocates the window. Allocation failure is reported, not aborted on.
    pub fn try_new(blocksize: usize, read_chunk: usize) -> Result<Self> {
        let fill = blocksize.max(read_chunk);
        let capacity = blocksize
            .checked_add(fill)
            .ok_or(CarveError::EngineUnavailable {
                requested: usize::MAX,
            })?;

        let mut buf = Vec::new();
        buf.try_reserve_exact(capacity)
            .map_err(|_| CarveError::EngineUnavailable {
                requested: capacity,
            })?;
        buf.resize(capacity, 0);

        Ok(Self {
            buf,
            old: 0,
            blocksize,
            lookahead: HEADER_LOOKAHEAD.max(blocksize).min(fill),
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    pub fn blocksize(&self) -> usize {
        self.blocksize
    }

    #[inline]
    pub fn lookahead(&self) -> usize {
        self.lookahead
    }

    /// Index of the first byte of the new block
    #[inline]
    pub fn position(&self) -> usize {
        self.old + self.blocksize
    }

    /// Everything up to the end of the lookahead of the new block
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.buf[..self.position() + self.lookahead]
    }

    /// `[old_block | new_block]`
    #[inline]
    pub fn pair(&self) -> &[u8] {
        &self.buf[self.old..self.old + 2 * self.blocksize]
    }

    /// Slides both blocks forward by `n` bytes.
    #[inline]
    pub fn advance(&mut self, n: usize) {
        self.old += n;
    }

    /// True when the lookahead of the new block no longer fits.
    #[inline]
    pub fn needs_compaction(&self) -> bool {
        self.position() + self.lookahead > self.buf.len()
    }

    /// Moves the old block to the front of the allocation.
    pub fn compact(&mut self) {
        if self.old != 0 {
            self.buf.copy_within(self.old..self.old + self.blocksize, 0);
            self.old = 0;
        }
    }

    /// The region after the old block, to be filled from storage
    #[inline]
    pub fn refill_slot(&mut self) -> &mut [u8] {
        let start = self.position();
        &mut self.buf[start..]
    }

    /// Zeroes the old block; used before the first read.
    pub fn clear_old(&mut self) {
        let end = self.old + self.blocksize;
        self.buf[self.old..end].fill(0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_layout() {
        let window = SlidingWindow::try_new(512, 512 * 1024).unwrap();
        assert_eq!(window.capacity(), 512 + 512 * 1024);
        assert_eq!(window.position(), 512);
        assert_eq!(window.lookahead(), HEADER_LOOKAHEAD);
        assert_eq!(window.pair().len(), 1024);
    }

    #[test]
    fn test_large_blocksize_sets_fill() {
        let window = SlidingWindow::try_new(1024 * 1024, 512 * 1024).unwrap();
        assert_eq!(window.capacity(), 2 * 1024 * 1024);
        assert_eq!(window.lookahead(), 1024 * 1024);
        assert!(!window.needs_compaction());
    }

    #[test]
    fn test_small_read_chunk_caps_lookahead() {
        let window = SlidingWindow::try_new(512, 4096).unwrap();
        assert_eq!(window.lookahead(), 4096);
        assert_eq!(window.as_slice().len(), 512 + 4096);
    }

    #[test]
    fn test_compaction_keeps_old_block() {
        let mut window = SlidingWindow::try_new(4, 16).unwrap();
        window.refill_slot().copy_from_slice(&[1u8; 16]);
        for (idx, b) in window.refill_slot().iter_mut().enumerate() {
            *b = idx as u8;
        }
        window.advance(4);
        window.advance(4);
        assert_eq!(window.pair(), &[4, 5, 6, 7, 8, 9, 10, 11]);

        window.compact();
        assert_eq!(window.position(), 4);
        assert_eq!(&window.pair()[..4], &[4, 5, 6, 7]);
    }

    #[test]
    fn test_needs_compaction_after_sliding() {
        let mut window = SlidingWindow::try_new(512, 4096).unwrap();
        assert!(!window.needs_compaction());
        window.advance(512);
        assert!(window.needs_compaction());
    }

    #[test]
    fn test_impossible_allocation_is_an_error() {
        let result = SlidingWindow::try_new(usize::MAX / 2, usize::MAX / 2);
        assert!(matches!(
            result,
            Err(CarveError::EngineUnavailable { .. })
        ));
    }
}
