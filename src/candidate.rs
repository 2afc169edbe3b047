//! Candidate recovery state machine
//!
//! At most one file reconstruction is in progress at a time. A candidate is
//! either idle or active; an active candidate grows by one block per scan
//! step until its continuation check, a size limit or the end of the search
//! space terminates it.

use tracing::debug;

use crate::registry::SignatureRegistry;
use crate::types::{CarvedFile, FormatId, Offset};

/// Verdict of a format's continuation check for the latest block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataCheck {
    Continue,
    Stop,
    Error,
}

/// Why an active candidate went back to idle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Continuation check found the end of the file
    Stop,
    /// Continuation check found data that cannot belong to the file
    Error,
    /// The format's own `max_filesize` was reached
    MaxFilesize,
    /// The configured global `max_file_size` was exceeded
    SizeCeiling,
    /// The search space ran out
    Exhausted,
}

impl Termination {
    /// Terminations that hand the candidate to the file-assembly sink
    pub fn notifies_sink(&self) -> bool {
        !matches!(self, Termination::Exhausted)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Finished {
    pub file: CarvedFile,
    pub reason: Termination,
}

/// Format-private progress through the file, owned by continuation checks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContinuationState {
    /// Next file offset the continuation check has to examine
    pub calculated_file_size: u64,
    /// Free-form parser stage
    pub stage: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    format: Option<FormatId>,
    start_offset: Offset,
    accumulated_size: u64,
    blocksize: u32,
    data_check: bool,
    pub continuation: ContinuationState,
}

impl Candidate {
    /// An empty candidate: no file in progress
    pub fn idle(blocksize: u32) -> Self {
        Self {
            format: None,
            start_offset: 0,
            accumulated_size: 0,
            blocksize,
            data_check: false,
            continuation: ContinuationState::default(),
        }
    }

    /// A tentative candidate for a header found at `start_offset`
    pub fn opened(format: FormatId, start_offset: Offset, blocksize: u32, data_check: bool) -> Self {
        Self {
            format: Some(format),
            start_offset,
            accumulated_size: 0,
            blocksize,
            data_check,
            continuation: ContinuationState::default(),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.format.is_some()
    }

    #[inline]
    pub fn format(&self) -> Option<FormatId> {
        self.format
    }

    #[inline]
    pub fn start_offset(&self) -> Offset {
        self.start_offset
    }

    #[inline]
    pub fn accumulated_size(&self) -> u64 {
        self.accumulated_size
    }

    #[inline]
    pub fn blocksize(&self) -> u32 {
        self.blocksize
    }

    #[inline]
    pub fn has_data_check(&self) -> bool {
        self.data_check
    }

    /// Index into the `[old_block | new_block]` window of the byte at
    /// `file_offset`, if that byte is inside the window.
    pub fn window_index(&self, file_offset: u64) -> Option<usize> {
        let bs = u64::from(self.blocksize);
        let window_start = self.accumulated_size.checked_sub(bs);
        let index = match window_start {
            Some(start) => file_offset.checked_sub(start)?,
            None => file_offset + (bs - self.accumulated_size),
        };
        if index < 2 * bs {
            usize::try_from(index).ok()
        } else {
            None
        }
    }

    /// File offset of the byte at `index` in the `[old_block | new_block]` window
    pub fn file_offset_at(&self, index: usize) -> u64 {
        (self.accumulated_size + index as u64).saturating_sub(u64::from(self.blocksize))
    }

    /// Idle -> Active. Returns the candidate that was replaced, if one was
    /// still active.
    pub fn activate(&mut self, tentative: Candidate) -> Option<Candidate> {
        let replaced = self.is_active().then_some(*self);
        *self = Candidate {
            accumulated_size: 0,
            blocksize: self.blocksize,
            ..tentative
        };
        replaced
    }

    /// Processes one block for the active candidate.
    ///
    /// `pair` is the window holding the previous and the current block. The
    /// size grows by one block whatever the continuation check says.
    pub fn step(
        &mut self,
        registry: &SignatureRegistry,
        pair: &[u8],
        max_file_size: u64,
    ) -> Option<Finished> {
        let format_id = self.format?;
        let format = registry.format(format_id);

        let verdict = if self.data_check {
            format.data_check(pair, self)
        } else {
            DataCheck::Continue
        };
        self.accumulated_size += u64::from(self.blocksize);

        let mut reason = match verdict {
            DataCheck::Continue => None,
            DataCheck::Stop => Some(Termination::Stop),
            DataCheck::Error => Some(Termination::Error),
        };

        if reason.is_none() && max_file_size > 0 && self.accumulated_size > max_file_size {
            debug!(
                "File size limit reached ({}), stopping recovery early",
                max_file_size
            );
            reason = Some(Termination::SizeCeiling);
        }

        if reason.is_none() {
            let max_filesize = format.descriptor().max_filesize;
            if max_filesize > 0 && self.accumulated_size >= max_filesize {
                reason = Some(Termination::MaxFilesize);
            }
        }

        reason.map(|reason| {
            let file = self.carved(format_id);
            self.reset();
            Finished { file, reason }
        })
    }

    /// Forced end of file when the search space runs out. Returns the
    /// candidate that was dropped, if any.
    pub fn force_eof(&mut self) -> Option<Finished> {
        let format_id = self.format?;
        let file = self.carved(format_id);
        self.reset();
        Some(Finished {
            file,
            reason: Termination::Exhausted,
        })
    }

    pub fn reset(&mut self) {
        *self = Candidate::idle(self.blocksize);
    }

    #[cfg(test)]
    pub(crate) fn with_accumulated(mut self, size: u64) -> Self {
        self.accumulated_size = size;
        self
    }

    fn carved(&self, format: FormatId) -> CarvedFile {
        CarvedFile {
            format,
            start_offset: self.start_offset,
            length: self.accumulated_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_candidate() {
        let candidate = Candidate::idle(512);
        assert!(!candidate.is_active());
        assert_eq!(candidate.accumulated_size(), 0);
        assert_eq!(candidate.blocksize(), 512);
    }

    #[test]
    fn test_activate_resets_size() {
        let mut candidate = Candidate::idle(512);
        let replaced = candidate.activate(Candidate::opened(FormatId(1), 4096, 512, true));
        assert!(replaced.is_none());
        assert!(candidate.is_active());
        assert_eq!(candidate.start_offset(), 4096);
        assert_eq!(candidate.accumulated_size(), 0);
    }

    #[test]
    fn test_activate_over_active_returns_replaced() {
        let mut candidate = Candidate::idle(512);
        candidate.activate(Candidate::opened(FormatId(0), 0, 512, false));
        let replaced = candidate.activate(Candidate::opened(FormatId(2), 1024, 512, false));
        assert_eq!(replaced.and_then(|c| c.format()), Some(FormatId(0)));
        assert_eq!(candidate.format(), Some(FormatId(2)));
    }

    #[test]
    fn test_window_index_on_first_block() {
        let candidate = Candidate::opened(FormatId(0), 0, 512, true);
        assert_eq!(candidate.window_index(0), Some(512));
        assert_eq!(candidate.window_index(511), Some(1023));
        assert_eq!(candidate.window_index(512), None);
        assert_eq!(candidate.file_offset_at(512), 0);
    }

    #[test]
    fn test_window_index_later_block() {
        let mut candidate = Candidate::opened(FormatId(0), 0, 512, true);
        candidate.accumulated_size = 2048;
        assert_eq!(candidate.window_index(1536), Some(0));
        assert_eq!(candidate.window_index(2048), Some(512));
        assert_eq!(candidate.window_index(1000), None);
        assert_eq!(candidate.window_index(2560), None);
        assert_eq!(candidate.file_offset_at(600), 2136);
    }

    #[test]
    fn test_force_eof_on_idle() {
        let mut candidate = Candidate::idle(512);
        assert!(candidate.force_eof().is_none());
    }

    #[test]
    fn test_exhaustion_does_not_notify() {
        assert!(!Termination::Exhausted.notifies_sink());
        assert!(Termination::Stop.notifies_sink());
        assert!(Termination::SizeCeiling.notifies_sink());
    }
}
