//! Signature registry
//!
//! Maps an anchor byte to the probes whose header pattern has that byte at a
//! known offset. Probes are evaluated in registration order and the first
//! one whose pattern and header check both accept wins, so registering the
//! more specific formats first gives them priority.

use crate::candidate::{Candidate, DataCheck};
use crate::formats;
use crate::types::{FormatDescriptor, FormatId, Offset, Signature};

const ANCHOR_VALUES: usize = 256;

/// A pluggable file format.
///
/// Only boundary detection is asked of a format: recognise a header and,
/// optionally, decide block by block whether the data still belongs to the
/// file.
pub trait FileFormat: Send + Sync {
    fn descriptor(&self) -> &FormatDescriptor;

    /// Fixed patterns that must be present for the header check to run.
    fn signatures(&self) -> &[Signature];

    /// Validates a header whose signature matched.
    ///
    /// `header` starts at the candidate file offset and spans the lookahead
    /// window. `active` is the candidate currently being recovered (possibly
    /// idle); `candidate` is the tentative new one and may be adjusted.
    fn header_check(&self, header: &[u8], active: &Candidate, candidate: &mut Candidate) -> bool;

    /// Whether [`FileFormat::data_check`] should be run for new candidates.
    fn has_data_check(&self) -> bool {
        false
    }

    /// Inspects `[old_block | new_block]` and reports whether the stream
    /// continues.
    fn data_check(&self, _window: &[u8], _candidate: &mut Candidate) -> DataCheck {
        DataCheck::Continue
    }

    /// Container formats return true when the bytes right before the new
    /// block show that the block is payload of the archive being recovered.
    fn suppresses_headers(&self, _preceding: &[u8]) -> bool {
        false
    }
}

/// One registered header pattern
#[derive(Debug, Clone, Copy)]
pub struct FormatProbe {
    pub format: FormatId,
    pub anchor_offset: usize,
    pub pattern: &'static [u8],
}

impl FormatProbe {
    /// The anchor byte, `None` for an empty pattern that matches any byte
    #[inline]
    pub fn anchor_value(&self) -> Option<u8> {
        self.pattern.first().copied()
    }

    #[inline]
    pub fn pattern_length(&self) -> usize {
        self.pattern.len()
    }

    fn matches_pattern(&self, window: &[u8], position: usize) -> bool {
        if self.pattern.is_empty() {
            return true;
        }
        let start = position + self.anchor_offset;
        window
            .get(start..start + self.pattern.len())
            .is_some_and(|bytes| bytes == self.pattern)
    }
}

/// Probes sharing an anchor offset, bucketed by anchor byte
struct AnchorGroup {
    offset: usize,
    buckets: Vec<Vec<usize>>,
}

impl AnchorGroup {
    fn new(offset: usize) -> Self {
        Self {
            offset,
            buckets: vec![Vec::new(); ANCHOR_VALUES],
        }
    }
}

#[derive(Default)]
pub struct SignatureRegistry {
    formats: Vec<Box<dyn FileFormat>>,
    probes: Vec<FormatProbe>,
    groups: Vec<AnchorGroup>,
}

impl std::fmt::Debug for SignatureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureRegistry")
            .field(
                "formats",
                &self
                    .formats
                    .iter()
                    .map(|fmt| fmt.descriptor().extension)
                    .collect::<Vec<_>>(),
            )
            .field("probes", &self.probes.len())
            .finish()
    }
}

impl SignatureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in formats in priority order
    pub fn with_builtin_formats() -> Self {
        let mut registry = Self::new();
        for format in formats::builtin() {
            registry.register(format);
        }
        registry
    }

    /// Registers a format and all of its signatures. Call order is probe
    /// priority order.
    pub fn register(&mut self, format: Box<dyn FileFormat>) -> FormatId {
        let id = FormatId(self.formats.len());

        for signature in format.signatures() {
            let probe_idx = self.probes.len();
            self.probes.push(FormatProbe {
                format: id,
                anchor_offset: signature.offset,
                pattern: signature.pattern,
            });

            let group = self.group_mut(signature.offset);
            match signature.pattern.first() {
                Some(&anchor) => group.buckets[anchor as usize].push(probe_idx),
                None => {
                    for bucket in &mut group.buckets {
                        bucket.push(probe_idx);
                    }
                }
            }
        }

        self.formats.push(format);
        id
    }

    fn group_mut(&mut self, offset: usize) -> &mut AnchorGroup {
        let idx = match self.groups.iter().position(|g| g.offset == offset) {
            Some(idx) => idx,
            None => {
                self.groups.push(AnchorGroup::new(offset));
                self.groups.len() - 1
            }
        };
        &mut self.groups[idx]
    }

    #[inline]
    pub fn format(&self, id: FormatId) -> &dyn FileFormat {
        self.formats[id.0].as_ref()
    }

    #[inline]
    pub fn descriptor(&self, id: FormatId) -> &FormatDescriptor {
        self.formats[id.0].descriptor()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = (FormatId, &FormatDescriptor)> {
        self.formats
            .iter()
            .enumerate()
            .map(|(idx, format)| (FormatId(idx), format.descriptor()))
    }

    #[inline]
    pub fn format_count(&self) -> usize {
        self.formats.len()
    }

    #[inline]
    pub fn probes(&self) -> &[FormatProbe] {
        &self.probes
    }

    /// Returns a tentative candidate for the first probe, in registration
    /// order, that matches a file starting at `window[position]`.
    ///
    /// `offset` is the device offset of `window[position]`.
    pub fn classify(
        &self,
        window: &[u8],
        position: usize,
        offset: Offset,
        active: &Candidate,
    ) -> Option<Candidate> {
        let header = window.get(position..)?;
        let mut best: Option<(usize, Candidate)> = None;

        for group in &self.groups {
            let Some(&anchor) = window.get(position + group.offset) else {
                continue;
            };
            for &probe_idx in &group.buckets[anchor as usize] {
                if best.as_ref().is_some_and(|(found, _)| probe_idx >= *found) {
                    break;
                }
                let probe = &self.probes[probe_idx];
                if !probe.matches_pattern(window, position) {
                    continue;
                }

                let format = self.format(probe.format);
                let mut tentative = Candidate::opened(
                    probe.format,
                    offset,
                    active.blocksize(),
                    format.has_data_check(),
                );
                if format.header_check(header, active, &mut tentative) {
                    best = Some((probe_idx, tentative));
                    break;
                }
            }
        }

        best.map(|(_, candidate)| candidate)
    }

    /// Whether the active candidate's container framing says the block at
    /// `position` is payload and must not be classified.
    pub fn is_suppressed(&self, window: &[u8], position: usize, active: &Candidate) -> bool {
        let Some(format) = active.format() else {
            return false;
        };
        let preceding = &window[..position.min(window.len())];
        self.format(format).suppresses_headers(preceding)
    }

    /// Suppression check followed by [`SignatureRegistry::classify`]
    pub fn lookup(
        &self,
        window: &[u8],
        position: usize,
        offset: Offset,
        active: &Candidate,
    ) -> Option<Candidate> {
        if self.is_suppressed(window, position, active) {
            return None;
        }
        self.classify(window, position, offset, active)
    }
}
