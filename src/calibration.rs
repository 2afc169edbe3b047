//! Blocksize calibration pass
//!
//! Runs the classification pipeline over a bounded sample of the device:
//! the search space is walked one block at a time through a
//! [`SlidingWindow`], every block is offered to the [`SignatureRegistry`],
//! and the single [`Candidate`] in progress is grown or terminated. The pass
//! stops once `probe_limit` candidates have been opened, when the search
//! space runs out, or when the cancellation flag is raised. The start
//! offsets of the opened candidates then suggest the block granularity of
//! the filesystem that used to live on the device.
//!
//! All counters live in a [`SessionStats`] owned by the invocation; nothing
//! survives from one pass to the next.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, trace, warn};

use crate::candidate::{Candidate, Finished};
use crate::config::{CarveConfig, DeviceGeometry};
use crate::error::Result;
use crate::io::StorageReader;
use crate::registry::SignatureRegistry;
use crate::search_space::{Cursor, SearchSpace};
use crate::sink::FileSink;
use crate::telemetry::{
    Clock, DiagnosticsSink, FormatCount, ProgressCadence, ProgressSnapshot, SystemClock,
};
use crate::types::{FormatId, Offset};
use crate::window::SlidingWindow;

/// Largest blocksize considered by [`infer_blocksize`], in sectors
pub const CALIBRATION_SECTORS: u32 = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassStatus {
    /// Normal completion, including an early stop on request
    Ok,
}

/// Counters of one calibration invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub candidates_opened: u32,
    /// Files accepted by the sink, indexed by [`FormatId`]
    pub recovered: Vec<u32>,
    /// Start offsets of opened candidates, in scan order
    pub start_offsets: Vec<Offset>,
}

impl SessionStats {
    pub fn new(format_count: usize) -> Self {
        Self {
            candidates_opened: 0,
            recovered: vec![0; format_count],
            start_offsets: Vec::new(),
        }
    }

    pub fn recovered_for(&self, format: FormatId) -> u32 {
        self.recovered.get(format.index()).copied().unwrap_or(0)
    }

    pub fn recovered_total(&self) -> u32 {
        self.recovered.iter().sum()
    }

    pub fn format_counts(&self, registry: &SignatureRegistry) -> Vec<FormatCount> {
        registry
            .descriptors()
            .map(|(id, descriptor)| FormatCount {
                extension: descriptor.extension,
                recovered: self.recovered_for(id),
            })
            .collect()
    }

    fn record_opened(&mut self, offset: Offset) {
        self.candidates_opened += 1;
        self.start_offsets.push(offset);
    }

    fn record_recovered(&mut self, format: FormatId) {
        if let Some(count) = self.recovered.get_mut(format.index()) {
            *count += 1;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationReport {
    pub status: PassStatus,
    pub stats: SessionStats,
    pub stopped_by_request: bool,
    /// Suggested block granularity
    pub blocksize: u32,
    /// Offset of the first block boundary modulo `blocksize`
    pub block_offset: u64,
}

/// Infers the block granularity from the start offsets of carved files.
///
/// Starts at [`CALIBRATION_SECTORS`] sectors and halves the blocksize while
/// some start offset disagrees with the first one modulo the blocksize,
/// never going below `default_blocksize`. Without any start offset the
/// default is returned with offset 0.
pub fn infer_blocksize(starts: &[Offset], default_blocksize: u32, sector_size: u32) -> (u32, u64) {
    let Some(&first) = starts.first() else {
        return (default_blocksize, 0);
    };

    let default = u64::from(default_blocksize.max(1));
    let mut blocksize =
        (u64::from(CALIBRATION_SECTORS) * u64::from(sector_size.max(1))).max(default);

    loop {
        let offset = first % blocksize;
        let aligned = starts.iter().all(|start| start % blocksize == offset);
        if aligned || blocksize <= default {
            return (u32::try_from(blocksize).unwrap_or(u32::MAX), offset);
        }
        blocksize = (blocksize / 2).max(default);
    }
}

/// One calibration pass over a search space
pub struct BlocksizeCalibration<'a, C = SystemClock> {
    registry: &'a SignatureRegistry,
    config: &'a CarveConfig,
    clock: C,
    cancel: Option<&'a AtomicBool>,
    pass: u32,
}

impl<'a> BlocksizeCalibration<'a> {
    pub fn new(registry: &'a SignatureRegistry, config: &'a CarveConfig) -> Self {
        Self {
            registry,
            config,
            clock: SystemClock,
            cancel: None,
            pass: 0,
        }
    }
}

impl<'a, C: Clock> BlocksizeCalibration<'a, C> {
    pub fn with_clock<K: Clock>(self, clock: K) -> BlocksizeCalibration<'a, K> {
        BlocksizeCalibration {
            registry: self.registry,
            config: self.config,
            clock,
            cancel: self.cancel,
            pass: self.pass,
        }
    }

    /// Flag polled before each refill; raising it ends the pass after the
    /// current block.
    pub fn with_cancel(mut self, flag: &'a AtomicBool) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_pass(mut self, pass: u32) -> Self {
        self.pass = pass;
        self
    }

    /// Runs the pass.
    ///
    /// Fails only when the configuration is invalid or the sliding window
    /// cannot be allocated; in both cases no collaborator has been called.
    pub fn run<R, S, D>(
        &self,
        reader: &mut R,
        space: &mut SearchSpace,
        sink: &mut S,
        diagnostics: &mut D,
    ) -> Result<CalibrationReport>
    where
        R: StorageReader + ?Sized,
        S: FileSink + ?Sized,
        D: DiagnosticsSink + ?Sized,
    {
        let config = self.config;
        config.validate()?;

        let bs = config.blocksize as usize;
        let step = u64::from(config.blocksize);
        let mut window = SlidingWindow::try_new(bs, config.read_chunk)?;

        let geometry = self.geometry_for(reader.size());
        let mut stats = SessionStats::new(self.registry.format_count());
        let mut candidate = Candidate::idle(config.blocksize);
        let mut cadence = ProgressCadence::new(self.clock.now_secs());
        let mut stopped_by_request = false;

        let mut cursor = space.first();
        if config.verbose > 0 {
            space.log_summary(&cursor, geometry.sector_size);
        }

        window.clear_old();
        if let Some(offset) = cursor.offset() {
            self.refill(reader, &mut window, offset, &geometry, diagnostics);
        }

        while let Some(offset) = cursor.offset() {
            if let Some(tentative) =
                self.registry
                    .lookup(window.as_slice(), window.position(), offset, &candidate)
            {
                space.split_at(&mut cursor, offset);
                stats.record_opened(offset);
                if let Some(replaced) = candidate.activate(tentative) {
                    debug!(
                        start = replaced.start_offset(),
                        size = replaced.accumulated_size(),
                        "candidate replaced by header at {}",
                        offset
                    );
                }
            }

            if let Some(finished) = candidate.step(self.registry, window.pair(), config.max_file_size)
            {
                self.hand_off(finished, sink, diagnostics, &mut stats);
            }

            if stats.candidates_opened >= config.probe_limit {
                debug!(opened = stats.candidates_opened, "probe limit reached");
                cursor = Cursor::Exhausted;
            } else {
                space.advance(&mut cursor, step);
            }

            let Some(next) = cursor.offset() else {
                break;
            };

            window.advance(bs);
            if next != offset + step || window.needs_compaction() {
                window.compact();
                self.refill(reader, &mut window, next, &geometry, diagnostics);

                if let Some(elapsed) = cadence.tick(self.clock.now_secs()) {
                    diagnostics.on_progress(&self.snapshot(next, elapsed, &geometry, &stats));
                }

                if self.cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                    info!(offset = next, "stopped by request");
                    diagnostics.on_stopped();
                    stopped_by_request = true;
                    break;
                }
            }
        }

        if let Some(dropped) = candidate.force_eof() {
            debug!(
                format = %dropped.file.format,
                start = dropped.file.start_offset,
                size = dropped.file.length,
                "traversal ended with an open candidate"
            );
        }

        let (blocksize, block_offset) =
            infer_blocksize(&stats.start_offsets, config.blocksize, geometry.sector_size);
        info!(
            opened = stats.candidates_opened,
            recovered = stats.recovered_total(),
            blocksize,
            block_offset,
            "calibration pass finished"
        );

        Ok(CalibrationReport {
            status: PassStatus::Ok,
            stats,
            stopped_by_request,
            blocksize,
            block_offset,
        })
    }

    fn geometry_for(&self, device_size: u64) -> DeviceGeometry {
        let mut geometry = self.config.geometry;
        if geometry.partition_size == 0 {
            geometry.partition_size = device_size.saturating_sub(geometry.partition_offset);
        }
        geometry
    }

    fn refill<R, D>(
        &self,
        reader: &mut R,
        window: &mut SlidingWindow,
        offset: Offset,
        geometry: &DeviceGeometry,
        diagnostics: &mut D,
    ) where
        R: StorageReader + ?Sized,
        D: DiagnosticsSink + ?Sized,
    {
        if self.config.verbose > 1 {
            trace!(
                "Reading sector {:>10}/{}",
                geometry.sector_of(offset),
                geometry.last_sector()
            );
        }

        let remaining = reader.size().saturating_sub(offset);
        let slot = window.refill_slot();
        // Reads past the end of the device are not short reads, except for
        // a block that starts there.
        let requested = match usize::try_from(remaining) {
            Ok(0) => slot.len(),
            Ok(remaining) => slot.len().min(remaining),
            Err(_) => slot.len(),
        };

        let read = reader.pread(&mut slot[..requested], offset);
        if read < requested {
            warn!(
                offset,
                requested,
                read,
                "Error reading sector {}",
                geometry.sector_of(offset)
            );
            diagnostics.on_short_read(offset, requested, read);
        }
    }

    fn hand_off<S, D>(
        &self,
        finished: Finished,
        sink: &mut S,
        diagnostics: &mut D,
        stats: &mut SessionStats,
    ) where
        S: FileSink + ?Sized,
        D: DiagnosticsSink + ?Sized,
    {
        let file = finished.file;
        if !finished.reason.notifies_sink() {
            return;
        }

        let descriptor = self.registry.descriptor(file.format);
        debug!(
            extension = descriptor.extension,
            start = file.start_offset,
            size = file.length,
            reason = ?finished.reason,
            "candidate finished"
        );

        match sink.materialize(&file, descriptor) {
            Ok(()) => {
                stats.record_recovered(file.format);
                let path = sink.output_path(&file, descriptor);
                diagnostics.on_file_recovered(&file, descriptor, path.as_deref());
            }
            Err(e) => {
                warn!(
                    extension = descriptor.extension,
                    start = file.start_offset,
                    error = %e,
                    "failed to materialize carved file"
                );
            }
        }
    }

    fn snapshot(
        &self,
        offset: Offset,
        elapsed_secs: u64,
        geometry: &DeviceGeometry,
        stats: &SessionStats,
    ) -> ProgressSnapshot {
        ProgressSnapshot {
            pass: self.pass,
            current_offset: offset,
            total_offset: geometry.end_offset(),
            current_sector: geometry.sector_of(offset),
            total_sectors: geometry.last_sector(),
            elapsed_secs,
            per_format_counts: stats.format_counts(self.registry),
        }
    }
}
