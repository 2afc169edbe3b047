//! Progress and diagnostics reporting
//!
//! The calibration loop reports through a [`DiagnosticsSink`]; what the sink
//! does with the events is its own business. The loop itself guarantees at
//! most one progress snapshot per wall-clock second, tracked by
//! [`ProgressCadence`] against a [`Clock`].

use std::cell::Cell;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

use crate::types::{CarvedFile, FormatDescriptor, format_elapsed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatCount {
    pub extension: &'static str,
    pub recovered: u32,
}

/// Point-in-time view of a running pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    pub pass: u32,
    pub current_offset: u64,
    pub total_offset: u64,
    pub current_sector: u64,
    pub total_sectors: u64,
    pub elapsed_secs: u64,
    pub per_format_counts: Vec<FormatCount>,
}

impl ProgressSnapshot {
    pub fn files_total(&self) -> u32 {
        self.per_format_counts.iter().map(|c| c.recovered).sum()
    }

    pub fn elapsed(&self) -> String {
        format_elapsed(self.elapsed_secs)
    }
}

pub trait DiagnosticsSink {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot);

    fn on_short_read(&mut self, offset: u64, requested: usize, read: usize);

    /// `path` is where the sink put the file, if it wrote one.
    fn on_file_recovered(
        &mut self,
        _file: &CarvedFile,
        _descriptor: &FormatDescriptor,
        _path: Option<&Path>,
    ) {
    }

    fn on_stopped(&mut self) {}
}

/// Discards every event
#[derive(Debug, Default)]
pub struct NullDiagnostics;

impl DiagnosticsSink for NullDiagnostics {
    fn on_progress(&mut self, _snapshot: &ProgressSnapshot) {}

    fn on_short_read(&mut self, _offset: u64, _requested: usize, _read: usize) {}
}

/// Logs events through `tracing`
#[derive(Debug, Default)]
pub struct TracingDiagnostics;

impl DiagnosticsSink for TracingDiagnostics {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        info!(
            pass = snapshot.pass,
            sector = snapshot.current_sector,
            total = snapshot.total_sectors,
            elapsed = %snapshot.elapsed(),
            files = snapshot.files_total(),
            "Reading sector {}/{}",
            snapshot.current_sector,
            snapshot.total_sectors
        );
    }

    fn on_short_read(&mut self, offset: u64, requested: usize, read: usize) {
        warn!(offset, requested, read, "Error reading at offset {}", offset);
    }

    fn on_file_recovered(
        &mut self,
        file: &CarvedFile,
        descriptor: &FormatDescriptor,
        path: Option<&Path>,
    ) {
        info!(
            extension = descriptor.extension,
            offset = file.start_offset,
            size = file.length,
            path = path.map(|p| p.display().to_string()),
            "file recovered"
        );
    }

    fn on_stopped(&mut self) {
        info!("Recovery has been stopped");
    }
}

impl<D: DiagnosticsSink + ?Sized> DiagnosticsSink for &mut D {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        (**self).on_progress(snapshot);
    }

    fn on_short_read(&mut self, offset: u64, requested: usize, read: usize) {
        (**self).on_short_read(offset, requested, read);
    }

    fn on_file_recovered(
        &mut self,
        file: &CarvedFile,
        descriptor: &FormatDescriptor,
        path: Option<&Path>,
    ) {
        (**self).on_file_recovered(file, descriptor, path);
    }

    fn on_stopped(&mut self) {
        (**self).on_stopped();
    }
}

/// Wall-clock seconds
pub trait Clock {
    fn now_secs(&self) -> u64;
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_secs(&self) -> u64 {
        (**self).now_secs()
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self {
            now: Cell::new(start),
        }
    }

    pub fn set(&self, secs: u64) {
        self.now.set(secs);
    }

    pub fn advance(&self, secs: u64) {
        self.now.set(self.now.get() + secs);
    }
}

impl Clock for ManualClock {
    fn now_secs(&self) -> u64 {
        self.now.get()
    }
}

/// Allows one emission per second that is strictly later than the last one
#[derive(Debug, Clone, Copy)]
pub struct ProgressCadence {
    start: u64,
    previous: u64,
}

impl ProgressCadence {
    pub fn new(now: u64) -> Self {
        Self {
            start: now,
            previous: now,
        }
    }

    /// Elapsed seconds since the start if a snapshot is due at `now`.
    pub fn tick(&mut self, now: u64) -> Option<u64> {
        if now > self.previous {
            self.previous = now;
            Some(now - self.start)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cadence_once_per_second() {
        let mut cadence = ProgressCadence::new(100);
        assert_eq!(cadence.tick(100), None);
        assert_eq!(cadence.tick(101), Some(1));
        assert_eq!(cadence.tick(101), None);
        assert_eq!(cadence.tick(104), Some(4));
    }

    #[test]
    fn test_cadence_ignores_clock_going_backwards() {
        let mut cadence = ProgressCadence::new(100);
        assert_eq!(cadence.tick(102), Some(2));
        assert_eq!(cadence.tick(99), None);
        assert_eq!(cadence.tick(102), None);
    }

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(5);
        clock.advance(3);
        assert_eq!(clock.now_secs(), 8);
        clock.set(1);
        assert_eq!(clock.now_secs(), 1);
    }

    #[test]
    fn test_snapshot_totals() {
        let snapshot = ProgressSnapshot {
            pass: 0,
            current_offset: 0,
            total_offset: 0,
            current_sector: 0,
            total_sectors: 0,
            elapsed_secs: 3723,
            per_format_counts: vec![
                FormatCount {
                    extension: "jpg",
                    recovered: 3,
                },
                FormatCount {
                    extension: "png",
                    recovered: 2,
                },
            ],
        };
        assert_eq!(snapshot.files_total(), 5);
        assert_eq!(snapshot.elapsed(), "1h02m03s");
    }
}
