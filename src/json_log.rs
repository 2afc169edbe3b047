//! JSON-lines event log
//!
//! One JSON object per line, flushed after every event so that an external
//! monitor can tail the file while a pass is running.

use chrono::Local;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::warn;

use crate::config::CarveConfig;
use crate::error::Result;
use crate::registry::SignatureRegistry;
use crate::telemetry::{DiagnosticsSink, FormatCount, ProgressSnapshot};
use crate::types::{CarvedFile, FormatDescriptor};

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum JsonEvent<'a> {
    SessionStart {
        timestamp: String,
        version: &'static str,
        blocksize: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_file_size: Option<u64>,
    },
    SignaturesInfo {
        timestamp: String,
        enabled_signatures: usize,
    },
    PassInfo {
        timestamp: String,
        pass: u32,
        blocksize: u32,
        status: &'a str,
    },
    RecoveryProgress {
        timestamp: String,
        pass: u32,
        operation: &'static str,
        current_sector: u64,
        total_sectors: u64,
        elapsed_time: String,
        files_found: BTreeMap<&'a str, u32>,
        files_total: u32,
    },
    ShortRead {
        timestamp: String,
        disk_offset: u64,
        requested: usize,
        read: usize,
    },
    FileRecovered {
        timestamp: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
        filetype: &'a str,
        filesize: u64,
        disk_offset: u64,
    },
    SessionEnd {
        timestamp: String,
        final_statistics: BTreeMap<&'a str, u32>,
        files_total: u32,
    },
}

fn timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%z").to_string()
}

fn found_map(counts: &[FormatCount]) -> (BTreeMap<&str, u32>, u32) {
    let found = counts
        .iter()
        .filter(|c| c.recovered > 0)
        .map(|c| (c.extension, c.recovered))
        .collect();
    let total = counts.iter().map(|c| c.recovered).sum();
    (found, total)
}

pub struct JsonEventLog<W: Write> {
    out: W,
}

impl JsonEventLog<BufWriter<File>> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::new(BufWriter::new(File::create(path.as_ref())?)))
    }
}

impl<W: Write> JsonEventLog<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_event(&mut self, event: &JsonEvent<'_>) -> Result<()> {
        serde_json::to_writer(&mut self.out, event)?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }

    fn emit(&mut self, event: JsonEvent<'_>) {
        if let Err(e) = self.write_event(&event) {
            warn!(error = %e, "failed to write JSON event");
        }
    }

    pub fn session_start(&mut self, config: &CarveConfig) {
        self.emit(JsonEvent::SessionStart {
            timestamp: timestamp(),
            version: env!("CARGO_PKG_VERSION"),
            blocksize: config.blocksize,
            max_file_size: (config.max_file_size > 0).then_some(config.max_file_size),
        });
    }

    /// Number of formats the registry will try
    pub fn signatures_info(&mut self, registry: &SignatureRegistry) {
        self.emit(JsonEvent::SignaturesInfo {
            timestamp: timestamp(),
            enabled_signatures: registry.format_count(),
        });
    }

    pub fn pass_info(&mut self, pass: u32, blocksize: u32, status: &str) {
        self.emit(JsonEvent::PassInfo {
            timestamp: timestamp(),
            pass,
            blocksize,
            status,
        });
    }

    pub fn session_end(&mut self, counts: &[FormatCount]) {
        let (final_statistics, files_total) = found_map(counts);
        self.emit(JsonEvent::SessionEnd {
            timestamp: timestamp(),
            final_statistics,
            files_total,
        });
    }
}

impl<W: Write> DiagnosticsSink for JsonEventLog<W> {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        let (files_found, files_total) = found_map(&snapshot.per_format_counts);
        self.emit(JsonEvent::RecoveryProgress {
            timestamp: timestamp(),
            pass: snapshot.pass,
            operation: "Reading sector",
            current_sector: snapshot.current_sector,
            total_sectors: snapshot.total_sectors,
            elapsed_time: snapshot.elapsed(),
            files_found,
            files_total,
        });
    }

    fn on_short_read(&mut self, offset: u64, requested: usize, read: usize) {
        self.emit(JsonEvent::ShortRead {
            timestamp: timestamp(),
            disk_offset: offset,
            requested,
            read,
        });
    }

    fn on_file_recovered(
        &mut self,
        file: &CarvedFile,
        descriptor: &FormatDescriptor,
        path: Option<&Path>,
    ) {
        self.emit(JsonEvent::FileRecovered {
            timestamp: timestamp(),
            filename: path.map(|p| p.display().to_string()),
            filetype: descriptor.extension,
            filesize: file.length,
            disk_offset: file.start_offset,
        });
    }
}
