use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;
use tracing_subscriber::filter::LevelFilter;

/// Pass number reported for the calibration pass
const CALIBRATION_PASS: u32 = 0;

use blockcarve::io::{StorageReader, open_image};
use blockcarve::json_log::JsonEventLog;
use blockcarve::telemetry::{DiagnosticsSink, ProgressSnapshot, TracingDiagnostics};
use blockcarve::{
    BlocksizeCalibration, CalibrationReport, CarveConfig, CarvedFile, CollectingSink,
    DeviceGeometry, DirectorySink, FileSink, FormatDescriptor, SearchSpace, SignatureRegistry,
};

#[derive(Parser)]
#[command(name = "blockcarve")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Calibrates and carves files from a raw disk image")]
struct Cli {
    /// Disk image or block device to scan
    image: PathBuf,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long)]
    blocksize: Option<u32>,

    /// Global per-file size ceiling in bytes, 0 = unbounded
    #[arg(long)]
    max_file_size: Option<u64>,

    /// Write JSON-lines events to this file
    #[arg(long)]
    json_log: Option<PathBuf>,

    /// Write carved files into this directory
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// Forwards every event to the log and, when enabled, to the JSON event log
struct Diagnostics {
    tracing: TracingDiagnostics,
    json: Option<JsonEventLog<BufWriter<File>>>,
}

impl DiagnosticsSink for Diagnostics {
    fn on_progress(&mut self, snapshot: &ProgressSnapshot) {
        self.tracing.on_progress(snapshot);
        if let Some(json) = &mut self.json {
            json.on_progress(snapshot);
        }
    }

    fn on_short_read(&mut self, offset: u64, requested: usize, read: usize) {
        self.tracing.on_short_read(offset, requested, read);
        if let Some(json) = &mut self.json {
            json.on_short_read(offset, requested, read);
        }
    }

    fn on_file_recovered(
        &mut self,
        file: &CarvedFile,
        descriptor: &FormatDescriptor,
        path: Option<&Path>,
    ) {
        self.tracing.on_file_recovered(file, descriptor, path);
        if let Some(json) = &mut self.json {
            json.on_file_recovered(file, descriptor, path);
        }
    }

    fn on_stopped(&mut self) {
        self.tracing.on_stopped();
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => CarveConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config: {:?}", path))?,
        None => CarveConfig::default(),
    };
    if let Some(blocksize) = cli.blocksize {
        config.blocksize = blocksize;
    }
    if let Some(max_file_size) = cli.max_file_size {
        config.max_file_size = max_file_size;
    }
    config.verbose = config.verbose.max(cli.verbose);

    init_tracing(config.verbose);

    let cancel = Arc::new(AtomicBool::new(false));
    {
        let cancel = Arc::clone(&cancel);
        ctrlc::set_handler(move || cancel.store(true, Ordering::Relaxed))
            .context("Failed to install Ctrl-C handler")?;
    }

    let report = run(&cli, &config, &cancel)?;
    print_report(&report);
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .init();
}

fn run(cli: &Cli, config: &CarveConfig, cancel: &AtomicBool) -> Result<CalibrationReport> {
    let mut reader = open_image(&cli.image)
        .with_context(|| format!("Failed to open image: {:?}", cli.image))?;
    let size = reader.size();

    let mut config = config.clone();
    if config.geometry.partition_size == 0 {
        config.geometry = DeviceGeometry {
            partition_size: size.saturating_sub(config.geometry.partition_offset),
            ..config.geometry
        };
    }
    let geometry = config.geometry;

    let registry = SignatureRegistry::with_builtin_formats();
    info!(
        image = %cli.image.display(),
        size,
        formats = registry.format_count(),
        blocksize = config.blocksize,
        "starting calibration pass"
    );

    let json = match &cli.json_log {
        Some(path) => Some(
            JsonEventLog::create(path)
                .with_context(|| format!("Failed to create JSON log: {:?}", path))?,
        ),
        None => None,
    };
    let mut diagnostics = Diagnostics {
        tracing: TracingDiagnostics,
        json,
    };
    if let Some(json) = &mut diagnostics.json {
        json.session_start(&config);
        json.signatures_info(&registry);
        json.pass_info(CALIBRATION_PASS, config.blocksize, "calibrating");
    }

    let mut sink: Box<dyn FileSink> = match &cli.output {
        Some(dir) => Box::new(directory_sink(&cli.image, dir, geometry)?),
        None => Box::new(CollectingSink::default()),
    };

    let mut space = SearchSpace::whole(geometry.partition_offset..geometry.end_offset());
    let report = BlocksizeCalibration::new(&registry, &config)
        .with_cancel(cancel)
        .with_pass(CALIBRATION_PASS)
        .run(&mut reader, &mut space, &mut *sink, &mut diagnostics)
        .context("Calibration pass failed")?;

    if let Some(json) = &mut diagnostics.json {
        json.session_end(&report.stats.format_counts(&registry));
    }

    Ok(report)
}

fn directory_sink(
    image: &Path,
    dir: &Path,
    geometry: DeviceGeometry,
) -> Result<DirectorySink<Box<dyn StorageReader>>> {
    let reader = open_image(image).context("Failed to reopen image for output")?;
    DirectorySink::new(reader, dir, geometry)
        .with_context(|| format!("Failed to create output directory: {:?}", dir))
}

fn print_report(report: &CalibrationReport) {
    println!();
    println!("Status:             {:?}", report.status);
    if report.stopped_by_request {
        println!("Stopped by request");
    }
    println!("Candidates opened:  {}", report.stats.candidates_opened);
    println!("Files recovered:    {}", report.stats.recovered_total());
    println!(
        "Blocksize:          {} (offset {})",
        report.blocksize, report.block_offset
    );
}
