//! File assembly sinks
//!
//! The carving core hands each finished candidate to a [`FileSink`]; turning
//! the byte range into an output file is the sink's job.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::DeviceGeometry;
use crate::error::Result;
use crate::io::StorageReader;
use crate::types::{CarvedFile, FormatDescriptor};

const COPY_CHUNK: usize = 1024 * 1024;

pub trait FileSink {
    /// Materializes `file`. An `Ok` return means the file was persisted and
    /// counts as recovered.
    fn materialize(&mut self, file: &CarvedFile, descriptor: &FormatDescriptor) -> Result<()>;

    /// Where `file` is written, for sinks that write files
    fn output_path(&self, _file: &CarvedFile, _descriptor: &FormatDescriptor) -> Option<PathBuf> {
        None
    }
}

impl<S: FileSink + ?Sized> FileSink for &mut S {
    fn materialize(&mut self, file: &CarvedFile, descriptor: &FormatDescriptor) -> Result<()> {
        (**self).materialize(file, descriptor)
    }

    fn output_path(&self, file: &CarvedFile, descriptor: &FormatDescriptor) -> Option<PathBuf> {
        (**self).output_path(file, descriptor)
    }
}

/// Keeps the carved ranges in memory
#[derive(Debug, Default)]
pub struct CollectingSink {
    pub files: Vec<CarvedFile>,
}

impl FileSink for CollectingSink {
    fn materialize(&mut self, file: &CarvedFile, _descriptor: &FormatDescriptor) -> Result<()> {
        self.files.push(*file);
        Ok(())
    }
}

/// Copies each carved range from the device into `f{sector:07}.{ext}`
pub struct DirectorySink<R: StorageReader> {
    reader: R,
    output_dir: PathBuf,
    geometry: DeviceGeometry,
    written: Vec<PathBuf>,
}

impl<R: StorageReader> DirectorySink<R> {
    pub fn new(reader: R, output_dir: impl AsRef<Path>, geometry: DeviceGeometry) -> Result<Self> {
        let output_dir = output_dir.as_ref().to_path_buf();
        fs::create_dir_all(&output_dir)?;
        Ok(Self {
            reader,
            output_dir,
            geometry,
            written: Vec::new(),
        })
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    fn path_for(&self, file: &CarvedFile, descriptor: &FormatDescriptor) -> PathBuf {
        let sector = self.geometry.sector_of(file.start_offset);
        self.output_dir
            .join(format!("f{:07}.{}", sector, descriptor.extension))
    }
}

impl<R: StorageReader> FileSink for DirectorySink<R> {
    fn materialize(&mut self, file: &CarvedFile, descriptor: &FormatDescriptor) -> Result<()> {
        let path = self.path_for(file, descriptor);
        let mut out = BufWriter::new(File::create(&path)?);

        let end = file.start_offset + file.length.min(self.reader.size().saturating_sub(file.start_offset));
        let mut chunk = vec![0u8; COPY_CHUNK];
        let mut offset = file.start_offset;
        while offset < end {
            let want = ((end - offset) as usize).min(COPY_CHUNK);
            let n = self.reader.pread(&mut chunk[..want], offset);
            if n == 0 {
                break;
            }
            out.write_all(&chunk[..n])?;
            offset += n as u64;
        }
        out.flush()?;

        self.written.push(path);
        Ok(())
    }

    fn output_path(&self, file: &CarvedFile, descriptor: &FormatDescriptor) -> Option<PathBuf> {
        Some(self.path_for(file, descriptor))
    }
}
