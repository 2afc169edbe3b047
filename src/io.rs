use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

use crate::error::{CarveError, Result};

/// Positional reads from the scanned device.
///
/// A read may return fewer bytes than requested. There is no error beyond
/// that: a failed read is a short read.
pub trait StorageReader {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> usize;

    fn size(&self) -> u64;
}

pub struct DiskReader {
    file: File,
    size: u64,
}

impl DiskReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(false)
            .open(path.as_ref())?;

        #[cfg(target_os = "linux")]
        {
            use rustix::fs::{Advice, fadvise};
            let _ = fadvise(&file, 0, None, Advice::Sequential);
        }

        let size = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(0))?;

        Ok(Self { file, size })
    }

    fn read_full(&mut self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut filled = 0;
        while filled < buf.len() {
            match self.file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    if filled == 0 {
                        return Err(e);
                    }
                    break;
                }
            }
        }
        Ok(filled)
    }
}

impl StorageReader for DiskReader {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> usize {
        match self.read_full(buf, offset) {
            Ok(n) => n,
            Err(e) => {
                debug!(offset, error = %e, "read failed");
                0
            }
        }
    }

    #[inline]
    fn size(&self) -> u64 {
        self.size
    }
}

pub struct MmapReader {
    mmap: Mmap,
}

impl MmapReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mmap = unsafe { Mmap::map(&file) }?;

        if mmap.is_empty() {
            return Err(CarveError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mmap returned empty mapping (block device not supported)",
            )));
        }

        #[cfg(target_os = "linux")]
        {
            let _ = mmap.advise(memmap2::Advice::Sequential);
        }

        Ok(Self { mmap })
    }
}

impl StorageReader for MmapReader {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> usize {
        copy_from(&self.mmap, buf, offset)
    }

    #[inline]
    fn size(&self) -> u64 {
        self.mmap.len() as u64
    }
}

/// A device image held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    data: Vec<u8>,
}

impl MemoryReader {
    pub fn new(data: Vec<u8>) -> Self {
        Self { data }
    }
}

impl StorageReader for MemoryReader {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> usize {
        copy_from(&self.data, buf, offset)
    }

    #[inline]
    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

fn copy_from(source: &[u8], buf: &mut [u8], offset: u64) -> usize {
    let Ok(start) = usize::try_from(offset) else {
        return 0;
    };
    if start >= source.len() {
        return 0;
    }
    let len = buf.len().min(source.len() - start);
    buf[..len].copy_from_slice(&source[start..start + len]);
    len
}

/// Opens an image, preferring a memory map and falling back to plain reads
pub fn open_image(path: impl AsRef<Path>) -> Result<Box<dyn StorageReader>> {
    let path = path.as_ref();
    match MmapReader::open(path) {
        Ok(reader) => Ok(Box::new(reader)),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "mmap unavailable, using plain reads");
            Ok(Box::new(DiskReader::open(path)?))
        }
    }
}

impl<R: StorageReader + ?Sized> StorageReader for Box<R> {
    fn pread(&mut self, buf: &mut [u8], offset: u64) -> usize {
        (**self).pread(buf, offset)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}
