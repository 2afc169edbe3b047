use std::fmt;

pub type Offset = u64;

pub const KB: u64 = 1024;
pub const MB: u64 = KB * 1024;

/// Index of a format inside the [`crate::registry::SignatureRegistry`] that
/// registered it. Also indexes the per-format counters of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FormatId(pub(crate) usize);

impl FormatId {
    #[inline]
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for FormatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Per-type facts shared by every probe of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescriptor {
    pub extension: &'static str,
    pub description: &'static str,
    /// Largest file this format may produce, 0 = unbounded
    pub max_filesize: u64,
}

impl FormatDescriptor {
    pub const fn new(extension: &'static str, description: &'static str, max_filesize: u64) -> Self {
        Self {
            extension,
            description,
            max_filesize,
        }
    }
}

impl fmt::Display for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.description, self.extension)
    }
}

/// A fixed byte pattern expected at `offset` from the start of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Signature {
    pub offset: usize,
    pub pattern: &'static [u8],
}

impl Signature {
    pub const fn new(offset: usize, pattern: &'static [u8]) -> Self {
        Self { offset, pattern }
    }
}

/// A finished candidate handed to the file-assembly sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CarvedFile {
    pub format: FormatId,
    pub start_offset: Offset,
    pub length: u64,
}

impl CarvedFile {
    #[inline]
    pub fn end_offset(&self) -> Offset {
        self.start_offset + self.length
    }
}

/// Renders whole seconds as `{h}h{mm}m{ss}s`
pub fn format_elapsed(secs: u64) -> String {
    format!("{}h{:02}m{:02}s", secs / 3600, (secs / 60) % 60, secs % 60)
}
