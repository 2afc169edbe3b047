//! Carving configuration
//!
//! Values consumed by the calibration pass. Loaded from a JSON file or built
//! in code with the `with_*` setters, then checked with [`CarveConfig::validate`].

use crate::error::{CarveError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const DEFAULT_BLOCKSIZE: u32 = 512;
pub const DEFAULT_SECTOR_SIZE: u32 = 512;
pub const DEFAULT_READ_CHUNK: usize = 512 * 1024;
pub const DEFAULT_PROBE_LIMIT: u32 = 10;

/// Where the scanned partition lives on the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceGeometry {
    /// Byte offset of the partition on the device
    pub partition_offset: u64,
    /// Partition size in bytes
    pub partition_size: u64,
    /// Sector size in bytes
    pub sector_size: u32,
}

impl Default for DeviceGeometry {
    fn default() -> Self {
        Self {
            partition_offset: 0,
            partition_size: 0,
            sector_size: DEFAULT_SECTOR_SIZE,
        }
    }
}

impl DeviceGeometry {
    /// Whole-device geometry for a device of `size` bytes
    pub fn whole_device(size: u64) -> Self {
        Self {
            partition_size: size,
            ..Default::default()
        }
    }

    /// Sector index of `offset`, relative to the partition start
    pub fn sector_of(&self, offset: u64) -> u64 {
        offset.saturating_sub(self.partition_offset) / u64::from(self.sector_size.max(1))
    }

    /// Index of the last sector of the partition
    pub fn last_sector(&self) -> u64 {
        self.partition_size.saturating_sub(1) / u64::from(self.sector_size.max(1))
    }

    /// Byte offset one past the end of the partition
    pub fn end_offset(&self) -> u64 {
        self.partition_offset + self.partition_size
    }
}

/// Options for a carving pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CarveConfig {
    /// Block granularity in bytes
    pub blocksize: u32,
    /// Global size ceiling per file, 0 = unbounded
    pub max_file_size: u64,
    /// Number of opened candidates after which calibration stops
    pub probe_limit: u32,
    /// Bytes read from storage on each window refill
    pub read_chunk: usize,
    /// Diagnostics verbosity
    pub verbose: u8,
    pub geometry: DeviceGeometry,
}

impl Default for CarveConfig {
    fn default() -> Self {
        Self {
            blocksize: DEFAULT_BLOCKSIZE,
            max_file_size: 0,
            probe_limit: DEFAULT_PROBE_LIMIT,
            read_chunk: DEFAULT_READ_CHUNK,
            verbose: 0,
            geometry: DeviceGeometry::default(),
        }
    }
}

impl CarveConfig {
    /// Loads a configuration from a JSON file; missing fields keep their defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_blocksize(mut self, blocksize: u32) -> Self {
        self.blocksize = blocksize;
        self
    }

    pub fn with_max_file_size(mut self, max_file_size: u64) -> Self {
        self.max_file_size = max_file_size;
        self
    }

    pub fn with_probe_limit(mut self, probe_limit: u32) -> Self {
        self.probe_limit = probe_limit;
        self
    }

    pub fn with_read_chunk(mut self, read_chunk: usize) -> Self {
        self.read_chunk = read_chunk;
        self
    }

    pub fn with_verbose(mut self, verbose: u8) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_geometry(mut self, geometry: DeviceGeometry) -> Self {
        self.geometry = geometry;
        self
    }

    /// Checks the values the calibration loop relies on
    pub fn validate(&self) -> Result<()> {
        if self.blocksize == 0 {
            return Err(CarveError::InvalidConfig("blocksize must be non-zero".into()));
        }
        if self.geometry.sector_size == 0 {
            return Err(CarveError::InvalidConfig(
                "sector size must be non-zero".into(),
            ));
        }
        if self.blocksize % self.geometry.sector_size != 0 {
            return Err(CarveError::InvalidConfig(format!(
                "blocksize {} is not a multiple of the sector size {}",
                self.blocksize, self.geometry.sector_size
            )));
        }
        if self.read_chunk == 0 {
            return Err(CarveError::InvalidConfig("read chunk must be non-zero".into()));
        }
        if self.probe_limit == 0 {
            return Err(CarveError::InvalidConfig("probe limit must be non-zero".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = CarveConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.blocksize, 512);
        assert_eq!(config.probe_limit, 10);
        assert_eq!(config.max_file_size, 0);
    }

    #[test]
    fn test_zero_blocksize_rejected() {
        let config = CarveConfig::default().with_blocksize(0);
        assert!(matches!(config.validate(), Err(CarveError::InvalidConfig(_))));
    }

    #[test]
    fn test_unaligned_blocksize_rejected() {
        let config = CarveConfig::default().with_blocksize(700);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: CarveConfig =
            serde_json::from_str(r#"{"blocksize": 4096, "max_file_size": 1048576}"#).unwrap();
        assert_eq!(config.blocksize, 4096);
        assert_eq!(config.max_file_size, 1048576);
        assert_eq!(config.read_chunk, DEFAULT_READ_CHUNK);
        assert_eq!(config.geometry.sector_size, 512);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carve.json");
        std::fs::write(&path, r#"{"probe_limit": 3, "geometry": {"partition_offset": 1024}}"#)
            .unwrap();

        let config = CarveConfig::from_json_file(&path).unwrap();
        assert_eq!(config.probe_limit, 3);
        assert_eq!(config.geometry.partition_offset, 1024);
        assert_eq!(config.geometry.sector_size, 512);
    }

    #[test]
    fn test_geometry_sectors() {
        let geometry = DeviceGeometry {
            partition_offset: 1024,
            partition_size: 4096,
            sector_size: 512,
        };
        assert_eq!(geometry.sector_of(1024), 0);
        assert_eq!(geometry.sector_of(2048), 2);
        assert_eq!(geometry.last_sector(), 7);
        assert_eq!(geometry.end_offset(), 5120);
    }
}
