pub mod calibration;
pub mod candidate;
pub mod config;
pub mod error;
pub mod formats;
pub mod io;
pub mod json_log;
pub mod registry;
pub mod search_space;
pub mod sink;
pub mod telemetry;
pub mod types;
pub mod window;

pub use calibration::{
    BlocksizeCalibration, CalibrationReport, PassStatus, SessionStats, infer_blocksize,
};
pub use candidate::{Candidate, DataCheck, Termination};
pub use config::{CarveConfig, DeviceGeometry};
pub use error::{CarveError, Result};
pub use registry::{FileFormat, SignatureRegistry};
pub use search_space::{Cursor, SearchSpace};
pub use sink::{CollectingSink, DirectorySink, FileSink};
pub use types::{CarvedFile, FormatDescriptor, FormatId, Offset, Signature};
