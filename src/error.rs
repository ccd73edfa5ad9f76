// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the surfaceless display.
///
/// The first five variants follow the failure classes of the probe and
/// surface pipeline: a single device rejected, every strategy exhausted,
/// a surface config that does not match the display, an image buffer that
/// could not be allocated, and a display that never finished initializing.
#[derive(Error, Debug)]
pub enum SurfacelessError {
    #[error("candidate rejected: {0}")]
    CandidateRejected(String),
    #[error("no usable device found")]
    ProbeExhausted,
    #[error("configuration mismatch: {0}")]
    ConfigMismatch(String),
    #[error("image allocation failed ({width}x{height})")]
    AllocationFailed { width: u32, height: u32 },
    #[error("display not initialized: {0}")]
    NotInitialized(String),
    #[error("bad parameter: {0}")]
    BadParameter(String),
    #[error("{0} is not supported by the bound driver")]
    Unsupported(&'static str),
    #[error("device node {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("driver error: {0}")]
    Driver(String),
    #[error("main thread scheduler disconnected")]
    SchedulerDisconnected,
}

pub type Result<T> = std::result::Result<T, SurfacelessError>;
