//! Continuous acquisition from a scan device.
//!
//! An [`AcquisitionLoop`] owns one device session from connect to
//! disconnect: it reads raw chunks, slices them into frames and hands
//! each reconstructed frame to a sink, until cancelled or failed.

mod cancel;
mod config;
mod session;

pub use cancel::CancellationToken;
pub use config::{AcquisitionConfig, ConfigError, FileConfig, OutputConfig, PublisherConfig};
pub use session::{AcquisitionLoop, SessionEnd, SessionState, SessionSummary, StopHook};

use crate::device::DeviceError;
use crate::reconstruction::ReconstructionError;
use thiserror::Error;

/// Errors that terminate an acquisition session.
///
/// Cloneable so a single terminal error can be delivered to every
/// subscriber of a shared session.
#[derive(Debug, Clone, Error)]
pub enum AcquisitionError {
    /// The device failed to connect, accept a command or deliver samples.
    #[error("device error: {0}")]
    Device(#[from] DeviceError),
    /// A raw frame could not be reconstructed.
    #[error("reconstruction error: {0}")]
    Reconstruction(#[from] ReconstructionError),
    /// Settings were rejected before the session started.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The worker thread could not be started.
    #[error("failed to start acquisition worker: {0}")]
    Spawn(String),
    /// The session worker panicked.
    #[error("acquisition worker panicked")]
    WorkerPanicked,
}
