//! Scan device contract.
//!
//! This trait is implemented by the hardware driver adapter. The
//! acquisition loop only ever talks to the device through it, which
//! lets tests drive the whole pipeline from [`MockScanner`](super::MockScanner).

use super::FrameGeometry;
use thiserror::Error;

/// Errors reported by the device layer.
#[derive(Debug, Clone, Error)]
pub enum DeviceError {
    /// The device session could not be opened.
    #[error("failed to connect to device: {0}")]
    ConnectFailed(String),
    /// The device rejected a configuration directive.
    #[error("device rejected command '{command}': {reason}")]
    CommandFailed {
        /// The directive that was sent.
        command: String,
        /// Reason reported by the driver.
        reason: String,
    },
    /// A raw sample read failed.
    #[error("failed to read raw samples: {0}")]
    ReadFailed(String),
    /// The call requires a connected device.
    #[error("device not connected")]
    NotConnected,
    /// The device reported an unusable geometry.
    #[error("invalid frame geometry: {0}")]
    InvalidGeometry(String),
}

/// A raster-scanning device that streams raw detector samples.
///
/// Calls arrive from a single worker thread in lifecycle order:
/// `connect`, `geometry`, `send_commands`, repeated `read_raw_chunk`,
/// `send_commands` (stop sequence), `disconnect`.
pub trait ScanDevice: Send {
    /// Opens a device session.
    fn connect(&mut self) -> Result<(), DeviceError>;

    /// Returns the frame geometry of the connected session.
    fn geometry(&mut self) -> Result<FrameGeometry, DeviceError>;

    /// Issues configuration directives in order.
    fn send_commands(&mut self, commands: &[String]) -> Result<(), DeviceError>;

    /// Blocks until the next batch of raw samples is available.
    ///
    /// The batch size is chosen by the driver and may be smaller than one frame.
    fn read_raw_chunk(&mut self) -> Result<Vec<i16>, DeviceError>;

    /// Closes the device session. Must be safe to call after a failed session.
    fn disconnect(&mut self);
}

impl<D: ScanDevice + ?Sized> ScanDevice for Box<D> {
    fn connect(&mut self) -> Result<(), DeviceError> {
        (**self).connect()
    }

    fn geometry(&mut self) -> Result<FrameGeometry, DeviceError> {
        (**self).geometry()
    }

    fn send_commands(&mut self, commands: &[String]) -> Result<(), DeviceError> {
        (**self).send_commands(commands)
    }

    fn read_raw_chunk(&mut self) -> Result<Vec<i16>, DeviceError> {
        (**self).read_raw_chunk()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }
}
