//! Scan device abstraction and frame geometry.
//!
//! The hardware driver is an external collaborator. This module defines
//! the contract the acquisition loop relies on, the geometry queried from
//! the device at session start, and a synthetic scanner for tests.

mod driver;
mod geometry;
mod mock;

pub use driver::{DeviceError, ScanDevice};
pub use geometry::FrameGeometry;
pub use mock::{MockScanner, MockScannerConfig, MockStats};
