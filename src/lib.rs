//! Raster Acquisition Library
//!
//! Continuous frame reconstruction for raster-scanning imaging devices.
//! A raw, interleaved stream of detector samples is buffered, sliced into
//! frames, reconstructed into pixel grids and published to any number of
//! consumers as one shared live stream.
//!
//! # Architecture
//!
//! The system follows an explicit data flow:
//!
//! ```text
//! device → acquisition → reconstruction → publisher → subscribers
//!               ↓
//!           metrics
//! ```
//!
//! # Design Principles
//!
//! - **One device session**: concurrent subscribers share a single connection
//! - **Guaranteed teardown**: live acquisition is stopped and the device
//!   disconnected on every exit path
//! - **No silent drops**: a slow subscriber stalls acquisition rather than losing frames
//! - **Explicit policies**: row addressing and empty pixel windows are configured, not implied
//!
//! # Example
//!
//! ```no_run
//! use raster_acquisition::{
//!     device::{MockScanner, MockScannerConfig, ScanDevice},
//!     publisher::{PublisherSettings, StreamPublisher},
//! };
//!
//! let publisher = StreamPublisher::new(
//!     || Ok(Box::new(MockScanner::new(MockScannerConfig::default())) as Box<dyn ScanDevice>),
//!     PublisherSettings::default(),
//! )
//! .unwrap();
//!
//! // The first subscriber connects the device
//! let subscription = publisher.subscribe().unwrap();
//!
//! for frame in subscription.take(10) {
//!     let frame = frame.unwrap();
//!     println!("frame {} ({}x{})", frame.sequence(), frame.width(), frame.height());
//! }
//! // Dropping the last subscription disconnects the device
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![deny(unsafe_code)]

pub mod acquisition;
pub mod device;
pub mod metrics;
pub mod publisher;
pub mod reconstruction;

// Re-export commonly used types at crate root
pub use acquisition::{
    AcquisitionConfig, AcquisitionError, AcquisitionLoop, CancellationToken, FileConfig,
    SessionState,
};
pub use device::{DeviceError, FrameGeometry, MockScanner, ScanDevice};
pub use metrics::AcquisitionMetrics;
pub use publisher::{FrameResult, PublisherSettings, StreamPublisher, Subscription};
pub use reconstruction::{
    EmptyWindowPolicy, FrameReconstructor, ReconstructedFrame, RowAddressing, SampleBuffer,
};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
