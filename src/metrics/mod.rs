//! Prometheus metrics exporter for acquisition monitoring.
//!
//! # Metrics Exposed
//!
//! ## Throughput
//! - `raster_frames_emitted_total` - Reconstructed frames emitted
//! - `raster_samples_read_total` - Raw samples read from the device
//! - `raster_empty_windows_total` - Pixels reconstructed without valid samples
//!
//! ## Session Lifecycle
//! - `raster_sessions_started_total` - Sessions started
//! - `raster_session_errors_total` - Sessions terminated by an error
//! - `raster_streaming` - Current streaming status (1=streaming, 0=idle)
//!
//! ## Buffering
//! - `raster_buffered_samples` - Samples pending in the sample buffer
//! - `raster_active_subscribers` - Subscribers attached to the live session
//!
//! # Example
//!
//! ```no_run
//! use raster_acquisition::metrics::AcquisitionMetrics;
//!
//! let metrics = AcquisitionMetrics::new().expect("Failed to create registry");
//! metrics.record_chunk(4096, 512);
//! metrics.record_frame(0);
//!
//! println!("{}", metrics.encode().unwrap());
//! ```

mod collector;
#[cfg(feature = "metrics")]
mod server;

pub use collector::{AcquisitionMetrics, MetricsError, MetricsSnapshot};
#[cfg(feature = "metrics")]
pub use server::{MetricsServer, MetricsServerConfig, ServerError};
