//! Metrics collection and registry.

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Errors that can occur during metrics operations.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registering or encoding a metric failed.
    #[error("prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// A point-in-time view of the acquisition counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Frames delivered to subscribers.
    pub frames_emitted: u64,
    /// Raw samples read from the device.
    pub samples_read: u64,
    /// Pixels reconstructed without any valid sample.
    pub empty_windows: u64,
    /// Sessions that reached the connecting state.
    pub sessions_started: u64,
    /// Sessions that ended with an error.
    pub session_errors: u64,
    /// Samples waiting in the buffer after the last cycle.
    pub buffered_samples: i64,
    /// Subscribers attached to the live session.
    pub active_subscribers: i64,
    /// Whether a session is currently streaming.
    pub streaming: bool,
}

/// Prometheus metrics for the acquisition pipeline.
///
/// Cloning is cheap and every clone updates the same underlying metrics,
/// so the acquisition worker and the exporter can each hold one.
#[derive(Clone)]
pub struct AcquisitionMetrics {
    registry: Registry,

    // Throughput
    frames_emitted: IntCounter,
    samples_read: IntCounter,
    empty_windows: IntCounter,

    // Session lifecycle
    sessions_started: IntCounter,
    session_errors: IntCounter,
    streaming: IntGauge,

    // Buffering and fan-out
    buffered_samples: IntGauge,
    active_subscribers: IntGauge,
}

impl AcquisitionMetrics {
    /// Creates a new registry with all acquisition metrics registered.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let frames_emitted = IntCounter::new(
            "raster_frames_emitted_total",
            "Total number of reconstructed frames emitted",
        )?;
        let samples_read = IntCounter::new(
            "raster_samples_read_total",
            "Total number of raw samples read from the device",
        )?;
        let empty_windows = IntCounter::new(
            "raster_empty_windows_total",
            "Pixels whose averaging window held no valid samples",
        )?;

        let sessions_started = IntCounter::new(
            "raster_sessions_started_total",
            "Total number of acquisition sessions started",
        )?;
        let session_errors = IntCounter::new(
            "raster_session_errors_total",
            "Total number of acquisition sessions terminated by an error",
        )?;
        let streaming = IntGauge::new(
            "raster_streaming",
            "Whether a session is streaming (1=streaming, 0=idle)",
        )?;

        let buffered_samples = IntGauge::new(
            "raster_buffered_samples",
            "Raw samples pending in the sample buffer",
        )?;
        let active_subscribers = IntGauge::new(
            "raster_active_subscribers",
            "Subscribers attached to the live session",
        )?;

        registry.register(Box::new(frames_emitted.clone()))?;
        registry.register(Box::new(samples_read.clone()))?;
        registry.register(Box::new(empty_windows.clone()))?;
        registry.register(Box::new(sessions_started.clone()))?;
        registry.register(Box::new(session_errors.clone()))?;
        registry.register(Box::new(streaming.clone()))?;
        registry.register(Box::new(buffered_samples.clone()))?;
        registry.register(Box::new(active_subscribers.clone()))?;

        Ok(Self {
            registry,
            frames_emitted,
            samples_read,
            empty_windows,
            sessions_started,
            session_errors,
            streaming,
            buffered_samples,
            active_subscribers,
        })
    }

    /// Records one device read and the resulting buffer fill.
    pub fn record_chunk(&self, samples: usize, buffered: usize) {
        self.samples_read.inc_by(samples as u64);
        self.buffered_samples.set(buffered as i64);
    }

    /// Records an emitted frame.
    pub fn record_frame(&self, empty_windows: usize) {
        self.frames_emitted.inc();
        if empty_windows > 0 {
            self.empty_windows.inc_by(empty_windows as u64);
        }
    }

    /// Counts a session entering `Connecting`.
    pub fn session_started(&self) {
        self.sessions_started.inc();
    }

    /// Counts a session that ended with an error.
    pub fn session_failed(&self) {
        self.session_errors.inc();
    }

    /// Sets the streaming gauge.
    pub fn set_streaming(&self, streaming: bool) {
        self.streaming.set(i64::from(streaming));
        if !streaming {
            self.buffered_samples.set(0);
        }
    }

    /// Sets the active subscriber gauge.
    pub fn set_subscribers(&self, count: usize) {
        self.active_subscribers.set(count as i64);
    }

    /// Reads the current value of every metric.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_emitted: self.frames_emitted.get(),
            samples_read: self.samples_read.get(),
            empty_windows: self.empty_windows.get(),
            sessions_started: self.sessions_started.get(),
            session_errors: self.session_errors.get(),
            buffered_samples: self.buffered_samples.get(),
            active_subscribers: self.active_subscribers.get(),
            streaming: self.streaming.get() == 1,
        }
    }

    /// Returns the underlying Prometheus registry.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Encodes all metrics in Prometheus text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_creation() {
        let metrics = AcquisitionMetrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_metrics_update() {
        let metrics = AcquisitionMetrics::new().unwrap();

        metrics.session_started();
        metrics.set_streaming(true);
        metrics.record_chunk(1000, 24);
        metrics.record_chunk(1000, 48);
        metrics.record_frame(0);
        metrics.record_frame(3);
        metrics.set_subscribers(2);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.samples_read, 2000);
        assert_eq!(snapshot.buffered_samples, 48);
        assert_eq!(snapshot.frames_emitted, 2);
        assert_eq!(snapshot.empty_windows, 3);
        assert!(snapshot.streaming);

        let output = metrics.encode().unwrap();
        assert!(output.contains("raster_frames_emitted_total 2"));
        assert!(output.contains("raster_active_subscribers 2"));
        assert!(output.contains("raster_sessions_started_total 1"));
    }

    #[test]
    fn test_clones_share_state() {
        let metrics = AcquisitionMetrics::new().unwrap();
        let worker = metrics.clone();

        worker.record_frame(0);
        worker.set_streaming(false);

        assert_eq!(metrics.snapshot().frames_emitted, 1);
        assert!(!metrics.snapshot().streaming);
    }
}
