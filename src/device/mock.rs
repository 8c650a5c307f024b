//! Synthetic scan device for tests and demonstration runs.

use super::{DeviceError, FrameGeometry, ScanDevice};
use crossbeam::channel::Receiver;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Settings for the synthetic scanner.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MockScannerConfig {
    /// Samples averaged into each pixel.
    pub samples_per_pixel: usize,
    /// Pixels in one scan line.
    pub pixels_per_line: usize,
    /// Scan lines in one frame.
    pub lines_per_frame: usize,
    /// Samples returned by each read.
    pub chunk_samples: usize,
    /// Simulated blocking time of each read in milliseconds.
    pub read_delay_ms: u64,
    /// Replace every Nth sample with a negative sentinel (0 disables).
    pub sentinel_every: usize,
}

impl Default for MockScannerConfig {
    fn default() -> Self {
        Self {
            samples_per_pixel: 4,
            pixels_per_line: 64,
            lines_per_frame: 64,
            chunk_samples: 4096,
            read_delay_ms: 5,
            sentinel_every: 0,
        }
    }
}

/// Call counters shared between a mock scanner and the test observing it.
#[derive(Debug, Default)]
pub struct MockStats {
    connects: AtomicU64,
    disconnects: AtomicU64,
    reads: AtomicU64,
    samples: AtomicU64,
    commands: Mutex<Vec<String>>,
}

impl MockStats {
    /// Creates zeroed counters ready to share with a scanner.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of `connect` calls.
    pub fn connects(&self) -> u64 {
        self.connects.load(Ordering::SeqCst)
    }

    /// Number of `disconnect` calls.
    pub fn disconnects(&self) -> u64 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Number of `read_raw_chunk` calls, including failed ones.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Samples returned by successful reads.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::SeqCst)
    }

    /// Every command sent so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().clone()
    }
}

/// Scanner that produces a deterministic ramp pattern.
///
/// Sample `n` of the stream has the value `(n / samples_per_pixel) % 4096`,
/// so every pixel window averages to its own stream position.
#[derive(Debug)]
pub struct MockScanner {
    config: MockScannerConfig,
    stats: Arc<MockStats>,
    connected: bool,
    position: u64,
    fail_connect: bool,
    fail_read_after: Option<u64>,
    start_gate: Option<Receiver<()>>,
    disconnect_gate: Option<Receiver<()>>,
}

impl MockScanner {
    /// Creates a scanner with its own counters.
    pub fn new(config: MockScannerConfig) -> Self {
        Self {
            config,
            stats: MockStats::new(),
            connected: false,
            position: 0,
            fail_connect: false,
            fail_read_after: None,
            start_gate: None,
            disconnect_gate: None,
        }
    }

    /// Reports calls into the given counters.
    pub fn with_stats(mut self, stats: Arc<MockStats>) -> Self {
        self.stats = stats;
        self
    }

    /// Makes `connect` fail.
    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Makes every read after the first `reads` successful ones fail.
    pub fn failing_read_after(mut self, reads: u64) -> Self {
        self.fail_read_after = Some(reads);
        self
    }

    /// Blocks `connect` until a message arrives (or the sender is dropped).
    pub fn with_start_gate(mut self, gate: Receiver<()>) -> Self {
        self.start_gate = Some(gate);
        self
    }

    /// Blocks every `disconnect` until a message arrives (or the sender is dropped).
    pub fn with_disconnect_gate(mut self, gate: Receiver<()>) -> Self {
        self.disconnect_gate = Some(gate);
        self
    }

    /// Returns the counters this scanner reports into.
    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }

    fn sample_at(&self, index: u64) -> i16 {
        let every = self.config.sentinel_every as u64;
        if every > 0 && index % every == every - 1 {
            return -1;
        }
        let spp = self.config.samples_per_pixel.max(1) as u64;
        ((index / spp) % 4096) as i16
    }
}

impl Default for MockScanner {
    fn default() -> Self {
        Self::new(MockScannerConfig::default())
    }
}

impl ScanDevice for MockScanner {
    fn connect(&mut self) -> Result<(), DeviceError> {
        if let Some(gate) = self.start_gate.take() {
            let _ = gate.recv();
        }
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        if self.fail_connect {
            return Err(DeviceError::ConnectFailed("mock device busy".into()));
        }
        self.connected = true;
        self.position = 0;
        tracing::info!(config = ?self.config, "MockScanner connected");
        Ok(())
    }

    fn geometry(&mut self) -> Result<FrameGeometry, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        FrameGeometry::new(
            self.config.samples_per_pixel,
            self.config.pixels_per_line,
            self.config.lines_per_frame,
        )
    }

    fn send_commands(&mut self, commands: &[String]) -> Result<(), DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        self.stats.commands.lock().extend(commands.iter().cloned());
        Ok(())
    }

    fn read_raw_chunk(&mut self) -> Result<Vec<i16>, DeviceError> {
        if !self.connected {
            return Err(DeviceError::NotConnected);
        }
        let reads = self.stats.reads.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = self.fail_read_after {
            if reads >= limit {
                return Err(DeviceError::ReadFailed("mock read fault".into()));
            }
        }
        if self.config.read_delay_ms > 0 {
            std::thread::sleep(Duration::from_millis(self.config.read_delay_ms));
        }

        let start = self.position;
        let chunk: Vec<i16> = (start..start + self.config.chunk_samples as u64)
            .map(|i| self.sample_at(i))
            .collect();
        self.position += chunk.len() as u64;
        self.stats
            .samples
            .fetch_add(chunk.len() as u64, Ordering::SeqCst);
        Ok(chunk)
    }

    fn disconnect(&mut self) {
        if let Some(gate) = &self.disconnect_gate {
            let _ = gate.recv();
        }
        self.stats.disconnects.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
        tracing::info!("MockScanner disconnected");
    }
}
