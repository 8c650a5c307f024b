//! Acquisition configuration.
//!
//! The command sequences are device directives sent verbatim through
//! [`ScanDevice::send_commands`](crate::device::ScanDevice::send_commands).
//! The defaults put the scanner into non-blocking buffered raw streaming
//! and start live acquisition.

use crate::device::{FrameGeometry, MockScannerConfig};
use crate::reconstruction::ReconstructionConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Configuration for one acquisition session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Directives issued in order before streaming starts.
    pub start_commands: Vec<String>,
    /// Directives issued in order before disconnecting.
    pub stop_commands: Vec<String>,
    /// End the session normally after this many frames (0 runs until cancelled).
    pub max_frames: u64,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            start_commands: vec![
                "-DoNotWaitForScans".into(),
                "-LimitGSDMABufferSize true 100".into(),
                "-StreamRawData true 50".into(),
                "-fa 1".into(),
                "-lv on".into(),
            ],
            stop_commands: vec!["-lv off".into()],
            max_frames: 0,
        }
    }
}

impl AcquisitionConfig {
    /// Validates the configuration parameters.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let blank = self
            .start_commands
            .iter()
            .chain(&self.stop_commands)
            .any(|c| c.trim().is_empty());
        if blank {
            return Err(ConfigError::BlankCommand);
        }
        Ok(())
    }

    /// Returns the frame limit, if any.
    pub fn frame_limit(&self) -> Option<u64> {
        (self.max_frames > 0).then_some(self.max_frames)
    }
}

/// Fan-out settings for the stream publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    /// Frames queued per subscriber before the worker blocks.
    pub queue_depth: usize,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self { queue_depth: 4 }
    }
}

impl PublisherConfig {
    /// Rejects a zero queue depth.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_depth == 0 {
            return Err(ConfigError::InvalidQueueDepth);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// A start or stop command is empty or whitespace.
    #[error("device commands must not be blank")]
    BlankCommand,
    /// Subscriber queue depth is zero.
    #[error("subscriber queue depth must be at least 1")]
    InvalidQueueDepth,
    /// Scanner dimensions do not form a valid geometry.
    #[error("invalid scanner geometry: {0}")]
    InvalidGeometry(String),
    /// Scanner chunk size is zero.
    #[error("scanner chunk size must be at least 1 sample")]
    InvalidChunkSize,
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    FileReadError(String),
    /// The config file is not valid TOML for this layout.
    #[error("failed to parse config file: {0}")]
    ParseError(String),
}

/// Full configuration file format.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Device command sequences and frame limit.
    #[serde(default)]
    pub acquisition: AcquisitionConfig,
    /// Row addressing and empty-window policy.
    #[serde(default)]
    pub reconstruction: ReconstructionConfig,
    /// Subscriber fan-out settings.
    #[serde(default)]
    pub publisher: PublisherConfig,
    /// Synthetic scanner used by the CLI.
    #[serde(default)]
    pub mock: MockScannerConfig,
    /// CLI run length and metrics port.
    #[serde(default)]
    pub output: OutputConfig,
}

/// Output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Run continuously (true) or process fixed number of frames (false).
    pub continuous: bool,
    /// Number of frames to process if not continuous.
    pub frame_count: u64,
    /// Metrics server port (0 to disable).
    pub metrics_port: u16,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            continuous: false,
            frame_count: 100,
            metrics_port: 9090,
        }
    }
}

impl FileConfig {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: FileConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates every section, including the scanner geometry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.acquisition.validate()?;
        self.publisher.validate()?;
        FrameGeometry::new(
            self.mock.samples_per_pixel,
            self.mock.pixels_per_line,
            self.mock.lines_per_frame,
        )
        .map_err(|e| ConfigError::InvalidGeometry(e.to_string()))?;
        if self.mock.chunk_samples == 0 {
            return Err(ConfigError::InvalidChunkSize);
        }
        Ok(())
    }
}
