//! The acquisition session state machine.
//!
//! `Idle → Connecting → Configuring → Streaming → Disconnecting → Idle`
//!
//! Once the device is connected, teardown (stop commands, then
//! disconnect) runs on every exit path: cancellation, frame limit,
//! device or reconstruction error, and panics raised by the frame sink.

use super::{AcquisitionConfig, AcquisitionError, CancellationToken};
use crate::device::{FrameGeometry, ScanDevice};
use crate::metrics::AcquisitionMetrics;
use crate::reconstruction::{
    FrameReconstructor, ReconstructedFrame, ReconstructionConfig, SampleBuffer,
};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// Lifecycle state of an acquisition session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No device session is open.
    #[default]
    Idle,
    /// Opening the device and reading its geometry.
    Connecting,
    /// Sending the start command sequence.
    Configuring,
    /// Reading and reconstructing frames.
    Streaming,
    /// Stopping live acquisition and closing the device.
    Disconnecting,
}

impl SessionState {
    /// Lowercase name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Configuring => "configuring",
            SessionState::Streaming => "streaming",
            SessionState::Disconnecting => "disconnecting",
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The cancellation token was observed.
    Cancelled,
    /// The configured frame limit was reached.
    FrameLimit,
}

/// Totals for a session that ended without error.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Identifier assigned by the caller.
    pub session_id: u64,
    /// Geometry reported by the device at session start.
    pub geometry: FrameGeometry,
    /// Frames handed to the sink.
    pub frames_emitted: u64,
    /// Raw samples read from the device.
    pub samples_read: u64,
    /// Pixels filled under the empty-window policy.
    pub empty_windows: u64,
    /// When the session began connecting.
    pub started_at: DateTime<Utc>,
    /// When streaming stopped.
    pub ended_at: DateTime<Utc>,
    /// Why the session ended.
    pub end: SessionEnd,
}

/// Drives one device session from connect to disconnect.
///
/// Sessions that share a guard never overlap: a new session blocks in
/// `run` until the previous one has finished tearing down.
pub struct AcquisitionLoop<D> {
    device: D,
    config: AcquisitionConfig,
    reconstruction: ReconstructionConfig,
    guard: Arc<Mutex<()>>,
    state: Arc<RwLock<SessionState>>,
    metrics: Option<AcquisitionMetrics>,
    session_id: u64,
    stop_hook: Option<StopHook>,
}

/// Callback run once when a session stops streaming.
pub type StopHook = Box<dyn FnOnce() + Send>;

impl<D: ScanDevice> AcquisitionLoop<D> {
    /// Creates a loop over `device` with its own private device guard.
    pub fn new(
        device: D,
        config: AcquisitionConfig,
        reconstruction: ReconstructionConfig,
    ) -> Self {
        Self {
            device,
            config,
            reconstruction,
            guard: Arc::new(Mutex::new(())),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            metrics: None,
            session_id: 0,
            stop_hook: None,
        }
    }

    /// Serializes this session with every other session holding the same guard.
    pub fn with_guard(mut self, guard: Arc<Mutex<()>>) -> Self {
        self.guard = guard;
        self
    }

    /// Publishes state transitions into a shared cell.
    pub fn with_state(mut self, state: Arc<RwLock<SessionState>>) -> Self {
        self.state = state;
        self
    }

    /// Records session activity into `metrics`.
    pub fn with_metrics(mut self, metrics: AcquisitionMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the identifier used in logs and the summary.
    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    /// Runs `hook` once when the session stops: before the stop commands
    /// are sent, or right after a failed connect.
    pub fn with_stop_hook(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.stop_hook = Some(Box::new(hook));
        self
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Borrows the device.
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Consumes the loop, returning the device.
    pub fn into_device(self) -> D {
        self.device
    }

    /// Runs the session until cancelled, the frame limit is reached, or an error occurs.
    ///
    /// Every reconstructed frame is passed to `emit` in acquisition order
    /// before the next device read.
    pub fn run<F>(
        &mut self,
        cancel: &CancellationToken,
        mut emit: F,
    ) -> Result<SessionSummary, AcquisitionError>
    where
        F: FnMut(ReconstructedFrame),
    {
        self.config.validate()?;

        let _exclusive = self.guard.lock();
        let session_id = self.session_id;
        let started_at = Utc::now();

        set_state(&self.state, SessionState::Connecting);
        tracing::info!(session = session_id, "Connecting to scan device");
        if let Some(metrics) = &self.metrics {
            metrics.session_started();
        }

        if let Err(e) = self.device.connect() {
            if let Some(hook) = self.stop_hook.take() {
                hook();
            }
            set_state(&self.state, SessionState::Idle);
            tracing::warn!(session = session_id, error = %e, "Connection failed");
            if let Some(metrics) = &self.metrics {
                metrics.session_failed();
            }
            return Err(e.into());
        }

        let mut device = Teardown {
            device: &mut self.device,
            stop_commands: &self.config.stop_commands,
            state: &self.state,
            metrics: self.metrics.as_ref(),
            session_id,
            stop_hook: self.stop_hook.take(),
        };
        let context = StreamContext {
            config: &self.config,
            reconstruction: self.reconstruction,
            state: &self.state,
            metrics: self.metrics.as_ref(),
            session_id,
            started_at,
        };
        let result = stream(&mut *device, &context, cancel, &mut emit);
        drop(device);

        match result {
            Ok(summary) => {
                tracing::info!(
                    session = session_id,
                    frames = summary.frames_emitted,
                    samples = summary.samples_read,
                    end = ?summary.end,
                    "Acquisition session finished"
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::warn!(session = session_id, error = %e, "Acquisition session failed");
                if let Some(metrics) = &self.metrics {
                    metrics.session_failed();
                }
                Err(e)
            }
        }
    }
}

struct StreamContext<'a> {
    config: &'a AcquisitionConfig,
    reconstruction: ReconstructionConfig,
    state: &'a RwLock<SessionState>,
    metrics: Option<&'a AcquisitionMetrics>,
    session_id: u64,
    started_at: DateTime<Utc>,
}

/// Configuring and streaming phases of a connected session.
fn stream<D, F>(
    device: &mut D,
    context: &StreamContext<'_>,
    cancel: &CancellationToken,
    emit: &mut F,
) -> Result<SessionSummary, AcquisitionError>
where
    D: ScanDevice,
    F: FnMut(ReconstructedFrame),
{
    let geometry = device.geometry()?;
    geometry.validate()?;
    let reconstructor = FrameReconstructor::new(geometry, context.reconstruction)?;
    tracing::info!(session = context.session_id, %geometry, "Device geometry");

    set_state(context.state, SessionState::Configuring);
    device.send_commands(&context.config.start_commands)?;

    set_state(context.state, SessionState::Streaming);
    if let Some(metrics) = context.metrics {
        metrics.set_streaming(true);
    }

    let frame_limit = context.config.frame_limit();
    let mut buffer = SampleBuffer::new(geometry.total_samples_per_frame());
    let mut frames_emitted = 0u64;
    let mut empty_windows = 0u64;

    let summary = |frames_emitted, samples_read, empty_windows, end| SessionSummary {
        session_id: context.session_id,
        geometry,
        frames_emitted,
        samples_read,
        empty_windows,
        started_at: context.started_at,
        ended_at: Utc::now(),
        end,
    };

    while !cancel.is_cancelled() {
        let chunk = device.read_raw_chunk()?;
        let read_at = Utc::now();
        buffer.append(&chunk);
        if let Some(metrics) = context.metrics {
            metrics.record_chunk(chunk.len(), buffer.len());
        }

        let Some(block) = buffer.extract_complete_frames() else {
            continue;
        };

        for raw in block.frames() {
            let grid = reconstructor.reconstruct(raw)?;
            frames_emitted += 1;
            empty_windows += grid.empty_windows() as u64;
            if let Some(metrics) = context.metrics {
                metrics.record_frame(grid.empty_windows());
            }
            tracing::trace!(
                session = context.session_id,
                sequence = frames_emitted,
                "Emitting frame"
            );
            emit(ReconstructedFrame::with_timestamp(grid, frames_emitted, read_at));

            if frame_limit.is_some_and(|limit| frames_emitted >= limit) {
                return Ok(summary(
                    frames_emitted,
                    buffer.total_appended(),
                    empty_windows,
                    SessionEnd::FrameLimit,
                ));
            }
        }
    }

    tracing::debug!(session = context.session_id, "Cancellation observed");
    Ok(summary(
        frames_emitted,
        buffer.total_appended(),
        empty_windows,
        SessionEnd::Cancelled,
    ))
}

fn set_state(cell: &RwLock<SessionState>, state: SessionState) {
    let previous = std::mem::replace(&mut *cell.write(), state);
    tracing::debug!(from = %previous, to = %state, "Session state changed");
}

/// Connected device that stops acquisition and disconnects when dropped.
struct Teardown<'a, D: ScanDevice> {
    device: &'a mut D,
    stop_commands: &'a [String],
    state: &'a RwLock<SessionState>,
    metrics: Option<&'a AcquisitionMetrics>,
    session_id: u64,
    stop_hook: Option<StopHook>,
}

impl<D: ScanDevice> Deref for Teardown<'_, D> {
    type Target = D;

    fn deref(&self) -> &D {
        self.device
    }
}

impl<D: ScanDevice> DerefMut for Teardown<'_, D> {
    fn deref_mut(&mut self) -> &mut D {
        self.device
    }
}

impl<D: ScanDevice> Drop for Teardown<'_, D> {
    fn drop(&mut self) {
        if let Some(hook) = self.stop_hook.take() {
            hook();
        }
        set_state(self.state, SessionState::Disconnecting);
        if let Err(e) = self.device.send_commands(self.stop_commands) {
            tracing::warn!(session = self.session_id, error = %e, "Failed to stop live acquisition");
        }
        self.device.disconnect();
        if let Some(metrics) = self.metrics {
            metrics.set_streaming(false);
        }
        set_state(self.state, SessionState::Idle);
        tracing::info!(session = self.session_id, "Scan device disconnected");
    }
}
