//! Shared, lazily started, multi-subscriber frame stream.
//!
//! The first [`StreamPublisher::subscribe`] call starts an acquisition
//! session on a dedicated worker thread. Later subscribers join the same
//! session, so a live device is never opened twice. When the last
//! [`Subscription`] is dropped the session is cancelled and torn down;
//! the next subscription starts a fresh one.
//!
//! Each subscriber has a bounded queue. A full queue blocks the worker
//! until that subscriber catches up, so a slow consumer delays the next
//! device read instead of losing frames.

mod subscription;

pub use subscription::{FrameResult, Subscription};

use crate::acquisition::{
    AcquisitionConfig, AcquisitionError, AcquisitionLoop, CancellationToken, PublisherConfig,
    SessionState,
};
use crate::device::{DeviceError, ScanDevice};
use crate::metrics::AcquisitionMetrics;
use crate::reconstruction::{ReconstructedFrame, ReconstructionConfig};
use crossbeam::channel::{self, Sender};
use parking_lot::{Mutex, RwLock};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

type DeviceFactory = dyn Fn() -> Result<Box<dyn ScanDevice>, DeviceError> + Send + Sync;

/// Settings shared by every session a publisher starts.
#[derive(Clone, Default)]
pub struct PublisherSettings {
    /// Command sequences and frame limit for each session.
    pub acquisition: AcquisitionConfig,
    /// Reconstruction settings for each session.
    pub reconstruction: ReconstructionConfig,
    /// Per-subscriber queue settings.
    pub publisher: PublisherConfig,
    /// Metrics shared by every session, if any.
    pub metrics: Option<AcquisitionMetrics>,
}

/// Multicast publisher over acquisition sessions.
///
/// Cloning yields another handle to the same publisher.
#[derive(Clone)]
pub struct StreamPublisher {
    shared: Arc<Shared>,
}

struct Shared {
    factory: Box<DeviceFactory>,
    settings: PublisherSettings,
    device_guard: Arc<Mutex<()>>,
    state: Arc<RwLock<SessionState>>,
    current: Mutex<Option<Arc<Session>>>,
    next_session_id: AtomicU64,
    next_subscriber_id: AtomicU64,
}

/// One live acquisition session and the subscribers attached to it.
struct Session {
    id: u64,
    cancel: CancellationToken,
    subscribers: Mutex<Vec<Subscriber>>,
}

struct Subscriber {
    id: u64,
    sender: Sender<FrameResult>,
}

impl StreamPublisher {
    /// Creates a publisher that opens a fresh device from `factory` for each session.
    ///
    /// The factory runs on the session worker. An error (or panic) from it
    /// ends that session like a failed connect.
    pub fn new<F>(factory: F, settings: PublisherSettings) -> Result<Self, AcquisitionError>
    where
        F: Fn() -> Result<Box<dyn ScanDevice>, DeviceError> + Send + Sync + 'static,
    {
        settings.acquisition.validate()?;
        settings.publisher.validate()?;

        Ok(Self {
            shared: Arc::new(Shared {
                factory: Box::new(factory),
                settings,
                device_guard: Arc::new(Mutex::new(())),
                state: Arc::new(RwLock::new(SessionState::Idle)),
                current: Mutex::new(None),
                next_session_id: AtomicU64::new(1),
                next_subscriber_id: AtomicU64::new(1),
            }),
        })
    }

    /// Attaches a new subscriber, starting a session if none is live.
    pub fn subscribe(&self) -> Result<Subscription, AcquisitionError> {
        let shared = &self.shared;
        let mut current = shared.current.lock();

        let (session, is_new) = match current.as_ref() {
            Some(session) => (Arc::clone(session), false),
            None => {
                let session = Arc::new(Session {
                    id: shared.next_session_id.fetch_add(1, Ordering::Relaxed),
                    cancel: CancellationToken::new(),
                    subscribers: Mutex::new(Vec::new()),
                });
                (session, true)
            }
        };

        let id = shared.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = channel::bounded(shared.settings.publisher.queue_depth);
        let subscriber_count = {
            let mut subscribers = session.subscribers.lock();
            subscribers.push(Subscriber { id, sender });
            subscribers.len()
        };

        if is_new {
            let worker_shared = Arc::clone(shared);
            let worker_session = Arc::clone(&session);
            thread::Builder::new()
                .name(format!("acquisition-{}", session.id))
                .spawn(move || run_session(worker_shared, worker_session))
                .map_err(|e| AcquisitionError::Spawn(e.to_string()))?;
            *current = Some(Arc::clone(&session));
            tracing::info!(session = session.id, "Started acquisition session");
        }

        if let Some(metrics) = &shared.settings.metrics {
            metrics.set_subscribers(subscriber_count);
        }
        tracing::debug!(
            session = session.id,
            subscriber = id,
            subscribers = subscriber_count,
            "Subscriber attached"
        );

        Ok(Subscription::new(
            id,
            receiver,
            session,
            Arc::downgrade(shared),
        ))
    }

    /// Subscribers attached to the live session.
    pub fn subscriber_count(&self) -> usize {
        self.shared
            .current
            .lock()
            .as_ref()
            .map_or(0, |session| session.subscribers.lock().len())
    }

    /// Returns true while a session is live (subscribed and not yet ended).
    pub fn is_active(&self) -> bool {
        self.shared.current.lock().is_some()
    }

    /// Current device lifecycle state.
    ///
    /// This can report `Disconnecting` after the last subscriber has left,
    /// while the previous session is still tearing down.
    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }
}

/// Worker thread body: one acquisition session from start to teardown.
fn run_session(shared: Arc<Shared>, session: Arc<Session>) {
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        let device = match (shared.factory)() {
            Ok(device) => device,
            Err(e) => {
                tracing::warn!(session = session.id, error = %e, "Failed to open scan device");
                if let Some(metrics) = &shared.settings.metrics {
                    metrics.session_failed();
                }
                return Err(AcquisitionError::from(e));
            }
        };

        let hook_shared = Arc::clone(&shared);
        let hook_session = Arc::clone(&session);
        let mut acquisition = AcquisitionLoop::new(
            device,
            shared.settings.acquisition.clone(),
            shared.settings.reconstruction,
        )
        .with_guard(Arc::clone(&shared.device_guard))
        .with_state(Arc::clone(&shared.state))
        .with_session_id(session.id)
        .with_stop_hook(move || hook_shared.retire(&hook_session));
        if let Some(metrics) = &shared.settings.metrics {
            acquisition = acquisition.with_metrics(metrics.clone());
        }

        acquisition.run(&session.cancel, |frame| session.publish(frame))
    }))
    .unwrap_or(Err(AcquisitionError::WorkerPanicked));

    // Sessions that never reached the device have not retired yet
    shared.retire(&session);
    session.finish(outcome.map(|_| ()));
}

impl Shared {
    /// Detaches `session` if it is still the live one, so the next
    /// subscriber starts a fresh session.
    fn retire(&self, session: &Arc<Session>) {
        let mut current = self.current.lock();
        if !current
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(live, session))
        {
            return;
        }
        *current = None;
        if let Some(metrics) = &self.settings.metrics {
            metrics.set_subscribers(0);
        }
        tracing::debug!(session = session.id, "Session retired");
    }
}

impl Session {
    /// Delivers a frame to every attached subscriber.
    fn publish(&self, frame: ReconstructedFrame) {
        let frame = Arc::new(frame);
        let senders: Vec<(u64, Sender<FrameResult>)> = self
            .subscribers
            .lock()
            .iter()
            .map(|s| (s.id, s.sender.clone()))
            .collect();

        for (id, sender) in senders {
            // Blocks while this subscriber's queue is full
            if sender.send(Ok(Arc::clone(&frame))).is_err() {
                tracing::trace!(session = self.id, subscriber = id, "Subscriber detached");
            }
        }
    }

    /// Signals the end of the session to the remaining subscribers.
    fn finish(&self, outcome: Result<(), AcquisitionError>) {
        let subscribers = std::mem::take(&mut *self.subscribers.lock());
        match outcome {
            Ok(()) => {
                tracing::info!(
                    session = self.id,
                    subscribers = subscribers.len(),
                    "Acquisition session completed"
                );
            }
            Err(e) => {
                tracing::warn!(session = self.id, error = %e, "Acquisition session terminated");
                for subscriber in &subscribers {
                    let _ = subscriber.sender.send(Err(e.clone()));
                }
            }
        }
        // Dropping the senders ends every subscriber's stream
    }

    /// Removes a subscriber, returning how many remain.
    fn detach(&self, subscriber: u64) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|s| s.id != subscriber);
        subscribers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceError, MockScanner, MockScannerConfig, MockStats};
    use std::time::{Duration, Instant};

    fn scanner_config() -> MockScannerConfig {
        MockScannerConfig {
            samples_per_pixel: 2,
            pixels_per_line: 4,
            lines_per_frame: 4,
            chunk_samples: 32,
            read_delay_ms: 1,
            sentinel_every: 0,
        }
    }

    fn publisher_with<F>(stats: &Arc<MockStats>, settings: PublisherSettings, customize: F) -> StreamPublisher
    where
        F: Fn(MockScanner) -> MockScanner + Send + Sync + 'static,
    {
        let stats = Arc::clone(stats);
        StreamPublisher::new(
            move || {
                let scanner = MockScanner::new(scanner_config()).with_stats(Arc::clone(&stats));
                Ok(Box::new(customize(scanner)) as Box<dyn ScanDevice>)
            },
            settings,
        )
        .unwrap()
    }

    fn publisher(stats: &Arc<MockStats>) -> StreamPublisher {
        publisher_with(stats, PublisherSettings::default(), |scanner| scanner)
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        condition()
    }

    fn next_frame(subscription: &Subscription) -> Arc<ReconstructedFrame> {
        subscription
            .recv_timeout(Duration::from_secs(5))
            .expect("frame within timeout")
            .expect("frame, not error")
    }

    #[test]
    fn test_subscribers_share_one_session() {
        let stats = MockStats::new();
        let (gate_tx, gate_rx) = channel::bounded::<()>(0);
        let publisher = publisher_with(&stats, PublisherSettings::default(), move |scanner| {
            scanner.with_start_gate(gate_rx.clone())
        });

        let first = publisher.subscribe().unwrap();
        let second = publisher.subscribe().unwrap();
        assert_eq!(publisher.subscriber_count(), 2);
        assert_eq!(first.session_id(), second.session_id());
        drop(gate_tx);

        let mut seen_first = Vec::new();
        let mut seen_second = Vec::new();
        for _ in 0..5 {
            let a = next_frame(&first);
            let b = next_frame(&second);
            assert!(Arc::ptr_eq(&a, &b));
            seen_first.push(a.sequence());
            seen_second.push(b.sequence());
        }

        assert_eq!(seen_first, vec![1, 2, 3, 4, 5]);
        assert_eq!(seen_first, seen_second);
        assert_eq!(stats.connects(), 1);
    }

    #[test]
    fn test_last_subscriber_leaving_tears_down() {
        let stats = MockStats::new();
        let publisher = publisher(&stats);

        let first = publisher.subscribe().unwrap();
        let second = publisher.subscribe().unwrap();
        next_frame(&first);
        next_frame(&second);

        drop(first);
        assert!(publisher.is_active());
        next_frame(&second);

        drop(second);
        assert!(!publisher.is_active());
        assert!(wait_until(|| stats.disconnects() == 1));
        assert!(wait_until(|| publisher.state() == SessionState::Idle));

        thread::sleep(Duration::from_millis(20));
        assert_eq!(stats.connects(), 1);
        assert_eq!(stats.disconnects(), 1);
    }

    #[test]
    fn test_resubscribe_starts_fresh_session() {
        let stats = MockStats::new();
        let publisher = publisher(&stats);

        let first = publisher.subscribe().unwrap();
        let first_session = first.session_id();
        next_frame(&first);
        next_frame(&first);
        drop(first);

        let second = publisher.subscribe().unwrap();
        assert_ne!(second.session_id(), first_session);
        // Sequence numbering restarts with the new session
        assert_eq!(next_frame(&second).sequence(), 1);

        assert_eq!(stats.connects(), 2);
        drop(second);
        assert!(wait_until(|| stats.disconnects() == 2));
    }

    #[test]
    fn test_connect_failure_reaches_every_subscriber() {
        let stats = MockStats::new();
        let (gate_tx, gate_rx) = channel::bounded::<()>(0);
        let publisher = publisher_with(&stats, PublisherSettings::default(), move |scanner| {
            scanner
                .with_start_gate(gate_rx.clone())
                .failing_connect()
        });

        let first = publisher.subscribe().unwrap();
        let second = publisher.subscribe().unwrap();
        drop(gate_tx);

        for subscription in [&first, &second] {
            let item = subscription.recv_timeout(Duration::from_secs(5)).unwrap();
            assert!(matches!(
                item,
                Err(AcquisitionError::Device(DeviceError::ConnectFailed(_)))
            ));
            assert!(subscription.recv().is_none());
        }
        assert!(!publisher.is_active());

        // No automatic retry; the next subscriber tries again
        assert_eq!(stats.connects(), 1);
        let third = publisher.subscribe().unwrap();
        assert!(matches!(
            third.recv_timeout(Duration::from_secs(5)),
            Ok(Err(AcquisitionError::Device(_)))
        ));
        assert_eq!(stats.connects(), 2);
    }

    #[test]
    fn test_read_failure_ends_stream_after_frames() {
        let stats = MockStats::new();
        let publisher = publisher_with(&stats, PublisherSettings::default(), |scanner| {
            scanner.failing_read_after(3)
        });

        let items: Vec<FrameResult> = publisher.subscribe().unwrap().collect();

        assert_eq!(items.len(), 4);
        assert!(items[..3].iter().all(|item| item.is_ok()));
        assert!(matches!(
            items[3],
            Err(AcquisitionError::Device(DeviceError::ReadFailed(_)))
        ));
        assert!(wait_until(|| stats.disconnects() == 1));
    }

    #[test]
    fn test_frame_limit_completes_stream() {
        let stats = MockStats::new();
        let metrics = AcquisitionMetrics::new().unwrap();
        let settings = PublisherSettings {
            acquisition: AcquisitionConfig {
                max_frames: 6,
                ..Default::default()
            },
            metrics: Some(metrics.clone()),
            ..Default::default()
        };
        let publisher = publisher_with(&stats, settings, |scanner| scanner);

        let sequences: Vec<u64> = publisher
            .subscribe()
            .unwrap()
            .map(|item| item.unwrap().sequence())
            .collect();

        assert_eq!(sequences, vec![1, 2, 3, 4, 5, 6]);
        assert!(wait_until(|| stats.disconnects() == 1));
        assert_eq!(metrics.snapshot().frames_emitted, 6);
        assert!(wait_until(|| !publisher.is_active()));
    }

    #[test]
    fn test_slow_subscriber_stalls_acquisition() {
        let stats = MockStats::new();
        let settings = PublisherSettings {
            publisher: PublisherConfig { queue_depth: 1 },
            ..Default::default()
        };
        let publisher = publisher_with(&stats, settings, |scanner| scanner);

        let subscription = publisher.subscribe().unwrap();
        assert!(wait_until(|| stats.reads() >= 2));
        thread::sleep(Duration::from_millis(50));

        // One frame queued, one blocked in send: no further reads
        let reads = stats.reads();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(stats.reads(), reads);

        assert_eq!(next_frame(&subscription).sequence(), 1);
        assert_eq!(next_frame(&subscription).sequence(), 2);
        assert_eq!(next_frame(&subscription).sequence(), 3);
    }

    #[test]
    fn test_factory_panic_ends_stream_and_allows_retry() {
        let stats = MockStats::new();
        let calls = Arc::new(AtomicU64::new(0));
        let factory_stats = Arc::clone(&stats);
        let factory_calls = Arc::clone(&calls);
        let publisher = StreamPublisher::new(
            move || {
                if factory_calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    panic!("driver failed to initialize");
                }
                let scanner =
                    MockScanner::new(scanner_config()).with_stats(Arc::clone(&factory_stats));
                Ok(Box::new(scanner) as Box<dyn ScanDevice>)
            },
            PublisherSettings::default(),
        )
        .unwrap();

        let first = publisher.subscribe().unwrap();
        assert!(matches!(
            first.recv_timeout(Duration::from_secs(5)),
            Ok(Err(AcquisitionError::WorkerPanicked))
        ));
        assert!(first.recv().is_none());
        assert!(!publisher.is_active());

        let second = publisher.subscribe().unwrap();
        assert_ne!(second.session_id(), first.session_id());
        assert_eq!(next_frame(&second).sequence(), 1);
        assert_eq!(stats.connects(), 1);
    }

    #[test]
    fn test_factory_error_reaches_subscriber() {
        let metrics = AcquisitionMetrics::new().unwrap();
        let settings = PublisherSettings {
            metrics: Some(metrics.clone()),
            ..Default::default()
        };
        let publisher = StreamPublisher::new(
            || Err(DeviceError::ConnectFailed("no driver installed".into())),
            settings,
        )
        .unwrap();

        let items: Vec<FrameResult> = publisher.subscribe().unwrap().collect();

        assert_eq!(items.len(), 1);
        assert!(matches!(
            items[0],
            Err(AcquisitionError::Device(DeviceError::ConnectFailed(_)))
        ));
        assert!(!publisher.is_active());
        assert_eq!(metrics.snapshot().session_errors, 1);
        assert_eq!(metrics.snapshot().active_subscribers, 0);
    }

    #[test]
    fn test_subscribe_during_teardown_starts_fresh_session() {
        let stats = MockStats::new();
        let metrics = AcquisitionMetrics::new().unwrap();
        let settings = PublisherSettings {
            metrics: Some(metrics.clone()),
            ..Default::default()
        };
        let (gate_tx, gate_rx) = channel::unbounded::<()>();
        let opened = AtomicU64::new(0);
        let publisher = publisher_with(&stats, settings, move |scanner| {
            let scanner = scanner.with_disconnect_gate(gate_rx.clone());
            // Only the first session hits a read fault
            if opened.fetch_add(1, Ordering::SeqCst) == 0 {
                scanner.failing_read_after(1)
            } else {
                scanner
            }
        });

        let first = publisher.subscribe().unwrap();
        assert_eq!(next_frame(&first).sequence(), 1);

        // First session is stuck disconnecting but no longer live
        assert!(wait_until(|| publisher.state() == SessionState::Disconnecting));
        assert!(!publisher.is_active());

        let second = publisher.subscribe().unwrap();
        assert_ne!(second.session_id(), first.session_id());
        assert_eq!(metrics.snapshot().active_subscribers, 1);

        // The new session waits for the old teardown before connecting
        thread::sleep(Duration::from_millis(30));
        assert_eq!(stats.connects(), 1);
        gate_tx.send(()).unwrap();

        assert!(matches!(
            first.recv(),
            Some(Err(AcquisitionError::Device(DeviceError::ReadFailed(_))))
        ));
        assert!(first.recv().is_none());
        assert_eq!(next_frame(&second).sequence(), 1);
        assert_eq!(stats.connects(), 2);
        assert_eq!(stats.disconnects(), 1);

        // A late detach from the finished session leaves the live count alone
        drop(first);
        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(metrics.snapshot().active_subscribers, 1);

        drop(gate_tx);
        drop(second);
        assert!(wait_until(|| stats.disconnects() == 2));
    }

    #[test]
    fn test_subscriber_gauge_survives_old_teardown() {
        let stats = MockStats::new();
        let metrics = AcquisitionMetrics::new().unwrap();
        let settings = PublisherSettings {
            metrics: Some(metrics.clone()),
            ..Default::default()
        };
        let (gate_tx, gate_rx) = channel::unbounded::<()>();
        let publisher = publisher_with(&stats, settings, move |scanner| {
            scanner.with_disconnect_gate(gate_rx.clone())
        });

        let first = publisher.subscribe().unwrap();
        next_frame(&first);
        drop(first);
        assert!(wait_until(|| publisher.state() == SessionState::Disconnecting));

        let second = publisher.subscribe().unwrap();
        assert_eq!(metrics.snapshot().active_subscribers, 1);

        gate_tx.send(()).unwrap();
        next_frame(&second);
        assert!(wait_until(|| stats.disconnects() == 1));
        // Let the old worker run to completion
        thread::sleep(Duration::from_millis(50));

        assert_eq!(publisher.subscriber_count(), 1);
        assert_eq!(metrics.snapshot().active_subscribers, 1);

        drop(gate_tx);
        drop(second);
        assert!(wait_until(|| stats.disconnects() == 2));
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let settings = PublisherSettings {
            publisher: PublisherConfig { queue_depth: 0 },
            ..Default::default()
        };
        let result = StreamPublisher::new(
            || Ok(Box::new(MockScanner::default()) as Box<dyn ScanDevice>),
            settings,
        );
        assert!(matches!(result, Err(AcquisitionError::Config(_))));
    }
}
