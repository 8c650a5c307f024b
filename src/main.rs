//! Raster Acquisition CLI
//!
//! Command-line interface for exercising the acquisition pipeline
//! against a synthetic scanner.

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use raster_acquisition::{
    acquisition::FileConfig,
    device::{MockScanner, ScanDevice},
    metrics::AcquisitionMetrics,
    publisher::{PublisherSettings, StreamPublisher, Subscription},
    SessionState,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Parser)]
#[command(name = "raster-acquisition")]
#[command(version)]
#[command(about = "Reconstruct frames from a raster-scanning device")]
#[command(
    long_about = "Streams raw samples from a synthetic raster scanner, reconstructs frames and fans them out to one or more subscribers. Press Ctrl+C to stop."
)]
struct Args {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Frames to receive before stopping (overrides the config file)
    #[arg(short, long)]
    frames: Option<u64>,

    /// Run until interrupted
    #[arg(long)]
    continuous: bool,

    /// Concurrent subscribers sharing the session
    #[arg(short, long, default_value_t = 1)]
    subscribers: usize,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .init();

    info!("Raster Acquisition v{}", raster_acquisition::VERSION);
    info!("This is a demonstration using mock scanner input");

    let mut config = match &args.config {
        Some(path) => match FileConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to load config {}: {}", path.display(), e);
                return ExitCode::FAILURE;
            }
        },
        None => FileConfig::default(),
    };
    if let Some(frames) = args.frames {
        config.output.frame_count = frames;
    }
    if args.continuous {
        config.output.continuous = true;
    }

    let metrics = match AcquisitionMetrics::new() {
        Ok(metrics) => metrics,
        Err(e) => {
            eprintln!("Failed to create metrics registry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    #[cfg(feature = "metrics")]
    if config.output.metrics_port != 0 {
        spawn_metrics_server(config.output.metrics_port, metrics.clone());
    }

    let running = Arc::new(AtomicBool::new(true));
    {
        let running = Arc::clone(&running);
        if let Err(e) = ctrlc::set_handler(move || running.store(false, Ordering::SeqCst)) {
            warn!("Failed to install Ctrl+C handler: {}", e);
        }
    }

    let mock = config.mock.clone();
    let settings = PublisherSettings {
        acquisition: config.acquisition.clone(),
        reconstruction: config.reconstruction,
        publisher: config.publisher.clone(),
        metrics: Some(metrics.clone()),
    };
    let publisher = match StreamPublisher::new(
        move || Ok(Box::new(MockScanner::new(mock.clone())) as Box<dyn ScanDevice>),
        settings,
    ) {
        Ok(publisher) => publisher,
        Err(e) => {
            eprintln!("Invalid acquisition settings: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let started_at = chrono::Utc::now();
    let subscription = match publisher.subscribe() {
        Ok(subscription) => subscription,
        Err(e) => {
            eprintln!("Failed to start acquisition: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Additional subscribers observe the same session on their own threads
    let done = Arc::new(AtomicBool::new(false));
    let mut followers = Vec::new();
    for index in 1..args.subscribers.max(1) {
        match publisher.subscribe() {
            Ok(follower) => {
                let done = Arc::clone(&done);
                followers.push(thread::spawn(move || follow(index, follower, &done)));
            }
            Err(e) => warn!("Failed to attach subscriber {}: {}", index, e),
        }
    }

    let target = (!config.output.continuous && config.output.frame_count > 0)
        .then_some(config.output.frame_count);
    info!(
        subscribers = args.subscribers.max(1),
        target = ?target,
        "Receiving frames..."
    );

    let mut received = 0u64;
    let mut failed = false;
    while running.load(Ordering::SeqCst) {
        match subscription.recv_timeout(Duration::from_millis(200)) {
            Ok(Ok(frame)) => {
                received += 1;
                debug!(
                    sequence = frame.sequence(),
                    mean = frame.mean().unwrap_or_default(),
                    empty_windows = frame.empty_windows(),
                    "Frame received"
                );
                if received % 10 == 0 {
                    info!(
                        "Frame {}: {}x{}, mean {:.1}",
                        frame.sequence(),
                        frame.width(),
                        frame.height(),
                        frame.mean().unwrap_or_default()
                    );
                }
                if target.is_some_and(|t| received >= t) {
                    break;
                }
            }
            Ok(Err(e)) => {
                error!("Acquisition failed: {}", e);
                failed = true;
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    done.store(true, Ordering::SeqCst);
    drop(subscription);
    for follower in followers {
        if follower.join().is_err() {
            warn!("Subscriber thread panicked");
        }
    }

    // Give the worker a moment to stop live acquisition and disconnect
    let deadline = Instant::now() + Duration::from_secs(2);
    while publisher.state() != SessionState::Idle && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    if publisher.state() != SessionState::Idle {
        warn!(state = %publisher.state(), "Device teardown still in progress");
    }

    let snapshot = metrics.snapshot();
    let elapsed = chrono::Utc::now() - started_at;
    let seconds = elapsed.num_milliseconds().max(1) as f64 / 1000.0;
    info!(
        "Received {} frames in {:.2}s ({:.1} fps); {} samples read, {} empty pixel windows",
        received,
        seconds,
        received as f64 / seconds,
        snapshot.samples_read,
        snapshot.empty_windows
    );
    println!(
        "Session started {} | frames {} | samples {} | sessions {} | errors {}",
        started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.frames_emitted,
        snapshot.samples_read,
        snapshot.sessions_started,
        snapshot.session_errors
    );

    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Drains a secondary subscription until the main loop finishes.
fn follow(index: usize, subscription: Subscription, done: &AtomicBool) -> u64 {
    let mut frames = 0u64;
    while !done.load(Ordering::SeqCst) {
        match subscription.recv_timeout(Duration::from_millis(100)) {
            Ok(Ok(_)) => frames += 1,
            Ok(Err(e)) => {
                warn!(subscriber = index, "Session ended with error: {}", e);
                break;
            }
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    info!(subscriber = index, frames, "Subscriber finished");
    frames
}

#[cfg(feature = "metrics")]
fn spawn_metrics_server(port: u16, metrics: AcquisitionMetrics) {
    use raster_acquisition::metrics::{MetricsServer, MetricsServerConfig};

    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("Failed to start metrics runtime: {}", e);
                return;
            }
        };
        let server = MetricsServer::new(MetricsServerConfig::with_port(port), metrics);
        if let Err(e) = runtime.block_on(server.run()) {
            warn!("Metrics server stopped: {}", e);
        }
    });
}
