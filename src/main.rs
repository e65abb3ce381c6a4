//! # Audio Kernel - Demo Entry Point
//!
//! Runs the engine in producer/consumer mode against a synthetic capture
//! source until Ctrl-C, SIGTERM or an optional time limit.
//!
//! ## What this does:
//! 1. Loads `.env`, sets up tracing, loads and validates configuration
//! 2. Initializes and starts an engine, then moves its pipeline onto a worker
//! 3. Feeds a sine wave from a capture thread at the configured real-time rate
//! 4. Drains processed blocks on a render thread and returns them to the pool
//! 5. Logs statistics every second, then a final health report as JSON
//!
//! ## Environment Variables:
//! - `RUST_LOG`: log filter, defaults to `audio_kernel=debug`
//! - `AUDIO_KERNEL_DEMO_SECONDS`: stop after this many seconds
//! - `AUDIO_KERNEL_*`: engine configuration (see `EngineConfig::load`)

use anyhow::{Context, Result};
use audio_kernel::{AudioConfig, AudioEngine, CaptureEndpoint, EngineConfig, RenderEndpoint};
use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once on shutdown; the capture and render threads poll it.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = EngineConfig::load()?;
    config.validate()?;
    let run_for = demo_duration()?;

    info!("Starting audio-kernel v{}", env!("CARGO_PKG_VERSION"));
    info!(
        sample_rate = config.audio.sample_rate,
        channels = config.audio.channels,
        depth = config.queue.depth,
        block_samples = config.queue.block_samples,
        "Configuration loaded"
    );

    let mut engine = AudioEngine::new(config.clone());
    engine.init(&config.audio)?;
    engine.start()?;
    let (capture, render) = engine.start_processing_thread()?;

    let capture_thread = {
        let audio = config.audio;
        let block_samples = config.queue.block_samples;
        thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || run_capture(capture, audio, block_samples))
            .context("failed to spawn capture thread")?
    };
    let render_thread = {
        let poll = Duration::from_micros(config.queue.poll_interval_us.max(1));
        thread::Builder::new()
            .name("audio-render".to_string())
            .spawn(move || run_render(render, poll))
            .context("failed to spawn render thread")?
    };

    setup_signal_handlers();
    let deadline = run_for.map(|d| tokio::time::Instant::now() + d);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = engine.get_stats();
                info!(
                    frames = stats.frames_processed,
                    dropped = stats.dropped_frames,
                    latency_ms = stats.latency_ms,
                    peak = stats.peak_level,
                    avg = stats.avg_level,
                    "Pipeline stats"
                );
            }
            _ = wait_for_shutdown() => {
                info!("Shutdown signal received, stopping engine...");
                break;
            }
            _ = wait_until(deadline) => {
                info!("Run duration elapsed, stopping engine...");
                break;
            }
        }
    }

    SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    let submitted = capture_thread.join().unwrap_or_else(|_| {
        error!("Capture thread panicked");
        0
    });
    let rendered = render_thread.join().unwrap_or_else(|_| {
        error!("Render thread panicked");
        0
    });
    engine.stop()?;

    info!(submitted, rendered, processed = engine.process_count(), "Engine stopped");
    info!("Health report:\n{}", engine.health_report().to_json()?);
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` overrides the default `audio_kernel=debug` filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "audio_kernel=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn demo_duration() -> Result<Option<Duration>> {
    match std::env::var("AUDIO_KERNEL_DEMO_SECONDS") {
        Ok(value) => {
            let secs: u64 = value
                .parse()
                .with_context(|| format!("AUDIO_KERNEL_DEMO_SECONDS is not a number: {}", value))?;
            Ok(Some(Duration::from_secs(secs)))
        }
        Err(_) => Ok(None),
    }
}

/// Listen for SIGINT/SIGTERM and raise the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            match signal(SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    tokio::select! {
                        _ = sigterm.recv() => info!("Received SIGTERM"),
                        _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    }
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    if tokio::signal::ctrl_c().await.is_ok() {
                        info!("Received SIGINT");
                    }
                }
            }
        }

        #[cfg(not(unix))]
        {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Received Ctrl-C");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}

/// Phase-continuous sine generator standing in for a capture device.
struct SineSource {
    phase: f32,
    step: f32,
    amplitude: f32,
    channels: usize,
}

impl SineSource {
    fn new(frequency: f32, amplitude: f32, audio: &AudioConfig) -> Self {
        Self {
            phase: 0.0,
            step: TAU * frequency / audio.sample_rate as f32,
            amplitude,
            channels: audio.channels.max(1) as usize,
        }
    }

    fn fill(&mut self, block: &mut [f32]) {
        for frame in block.chunks_mut(self.channels) {
            let value = self.amplitude * self.phase.sin();
            frame.fill(value);
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}

/// Capture loop: one block per period, never blocking on the pipeline.
fn run_capture(mut capture: CaptureEndpoint, audio: AudioConfig, block_samples: usize) -> u64 {
    let frames = block_samples as f64 / audio.channels.max(1) as f64;
    let period = Duration::from_secs_f64(frames / audio.sample_rate as f64);
    let mut source = SineSource::new(440.0, 0.5, &audio);
    let mut scratch = vec![0.0f32; block_samples];
    let mut submitted = 0;
    let mut next = Instant::now();

    while !SHUTDOWN_SIGNAL.load(Ordering::Acquire) {
        source.fill(&mut scratch);
        // A refused or dropped block is skipped; the source keeps time.
        if let Ok(true) = capture.submit_capture(&scratch) {
            submitted += 1;
        }

        next += period;
        if let Some(wait) = next.checked_duration_since(Instant::now()) {
            thread::sleep(wait);
        }
    }

    debug!(submitted, dropped = capture.dropped_frames(), "Capture thread exiting");
    submitted
}

/// Render loop: drain processed blocks and hand them back to the pool.
fn run_render(mut render: RenderEndpoint, poll: Duration) -> u64 {
    let mut rendered = 0;

    while !SHUTDOWN_SIGNAL.load(Ordering::Acquire) {
        match render.dequeue_processed() {
            Some(block) => {
                if let Err(e) = render.release_buffer(block) {
                    error!("Failed to release block: {}", e);
                }
                rendered += 1;
            }
            None => thread::sleep(poll),
        }
    }

    debug!(rendered, "Render thread exiting");
    rendered
}
