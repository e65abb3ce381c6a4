//! # Audio Engine
//!
//! Owns one DSP pipeline and drives it through the engine lifecycle. The
//! engine can process synchronously on the caller's thread (zero-copy mode) or
//! hand the pipeline to a dedicated worker fed by the buffer manager's queues.
//!
//! ## Engine Lifecycle:
//! 1. **Uninitialized**: constructed, nothing allocated
//! 2. **Initialized**: `init(config)` validated the format and zeroed the DSP state
//! 3. **Running**: `start()`; processing calls are accepted
//! 4. **Stopped**: `stop()`; the worker (if any) has been joined
//!
//! `Stopped → Running` is allowed again through `start()`. Adaptive DSP state
//! survives a stop/start cycle.
//!
//! ## Producer/Consumer Mode:
//! `start_processing_thread()` moves the pipeline onto a worker thread and
//! returns the capture and render endpoints. Until `stop()` joins the worker
//! and takes the pipeline back, synchronous calls fail with
//! [`EngineError::PipelineDetached`].

use crate::audio::block::SampleBlock;
use crate::audio::buffer::{BufferManager, CaptureEndpoint, ProcessingEndpoint, RenderEndpoint};
use crate::audio::processor::DspPipeline;
use crate::config::{AudioConfig, EngineConfig};
use crate::error::{EngineError, EngineResult};
use crate::state::{AudioStats, StatsPublisher};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, info_span, warn, Span};
use uuid::Uuid;

/// Current lifecycle state of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Initialized,
    Running,
    Stopped,
}

impl EngineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Initialized => "initialized",
            EngineState::Running => "running",
            EngineState::Stopped => "stopped",
        }
    }
}

pub struct AudioEngine {
    /// Instance id, attached to every log line through `span`
    id: Uuid,
    config: EngineConfig,
    state: EngineState,

    /// `None` while the worker thread owns the pipeline
    pipeline: Option<DspPipeline>,
    publisher: Arc<StatsPublisher>,

    /// Cleared by `stop()`; the worker checks it every iteration
    running: Arc<AtomicBool>,
    process_count: Arc<AtomicU64>,
    worker: Option<JoinHandle<DspPipeline>>,

    created_at: DateTime<Utc>,
    span: Span,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Self {
        let id = Uuid::new_v4();
        let publisher = Arc::new(StatsPublisher::new());
        let pipeline = DspPipeline::with_publisher(config.dsp.clone(), Arc::clone(&publisher));

        Self {
            id,
            config,
            state: EngineState::Uninitialized,
            pipeline: Some(pipeline),
            publisher,
            running: Arc::new(AtomicBool::new(false)),
            process_count: Arc::new(AtomicU64::new(0)),
            worker: None,
            created_at: Utc::now(),
            span: info_span!("audio_engine", id = %id),
        }
    }

    /// Validate `audio` and allocate the DSP state.
    ///
    /// A second call on an initialized engine is a no-op. A rejected format
    /// leaves the engine uninitialized.
    pub fn init(&mut self, audio: &AudioConfig) -> EngineResult<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        if self.state != EngineState::Uninitialized {
            debug!(state = self.state.as_str(), "Engine already initialized");
            return Ok(());
        }

        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineDetached)?;
        if let Err(e) = pipeline.init(audio) {
            warn!("Rejected audio configuration: {}", e);
            return Err(e);
        }

        self.config.audio = *audio;
        self.state = EngineState::Initialized;
        info!(
            sample_rate = audio.sample_rate,
            channels = audio.channels,
            bit_depth = audio.bit_depth,
            "Audio engine initialized"
        );
        Ok(())
    }

    pub fn start(&mut self) -> EngineResult<()> {
        let _guard = self.span.enter();

        match self.state {
            EngineState::Uninitialized => Err(EngineError::NotInitialized),
            EngineState::Running => Ok(()),
            EngineState::Initialized | EngineState::Stopped => {
                self.running.store(true, Ordering::Release);
                self.state = EngineState::Running;
                info!("Audio engine started");
                Ok(())
            }
        }
    }

    /// Stop processing and join the worker thread if one is running.
    ///
    /// When this returns no block is being processed any more. Stopping an
    /// engine that is not running is a no-op.
    pub fn stop(&mut self) -> EngineResult<()> {
        let span = self.span.clone();
        let _guard = span.enter();

        if self.state != EngineState::Running {
            return Ok(());
        }

        self.running.store(false, Ordering::Release);
        self.state = EngineState::Stopped;
        let joined = self.join_worker();

        info!(
            processed = self.process_count(),
            dropped = self.get_stats().dropped_frames,
            "Audio engine stopped"
        );
        joined
    }

    /// True iff the engine is initialized and running.
    pub fn health_check(&self) -> bool {
        self.state == EngineState::Running
    }

    /// Copy `input` into `output` and process it there.
    ///
    /// `output` must hold at least `input.len()` samples; only that prefix is
    /// written. On any error `output` is left untouched and the process
    /// counter does not move.
    pub fn process_audio(&mut self, input: &[f32], output: &mut [f32]) -> EngineResult<()> {
        self.ensure_running()?;

        if output.len() < input.len() {
            return Err(EngineError::BufferMismatch {
                input: input.len(),
                output: output.len(),
            });
        }

        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineDetached)?;
        let target = &mut output[..input.len()];
        target.copy_from_slice(input);
        pipeline.process(target)?;

        self.process_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Process caller-owned memory in place (zero-copy mode).
    pub fn process_in_place(&mut self, buffer: &mut [f32]) -> EngineResult<()> {
        self.ensure_running()?;
        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineDetached)?;
        pipeline.process(buffer)?;
        self.process_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub fn process_block(&mut self, block: &mut SampleBlock) -> EngineResult<()> {
        self.ensure_running()?;
        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineDetached)?;
        pipeline.process_block(block)?;
        self.process_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Move the pipeline onto a worker thread fed by a fresh buffer manager.
    ///
    /// Returns the capture endpoint (for the real-time producer) and the
    /// render endpoint (for the consumer). The worker runs until `stop()`.
    pub fn start_processing_thread(&mut self) -> EngineResult<(CaptureEndpoint, RenderEndpoint)> {
        let span = self.span.clone();
        let _guard = span.enter();

        self.ensure_running()?;
        if self.worker.is_some() {
            return Err(EngineError::PipelineDetached);
        }

        let manager = BufferManager::new(&self.config.queue, &self.config.audio)?;
        let mut pipeline = self.pipeline.take().ok_or(EngineError::PipelineDetached)?;
        pipeline.attach_drop_counter(manager.drop_counter());
        let (capture, processing, render) = manager.split();

        let worker = ProcessingWorker {
            pipeline,
            endpoint: processing,
            running: Arc::clone(&self.running),
            processed: Arc::clone(&self.process_count),
            poll_interval: Duration::from_micros(self.config.queue.poll_interval_us.max(1)),
            span: span.clone(),
        };

        let simple = self.id.simple().to_string();
        let spawned = thread::Builder::new()
            .name(format!("audio-dsp-{}", &simple[..8]))
            .spawn(move || worker.run());

        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                info!(
                    depth = self.config.queue.depth,
                    block_samples = self.config.queue.block_samples,
                    "DSP worker thread started"
                );
                Ok((capture, render))
            }
            Err(e) => {
                // The closure and the pipeline inside it are gone.
                self.pipeline = Some(self.fresh_pipeline()?);
                Err(EngineError::Internal(format!("failed to spawn DSP worker: {}", e)))
            }
        }
    }

    /// Update the noise profile from a block of background noise.
    pub fn learn_noise_profile(&mut self, noise: &[f32]) -> EngineResult<()> {
        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineDetached)?;
        pipeline.learn_noise_profile(noise)
    }

    /// Apply a partial JSON update to the DSP toggles.
    ///
    /// Only possible while the pipeline is attached (not during threaded mode).
    pub fn update_dsp_settings(&mut self, json: &str) -> EngineResult<()> {
        let _guard = self.span.enter();
        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineDetached)?;

        let mut candidate = self.config.clone();
        candidate.update_from_json(json)?;
        pipeline.set_settings(candidate.dsp.clone());
        self.config = candidate;

        info!(
            noise_suppression = self.config.dsp.noise_suppression,
            echo_cancellation = self.config.dsp.echo_cancellation,
            normalization = self.config.dsp.normalization,
            gain_db = self.config.dsp.gain_db,
            "DSP settings updated"
        );
        Ok(())
    }

    /// Latency of the most recently processed block.
    ///
    /// Published by whichever thread runs the pipeline; may trail a block
    /// that is still in flight.
    pub fn get_latency_ms(&self) -> f64 {
        self.publisher.snapshot().latency_ms
    }

    pub fn get_stats(&self) -> AudioStats {
        self.publisher.snapshot()
    }

    /// Zero the process counter and the published statistics.
    ///
    /// Filter state and the lifecycle state are untouched. Not available
    /// while the worker thread owns the pipeline.
    pub fn reset_stats(&mut self) -> EngineResult<()> {
        let _guard = self.span.enter();
        let pipeline = self.pipeline.as_mut().ok_or(EngineError::PipelineDetached)?;
        pipeline.reset_stats();
        self.process_count.store(0, Ordering::Relaxed);
        debug!("Statistics reset");
        Ok(())
    }

    /// Successful processing calls since construction.
    pub fn process_count(&self) -> u64 {
        self.process_count.load(Ordering::Relaxed)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state != EngineState::Uninitialized
    }

    pub fn is_pipeline_attached(&self) -> bool {
        self.pipeline.is_some()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.created_at).num_seconds()
    }

    pub(crate) fn span(&self) -> &Span {
        &self.span
    }

    pub(crate) fn ensure_running(&self) -> EngineResult<()> {
        match self.state {
            EngineState::Running => Ok(()),
            EngineState::Uninitialized => Err(EngineError::NotInitialized),
            EngineState::Initialized | EngineState::Stopped => Err(EngineError::NotRunning),
        }
    }

    fn join_worker(&mut self) -> EngineResult<()> {
        let Some(handle) = self.worker.take() else {
            return Ok(());
        };

        match handle.join() {
            Ok(pipeline) => {
                self.pipeline = Some(pipeline);
                Ok(())
            }
            Err(_) => {
                error!("DSP worker panicked, rebuilding pipeline with fresh state");
                self.pipeline = Some(self.fresh_pipeline()?);
                Err(EngineError::Internal("DSP worker panicked".to_string()))
            }
        }
    }

    fn fresh_pipeline(&self) -> EngineResult<DspPipeline> {
        let mut pipeline =
            DspPipeline::with_publisher(self.config.dsp.clone(), Arc::clone(&self.publisher));
        pipeline.init(&self.config.audio)?;
        Ok(pipeline)
    }
}

impl Default for AudioEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Everything the worker thread owns while the pipeline is detached.
struct ProcessingWorker {
    pipeline: DspPipeline,
    endpoint: ProcessingEndpoint,
    running: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
    poll_interval: Duration,
    span: Span,
}

impl ProcessingWorker {
    /// Drain the input queue until the running flag clears, then hand the
    /// pipeline back to the joining thread.
    fn run(self) -> DspPipeline {
        let ProcessingWorker {
            mut pipeline,
            mut endpoint,
            running,
            processed,
            poll_interval,
            span,
        } = self;
        let _guard = span.enter();
        debug!("DSP worker running");

        while running.load(Ordering::Acquire) {
            let moved = endpoint.process_next(|block| {
                if pipeline.process_block(block).is_ok() {
                    processed.fetch_add(1, Ordering::Relaxed);
                }
            });

            if !moved {
                thread::sleep(poll_interval);
            }
        }

        debug!(pending = endpoint.pending_len(), "DSP worker exiting");
        pipeline
    }
}
