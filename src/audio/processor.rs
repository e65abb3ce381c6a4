//! # DSP Pipeline
//!
//! Stateful chain of in-place processing stages applied to every block:
//! noise suppression → echo cancellation → gain normalization → resample.
//!
//! ## Lifecycle:
//! - **Uninitialized**: constructed, no adaptive state yet; `process` fails
//! - **Initialized**: `init(config)` allocated and zeroed the adaptive state
//!
//! The adaptive state (noise profile and echo estimate) carries over from one
//! block to the next, so processing the same input twice gives a different
//! result the second time. It is only reset by calling `init` again.
//!
//! ## Thread Safety:
//! A pipeline is driven by one thread at a time (`&mut self` everywhere).
//! Observers on other threads read statistics through the shared
//! [`StatsPublisher`], never through the pipeline itself.

use crate::audio::block::SampleBlock;
use crate::audio::stages;
use crate::config::{AudioConfig, DspSettings};
use crate::error::{EngineError, EngineResult};
use crate::state::{AudioStats, StatsPublisher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Adaptive per-stage state, sized independently of the block size.
#[derive(Debug, Clone, PartialEq)]
pub struct AdaptiveFilterState {
    /// Cyclic noise reference used by the suppressor
    pub noise_profile: Vec<f32>,

    /// Per-position echo estimate used by the NLMS canceller
    pub echo_reference: Vec<f32>,
}

impl AdaptiveFilterState {
    fn zeroed(settings: &DspSettings) -> Self {
        Self {
            noise_profile: vec![0.0; settings.noise_profile_len],
            echo_reference: vec![0.0; settings.echo_reference_len],
        }
    }
}

pub struct DspPipeline {
    /// `None` until `init` succeeds
    config: Option<AudioConfig>,
    settings: DspSettings,
    state: AdaptiveFilterState,
    stats: AudioStats,
    publisher: Arc<StatsPublisher>,
    /// Dropped-frame counter owned by the capture side, mirrored into stats
    drop_counter: Option<Arc<AtomicU64>>,
    rate_mismatch_reported: bool,
}

impl DspPipeline {
    /// Create an uninitialized pipeline with its own stats publisher.
    pub fn new(settings: DspSettings) -> Self {
        Self::with_publisher(settings, Arc::new(StatsPublisher::new()))
    }

    /// Create an uninitialized pipeline that publishes into `publisher`.
    pub fn with_publisher(settings: DspSettings, publisher: Arc<StatsPublisher>) -> Self {
        Self {
            config: None,
            state: AdaptiveFilterState {
                noise_profile: Vec::new(),
                echo_reference: Vec::new(),
            },
            settings,
            stats: AudioStats::default(),
            publisher,
            drop_counter: None,
            rate_mismatch_reported: false,
        }
    }

    /// Allocate and zero the adaptive state for `config`.
    ///
    /// Calling `init` again resets the state and the statistics.
    pub fn init(&mut self, config: &AudioConfig) -> EngineResult<()> {
        config.validate()?;

        self.state = AdaptiveFilterState::zeroed(&self.settings);
        self.stats = AudioStats::default();
        self.config = Some(*config);
        self.rate_mismatch_reported = false;
        self.publish();

        debug!(
            sample_rate = config.sample_rate,
            channels = config.channels,
            noise_profile_len = self.state.noise_profile.len(),
            echo_reference_len = self.state.echo_reference.len(),
            "DSP pipeline initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.config.is_some()
    }

    pub fn config(&self) -> Option<&AudioConfig> {
        self.config.as_ref()
    }

    pub fn settings(&self) -> &DspSettings {
        &self.settings
    }

    /// Replace the stage toggles and gain.
    ///
    /// New state lengths only take effect on the next `init`.
    pub fn set_settings(&mut self, settings: DspSettings) {
        self.settings = settings;
    }

    pub fn state(&self) -> &AdaptiveFilterState {
        &self.state
    }

    /// Mirror an external dropped-frame counter into the published stats.
    pub fn attach_drop_counter(&mut self, counter: Arc<AtomicU64>) {
        self.drop_counter = Some(counter);
    }

    /// Run the full chain over `samples` in place.
    ///
    /// ## Stage order (fixed):
    /// 1. Noise suppression
    /// 2. Echo cancellation
    /// 3. Gain normalization, then optional make-up gain limited to [-1, 1]
    /// 4. Resample (passthrough)
    ///
    /// Disabled stages are skipped; the peak level is measured either way.
    pub fn process(&mut self, samples: &mut [f32]) -> EngineResult<()> {
        let rate = self
            .config
            .as_ref()
            .map(|c| c.sample_rate)
            .ok_or(EngineError::NotInitialized)?;
        self.run_chain(samples, rate, rate);
        Ok(())
    }

    /// Process the valid samples of a block, honouring its declared rate.
    pub fn process_block(&mut self, block: &mut SampleBlock) -> EngineResult<()> {
        let target_rate = self
            .config
            .as_ref()
            .map(|c| c.sample_rate)
            .ok_or(EngineError::NotInitialized)?;

        if block.sample_rate != target_rate && !self.rate_mismatch_reported {
            warn!(
                block_rate = block.sample_rate,
                target_rate,
                "Block sample rate differs from configured rate; passing through without conversion"
            );
            self.rate_mismatch_reported = true;
        }

        let from_rate = block.sample_rate;
        self.run_chain(block.samples_mut(), from_rate, target_rate);
        Ok(())
    }

    fn run_chain(&mut self, samples: &mut [f32], from_rate: u32, to_rate: u32) {
        let start = Instant::now();

        if self.settings.noise_suppression {
            stages::suppress_noise(samples, &self.state.noise_profile);
        }

        if self.settings.echo_cancellation {
            stages::cancel_echo(samples, &mut self.state.echo_reference);
        }

        let peak = if self.settings.normalization {
            stages::normalize_gain(samples)
        } else {
            stages::peak_level(samples)
        };

        if self.settings.gain_db != 0.0 {
            stages::apply_gain(samples, stages::db_to_linear(self.settings.gain_db));
            stages::clamp(samples);
        }

        stages::resample(samples, from_rate, to_rate);

        self.stats.latency_ms = start.elapsed().as_secs_f64() * 1000.0;
        self.stats.peak_level = peak as f64;
        self.stats.avg_level = stages::average_level(samples) as f64;
        self.stats.frames_processed += 1;
        self.publish();
    }

    /// Fold a block of background noise into the noise profile.
    ///
    /// Each profile position moves toward `|noise[i]|` by the configured
    /// learning rate. A rate of zero keeps the profile fixed.
    pub fn learn_noise_profile(&mut self, noise: &[f32]) -> EngineResult<()> {
        if !self.is_initialized() {
            return Err(EngineError::NotInitialized);
        }

        let rate = self.settings.noise_learning_rate;
        if rate <= 0.0 {
            return Ok(());
        }

        for (profile, sample) in self.state.noise_profile.iter_mut().zip(noise) {
            *profile += rate * (sample.abs() - *profile);
        }
        Ok(())
    }

    /// Zero the statistics (and a mirrored drop counter) and publish them.
    ///
    /// Filter state is kept; only `init` resets it.
    pub fn reset_stats(&mut self) {
        if let Some(counter) = &self.drop_counter {
            counter.store(0, Ordering::Relaxed);
        }
        self.stats = AudioStats::default();
        self.publisher.publish(&self.stats);
    }

    /// Latest statistics, as seen by the owning thread.
    pub fn stats(&self) -> AudioStats {
        self.stats
    }

    /// Shared publication cell for observers on other threads.
    pub fn publisher(&self) -> Arc<StatsPublisher> {
        Arc::clone(&self.publisher)
    }

    fn publish(&mut self) {
        if let Some(counter) = &self.drop_counter {
            self.stats.dropped_frames = counter.load(Ordering::Relaxed);
        }
        self.publisher.publish(&self.stats);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn initialized() -> DspPipeline {
        let mut pipeline = DspPipeline::new(DspSettings::default());
        pipeline.init(&AudioConfig::new(16000, 1, 16)).unwrap();
        pipeline
    }

    fn sine(len: usize, amplitude: f32) -> Vec<f32> {
        (0..len)
            .map(|i| {
                let t = i as f32 / 16000.0;
                amplitude * (2.0 * std::f32::consts::PI * 1000.0 * t).sin()
            })
            .collect()
    }

    #[test]
    fn test_process_requires_init() {
        let mut pipeline = DspPipeline::new(DspSettings::default());
        let mut block = vec![0.5; 16];
        assert_eq!(pipeline.process(&mut block), Err(EngineError::NotInitialized));
        assert_eq!(block, vec![0.5; 16]);
        assert_eq!(pipeline.stats().frames_processed, 0);
    }

    #[test]
    fn test_init_rejects_invalid_config() {
        let mut pipeline = DspPipeline::new(DspSettings::default());
        let result = pipeline.init(&AudioConfig::new(16000, 4, 16));
        assert!(matches!(result, Err(EngineError::Config(_))));
        assert!(!pipeline.is_initialized());
    }

    #[test]
    fn test_init_sizes_state_independently_of_block() {
        let pipeline = initialized();
        assert_eq!(pipeline.state().noise_profile.len(), 512);
        assert_eq!(pipeline.state().echo_reference.len(), 4096);
        assert!(pipeline.state().echo_reference.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_constant_block_normalizes_to_target() {
        let mut pipeline = initialized();
        let mut block = vec![0.5; 1024];
        pipeline.process(&mut block).unwrap();
        assert!((block[0].abs() - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_silence_passthrough() {
        let mut pipeline = initialized();
        for len in [0, 1, 511, 512, 5000] {
            let mut block = vec![0.0; len];
            pipeline.process(&mut block).unwrap();
            assert!(block.iter().all(|s| *s == 0.0), "silence changed for len {}", len);
        }
        assert!(pipeline.state().echo_reference.iter().all(|v| v.is_finite()));
        assert_eq!(pipeline.stats().peak_level, 0.0);
    }

    #[test]
    fn test_state_carries_across_calls() {
        let mut pipeline = initialized();
        let input = sine(256, 0.5);

        let mut first = input.clone();
        pipeline.process(&mut first).unwrap();
        let mut second = input.clone();
        pipeline.process(&mut second).unwrap();

        assert_ne!(first, second, "adaptive state should change the second result");
        assert_eq!(pipeline.stats().frames_processed, 2);
    }

    #[test]
    fn test_reinit_resets_state() {
        let mut pipeline = initialized();
        let mut block = sine(256, 0.5);
        pipeline.process(&mut block).unwrap();
        assert!(pipeline.state().echo_reference.iter().any(|v| *v != 0.0));

        pipeline.init(&AudioConfig::new(16000, 1, 16)).unwrap();
        assert!(pipeline.state().echo_reference.iter().all(|v| *v == 0.0));
        assert_eq!(pipeline.stats().frames_processed, 0);
    }

    #[test]
    fn test_stats_are_published() {
        let mut pipeline = initialized();
        let publisher = pipeline.publisher();
        let mut block = sine(512, 0.5);
        pipeline.process(&mut block).unwrap();

        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.frames_processed, 1);
        assert!(snapshot.latency_ms.is_finite() && snapshot.latency_ms >= 0.0);
        assert!(snapshot.peak_level > 0.0);
        assert!(snapshot.avg_level > 0.0 && snapshot.avg_level <= 0.8);
    }

    #[test]
    fn test_disabled_stages_are_skipped() {
        let settings = DspSettings {
            noise_suppression: false,
            echo_cancellation: false,
            normalization: false,
            ..DspSettings::default()
        };
        let mut pipeline = DspPipeline::new(settings);
        pipeline.init(&AudioConfig::default()).unwrap();

        let input = sine(128, 0.3);
        let mut block = input.clone();
        pipeline.process(&mut block).unwrap();
        assert_eq!(block, input);
        assert!((pipeline.stats().peak_level - 0.3).abs() < 1e-3);
    }

    #[test]
    fn test_make_up_gain_follows_normalization() {
        let settings = DspSettings {
            echo_cancellation: false,
            gain_db: -20.0,
            ..DspSettings::default()
        };
        let mut pipeline = DspPipeline::new(settings);
        pipeline.init(&AudioConfig::default()).unwrap();

        let mut block = vec![0.5; 64];
        pipeline.process(&mut block).unwrap();
        assert!((block[0] - 0.08).abs() < 1e-5);
    }

    #[test]
    fn test_positive_make_up_gain_stays_in_range() {
        let settings = DspSettings {
            echo_cancellation: false,
            gain_db: 6.0,
            ..DspSettings::default()
        };
        let mut pipeline = DspPipeline::new(settings);
        pipeline.init(&AudioConfig::default()).unwrap();

        let mut block = vec![0.5; 64];
        pipeline.process(&mut block).unwrap();
        assert!(block.iter().all(|s| s.abs() <= 1.0));
        assert_eq!(block[0], 1.0);

        let mut negative = vec![-0.5; 64];
        pipeline.process(&mut negative).unwrap();
        assert!(negative.iter().all(|s| *s >= -1.0));
        assert!(pipeline.stats().avg_level <= 1.0);
    }

    #[test]
    fn test_reset_stats_zeroes_counters_but_keeps_state() {
        let mut pipeline = initialized();
        let counter = Arc::new(AtomicU64::new(3));
        pipeline.attach_drop_counter(Arc::clone(&counter));
        let publisher = pipeline.publisher();

        let mut block = sine(64, 0.5);
        pipeline.process(&mut block).unwrap();
        pipeline.process(&mut block).unwrap();
        assert_eq!(publisher.snapshot().frames_processed, 2);
        assert_eq!(publisher.snapshot().dropped_frames, 3);
        let echo_before = pipeline.state().echo_reference.clone();

        pipeline.reset_stats();
        let snapshot = publisher.snapshot();
        assert_eq!(snapshot.frames_processed, 0);
        assert_eq!(snapshot.dropped_frames, 0);
        assert_eq!(snapshot.latency_ms, 0.0);
        assert_eq!(counter.load(Ordering::Relaxed), 0);
        assert_eq!(pipeline.state().echo_reference, echo_before);

        pipeline.process(&mut block).unwrap();
        assert_eq!(pipeline.stats().frames_processed, 1);
    }

    #[test]
    fn test_learn_noise_profile() {
        let mut pipeline = initialized();
        pipeline.learn_noise_profile(&[0.2; 1024]).unwrap();
        // 0 + 0.05 * (0.2 - 0) = 0.01 everywhere in the profile
        assert!(pipeline
            .state()
            .noise_profile
            .iter()
            .all(|v| (*v - 0.01).abs() < 1e-6));

        let mut fresh = DspPipeline::new(DspSettings::default());
        assert_eq!(
            fresh.learn_noise_profile(&[0.2; 4]),
            Err(EngineError::NotInitialized)
        );
    }

    #[test]
    fn test_process_block_tolerates_rate_mismatch() {
        let mut pipeline = initialized();
        let mut block = SampleBlock::from_samples(vec![0.5; 64], &AudioConfig::new(48000, 1, 16));
        pipeline.process_block(&mut block).unwrap();
        assert_eq!(block.len(), 64);
        assert!((block.samples()[0] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_drop_counter_is_mirrored() {
        let mut pipeline = initialized();
        let counter = Arc::new(AtomicU64::new(3));
        pipeline.attach_drop_counter(Arc::clone(&counter));
        let mut block = vec![0.1; 8];
        pipeline.process(&mut block).unwrap();
        assert_eq!(pipeline.publisher().snapshot().dropped_frames, 3);
    }
}
