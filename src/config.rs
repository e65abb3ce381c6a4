//! # Configuration Management
//!
//! Loads the engine configuration from several layers:
//! - Built-in defaults (16 kHz mono 16-bit, all DSP stages on)
//! - An optional `audio-kernel.toml` in the working directory
//! - Environment variables prefixed with `AUDIO_KERNEL_`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (`AUDIO_KERNEL_AUDIO__SAMPLE_RATE=48000`,
//!    `AUDIO_KERNEL_QUEUE__DEPTH=32`, ...). Nested keys use a double
//!    underscore because field names already contain single ones.
//! 2. Configuration file (`audio-kernel.toml`)
//! 3. Default values (defined in the `Default` impls)

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Top-level engine configuration.
///
/// ## Why separate config structs:
/// The stream format, the DSP chain and the queue plumbing are tuned by
/// different people for different reasons, so each gets its own table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    pub dsp: DspSettings,
    pub queue: QueueSettings,
}

/// Stream format shared by the capture source, the pipeline and the consumer.
///
/// Immutable once a pipeline has been initialized from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Samples per second per channel (16000, 48000, ...)
    pub sample_rate: u32,

    /// 1 (mono) or 2 (interleaved stereo)
    pub channels: u16,

    /// Bit depth of the PCM the capture side delivers before float conversion
    pub bit_depth: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            channels: 1,
            bit_depth: 16,
        }
    }
}

impl AudioConfig {
    pub fn new(sample_rate: u32, channels: u16, bit_depth: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bit_depth,
        }
    }

    /// Reject formats the pipeline cannot run on.
    ///
    /// ## What this checks:
    /// - sample rate is positive
    /// - channel count is mono or stereo
    /// - bit depth is one of 16, 24 or 32
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if !matches!(self.channels, 1 | 2) {
            return Err(anyhow::anyhow!(
                "Channel count must be 1 or 2, got {}",
                self.channels
            ));
        }

        if !matches!(self.bit_depth, 16 | 24 | 32) {
            return Err(anyhow::anyhow!(
                "Bit depth must be 16, 24 or 32, got {}",
                self.bit_depth
            ));
        }

        Ok(())
    }

    /// Duration of `samples` interleaved samples in milliseconds.
    pub fn duration_ms(&self, samples: usize) -> f64 {
        let frames = samples as f64 / self.channels.max(1) as f64;
        frames * 1000.0 / self.sample_rate.max(1) as f64
    }
}

/// Stage toggles and tuning for the DSP chain.
///
/// The stage set is fixed; these booleans are checked at the top of every
/// `process` call rather than swapping stage objects in and out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DspSettings {
    pub noise_suppression: bool,
    pub echo_cancellation: bool,
    pub normalization: bool,

    /// Make-up gain applied after normalization (0 dB = untouched)
    pub gain_db: f32,

    /// Length of the cyclic noise reference
    pub noise_profile_len: usize,

    /// Length of the per-position echo estimate
    pub echo_reference_len: usize,

    /// Smoothing factor used by `learn_noise_profile` (0 keeps the profile fixed)
    pub noise_learning_rate: f32,
}

impl Default for DspSettings {
    fn default() -> Self {
        Self {
            noise_suppression: true,
            echo_cancellation: true,
            normalization: true,
            gain_db: 0.0,
            noise_profile_len: 512,
            echo_reference_len: 4096,
            noise_learning_rate: 0.05,
        }
    }
}

/// What the capture side does when no block can be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverflowPolicy {
    /// Drop the block and count it (never blocks the capture thread)
    Drop,
    /// Refuse the capture with `PoolExhausted` or `QueueFull`
    Backpressure,
}

/// Buffer pool and queue sizing for the decoupled producer/consumer mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    /// Number of pooled blocks (and minimum queue depth)
    pub depth: usize,

    /// Sample capacity of each pooled block
    pub block_samples: usize,

    pub overflow: OverflowPolicy,

    /// Sleep between polls when the processing thread finds nothing to do
    pub poll_interval_us: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            depth: 16,
            block_samples: 512,
            overflow: OverflowPolicy::Drop,
            poll_interval_us: 500,
        }
    }
}

impl EngineConfig {
    /// Load configuration from defaults, `audio-kernel.toml` and the environment.
    ///
    /// ## Environment Variable Examples:
    /// - `AUDIO_KERNEL_AUDIO__SAMPLE_RATE=48000`
    /// - `AUDIO_KERNEL_DSP__ECHO_CANCELLATION=false`
    /// - `AUDIO_KERNEL_QUEUE__OVERFLOW=backpressure`
    pub fn load() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(config::File::with_name("audio-kernel").required(false))
            .add_source(
                config::Environment::with_prefix("AUDIO_KERNEL")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            );

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Parse a TOML document; missing tables and keys fall back to defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    pub fn validate(&self) -> Result<()> {
        self.audio.validate()?;

        if self.dsp.noise_profile_len == 0 {
            return Err(anyhow::anyhow!("Noise profile length must be greater than 0"));
        }

        if self.dsp.echo_reference_len == 0 {
            return Err(anyhow::anyhow!("Echo reference length must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.dsp.noise_learning_rate) {
            return Err(anyhow::anyhow!("Noise learning rate must lie in [0, 1]"));
        }

        if !self.dsp.gain_db.is_finite() {
            return Err(anyhow::anyhow!("Gain must be a finite number of dB"));
        }

        if self.queue.depth == 0 {
            return Err(anyhow::anyhow!("Queue depth must be greater than 0"));
        }

        if self.queue.block_samples == 0 {
            return Err(anyhow::anyhow!("Block size must be greater than 0"));
        }

        Ok(())
    }

    /// Update DSP toggles from a partial JSON document.
    ///
    /// Only the `dsp` table can change at runtime; the stream format and queue
    /// sizing are fixed once buffers are allocated. For example
    /// `{"dsp": {"echo_cancellation": false}}` flips a single stage.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;

        if let Some(dsp) = partial.get("dsp") {
            let mut updated = self.dsp.clone();
            if let Some(v) = dsp.get("noise_suppression").and_then(|v| v.as_bool()) {
                updated.noise_suppression = v;
            }
            if let Some(v) = dsp.get("echo_cancellation").and_then(|v| v.as_bool()) {
                updated.echo_cancellation = v;
            }
            if let Some(v) = dsp.get("normalization").and_then(|v| v.as_bool()) {
                updated.normalization = v;
            }
            if let Some(v) = dsp.get("gain_db").and_then(|v| v.as_f64()) {
                updated.gain_db = v as f32;
            }
            if let Some(v) = dsp.get("noise_learning_rate").and_then(|v| v.as_f64()) {
                updated.noise_learning_rate = v as f32;
            }

            let candidate = EngineConfig {
                dsp: updated,
                ..self.clone()
            };
            candidate.validate()?;
            *self = candidate;
        }

        Ok(())
    }
}
