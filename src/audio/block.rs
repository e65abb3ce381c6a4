//! Fixed-capacity sample blocks.
//!
//! A block is owned by exactly one party at a time (capture thread, a queue,
//! or the DSP stage) and ownership moves on every push/pop. Pooled blocks keep
//! their allocation for their whole life: `fill` copies into the existing
//! storage and only moves the valid-length cursor.

use crate::config::AudioConfig;
use uuid::Uuid;

#[derive(Debug, PartialEq)]
pub struct SampleBlock {
    /// Backing storage; its length is the block capacity and never changes
    samples: Vec<f32>,
    /// Number of valid samples at the front of `samples`
    len: usize,
    pub sample_rate: u32,
    pub channels: u16,
    /// Capture time in microseconds since the Unix epoch
    pub timestamp_us: u64,
    /// Pool that allocated this block, if any
    owner: Option<Uuid>,
}

/// A clone is an unpooled copy: only the original can go back to its pool.
impl Clone for SampleBlock {
    fn clone(&self) -> Self {
        Self {
            samples: self.samples.clone(),
            len: self.len,
            sample_rate: self.sample_rate,
            channels: self.channels,
            timestamp_us: self.timestamp_us,
            owner: None,
        }
    }
}

impl SampleBlock {
    /// A zeroed, empty block with room for `capacity` interleaved samples.
    pub fn with_capacity(capacity: usize, config: &AudioConfig) -> Self {
        Self {
            samples: vec![0.0; capacity],
            len: 0,
            sample_rate: config.sample_rate,
            channels: config.channels,
            timestamp_us: 0,
            owner: None,
        }
    }

    /// Wrap already-captured samples in an unpooled block.
    pub fn from_samples(samples: Vec<f32>, config: &AudioConfig) -> Self {
        let len = samples.len();
        Self {
            samples,
            len,
            sample_rate: config.sample_rate,
            channels: config.channels,
            timestamp_us: 0,
            owner: None,
        }
    }

    pub(crate) fn pooled(capacity: usize, config: &AudioConfig, pool: Uuid) -> Self {
        Self {
            owner: Some(pool),
            ..Self::with_capacity(capacity, config)
        }
    }

    pub(crate) fn owner(&self) -> Option<Uuid> {
        self.owner
    }

    pub fn capacity(&self) -> usize {
        self.samples.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Valid samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples[..self.len]
    }

    /// Valid samples, mutable in place for the DSP stages.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples[..self.len]
    }

    /// Copy as much of `source` as fits and return the number of samples taken.
    pub fn fill(&mut self, source: &[f32]) -> usize {
        let count = source.len().min(self.samples.len());
        self.samples[..count].copy_from_slice(&source[..count]);
        self.len = count;
        count
    }

    /// Mark the block empty without touching its allocation.
    pub fn clear(&mut self) {
        self.len = 0;
        self.timestamp_us = 0;
    }

    /// Stamp the block with the current wall-clock time.
    pub fn stamp_now(&mut self) {
        self.timestamp_us = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
    }

    /// Microseconds elapsed since the block was stamped (0 if never stamped).
    pub fn age_us(&self) -> u64 {
        if self.timestamp_us == 0 {
            return 0;
        }
        let now = u64::try_from(chrono::Utc::now().timestamp_micros()).unwrap_or(0);
        now.saturating_sub(self.timestamp_us)
    }
}
