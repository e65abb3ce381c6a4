//! # Shared Statistics
//!
//! The pipeline owner (the thread running `DspPipeline::process`) is the only
//! writer of [`AudioStats`]. Any number of observers read it through
//! [`StatsPublisher::snapshot`], which returns a copy, never a live reference.
//!
//! ## Why not a lock:
//! The writer may be a real-time thread, so it must never wait on a reader.
//! The cell is a sequence lock: the writer bumps a sequence counter to an odd
//! value, stores every field, then bumps it back to even. Readers retry until
//! they observe the same even value before and after copying the fields, so a
//! snapshot never mixes two publications.

use serde::Serialize;
use std::sync::atomic::{fence, AtomicU64, Ordering};

/// Snapshot of the pipeline's running statistics.
///
/// `repr(C)` so the export surface can copy it straight into caller memory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[repr(C)]
pub struct AudioStats {
    /// Wall-clock time spent in the last `process` call
    pub latency_ms: f64,

    /// Peak absolute level of the last block, measured before normalization
    pub peak_level: f64,

    /// Mean absolute level of the last processed block
    pub avg_level: f64,

    /// Number of `process` calls (one per block, not per sample)
    pub frames_processed: u64,

    /// Blocks the capture side had to drop
    pub dropped_frames: u64,
}

/// Single-writer, many-reader publication cell for [`AudioStats`].
#[derive(Debug, Default)]
pub struct StatsPublisher {
    sequence: AtomicU64,
    latency_ms: AtomicU64,
    peak_level: AtomicU64,
    avg_level: AtomicU64,
    frames_processed: AtomicU64,
    dropped_frames: AtomicU64,
}

impl StatsPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish a full snapshot.
    ///
    /// Must only be called by the single owner of the pipeline.
    pub fn publish(&self, stats: &AudioStats) {
        let seq = self.sequence.load(Ordering::Relaxed);
        self.sequence.store(seq.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.latency_ms.store(stats.latency_ms.to_bits(), Ordering::Relaxed);
        self.peak_level.store(stats.peak_level.to_bits(), Ordering::Relaxed);
        self.avg_level.store(stats.avg_level.to_bits(), Ordering::Relaxed);
        self.frames_processed.store(stats.frames_processed, Ordering::Relaxed);
        self.dropped_frames.store(stats.dropped_frames, Ordering::Relaxed);

        self.sequence.store(seq.wrapping_add(2), Ordering::Release);
    }

    /// Copy the most recent complete publication.
    pub fn snapshot(&self) -> AudioStats {
        loop {
            let before = self.sequence.load(Ordering::Acquire);
            if before % 2 == 1 {
                std::hint::spin_loop();
                continue;
            }

            let stats = AudioStats {
                latency_ms: f64::from_bits(self.latency_ms.load(Ordering::Relaxed)),
                peak_level: f64::from_bits(self.peak_level.load(Ordering::Relaxed)),
                avg_level: f64::from_bits(self.avg_level.load(Ordering::Relaxed)),
                frames_processed: self.frames_processed.load(Ordering::Relaxed),
                dropped_frames: self.dropped_frames.load(Ordering::Relaxed),
            };

            fence(Ordering::Acquire);
            let after = self.sequence.load(Ordering::Relaxed);
            if before == after {
                return stats;
            }
        }
    }

    /// Number of completed publications.
    pub fn generation(&self) -> u64 {
        self.sequence.load(Ordering::Acquire) / 2
    }
}
