//! # Sample Buffer Pool
//!
//! Preallocates every sample block the engine will ever use so the capture
//! and render threads never touch the heap.
//!
//! ## Buffer flow:
//! 1. Capture side checks a free block out (`checkout`)
//! 2. The block travels through the processing queues
//! 3. Render side checks it back in (`release`)
//!
//! The free list is itself an SPSC ring: checkout consumes it, release
//! produces into it. Since checkout and release usually run on different
//! threads, [`SampleBufferPool::split`] hands each side its own endpoint. The
//! available count is an atomic shared by both.

use crate::audio::block::SampleBlock;
use crate::audio::ring_buffer::{Consumer, Producer, RingBuffer};
use crate::config::AudioConfig;
use crate::error::{EngineError, EngineResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug)]
struct PoolCounters {
    id: Uuid,
    capacity: usize,
    available: AtomicUsize,
}

/// Fixed set of preallocated sample blocks.
pub struct SampleBufferPool {
    checkout: PoolCheckout,
    release: PoolReturn,
}

impl SampleBufferPool {
    /// Allocate `capacity` blocks of `block_samples` samples each.
    ///
    /// This is the only place where block storage is allocated.
    pub fn new(capacity: usize, block_samples: usize, config: &AudioConfig) -> EngineResult<Self> {
        if capacity == 0 || block_samples == 0 {
            return Err(EngineError::Config(
                "pool capacity and block size must be greater than 0".to_string(),
            ));
        }

        let counters = Arc::new(PoolCounters {
            id: Uuid::new_v4(),
            capacity,
            available: AtomicUsize::new(0),
        });

        // One slot more than the pool size so every block fits in the free list.
        let (producer, consumer) = RingBuffer::with_capacity(capacity + 1);
        let mut release = PoolReturn {
            free: producer,
            counters: Arc::clone(&counters),
        };

        for _ in 0..capacity {
            let block = SampleBlock::pooled(block_samples, config, counters.id);
            if release.release(block).is_err() {
                return Err(EngineError::Internal("free list smaller than pool".to_string()));
            }
        }

        debug!(pool_id = %counters.id, capacity, block_samples, "Sample buffer pool allocated");

        Ok(Self {
            checkout: PoolCheckout {
                free: consumer,
                counters,
            },
            release,
        })
    }

    /// Take a free block, or `None` when every block is checked out.
    pub fn checkout(&mut self) -> Option<SampleBlock> {
        self.checkout.checkout()
    }

    /// Return a block; blocks from another pool are handed back as `Err`.
    pub fn release(&mut self, block: SampleBlock) -> Result<(), SampleBlock> {
        self.release.release(block)
    }

    pub fn capacity(&self) -> usize {
        self.checkout.capacity()
    }

    pub fn available(&self) -> usize {
        self.checkout.available()
    }

    pub fn outstanding(&self) -> usize {
        self.checkout.outstanding()
    }

    /// Separate the checkout side from the release side.
    pub fn split(self) -> (PoolCheckout, PoolReturn) {
        (self.checkout, self.release)
    }
}

/// Checkout side of the pool (owned by the capture thread).
pub struct PoolCheckout {
    free: Consumer<SampleBlock>,
    counters: Arc<PoolCounters>,
}

impl PoolCheckout {
    pub fn checkout(&mut self) -> Option<SampleBlock> {
        let mut block = self.free.pop()?;
        self.counters.available.fetch_sub(1, Ordering::AcqRel);
        block.clear();
        Some(block)
    }

    pub fn capacity(&self) -> usize {
        self.counters.capacity
    }

    pub fn available(&self) -> usize {
        self.counters.available.load(Ordering::Acquire)
    }

    pub fn outstanding(&self) -> usize {
        self.counters.capacity.saturating_sub(self.available())
    }
}

/// Release side of the pool (owned by the render/consumer thread).
pub struct PoolReturn {
    free: Producer<SampleBlock>,
    counters: Arc<PoolCounters>,
}

impl PoolReturn {
    pub fn release(&mut self, block: SampleBlock) -> Result<(), SampleBlock> {
        if block.owner() != Some(self.counters.id) {
            return Err(block);
        }
        // Count before publishing so `available` never drops below the number
        // of blocks a concurrent checkout can see. A full pool takes nothing.
        let capacity = self.counters.capacity;
        let counted = self
            .counters
            .available
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |available| {
                (available < capacity).then_some(available + 1)
            });
        if counted.is_err() {
            return Err(block);
        }
        self.free.push(block).map_err(|block| {
            self.counters.available.fetch_sub(1, Ordering::AcqRel);
            block
        })
    }

    pub fn available(&self) -> usize {
        self.counters.available.load(Ordering::Acquire)
    }
}
