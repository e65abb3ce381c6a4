//! # Buffer Management
//!
//! Composes the sample pool with two SPSC queues:
//! - **input**: blocks captured and waiting for the DSP chain
//! - **output**: blocks processed and waiting for the consumer
//!
//! ## Roles:
//! - **Capture** (real-time thread): checks a block out, fills it, enqueues it
//! - **Processing**: pops pending blocks, runs the pipeline, pushes results
//! - **Render** (consumer): pops processed blocks and releases them to the pool
//!
//! A `BufferManager` can drive all three roles from one thread (tests, the
//! synchronous path), or be split into one endpoint per role with
//! [`BufferManager::split`]. Each endpoint owns exactly the queue ends its role
//! needs, which keeps every queue single-producer/single-consumer.
//!
//! ## Overflow:
//! Both queues are sized above the pool, so an empty pool is the first thing a
//! saturated capture thread hits. What happens then is configurable: `Drop`
//! discards the block and counts it, `Backpressure` refuses the capture with
//! [`EngineError::PoolExhausted`] or [`EngineError::QueueFull`].

use crate::audio::block::SampleBlock;
use crate::audio::pool::{PoolCheckout, PoolReturn, SampleBufferPool};
use crate::audio::ring_buffer::{Consumer, Producer, RingBuffer};
use crate::config::{AudioConfig, OverflowPolicy, QueueSettings};
use crate::error::{EngineError, EngineResult};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

pub struct BufferManager {
    capture: CaptureEndpoint,
    processing: ProcessingEndpoint,
    render: RenderEndpoint,
}

impl BufferManager {
    /// Preallocate `settings.depth` blocks and both queues.
    pub fn new(settings: &QueueSettings, audio: &AudioConfig) -> EngineResult<Self> {
        let pool = SampleBufferPool::new(settings.depth, settings.block_samples, audio)?;
        let (checkout, release) = pool.split();

        let queue_slots = settings.depth + 1;
        let (input_tx, input_rx) = RingBuffer::with_capacity(queue_slots);
        let (output_tx, output_rx) = RingBuffer::with_capacity(queue_slots);
        let dropped = Arc::new(AtomicU64::new(0));

        debug!(
            depth = settings.depth,
            block_samples = settings.block_samples,
            queue_capacity = input_tx.capacity(),
            overflow = ?settings.overflow,
            "Buffer manager ready"
        );

        Ok(Self {
            capture: CaptureEndpoint {
                pool: checkout,
                input: input_tx,
                spare: None,
                block_samples: settings.block_samples,
                overflow: settings.overflow,
                dropped: Arc::clone(&dropped),
            },
            processing: ProcessingEndpoint {
                input: input_rx,
                output: output_tx,
                pending: None,
            },
            render: RenderEndpoint {
                output: output_rx,
                pool: release,
                dropped,
            },
        })
    }

    /// Capture `samples` into a pooled block and queue it for processing.
    pub fn submit_capture(&mut self, samples: &[f32]) -> EngineResult<bool> {
        self.capture.submit_capture(samples)
    }

    /// Check a free block out of the pool.
    pub fn get_input_buffer(&mut self) -> Option<SampleBlock> {
        self.capture.checkout()
    }

    pub fn enqueue_for_processing(&mut self, block: SampleBlock) -> Result<(), SampleBlock> {
        self.capture.enqueue_for_processing(block)
    }

    /// Oldest block waiting for the DSP chain.
    pub fn next_pending(&mut self) -> Option<SampleBlock> {
        self.processing.next_pending()
    }

    /// Hand a processed block to the consumer side.
    pub fn complete(&mut self, block: SampleBlock) -> Result<(), SampleBlock> {
        self.processing.complete(block)
    }

    pub fn dequeue_processed(&mut self) -> Option<SampleBlock> {
        self.render.dequeue_processed()
    }

    pub fn release_buffer(&mut self, block: SampleBlock) -> EngineResult<()> {
        self.render.release_buffer(block)
    }

    /// Blocks waiting in the input queue.
    pub fn queue_depth(&self) -> usize {
        self.processing.input.len()
    }

    pub fn available_blocks(&self) -> usize {
        self.capture.available_blocks()
    }

    pub fn pool_capacity(&self) -> usize {
        self.capture.pool.capacity()
    }

    pub fn dropped_frames(&self) -> u64 {
        self.capture.dropped_frames()
    }

    /// Shared dropped-frame counter (for mirroring into published stats).
    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.capture.dropped)
    }

    /// One endpoint per thread role.
    pub fn split(self) -> (CaptureEndpoint, ProcessingEndpoint, RenderEndpoint) {
        (self.capture, self.processing, self.render)
    }
}

/// Capture-thread side: pool checkout plus the input queue's producer.
pub struct CaptureEndpoint {
    pool: PoolCheckout,
    input: Producer<SampleBlock>,
    /// Block that could not be queued last time, reused before the pool
    spare: Option<SampleBlock>,
    block_samples: usize,
    overflow: OverflowPolicy,
    dropped: Arc<AtomicU64>,
}

impl CaptureEndpoint {
    pub fn checkout(&mut self) -> Option<SampleBlock> {
        if let Some(mut block) = self.spare.take() {
            block.clear();
            return Some(block);
        }
        self.pool.checkout()
    }

    pub fn enqueue_for_processing(&mut self, block: SampleBlock) -> Result<(), SampleBlock> {
        self.input.push(block)
    }

    /// Copy `samples` into a free block, stamp it and queue it.
    ///
    /// Returns `Ok(true)` when queued. Input longer than one block is refused
    /// with [`EngineError::BufferMismatch`] and nothing is queued. When no
    /// block can be queued the overflow policy decides: `Drop` counts the loss
    /// and returns `Ok(false)`, `Backpressure` returns
    /// [`EngineError::PoolExhausted`] or [`EngineError::QueueFull`].
    /// Never blocks and never allocates.
    pub fn submit_capture(&mut self, samples: &[f32]) -> EngineResult<bool> {
        if samples.len() > self.block_samples {
            return Err(EngineError::BufferMismatch {
                input: samples.len(),
                output: self.block_samples,
            });
        }

        let Some(mut block) = self.checkout() else {
            return self.overflow(EngineError::PoolExhausted);
        };

        block.fill(samples);
        block.stamp_now();

        match self.input.push(block) {
            Ok(()) => Ok(true),
            Err(block) => {
                self.spare = Some(block);
                self.overflow(EngineError::QueueFull)
            }
        }
    }

    fn overflow(&mut self, refusal: EngineError) -> EngineResult<bool> {
        match self.overflow {
            OverflowPolicy::Drop => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Ok(false)
            }
            OverflowPolicy::Backpressure => Err(refusal),
        }
    }

    pub fn block_samples(&self) -> usize {
        self.block_samples
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn available_blocks(&self) -> usize {
        self.pool.available() + usize::from(self.spare.is_some())
    }

    pub fn overflow_policy(&self) -> OverflowPolicy {
        self.overflow
    }

    pub fn drop_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped)
    }
}

/// Processing-thread side: input consumer plus output producer.
pub struct ProcessingEndpoint {
    input: Consumer<SampleBlock>,
    output: Producer<SampleBlock>,
    /// Processed block still waiting for room in the output queue
    pending: Option<SampleBlock>,
}

impl ProcessingEndpoint {
    pub fn next_pending(&mut self) -> Option<SampleBlock> {
        self.input.pop()
    }

    pub fn complete(&mut self, block: SampleBlock) -> Result<(), SampleBlock> {
        self.output.push(block)
    }

    /// Process at most one block with `f` and forward it.
    ///
    /// A block that finds the output queue full is held and retried on the
    /// next call before any new input is taken, so FIFO order is kept.
    /// Returns true if a block moved to the output queue.
    pub fn process_next<F>(&mut self, mut f: F) -> bool
    where
        F: FnMut(&mut SampleBlock),
    {
        if let Some(block) = self.pending.take() {
            return match self.output.push(block) {
                Ok(()) => true,
                Err(block) => {
                    self.pending = Some(block);
                    false
                }
            };
        }

        let Some(mut block) = self.input.pop() else {
            return false;
        };

        f(&mut block);

        match self.output.push(block) {
            Ok(()) => true,
            Err(block) => {
                self.pending = Some(block);
                false
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.input.len()
    }
}

/// Consumer-thread side: output consumer plus the pool's release end.
pub struct RenderEndpoint {
    output: Consumer<SampleBlock>,
    pool: PoolReturn,
    dropped: Arc<AtomicU64>,
}

impl RenderEndpoint {
    pub fn dequeue_processed(&mut self) -> Option<SampleBlock> {
        self.output.pop()
    }

    /// Return a consumed block to the pool.
    pub fn release_buffer(&mut self, block: SampleBlock) -> EngineResult<()> {
        self.pool
            .release(block)
            .map_err(|_| EngineError::Internal("block does not belong to this pool".to_string()))
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn available_blocks(&self) -> usize {
        self.pool.available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn manager(depth: usize, overflow: OverflowPolicy) -> BufferManager {
        let settings = QueueSettings {
            depth,
            block_samples: 64,
            overflow,
            poll_interval_us: 100,
        };
        BufferManager::new(&settings, &AudioConfig::default()).unwrap()
    }

    #[test]
    fn test_capture_process_render_roundtrip() {
        let mut mgr = manager(4, OverflowPolicy::Drop);
        assert!(mgr.submit_capture(&[0.1, 0.2, 0.3]).unwrap());
        assert_eq!(mgr.queue_depth(), 1);
        assert_eq!(mgr.available_blocks(), 3);

        let mut block = mgr.next_pending().unwrap();
        assert_eq!(block.samples(), &[0.1, 0.2, 0.3]);
        assert!(block.timestamp_us > 0);
        block.samples_mut()[0] = 0.9;
        mgr.complete(block).unwrap();

        let block = mgr.dequeue_processed().unwrap();
        assert_eq!(block.samples()[0], 0.9);
        mgr.release_buffer(block).unwrap();
        assert_eq!(mgr.available_blocks(), 4);
    }

    #[test]
    fn test_drop_under_backpressure() {
        let mut mgr = manager(4, OverflowPolicy::Drop);
        for i in 0..4 {
            assert!(mgr.submit_capture(&[i as f32; 8]).unwrap(), "push {} should queue", i);
        }
        assert!(!mgr.submit_capture(&[4.0; 8]).unwrap());
        assert_eq!(mgr.dropped_frames(), 1);
        assert_eq!(mgr.queue_depth(), 4);
    }

    #[test]
    fn test_backpressure_policy_refuses_without_counting() {
        let mut mgr = manager(2, OverflowPolicy::Backpressure);
        assert!(mgr.submit_capture(&[0.0; 8]).unwrap());
        assert!(mgr.submit_capture(&[0.0; 8]).unwrap());
        assert_eq!(mgr.submit_capture(&[0.0; 8]), Err(EngineError::PoolExhausted));
        assert_eq!(mgr.dropped_frames(), 0);
        assert_eq!(mgr.queue_depth(), 2);
    }

    #[test]
    fn test_backpressure_reports_full_queue() {
        let (mut capture, _processing, _render) = manager(2, OverflowPolicy::Backpressure).split();
        // Fill the input queue by hand with blocks from outside the pool.
        let config = AudioConfig::default();
        while !capture.input.is_full() {
            let block = SampleBlock::with_capacity(64, &config);
            assert!(capture.enqueue_for_processing(block).is_ok());
        }

        let refused = capture.submit_capture(&[0.0; 8]).unwrap_err();
        assert_eq!(refused, EngineError::QueueFull);
        assert!(refused.is_resource_exhaustion());
        assert_eq!(capture.dropped_frames(), 0);
        assert_eq!(capture.available_blocks(), 2, "refused block is kept for reuse");
    }

    #[test]
    fn test_oversized_capture_is_refused_not_truncated() {
        for policy in [OverflowPolicy::Drop, OverflowPolicy::Backpressure] {
            let mut mgr = manager(4, policy);
            let before = mgr.available_blocks();

            let result = mgr.submit_capture(&[0.5; 1000]);
            assert_eq!(
                result,
                Err(EngineError::BufferMismatch { input: 1000, output: 64 })
            );
            assert_eq!(mgr.queue_depth(), 0);
            assert_eq!(mgr.dropped_frames(), 0);
            assert_eq!(mgr.available_blocks(), before);
        }

        let mut mgr = manager(4, OverflowPolicy::Drop);
        assert!(mgr.submit_capture(&[0.5; 64]).unwrap(), "a full block still fits");
        assert_eq!(mgr.next_pending().unwrap().len(), 64);
    }

    #[test]
    fn test_fifo_order_through_manager() {
        let mut mgr = manager(8, OverflowPolicy::Drop);
        for i in 0..5 {
            mgr.submit_capture(&[i as f32]).unwrap();
        }
        for i in 0..5 {
            let block = mgr.next_pending().unwrap();
            assert_eq!(block.samples(), &[i as f32]);
            mgr.complete(block).unwrap();
        }
        for i in 0..5 {
            let block = mgr.dequeue_processed().unwrap();
            assert_eq!(block.samples(), &[i as f32]);
            mgr.release_buffer(block).unwrap();
        }
        assert_eq!(mgr.available_blocks(), mgr.pool_capacity());
    }

    #[test]
    fn test_foreign_block_release_is_an_error() {
        let mut mgr = manager(2, OverflowPolicy::Drop);
        let stray = SampleBlock::with_capacity(64, &AudioConfig::default());
        assert!(matches!(mgr.release_buffer(stray), Err(EngineError::Internal(_))));
    }

    #[test]
    fn test_split_endpoints_across_threads() {
        let (mut capture, mut processing, mut render) = manager(4, OverflowPolicy::Drop).split();

        let worker = thread::spawn(move || {
            let mut moved = 0;
            while moved < 200 {
                if processing.process_next(|block| {
                    for s in block.samples_mut() {
                        *s *= 2.0;
                    }
                }) {
                    moved += 1;
                } else {
                    thread::sleep(Duration::from_micros(50));
                }
            }
        });

        let consumer = thread::spawn(move || {
            let mut seen = Vec::new();
            while seen.len() < 200 {
                match render.dequeue_processed() {
                    Some(block) => {
                        seen.push(block.samples()[0]);
                        render.release_buffer(block).unwrap();
                    }
                    None => thread::sleep(Duration::from_micros(50)),
                }
            }
            seen
        });

        let mut sent = 0;
        while sent < 200 {
            if capture.submit_capture(&[sent as f32]).unwrap() {
                sent += 1;
            } else {
                thread::sleep(Duration::from_micros(50));
            }
        }

        worker.join().unwrap();
        let seen = consumer.join().unwrap();
        let expected: Vec<f32> = (0..200).map(|i| (i * 2) as f32).collect();
        assert_eq!(seen, expected);
        assert_eq!(capture.available_blocks(), 4);
    }
}
