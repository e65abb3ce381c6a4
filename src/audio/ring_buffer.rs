//! # Lock-free SPSC Ring Buffer
//!
//! Fixed-capacity circular queue used to hand sample blocks between the
//! capture/render thread and the processing thread without locks, blocking
//! or allocation after construction.
//!
//! ## Contract:
//! - [`RingBuffer::with_capacity`] returns exactly one [`Producer`] and one
//!   [`Consumer`]. Neither is `Clone` and both mutate through `&mut self`, so
//!   the single-producer/single-consumer rule is enforced by the type system.
//! - The slot count is rounded up to a power of two and one slot is always
//!   left empty: `head == tail` means empty, `head + 1 == tail` means full.
//!
//! ## Memory Ordering:
//! Each side reads its own cursor with `Relaxed` (nobody else writes it),
//! reads the other side's cursor with `Acquire`, and publishes its own cursor
//! with `Release` after touching the slot. That pairing is what makes the
//! slot write visible to the consumer and the slot read finished before the
//! producer reuses it.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Shared<T> {
    slots: Box<[UnsafeCell<MaybeUninit<T>>]>,
    mask: usize,
    /// Next write position, only stored by the producer
    head: AtomicUsize,
    /// Next read position, only stored by the consumer
    tail: AtomicUsize,
}

// SAFETY: items cross threads, hence `T: Send`. A slot is written only by the
// producer while it lies outside [tail, head), and read only by the consumer
// while it lies inside; the acquire/release pairs on the cursors order those
// accesses.
unsafe impl<T: Send> Send for Shared<T> {}
unsafe impl<T: Send> Sync for Shared<T> {}

impl<T> Shared<T> {
    fn capacity(&self) -> usize {
        self.mask + 1
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail) & self.mask
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let head = *self.head.get_mut();
        let mut tail = *self.tail.get_mut();
        while tail != head {
            // SAFETY: both endpoints are gone; every slot in [tail, head) holds
            // an initialized item that was never popped.
            unsafe { self.slots[tail].get_mut().assume_init_drop() };
            tail = (tail + 1) & self.mask;
        }
    }
}

/// Constructor namespace for the producer/consumer pair.
pub struct RingBuffer;

impl RingBuffer {
    /// Allocate a ring with at least `requested` slots.
    ///
    /// The slot count is rounded up to the next power of two (minimum 2), and
    /// usable capacity is one less than the slot count.
    pub fn with_capacity<T>(requested: usize) -> (Producer<T>, Consumer<T>) {
        let capacity = requested.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let shared = Arc::new(Shared {
            slots,
            mask: capacity - 1,
            head: AtomicUsize::new(0),
            tail: AtomicUsize::new(0),
        });

        (
            Producer {
                shared: Arc::clone(&shared),
            },
            Consumer { shared },
        )
    }
}

/// Write end of the ring. Owned by exactly one thread at a time.
pub struct Producer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Producer<T> {
    /// Try to enqueue `item` without blocking.
    ///
    /// Returns `Err(item)` when the ring is full so the caller keeps ownership.
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let shared = &*self.shared;
        let head = shared.head.load(Ordering::Relaxed);
        let next_head = (head + 1) & shared.mask;

        if next_head == shared.tail.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: only this producer writes slots, and `next_head != tail`
        // means the consumer is not reading slot `head`.
        unsafe { (*shared.slots[head].get()).write(item) };

        shared.head.store(next_head, Ordering::Release);
        Ok(())
    }

    /// Total slot count (usable capacity is one less).
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Exact from the producer's view; the consumer may shrink it concurrently.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        let head = self.shared.head.load(Ordering::Relaxed);
        ((head + 1) & self.shared.mask) == self.shared.tail.load(Ordering::Acquire)
    }
}

/// Read end of the ring. Owned by exactly one thread at a time.
pub struct Consumer<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Consumer<T> {
    /// Try to dequeue the oldest item without blocking.
    pub fn pop(&mut self) -> Option<T> {
        let shared = &*self.shared;
        let tail = shared.tail.load(Ordering::Relaxed);

        if tail == shared.head.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: only this consumer reads slots, and `tail != head` means the
        // producer finished writing slot `tail` before its release store.
        let item = unsafe { (*shared.slots[tail].get()).assume_init_read() };

        shared.tail.store((tail + 1) & shared.mask, Ordering::Release);
        Some(item)
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Exact from the consumer's view; the producer may grow it concurrently.
    pub fn len(&self) -> usize {
        self.shared.len()
    }

    pub fn is_empty(&self) -> bool {
        let tail = self.shared.tail.load(Ordering::Relaxed);
        tail == self.shared.head.load(Ordering::Acquire)
    }

    pub fn is_full(&self) -> bool {
        self.len() == self.shared.mask
    }
}
