//! Ring Buffer Implementation

use crate::{BufferError, Sample};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Default buffer capacity (512 samples = ~42 hours at one sample per 5 min)
pub const DEFAULT_CAPACITY: usize = 512;

/// Cursor state guarded by the buffer lock
struct Slots {
    /// Pre-allocated storage, never resized
    storage: Box<[Sample]>,
    /// Next write position
    head: usize,
    /// Next read position
    tail: usize,
    /// Number of unread samples
    count: usize,
}

impl Slots {
    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn take_oldest(&mut self) -> Sample {
        let sample = self.storage[self.tail];
        self.tail = (self.tail + 1) % self.capacity();
        self.count -= 1;
        sample
    }
}

/// Snapshot of buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    /// Samples currently held
    pub len: usize,
    /// Fixed capacity
    pub capacity: usize,
    /// Samples ever pushed
    pub total_pushed: u64,
    /// Unread samples discarded to make room
    pub overwritten: u64,
}

/// Bounded FIFO of samples with overwrite-oldest semantics.
///
/// One task pushes, one task pops. Every operation holds the lock only for
/// cursor updates and slot copies, so `push` never waits on a sensor read or
/// a network call. `drain_all` copies out everything held when it takes the
/// lock; pushes racing with a drain land after it and show up in the next one.
pub struct RingBuffer {
    slots: Mutex<Slots>,
    capacity: usize,
    total_pushed: AtomicU64,
    overwritten: AtomicU64,
}

impl RingBuffer {
    /// Create a new ring buffer with given capacity
    pub fn new(capacity: usize) -> Result<Self, BufferError> {
        if capacity == 0 {
            return Err(BufferError::ZeroCapacity);
        }

        let mut storage: Vec<Sample> = Vec::new();
        storage
            .try_reserve_exact(capacity)
            .map_err(|_| BufferError::Allocation { capacity })?;
        storage.resize(capacity, Sample::default());

        info!("Ring buffer allocated with capacity {}", capacity);

        Ok(Self {
            slots: Mutex::new(Slots {
                storage: storage.into_boxed_slice(),
                head: 0,
                tail: 0,
                count: 0,
            }),
            capacity,
            total_pushed: AtomicU64::new(0),
            overwritten: AtomicU64::new(0),
        })
    }

    /// Create a buffer with default capacity (512 samples)
    pub fn with_default_capacity() -> Result<Self, BufferError> {
        Self::new(DEFAULT_CAPACITY)
    }

    // Cursor updates are complete before any guard is released, so a
    // poisoned lock still protects a consistent state.
    fn lock(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Push a sample (overwrites the oldest unread sample if full)
    pub fn push(&self, sample: Sample) {
        let overwrote = {
            let mut slots = self.lock();
            let head = slots.head;
            slots.storage[head] = sample;
            slots.head = (head + 1) % self.capacity;

            let overwrote = if slots.count < self.capacity {
                slots.count += 1;
                false
            } else {
                slots.tail = (slots.tail + 1) % self.capacity;
                true
            };
            // Under the lock so a racing drain cannot publish a stale length
            metrics::gauge!("ring_buffer_len").set(slots.count as f64);
            overwrote
        };

        self.total_pushed.fetch_add(1, Ordering::Relaxed);
        if overwrote {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
            metrics::counter!("ring_buffer_overwrites_total").increment(1);
        }
    }

    /// Take the oldest sample, or `None` if the buffer is empty
    pub fn pop(&self) -> Option<Sample> {
        let mut slots = self.lock();
        if slots.count == 0 {
            return None;
        }
        let sample = slots.take_oldest();
        metrics::gauge!("ring_buffer_len").set(slots.count as f64);
        Some(sample)
    }

    /// Take every sample held right now, oldest first
    pub fn drain_all(&self) -> Vec<Sample> {
        let drained = {
            let mut slots = self.lock();
            let mut drained = Vec::with_capacity(slots.count);
            while slots.count > 0 {
                drained.push(slots.take_oldest());
            }
            metrics::gauge!("ring_buffer_len").set(0.0);
            drained
        };

        debug!("Drained {} samples", drained.len());
        drained
    }

    /// Put samples back in front of everything currently held.
    ///
    /// `samples` must be oldest first. When free room is short the oldest
    /// requeued samples are dropped and counted as overwritten. Returns the
    /// number of samples restored.
    pub fn requeue(&self, samples: Vec<Sample>) -> usize {
        let (restored, dropped) = {
            let mut slots = self.lock();
            let free = self.capacity - slots.count;
            let restored = samples.len().min(free);
            let dropped = samples.len() - restored;

            for sample in samples.into_iter().skip(dropped).rev() {
                slots.tail = (slots.tail + self.capacity - 1) % self.capacity;
                let tail = slots.tail;
                slots.storage[tail] = sample;
                slots.count += 1;
            }
            metrics::gauge!("ring_buffer_len").set(slots.count as f64);
            (restored, dropped)
        };

        if dropped > 0 {
            self.overwritten.fetch_add(dropped as u64, Ordering::Relaxed);
            metrics::counter!("ring_buffer_overwrites_total").increment(dropped as u64);
        }
        restored
    }

    /// Get the number of samples currently in the buffer
    pub fn len(&self) -> usize {
        self.lock().count
    }

    /// Check if buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check if buffer is full
    pub fn is_full(&self) -> bool {
        self.len() == self.capacity
    }

    /// Get the buffer capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get fill ratio (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f64 {
        self.len() as f64 / self.capacity as f64
    }

    /// Get buffer counters
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            len: self.len(),
            capacity: self.capacity,
            total_pushed: self.total_pushed.load(Ordering::Relaxed),
            overwritten: self.overwritten.load(Ordering::Relaxed),
        }
    }

    /// Release the storage, returning how many unread samples were discarded
    pub fn teardown(self) -> usize {
        let slots = self.slots.into_inner().unwrap_or_else(PoisonError::into_inner);
        info!(
            "Ring buffer torn down ({} unread samples discarded)",
            slots.count
        );
        slots.count
    }
}
