//! Sample Ring Buffer
//!
//! Provides a bounded, overwrite-oldest FIFO that decouples the acquisition
//! task (single producer) from the drain/publish task (single consumer).

mod buffer;

pub use buffer::{BufferStats, RingBuffer, DEFAULT_CAPACITY};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One temperature/humidity reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Degrees Celsius
    pub temperature: f32,
    /// Percent relative humidity
    pub humidity: f32,
    /// Seconds since the Unix epoch, captured at acquisition time
    pub timestamp: i64,
}

impl Sample {
    /// Create a new sample
    pub fn new(temperature: f32, humidity: f32, timestamp: i64) -> Self {
        Self {
            temperature,
            humidity,
            timestamp,
        }
    }
}

/// Ring buffer errors
#[derive(Debug, Error)]
pub enum BufferError {
    /// Backing storage could not be reserved
    #[error("Failed to allocate storage for {capacity} samples")]
    Allocation { capacity: usize },

    /// A buffer must hold at least one sample
    #[error("Ring buffer capacity must be greater than zero")]
    ZeroCapacity,
}
