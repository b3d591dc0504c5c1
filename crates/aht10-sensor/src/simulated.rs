//! Simulated sensor for hosts without the hardware

use crate::error::SensorError;
use crate::{Reading, SensorReader};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tracing::{debug, info};

/// Produces plausible indoor readings (18-28 °C, 30-70 %RH)
pub struct SimulatedSensor {
    seed: u64,
    sequence: u64,
    initialized: bool,
    fail_every: Option<u64>,
}

impl SimulatedSensor {
    /// Create a simulated sensor; equal seeds give equal reading sequences
    pub fn new(seed: u64) -> Self {
        info!("Creating simulated sensor (seed {})", seed);
        Self {
            seed,
            sequence: 0,
            initialized: false,
            fail_every: None,
        }
    }

    /// Make every `n`th read fail with a timeout
    pub fn fail_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n.max(1));
        self
    }

    fn next_hash(&mut self) -> u64 {
        self.sequence += 1;
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        self.sequence.hash(&mut hasher);
        hasher.finish()
    }
}

impl SensorReader for SimulatedSensor {
    async fn init(&mut self) -> Result<(), SensorError> {
        debug!("Simulated sensor: skipping initialization");
        self.initialized = true;
        Ok(())
    }

    async fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.initialized {
            return Err(SensorError::NotInitialized);
        }

        let hash = self.next_hash();
        if let Some(n) = self.fail_every {
            if self.sequence % n == 0 {
                return Err(SensorError::Timeout(0));
            }
        }

        // Hundredths of a unit keep values on a readable grid
        let temperature = 18.0 + (hash % 1000) as f32 / 100.0;
        let humidity = 30.0 + ((hash >> 16) % 4000) as f32 / 100.0;

        Ok(Reading {
            temperature,
            humidity,
        })
    }
}
