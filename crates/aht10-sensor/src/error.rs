//! Sensor Error Types

use thiserror::Error;

/// Errors that can occur while talking to the sensor
#[derive(Debug, Error)]
pub enum SensorError {
    /// Bus device could not be opened or configured
    #[error("I2C bus error: {0}")]
    Bus(String),

    /// Transfer with the device failed
    #[error("I2C transfer to 0x{address:02X} failed: {reason}")]
    Transfer { address: u8, reason: String },

    /// Whole transaction did not finish in time
    #[error("Timeout waiting for sensor after {0}ms")]
    Timeout(u64),

    /// Measurement still in progress when the result was read
    #[error("Sensor busy, measurement not ready")]
    Busy,

    /// Read attempted before a successful init
    #[error("Sensor not initialized")]
    NotInitialized,
}

impl From<std::io::Error> for SensorError {
    fn from(err: std::io::Error) -> Self {
        SensorError::Bus(err.to_string())
    }
}
