//! AHT10 Temperature/Humidity Sensor
//!
//! This crate provides the sensor read contract used by the acquisition task,
//! an AHT10 driver on top of a minimal I2C transport, and a simulated sensor
//! for hosts without the hardware.

mod bus;
mod driver;
mod error;
mod simulated;

use std::future::Future;

pub use bus::I2cBus;
#[cfg(target_os = "linux")]
pub use bus::LinuxI2c;
pub use driver::{decode_measurement, Aht10, AHT10_ADDRESS};
pub use error::SensorError;
pub use simulated::SimulatedSensor;

/// One decoded measurement
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Degrees Celsius
    pub temperature: f32,
    /// Percent relative humidity
    pub humidity: f32,
}

/// Sensor read collaborator
///
/// `init` is called once before the first `read`. Both calls are bounded by
/// the implementation's own timeout.
pub trait SensorReader: Send {
    /// Prepare the sensor for measurements
    fn init(&mut self) -> impl Future<Output = Result<(), SensorError>> + Send;

    /// Take one measurement
    fn read(&mut self) -> impl Future<Output = Result<Reading, SensorError>> + Send;
}
