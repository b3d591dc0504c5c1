//! AHT10 Driver
//!
//! Init and measurement sequences plus the raw-to-physical transfer functions.

use crate::bus::I2cBus;
use crate::error::SensorError;
use crate::{Reading, SensorReader};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default 7-bit bus address
pub const AHT10_ADDRESS: u8 = 0x38;

const CMD_INIT: [u8; 3] = [0xE1, 0x08, 0x00];
const CMD_TRIGGER: [u8; 3] = [0xAC, 0x33, 0x00];

const STATUS_BUSY: u8 = 0x80;
const STATUS_CALIBRATED: u8 = 0x08;

/// Full scale of the 20-bit raw fields
const RAW_FULL_SCALE: f64 = 1_048_576.0;

/// Settle time after the init command
const INIT_DELAY_MS: u64 = 500;
/// Conversion time after triggering a measurement
const MEASURE_DELAY_MS: u64 = 80;
/// Upper bound for one whole transaction
const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Decode a 6-byte measurement frame (status, 20-bit humidity, 20-bit temperature)
pub fn decode_measurement(raw: &[u8; 6]) -> Result<Reading, SensorError> {
    if raw[0] & STATUS_BUSY != 0 {
        return Err(SensorError::Busy);
    }

    let raw_humidity =
        (u32::from(raw[1]) << 12) | (u32::from(raw[2]) << 4) | (u32::from(raw[3]) >> 4);
    let raw_temperature =
        (u32::from(raw[3] & 0x0F) << 16) | (u32::from(raw[4]) << 8) | u32::from(raw[5]);

    Ok(Reading {
        humidity: (f64::from(raw_humidity) * 100.0 / RAW_FULL_SCALE) as f32,
        temperature: (f64::from(raw_temperature) * 200.0 / RAW_FULL_SCALE - 50.0) as f32,
    })
}

/// AHT10 on an I2C bus.
///
/// Bus transfers are blocking syscalls, so each one runs on the blocking
/// pool; the transaction timeout then holds even if a transfer hangs.
pub struct Aht10<B> {
    bus: Arc<Mutex<B>>,
    address: u8,
    timeout: Duration,
    initialized: bool,
}

impl<B: I2cBus + 'static> Aht10<B> {
    /// Create a driver at the default address
    pub fn new(bus: B) -> Self {
        Self::with_address(bus, AHT10_ADDRESS)
    }

    /// Create a driver at a specific address
    pub fn with_address(bus: B, address: u8) -> Self {
        Self {
            bus: Arc::new(Mutex::new(bus)),
            address,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            initialized: false,
        }
    }

    /// Set the per-transaction timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    /// Check if init has succeeded
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    async fn transfer<T, F>(&self, op: F) -> Result<T, SensorError>
    where
        T: Send + 'static,
        F: FnOnce(&mut B, u8) -> Result<T, SensorError> + Send + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let address = self.address;
        tokio::task::spawn_blocking(move || {
            let mut bus = bus.lock().unwrap_or_else(PoisonError::into_inner);
            op(&mut bus, address)
        })
        .await
        .map_err(|e| SensorError::Bus(format!("transfer task failed: {}", e)))?
    }

    async fn run_init(&mut self) -> Result<(), SensorError> {
        self.transfer(|bus, address| bus.write(address, &CMD_INIT))
            .await?;
        tokio::time::sleep(Duration::from_millis(INIT_DELAY_MS)).await;

        let status = self
            .transfer(|bus, address| {
                let mut status = [0u8; 1];
                bus.read(address, &mut status)?;
                Ok(status[0])
            })
            .await?;
        // Some clones never set the bit but measure fine
        if status & STATUS_CALIBRATED == 0 {
            warn!(
                "AHT10 at 0x{:02X} reports not calibrated (status {:02X})",
                self.address, status
            );
        }
        Ok(())
    }

    async fn run_measurement(&mut self) -> Result<Reading, SensorError> {
        self.transfer(|bus, address| bus.write(address, &CMD_TRIGGER))
            .await?;
        tokio::time::sleep(Duration::from_millis(MEASURE_DELAY_MS)).await;

        let raw = self
            .transfer(|bus, address| {
                let mut raw = [0u8; 6];
                bus.read(address, &mut raw)?;
                Ok(raw)
            })
            .await?;
        decode_measurement(&raw)
    }

    fn timeout_ms(&self) -> u64 {
        self.timeout.as_millis() as u64
    }
}

impl<B: I2cBus + 'static> SensorReader for Aht10<B> {
    async fn init(&mut self) -> Result<(), SensorError> {
        info!("Initializing AHT10 at 0x{:02X}", self.address);
        let timeout_ms = self.timeout_ms();

        tokio::time::timeout(self.timeout, self.run_init())
            .await
            .map_err(|_| SensorError::Timeout(timeout_ms))??;

        self.initialized = true;
        info!("AHT10 initialized");
        Ok(())
    }

    async fn read(&mut self) -> Result<Reading, SensorError> {
        if !self.initialized {
            return Err(SensorError::NotInitialized);
        }
        let timeout_ms = self.timeout_ms();

        let reading = tokio::time::timeout(self.timeout, self.run_measurement())
            .await
            .map_err(|_| SensorError::Timeout(timeout_ms))??;

        debug!(
            "Temperature: {:.2}°C, Humidity: {:.2}%",
            reading.temperature, reading.humidity
        );
        Ok(reading)
    }
}
