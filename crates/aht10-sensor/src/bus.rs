//! Minimal I2C transport

use crate::error::SensorError;

/// Blocking I2C master transfers
pub trait I2cBus: Send {
    /// Write `bytes` to the device at `address`
    fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), SensorError>;

    /// Fill `buf` from the device at `address`
    fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), SensorError>;
}

#[cfg(target_os = "linux")]
pub use linux::LinuxI2c;

#[cfg(target_os = "linux")]
mod linux {
    use super::I2cBus;
    use crate::error::SensorError;
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use tracing::{debug, info};

    /// ioctl request selecting the target device address (linux/i2c-dev.h)
    const I2C_SLAVE: u16 = 0x0703;

    /// `/dev/i2c-N` character device
    pub struct LinuxI2c {
        device: String,
        file: File,
        selected: Option<u8>,
    }

    impl LinuxI2c {
        /// Open an i2c-dev bus, e.g. `/dev/i2c-1`
        pub fn open(device: &str) -> Result<Self, SensorError> {
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(device)
                .map_err(|e| SensorError::Bus(format!("{}: {}", device, e)))?;

            info!("Opened I2C bus {}", device);

            Ok(Self {
                device: device.to_string(),
                file,
                selected: None,
            })
        }

        /// Device path this bus was opened from
        pub fn device(&self) -> &str {
            &self.device
        }

        fn select(&mut self, address: u8) -> Result<(), SensorError> {
            if self.selected == Some(address) {
                return Ok(());
            }

            // SAFETY: the descriptor stays open for the lifetime of `self.file`
            // and I2C_SLAVE takes the address by value.
            let rc = unsafe {
                libc::ioctl(
                    self.file.as_raw_fd(),
                    I2C_SLAVE as _,
                    libc::c_ulong::from(address),
                )
            };
            if rc < 0 {
                return Err(SensorError::Transfer {
                    address,
                    reason: std::io::Error::last_os_error().to_string(),
                });
            }

            debug!("Selected I2C address 0x{:02X} on {}", address, self.device);
            self.selected = Some(address);
            Ok(())
        }
    }

    impl I2cBus for LinuxI2c {
        fn write(&mut self, address: u8, bytes: &[u8]) -> Result<(), SensorError> {
            self.select(address)?;
            self.file.write_all(bytes).map_err(|e| SensorError::Transfer {
                address,
                reason: e.to_string(),
            })
        }

        fn read(&mut self, address: u8, buf: &mut [u8]) -> Result<(), SensorError> {
            self.select(address)?;
            self.file.read_exact(buf).map_err(|e| SensorError::Transfer {
                address,
                reason: e.to_string(),
            })
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_open_missing_device() {
            let err = LinuxI2c::open("/dev/i2c-does-not-exist").err().unwrap();
            assert!(matches!(err, SensorError::Bus(_)));
        }
    }
}
