//! Sensor Acquisition
//!
//! Periodic producer that reads the sensor, stamps each reading with the
//! wall clock and pushes it into the shared ring buffer.

mod task;

pub use task::{AcquisitionConfig, AcquisitionError, AcquisitionTask};
