//! Climate Station
//!
//! Wires the sensor, ring buffer, acquisition, connectivity and uplink
//! tasks together from one configuration.

mod app;
mod logging;
mod settings;

pub use app::{run, run_until, ShutdownReport};
pub use logging::init_logging;
pub use settings::{ConfigError, ScheduleMode, SensorBackend, StationConfig, DEFAULT_CONFIG_FILE};
