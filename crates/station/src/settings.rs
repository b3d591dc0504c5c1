//! Station settings
//!
//! Loaded once at startup from an optional TOML file overlaid with
//! `STATION__<SECTION>__<KEY>` environment variables.

use acquisition::AcquisitionConfig;
use chrono::FixedOffset;
use config::builder::DefaultState;
use config::{ConfigBuilder, Environment, File};
use connectivity::{LinkConfig, TimeSyncConfig};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::Level;
use uplink::{DeliveryPolicy, MqttConfig, PublishSchedule, UplinkConfig};

/// Looked up in the working directory when no path is given
pub const DEFAULT_CONFIG_FILE: &str = "station.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Where readings come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorBackend {
    /// AHT10 on a Linux i2c-dev bus
    Aht10,
    /// Generated readings, no hardware needed
    Simulated,
}

/// How publish cycles are scheduled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleMode {
    Aligned,
    AfterEachSample,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferSection {
    pub capacity: usize,
}

impl Default for BufferSection {
    fn default() -> Self {
        Self {
            capacity: ring_buffer::DEFAULT_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SensorSection {
    pub backend: SensorBackend,
    /// i2c-dev device path
    pub bus: String,
    pub address: u8,
    /// Seed for the simulated backend
    pub seed: u64,
}

impl Default for SensorSection {
    fn default() -> Self {
        Self {
            backend: SensorBackend::Aht10,
            bus: "/dev/i2c-1".to_string(),
            address: aht10_sensor::AHT10_ADDRESS,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AcquisitionSection {
    pub period_secs: u64,
    pub require_time_sync: bool,
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            period_secs: 5 * 60,
            require_time_sync: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PublishSection {
    pub mode: ScheduleMode,
    /// Boundary spacing for `aligned` mode
    pub interval_minutes: u32,
    pub ready_timeout_secs: u64,
    pub delivery: DeliveryPolicy,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            mode: ScheduleMode::Aligned,
            interval_minutes: 30,
            ready_timeout_secs: 10,
            delivery: DeliveryPolicy::AtMostOnce,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub topic: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    /// Wait for the broker's PUBACK of each sample
    pub ack_timeout_secs: u64,
}

impl Default for MqttSection {
    fn default() -> Self {
        let mqtt = MqttConfig::default();
        Self {
            host: mqtt.broker_host,
            port: mqtt.broker_port,
            client_id: mqtt.client_id,
            topic: mqtt.topic,
            keep_alive_secs: mqtt.keep_alive.as_secs(),
            connect_timeout_secs: mqtt.connect_timeout.as_secs(),
            ack_timeout_secs: mqtt.ack_timeout.as_secs(),
        }
    }
}

/// Static fields added to every published record
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdentitySection {
    pub owner: String,
    pub hardware: String,
}

impl Default for IdentitySection {
    fn default() -> Self {
        Self {
            owner: "CREATOR".to_string(),
            hardware: "LAB".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockSection {
    /// Local time zone for timestamps and aligned schedules
    pub utc_offset_seconds: i32,
    pub min_valid_year: i32,
    pub max_polls: u32,
    pub poll_interval_secs: u64,
    pub resync_hours: u64,
}

impl Default for ClockSection {
    fn default() -> Self {
        Self {
            utc_offset_seconds: -4 * 3600,
            min_valid_year: 2024,
            max_polls: 10,
            poll_interval_secs: 2,
            resync_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LinkSection {
    pub check_period_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            check_period_secs: 5 * 60,
            connect_timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// trace, debug, info, warn or error
    pub level: String,
    pub json: bool,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsSection {
    /// Prometheus exporter address, e.g. "0.0.0.0:9100"
    pub listen: Option<String>,
}

/// Complete station configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub buffer: BufferSection,
    pub sensor: SensorSection,
    pub acquisition: AcquisitionSection,
    pub publish: PublishSection,
    pub mqtt: MqttSection,
    pub identity: IdentitySection,
    pub clock: ClockSection,
    pub link: LinkSection,
    pub log: LogSection,
    pub metrics: MetricsSection,
}

impl StationConfig {
    /// Load from `path` (or `station.toml` if present) plus the environment
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let builder = config::Config::builder();
        let builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        Self::from_builder(builder.add_source(Self::environment()))
    }

    fn environment() -> Environment {
        Environment::with_prefix("STATION")
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true)
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: StationConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the tasks cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer.capacity == 0 {
            return Err(ConfigError::Invalid("buffer.capacity must be > 0".into()));
        }
        if self.acquisition.period_secs == 0 {
            return Err(ConfigError::Invalid(
                "acquisition.period_secs must be > 0".into(),
            ));
        }
        if !self.schedule().is_valid() {
            return Err(ConfigError::Invalid(format!(
                "publish.interval_minutes {} must divide 1440",
                self.publish.interval_minutes
            )));
        }
        if self.clock.max_polls == 0 {
            return Err(ConfigError::Invalid("clock.max_polls must be > 0".into()));
        }
        self.utc_offset()?;
        self.log_level()?;
        Ok(())
    }

    /// Local time zone as a fixed offset
    pub fn utc_offset(&self) -> Result<FixedOffset, ConfigError> {
        FixedOffset::east_opt(self.clock.utc_offset_seconds).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "clock.utc_offset_seconds {} is out of range",
                self.clock.utc_offset_seconds
            ))
        })
    }

    pub fn log_level(&self) -> Result<Level, ConfigError> {
        self.log
            .level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown log.level '{}'", self.log.level)))
    }

    pub fn schedule(&self) -> PublishSchedule {
        match self.publish.mode {
            ScheduleMode::Aligned => PublishSchedule::Aligned {
                interval_minutes: self.publish.interval_minutes,
            },
            ScheduleMode::AfterEachSample => PublishSchedule::AfterEachSample,
        }
    }

    pub fn acquisition_config(&self) -> AcquisitionConfig {
        AcquisitionConfig {
            period: Duration::from_secs(self.acquisition.period_secs),
            require_time_sync: self.acquisition.require_time_sync,
        }
    }

    pub fn uplink_config(&self) -> UplinkConfig {
        UplinkConfig {
            schedule: self.schedule(),
            ready_timeout: Duration::from_secs(self.publish.ready_timeout_secs),
            delivery: self.publish.delivery,
        }
    }

    pub fn mqtt_config(&self) -> MqttConfig {
        MqttConfig {
            broker_host: self.mqtt.host.clone(),
            broker_port: self.mqtt.port,
            client_id: self.mqtt.client_id.clone(),
            topic: self.mqtt.topic.clone(),
            keep_alive: Duration::from_secs(self.mqtt.keep_alive_secs),
            connect_timeout: Duration::from_secs(self.mqtt.connect_timeout_secs),
            ack_timeout: Duration::from_secs(self.mqtt.ack_timeout_secs),
        }
    }

    pub fn link_config(&self) -> LinkConfig {
        LinkConfig {
            check_period: Duration::from_secs(self.link.check_period_secs),
            connect_timeout: Duration::from_secs(self.link.connect_timeout_secs),
        }
    }

    pub fn time_sync_config(&self) -> TimeSyncConfig {
        TimeSyncConfig {
            min_valid_year: self.clock.min_valid_year,
            max_polls: self.clock.max_polls,
            poll_interval: Duration::from_secs(self.clock.poll_interval_secs),
            resync_period: Duration::from_secs(self.clock.resync_hours * 3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;
    use std::collections::HashMap;

    fn from_sources(toml: &str, env: &[(&str, &str)]) -> Result<StationConfig, ConfigError> {
        let vars: HashMap<String, String> = env
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let builder = config::Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .add_source(StationConfig::environment().source(Some(vars)));
        StationConfig::from_builder(builder)
    }

    #[test]
    fn test_defaults() {
        let config = from_sources("", &[]).unwrap();

        assert_eq!(config.buffer.capacity, 512);
        assert_eq!(config.acquisition_config().period, Duration::from_secs(300));
        assert_eq!(
            config.schedule(),
            PublishSchedule::Aligned {
                interval_minutes: 30
            }
        );
        assert_eq!(config.publish.delivery, DeliveryPolicy::AtMostOnce);
        assert_eq!(config.utc_offset().unwrap().local_minus_utc(), -14_400);
        assert_eq!(config.sensor.address, 0x38);
        assert_eq!(config.log_level().unwrap(), Level::INFO);
    }

    #[test]
    fn test_file_values() {
        let toml = r#"
            [buffer]
            capacity = 64

            [sensor]
            backend = "simulated"
            seed = 7

            [publish]
            mode = "after_each_sample"
            delivery = "at_least_once"

            [identity]
            owner = "alice"
            hardware = "greenhouse"
        "#;
        let config = from_sources(toml, &[]).unwrap();

        assert_eq!(config.buffer.capacity, 64);
        assert_eq!(config.sensor.backend, SensorBackend::Simulated);
        assert_eq!(config.schedule(), PublishSchedule::AfterEachSample);
        assert_eq!(config.uplink_config().delivery, DeliveryPolicy::AtLeastOnce);
        assert_eq!(config.identity.owner, "alice");
        // untouched keys in a present section keep their defaults
        assert_eq!(config.sensor.bus, "/dev/i2c-1");
    }

    #[test]
    fn test_environment_overrides_file() {
        let toml = r#"
            [mqtt]
            host = "broker.local"
            port = 1883
        "#;
        let config = from_sources(
            toml,
            &[
                ("STATION__MQTT__PORT", "8883"),
                ("STATION__ACQUISITION__PERIOD_SECS", "60"),
            ],
        )
        .unwrap();

        let mqtt = config.mqtt_config();
        assert_eq!(mqtt.broker_host, "broker.local");
        assert_eq!(mqtt.broker_port, 8883);
        assert_eq!(mqtt.ack_timeout, Duration::from_secs(5));
        assert_eq!(config.acquisition.period_secs, 60);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let result = from_sources("[buffer]\ncapacity = 0", &[]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_interval_not_dividing_day() {
        let result = from_sources("[publish]\ninterval_minutes = 7", &[]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_offset_and_level() {
        let result = from_sources("[clock]\nutc_offset_seconds = 90000", &[]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        let result = from_sources("[log]\nlevel = \"loud\"", &[]);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_missing_explicit_file() {
        let result = StationConfig::load(Some(Path::new("/nonexistent/station.toml")));
        assert!(matches!(result, Err(ConfigError::Load(_))));
    }
}
