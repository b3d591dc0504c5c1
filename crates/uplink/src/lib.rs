//! Sample Uplink
//!
//! Drains the ring buffer on a schedule and publishes every sample as its
//! own JSON message:
//! - wall-clock aligned or per-sample scheduling
//! - bounded wait for link readiness before each cycle
//! - explicit at-most-once / at-least-once delivery policy

mod drain;
mod publisher;
mod record;
mod schedule;

pub use drain::{CycleReport, DeliveryPolicy, DrainTask, SkipReason, UplinkConfig};
pub use publisher::{MqttConfig, MqttPublisher, Publisher};
pub use record::{RecordFormatter, SampleRecord};
pub use schedule::{delay_until_next_boundary, PublishSchedule};

use thiserror::Error;

/// Uplink error types
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timestamp {0} is out of range")]
    Timestamp(i64),
}
