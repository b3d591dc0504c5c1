//! JSON record for one sample

use crate::PublishError;
use chrono::{DateTime, FixedOffset};
use ring_buffer::Sample;
use serde::Serialize;

/// Timestamp layout, local time without offset suffix
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Wire shape of a published sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRecord<'a> {
    pub timestamp: String,
    pub temperature: f32,
    pub humidity: f32,
    pub owner: &'a str,
    pub hardware: &'a str,
}

/// Turns samples into JSON records carrying the station identity
#[derive(Debug, Clone)]
pub struct RecordFormatter {
    owner: String,
    hardware: String,
    offset: FixedOffset,
}

impl RecordFormatter {
    /// `offset` is the local time zone timestamps are rendered in
    pub fn new(owner: &str, hardware: &str, offset: FixedOffset) -> Self {
        Self {
            owner: owner.to_string(),
            hardware: hardware.to_string(),
            offset,
        }
    }

    /// Local time zone used for timestamps
    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    /// Render epoch seconds as local `YYYY-MM-DDTHH:MM:SS`
    pub fn format_timestamp(&self, timestamp: i64) -> Result<String, PublishError> {
        let utc =
            DateTime::from_timestamp(timestamp, 0).ok_or(PublishError::Timestamp(timestamp))?;
        Ok(utc
            .with_timezone(&self.offset)
            .format(TIMESTAMP_FORMAT)
            .to_string())
    }

    /// Build the record for one sample
    pub fn record(&self, sample: &Sample) -> Result<SampleRecord<'_>, PublishError> {
        Ok(SampleRecord {
            timestamp: self.format_timestamp(sample.timestamp)?,
            temperature: sample.temperature,
            humidity: sample.humidity,
            owner: &self.owner,
            hardware: &self.hardware,
        })
    }

    /// Serialize one sample as compact JSON
    pub fn to_json(&self, sample: &Sample) -> Result<String, PublishError> {
        let record = self.record(sample)?;
        serde_json::to_string(&record).map_err(|e| PublishError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatter(offset_hours: i32) -> RecordFormatter {
        let offset = FixedOffset::east_opt(offset_hours * 3600).unwrap();
        RecordFormatter::new("CREATOR", "LAB", offset)
    }

    #[test]
    fn test_timestamp_in_local_offset() {
        // 2025-01-01T00:00:00Z
        assert_eq!(
            formatter(-4).format_timestamp(1_735_689_600).unwrap(),
            "2024-12-31T20:00:00"
        );
        assert_eq!(
            formatter(0).format_timestamp(1_735_689_600).unwrap(),
            "2025-01-01T00:00:00"
        );
    }

    #[test]
    fn test_timestamp_out_of_range() {
        assert!(matches!(
            formatter(0).format_timestamp(i64::MAX),
            Err(PublishError::Timestamp(i64::MAX))
        ));
    }

    #[test]
    fn test_json_shape() {
        let sample = Sample::new(21.5, 48.25, 1_735_689_600);
        let json = formatter(-4).to_json(&sample).unwrap();

        assert_eq!(
            json,
            r#"{"timestamp":"2024-12-31T20:00:00","temperature":21.5,"humidity":48.25,"owner":"CREATOR","hardware":"LAB"}"#
        );
    }

    #[test]
    fn test_json_parses_back() {
        let sample = Sample::new(-12.75, 99.5, 1_735_689_600);
        let json = formatter(0).to_json(&sample).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["temperature"], -12.75);
        assert_eq!(value["humidity"], 99.5);
        assert_eq!(value["owner"], "CREATOR");
    }
}
