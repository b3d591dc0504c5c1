//! Acquisition Task Implementation

use aht10_sensor::{SensorError, SensorReader};
use connectivity::{Clock, ReadySignal};
use ring_buffer::{RingBuffer, Sample};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Acquisition errors that end the task
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("Sensor initialization failed: {0}")]
    SensorInit(#[source] SensorError),
}

/// Configuration for the acquisition task
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Time between readings (default: 5 minutes)
    pub period: Duration,
    /// Hold the first reading until the wall clock is synchronized
    pub require_time_sync: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5 * 60),
            require_time_sync: true,
        }
    }
}

/// Periodic sensor reader feeding the ring buffer
pub struct AcquisitionTask<S, C> {
    sensor: S,
    clock: C,
    buffer: Arc<RingBuffer>,
    time_synced: ReadySignal,
    /// Woken after every pushed sample
    trigger: Option<Arc<Notify>>,
    config: AcquisitionConfig,
    /// Consecutive read failures
    failures: u32,
}

impl<S: SensorReader, C: Clock> AcquisitionTask<S, C> {
    /// Create a new acquisition task
    pub fn new(
        sensor: S,
        clock: C,
        buffer: Arc<RingBuffer>,
        time_synced: ReadySignal,
        config: AcquisitionConfig,
    ) -> Self {
        info!(
            "Acquisition task created: period={}s, wait_for_time_sync={}",
            config.period.as_secs(),
            config.require_time_sync
        );
        Self {
            sensor,
            clock,
            buffer,
            time_synced,
            trigger: None,
            config,
            failures: 0,
        }
    }

    /// Notify `trigger` after every sample pushed
    pub fn with_trigger(mut self, trigger: Arc<Notify>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Read the sensor once and push the resulting sample
    pub async fn acquire_once(&mut self) -> Result<Sample, SensorError> {
        match self.sensor.read().await {
            Ok(reading) => {
                self.failures = 0;
                let sample = Sample::new(reading.temperature, reading.humidity, self.clock.now());
                self.buffer.push(sample);

                info!(
                    "Acquired sample: {:.2}°C, {:.2}% (buffered: {})",
                    sample.temperature,
                    sample.humidity,
                    self.buffer.len()
                );

                if let Some(trigger) = &self.trigger {
                    trigger.notify_one();
                }
                Ok(sample)
            }
            Err(e) => {
                self.failures += 1;
                metrics::counter!("acquisition_failures_total").increment(1);
                warn!(
                    "Failed to read sensor data (attempt {}): {}",
                    self.failures, e
                );
                Err(e)
            }
        }
    }

    /// Run the acquisition loop.
    ///
    /// Only returns if the sensor cannot be initialized.
    pub async fn run(mut self) -> Result<(), AcquisitionError> {
        if self.config.require_time_sync && !self.time_synced.is_ready() {
            info!("Acquisition: waiting for initial time sync...");
            self.time_synced.wait().await;
            info!("Acquisition: time sync complete, starting sensor readings");
        }

        if let Err(e) = self.sensor.init().await {
            error!("Acquisition: failed to initialize sensor: {}", e);
            return Err(AcquisitionError::SensorInit(e));
        }

        let mut ticker = tokio::time::interval(self.config.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            debug!("Acquisition tick");
            let _ = self.acquire_once().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aht10_sensor::{Reading, SimulatedSensor};
    use connectivity::ManualClock;

    const NOW: i64 = 1_735_689_600;

    struct BrokenSensor;

    impl SensorReader for BrokenSensor {
        async fn init(&mut self) -> Result<(), SensorError> {
            Err(SensorError::Transfer {
                address: 0x38,
                reason: "no ack".to_string(),
            })
        }

        async fn read(&mut self) -> Result<Reading, SensorError> {
            Err(SensorError::NotInitialized)
        }
    }

    fn task<S: SensorReader>(
        sensor: S,
        config: AcquisitionConfig,
    ) -> (AcquisitionTask<S, ManualClock>, Arc<RingBuffer>, ReadySignal) {
        let buffer = Arc::new(RingBuffer::new(16).unwrap());
        let synced = ReadySignal::new();
        let task = AcquisitionTask::new(
            sensor,
            ManualClock::new(NOW),
            Arc::clone(&buffer),
            synced.clone(),
            config,
        );
        (task, buffer, synced)
    }

    #[tokio::test]
    async fn test_acquire_once_pushes_stamped_sample() {
        let mut sensor = SimulatedSensor::new(3);
        sensor.init().await.unwrap();
        let (mut task, buffer, _) = task(sensor, AcquisitionConfig::default());

        let sample = task.acquire_once().await.unwrap();

        assert_eq!(sample.timestamp, NOW);
        assert_eq!(buffer.drain_all(), vec![sample]);
    }

    #[tokio::test]
    async fn test_read_failure_skips_sample() {
        let mut sensor = SimulatedSensor::new(3).fail_every(1);
        sensor.init().await.unwrap();
        let (mut task, buffer, _) = task(sensor, AcquisitionConfig::default());

        assert!(task.acquire_once().await.is_err());
        assert!(task.acquire_once().await.is_err());
        assert_eq!(task.failures, 2);
        assert!(buffer.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_notified_after_push() {
        let mut sensor = SimulatedSensor::new(3);
        sensor.init().await.unwrap();
        let trigger = Arc::new(Notify::new());
        let (task, _, _) = task(sensor, AcquisitionConfig::default());
        let mut task = task.with_trigger(Arc::clone(&trigger));

        task.acquire_once().await.unwrap();
        tokio::time::timeout(Duration::from_millis(100), trigger.notified())
            .await
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sensor_init_failure_ends_task() {
        let config = AcquisitionConfig {
            require_time_sync: false,
            ..Default::default()
        };
        let (task, buffer, _) = task(BrokenSensor, config);

        let result = task.run().await;
        assert!(matches!(result, Err(AcquisitionError::SensorInit(_))));
        assert!(buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_time_sync_then_samples_periodically() {
        let config = AcquisitionConfig {
            period: Duration::from_secs(60),
            require_time_sync: true,
        };
        let (task, buffer, synced) = task(SimulatedSensor::new(9), config);
        tokio::spawn(task.run());

        tokio::time::sleep(Duration::from_secs(600)).await;
        assert!(buffer.is_empty());

        synced.set(true);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(buffer.len(), 1);

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(buffer.len(), 3);
    }
}
