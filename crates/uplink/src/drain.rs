//! Drain/Publish Task

use crate::publisher::Publisher;
use crate::record::RecordFormatter;
use crate::schedule::{delay_until_next_boundary, PublishSchedule};
use crate::PublishError;
use connectivity::{Clock, ReadySignal};
use ring_buffer::{RingBuffer, Sample};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// What happens to a sample whose publish fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPolicy {
    /// Failed samples are dropped
    #[default]
    AtMostOnce,
    /// Failed samples go back to the front of the buffer for the next cycle
    AtLeastOnce,
}

/// Drain task configuration
#[derive(Debug, Clone)]
pub struct UplinkConfig {
    /// When cycles run
    pub schedule: PublishSchedule,
    /// How long a cycle waits for the link before it is skipped
    pub ready_timeout: Duration,
    /// Failed publish handling
    pub delivery: DeliveryPolicy,
}

impl Default for UplinkConfig {
    fn default() -> Self {
        Self {
            schedule: PublishSchedule::default(),
            ready_timeout: Duration::from_secs(10),
            delivery: DeliveryPolicy::AtMostOnce,
        }
    }
}

/// Why a cycle did not drain the buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    LinkNotReady,
    SessionFailed,
}

/// Outcome of one publish cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleReport {
    /// Nothing was drained; samples stay buffered
    Skipped(SkipReason),
    Completed {
        drained: usize,
        published: usize,
        failed: usize,
        requeued: usize,
    },
}

/// Periodic consumer that empties the ring buffer into a publisher
pub struct DrainTask<P, C> {
    publisher: P,
    clock: C,
    buffer: Arc<RingBuffer>,
    formatter: RecordFormatter,
    link_ready: ReadySignal,
    time_synced: ReadySignal,
    trigger: Arc<Notify>,
    config: UplinkConfig,
}

impl<P: Publisher, C: Clock> DrainTask<P, C> {
    /// Create a new drain task
    pub fn new(
        publisher: P,
        clock: C,
        buffer: Arc<RingBuffer>,
        formatter: RecordFormatter,
        link_ready: ReadySignal,
        time_synced: ReadySignal,
        config: UplinkConfig,
    ) -> Self {
        info!(
            "Drain task created: schedule={:?}, delivery={:?}",
            config.schedule, config.delivery
        );
        Self {
            publisher,
            clock,
            buffer,
            formatter,
            link_ready,
            time_synced,
            trigger: Arc::new(Notify::new()),
            config,
        }
    }

    /// Wake-up handle for `PublishSchedule::AfterEachSample`
    pub fn trigger(&self) -> Arc<Notify> {
        Arc::clone(&self.trigger)
    }

    /// Run one publish cycle now
    pub async fn run_cycle(&mut self) -> CycleReport {
        if !self.link_ready.wait_timeout(self.config.ready_timeout).await {
            error!("Uplink: link not ready, skipping this cycle");
            return CycleReport::Skipped(SkipReason::LinkNotReady);
        }

        if let Err(e) = self.publisher.open().await {
            error!(
                "Uplink: could not open publish session, skipping this cycle: {}",
                e
            );
            return CycleReport::Skipped(SkipReason::SessionFailed);
        }

        let samples = self.buffer.drain_all();
        let drained = samples.len();
        if drained == 0 {
            warn!("Uplink: no sensor data available to publish");
        }

        let mut published = 0;
        let mut failed = 0;
        let mut retry = Vec::new();

        for sample in samples {
            match self.publish_sample(&sample).await {
                Ok(()) => {
                    published += 1;
                    metrics::counter!("uplink_published_total").increment(1);
                }
                Err(e) => {
                    failed += 1;
                    metrics::counter!("uplink_failed_total").increment(1);
                    error!("Uplink: failed to publish sample @{}: {}", sample.timestamp, e);
                    // A sample that cannot be serialized would fail again
                    if matches!(e, PublishError::Connection(_) | PublishError::Publish(_)) {
                        retry.push(sample);
                    }
                }
            }
        }

        let requeued = match self.config.delivery {
            DeliveryPolicy::AtLeastOnce if !retry.is_empty() => self.buffer.requeue(retry),
            _ => 0,
        };

        self.publisher.close().await;

        info!(
            "Uplink cycle complete: drained={}, published={}, failed={}, requeued={}",
            drained, published, failed, requeued
        );
        CycleReport::Completed {
            drained,
            published,
            failed,
            requeued,
        }
    }

    async fn publish_sample(&mut self, sample: &Sample) -> Result<(), PublishError> {
        let payload = self.formatter.to_json(sample)?;
        info!("Uplink: publishing sensor data: {}", payload);
        self.publisher.publish(payload).await
    }

    async fn wait_for_next_cycle(&mut self) {
        match self.config.schedule {
            PublishSchedule::Aligned { interval_minutes } => {
                let delay = delay_until_next_boundary(
                    self.clock.now(),
                    self.formatter.offset(),
                    interval_minutes,
                );
                info!("Uplink: waiting {} seconds until next interval", delay.as_secs());
                tokio::time::sleep(delay).await;
            }
            PublishSchedule::AfterEachSample => self.trigger.notified().await,
        }
    }

    /// Run the publish loop forever
    pub async fn run(mut self) {
        if !self.time_synced.is_ready() {
            info!("Uplink: waiting for initial time sync...");
            self.time_synced.wait().await;
            info!("Uplink: time sync complete, starting publishing loop");
        }

        loop {
            self.wait_for_next_cycle().await;
            self.run_cycle().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use connectivity::ManualClock;
    use std::collections::HashSet;
    use std::sync::Mutex;

    // 2025-01-01T08:10:05Z
    const NOW: i64 = 1_735_689_600 + 8 * 3600 + 10 * 60 + 5;

    #[derive(Default)]
    struct MockPublisher {
        sent: Arc<Mutex<Vec<String>>>,
        fail_calls: HashSet<usize>,
        calls: usize,
        refuse_open: bool,
        opened: usize,
        closed: usize,
    }

    impl Publisher for MockPublisher {
        async fn open(&mut self) -> Result<(), PublishError> {
            if self.refuse_open {
                return Err(PublishError::Connection("refused".to_string()));
            }
            self.opened += 1;
            Ok(())
        }

        async fn publish(&mut self, payload: String) -> Result<(), PublishError> {
            let call = self.calls;
            self.calls += 1;
            if self.fail_calls.contains(&call) {
                return Err(PublishError::Publish("broker gone".to_string()));
            }
            self.sent.lock().unwrap().push(payload);
            Ok(())
        }

        async fn close(&mut self) {
            self.closed += 1;
        }
    }

    struct Fixture {
        task: DrainTask<MockPublisher, ManualClock>,
        buffer: Arc<RingBuffer>,
        link: ReadySignal,
        synced: ReadySignal,
        sent: Arc<Mutex<Vec<String>>>,
    }

    fn fixture(publisher: MockPublisher, config: UplinkConfig) -> Fixture {
        let buffer = Arc::new(RingBuffer::new(8).unwrap());
        let link = ReadySignal::new();
        let synced = ReadySignal::new();
        let sent = Arc::clone(&publisher.sent);
        let formatter = RecordFormatter::new("CREATOR", "LAB", FixedOffset::east_opt(0).unwrap());
        let task = DrainTask::new(
            publisher,
            ManualClock::new(NOW),
            Arc::clone(&buffer),
            formatter,
            link.clone(),
            synced.clone(),
            config,
        );
        Fixture {
            task,
            buffer,
            link,
            synced,
            sent,
        }
    }

    fn fill(buffer: &RingBuffer, n: i64) {
        for i in 0..n {
            buffer.push(Sample::new(20.0 + i as f32, 50.0, NOW + i * 300));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_publishes_oldest_first() {
        let mut f = fixture(MockPublisher::default(), UplinkConfig::default());
        f.link.set(true);
        fill(&f.buffer, 3);

        let report = f.task.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed {
                drained: 3,
                published: 3,
                failed: 0,
                requeued: 0
            }
        );
        let sent = f.sent.lock().unwrap().clone();
        assert!(sent[0].contains(r#""timestamp":"2025-01-01T08:10:05""#));
        assert!(sent[0].contains(r#""temperature":20.0"#));
        assert!(sent[2].contains(r#""temperature":22.0"#));
        assert!(f.buffer.is_empty());
        assert_eq!((f.task.publisher.opened, f.task.publisher.closed), (1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skipped_when_link_down() {
        let mut f = fixture(MockPublisher::default(), UplinkConfig::default());
        fill(&f.buffer, 2);
        let start = tokio::time::Instant::now();

        let report = f.task.run_cycle().await;

        assert_eq!(report, CycleReport::Skipped(SkipReason::LinkNotReady));
        assert!(start.elapsed() >= Duration::from_secs(10));
        assert_eq!(f.buffer.len(), 2);
        assert_eq!(f.task.publisher.opened, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cycle_skipped_when_session_fails() {
        let publisher = MockPublisher {
            refuse_open: true,
            ..Default::default()
        };
        let mut f = fixture(publisher, UplinkConfig::default());
        f.link.set(true);
        fill(&f.buffer, 2);

        let report = f.task.run_cycle().await;

        assert_eq!(report, CycleReport::Skipped(SkipReason::SessionFailed));
        assert_eq!(f.buffer.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_buffer_is_not_an_error() {
        let mut f = fixture(MockPublisher::default(), UplinkConfig::default());
        f.link.set(true);

        let report = f.task.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed {
                drained: 0,
                published: 0,
                failed: 0,
                requeued: 0
            }
        );
        assert_eq!(f.task.publisher.closed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_publish_is_dropped_at_most_once() {
        let publisher = MockPublisher {
            fail_calls: HashSet::from([1]),
            ..Default::default()
        };
        let mut f = fixture(publisher, UplinkConfig::default());
        f.link.set(true);
        fill(&f.buffer, 3);

        let report = f.task.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed {
                drained: 3,
                published: 2,
                failed: 1,
                requeued: 0
            }
        );
        assert_eq!(f.sent.lock().unwrap().len(), 2);
        assert!(f.buffer.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_publish_is_requeued_at_least_once() {
        let publisher = MockPublisher {
            fail_calls: HashSet::from([0, 2]),
            ..Default::default()
        };
        let config = UplinkConfig {
            delivery: DeliveryPolicy::AtLeastOnce,
            ..Default::default()
        };
        let mut f = fixture(publisher, config);
        f.link.set(true);
        fill(&f.buffer, 3);

        let report = f.task.run_cycle().await;
        assert_eq!(
            report,
            CycleReport::Completed {
                drained: 3,
                published: 1,
                failed: 2,
                requeued: 2
            }
        );

        let pending: Vec<_> = f.buffer.drain_all().iter().map(|s| s.timestamp).collect();
        assert_eq!(pending, vec![NOW, NOW + 600]);
    }

    #[tokio::test]
    async fn test_unacked_samples_requeued_when_broker_hangs_up() {
        use crate::publisher::tests::{config, fake_broker, BrokerMode};
        use crate::publisher::MqttPublisher;
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(fake_broker(listener, BrokerMode::HangUp));

        let buffer = Arc::new(RingBuffer::new(8).unwrap());
        let link = ReadySignal::new();
        link.set(true);
        let mut task = DrainTask::new(
            MqttPublisher::new(config(port)),
            ManualClock::new(NOW),
            Arc::clone(&buffer),
            RecordFormatter::new("CREATOR", "LAB", FixedOffset::east_opt(0).unwrap()),
            link,
            ReadySignal::new(),
            UplinkConfig {
                delivery: DeliveryPolicy::AtLeastOnce,
                ..Default::default()
            },
        );
        fill(&buffer, 3);

        let report = task.run_cycle().await;

        assert_eq!(
            report,
            CycleReport::Completed {
                drained: 3,
                published: 0,
                failed: 3,
                requeued: 3
            }
        );
        let pending: Vec<_> = buffer.drain_all().iter().map(|s| s.timestamp).collect();
        assert_eq!(pending, vec![NOW, NOW + 300, NOW + 600]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_waits_for_aligned_boundary() {
        let f = fixture(MockPublisher::default(), UplinkConfig::default());
        f.link.set(true);
        f.synced.set(true);
        fill(&f.buffer, 2);
        let sent = Arc::clone(&f.sent);
        tokio::spawn(f.task.run());

        // 08:10:05 -> 08:30:00 is 1195 s away
        tokio::time::sleep(Duration::from_secs(1190)).await;
        assert!(sent.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(sent.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_after_each_sample() {
        let config = UplinkConfig {
            schedule: PublishSchedule::AfterEachSample,
            ..Default::default()
        };
        let f = fixture(MockPublisher::default(), config);
        f.link.set(true);
        f.synced.set(true);
        let trigger = f.task.trigger();
        let sent = Arc::clone(&f.sent);
        tokio::spawn(f.task.run());

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(sent.lock().unwrap().is_empty());

        fill(&f.buffer, 1);
        trigger.notify_one();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sent.lock().unwrap().len(), 1);
    }
}
