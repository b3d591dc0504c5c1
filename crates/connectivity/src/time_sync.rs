//! Time Synchronization Task
//!
//! Waits for the link, then polls the clock until it reports a plausible
//! year. The host (or the network time client underneath it) does the
//! actual synchronization; this task only decides when the time can be
//! trusted for stamping samples and scheduling uploads.

use crate::clock::{is_plausible, Clock};
use crate::signal::ReadySignal;
use chrono::DateTime;
use std::time::Duration;
use tracing::{error, info};

/// Time sync configuration
#[derive(Debug, Clone)]
pub struct TimeSyncConfig {
    /// Earliest year accepted as a synchronized clock
    pub min_valid_year: i32,
    /// Clock polls per sync attempt
    pub max_polls: u32,
    /// Delay between polls
    pub poll_interval: Duration,
    /// Delay between sync attempts
    pub resync_period: Duration,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            min_valid_year: 2024,
            max_polls: 10,
            poll_interval: Duration::from_secs(2),
            resync_period: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Background task that sets `synced` once the wall clock is usable
pub struct TimeSync<C> {
    clock: C,
    link_ready: ReadySignal,
    synced: ReadySignal,
    config: TimeSyncConfig,
}

impl<C: Clock> TimeSync<C> {
    pub fn new(
        clock: C,
        link_ready: ReadySignal,
        synced: ReadySignal,
        config: TimeSyncConfig,
    ) -> Self {
        Self {
            clock,
            link_ready,
            synced,
            config,
        }
    }

    /// Poll the clock until it is plausible or the poll budget runs out.
    ///
    /// The first check happens immediately and each failed check is followed
    /// by `poll_interval`, so up to `max_polls` checks spanning
    /// `max_polls * poll_interval`. A clock that is already valid returns
    /// without sleeping.
    pub async fn obtain_time(&self) -> bool {
        for poll in 1..=self.config.max_polls {
            let now = self.clock.now();
            if is_plausible(now, self.config.min_valid_year) {
                let utc = DateTime::from_timestamp(now, 0)
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default();
                info!("Time sync: clock valid after {} poll(s): {}", poll, utc);
                return true;
            }

            info!(
                "Time sync: waiting for time synchronization ({}/{})",
                poll, self.config.max_polls
            );
            tokio::time::sleep(self.config.poll_interval).await;
        }
        false
    }

    /// Run the sync loop forever
    pub async fn run(self) {
        loop {
            self.link_ready.wait().await;
            info!("Time sync: link up, synchronizing time...");

            if self.obtain_time().await {
                if self.synced.set(true) {
                    info!("Time sync: time synchronized");
                }
            } else {
                error!("Time sync: failed to obtain time");
            }

            tokio::time::sleep(self.config.resync_period).await;
        }
    }
}
