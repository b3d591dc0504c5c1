//! Publish Schedule

use chrono::FixedOffset;
use std::time::Duration;

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// When the drain task runs a publish cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishSchedule {
    /// On local wall-clock boundaries, e.g. every 30 min → hh:00 and hh:30
    Aligned { interval_minutes: u32 },
    /// Right after the acquisition task pushes a sample
    AfterEachSample,
}

impl Default for PublishSchedule {
    fn default() -> Self {
        PublishSchedule::Aligned {
            interval_minutes: 30,
        }
    }
}

impl PublishSchedule {
    /// Aligned intervals must split a day into whole slots
    pub fn is_valid(&self) -> bool {
        match *self {
            PublishSchedule::Aligned { interval_minutes } => {
                interval_minutes > 0 && (24 * 60) % interval_minutes == 0
            }
            PublishSchedule::AfterEachSample => true,
        }
    }
}

/// Time from `now` until the next local boundary that is a multiple of
/// `interval_minutes` after local midnight. A boundary instant waits a full
/// interval.
pub fn delay_until_next_boundary(now: i64, offset: FixedOffset, interval_minutes: u32) -> Duration {
    let period = i64::from(interval_minutes.max(1)) * 60;
    let local = now + i64::from(offset.local_minus_utc());
    let into_slot = local.rem_euclid(SECONDS_PER_DAY).rem_euclid(period);
    Duration::from_secs((period - into_slot) as u64)
}
