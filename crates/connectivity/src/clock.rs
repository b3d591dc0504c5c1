//! Wall Clock

use chrono::{DateTime, Datelike, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Clock collaborator: seconds since the Unix epoch
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Host wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        Utc::now().timestamp()
    }
}

/// Clock whose time is set by the caller
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: Arc::new(AtomicI64::new(now)),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::Relaxed);
    }

    pub fn advance(&self, seconds: i64) {
        self.now.fetch_add(seconds, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::Relaxed)
    }
}

/// True once the clock reads at least January 1st of `min_year` (UTC).
///
/// A board that has not been synchronized boots near the epoch, so any year
/// before the firmware was built means the time is not usable.
pub fn is_plausible(timestamp: i64, min_year: i32) -> bool {
    DateTime::from_timestamp(timestamp, 0)
        .map(|t| t.year() >= min_year)
        .unwrap_or(false)
}
