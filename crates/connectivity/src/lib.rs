//! Connectivity and Time
//!
//! Readiness flags shared between tasks, the wall clock contract, and the
//! two background tasks that drive them:
//! - link manager (is the broker reachable?)
//! - time sync (is the wall clock trustworthy?)

mod clock;
mod link;
mod signal;
mod time_sync;

pub use clock::{is_plausible, Clock, ManualClock, SystemClock};
pub use link::{Link, LinkConfig, LinkError, LinkManager, TcpProbeLink};
pub use signal::ReadySignal;
pub use time_sync::{TimeSync, TimeSyncConfig};
