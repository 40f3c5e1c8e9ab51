//! Timer-driven producers.
//!
//! Each collector owns its ticker and runs until the shared cancellation token
//! fires. A tick produces samples from that tick's provider reading only.

mod metrics;
mod profile;

pub use metrics::{MetricsCollector, derive_metrics, min_max_pause_ns};
pub use profile::ProfileCollector;

use std::time::Duration;

use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};

/// Ticker whose first tick is one period away. Ticks missed while a tick is
/// still being processed are skipped.
pub(crate) fn ticker(period: Duration) -> Interval {
    let now = Instant::now();
    let mut ticker = interval_at(now.checked_add(period).unwrap_or(now), period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker
}
