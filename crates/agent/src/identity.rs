//! Identification fields shared by every sample.

use chrono::Utc;
use sysinfo::System;
use tracing::warn;

/// Process identity stamped on each envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub service: String,
    pub pid: u32,
    pub hostname: String,
}

impl Identity {
    /// Resolve pid and host name for `service`.
    ///
    /// A host name lookup failure is logged once and leaves the field empty.
    #[must_use]
    pub fn resolve(service: &str) -> Self {
        let hostname = System::host_name().unwrap_or_else(|| {
            warn!(service, "failed to get hostname, samples will carry an empty host");
            String::new()
        });

        Self {
            service: service.to_string(),
            pid: std::process::id(),
            hostname,
        }
    }
}

/// Millisecond epoch clock that never goes backwards.
///
/// Each collector owns one, so capture timestamps are non-decreasing per
/// producer even if the wall clock is stepped back.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last_ms: i64,
}

impl MonotonicClock {
    #[must_use]
    pub const fn new() -> Self {
        Self { last_ms: 0 }
    }

    /// Current time in ms since epoch, clamped to the last reading.
    pub fn now_ms(&mut self) -> i64 {
        self.observe(Utc::now().timestamp_millis())
    }

    fn observe(&mut self, wall_ms: i64) -> i64 {
        self.last_ms = self.last_ms.max(wall_ms);
        self.last_ms
    }
}
