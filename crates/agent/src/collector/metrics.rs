//! Runtime metrics collector.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc::error::SendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ticker;
use crate::envelope::{MetricsSample, RuntimeMetrics, SampleHeader};
use crate::handoff::MetricsProducer;
use crate::identity::{Identity, MonotonicClock};
use crate::provider::{PAUSE_HISTORY, RuntimeProvider, RuntimeStats};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;
const NANOS_PER_MILLI: f64 = 1_000_000.0;

/// Reads runtime counters once per tick and sends one sample, without
/// waiting for any acknowledgment.
pub struct MetricsCollector {
    provider: Arc<dyn RuntimeProvider>,
    identity: Arc<Identity>,
    interval: Duration,
    clock: MonotonicClock,
    /// Previous tick's reading. Zero before the first tick.
    prev: RuntimeStats,
    tx: MetricsProducer,
}

impl MetricsCollector {
    #[must_use]
    pub fn new(
        provider: Arc<dyn RuntimeProvider>,
        identity: Arc<Identity>,
        interval: Duration,
        tx: MetricsProducer,
    ) -> Self {
        Self {
            provider,
            identity,
            interval,
            clock: MonotonicClock::new(),
            prev: RuntimeStats::zeroed(),
            tx,
        }
    }

    /// Run until `cancel` fires or the publisher goes away.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(interval_secs = self.interval.as_secs_f64(), "metrics collector started");
        let mut ticker = ticker(self.interval);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(sample) = self.sample().await else {
                continue;
            };
            let time = sample.header.timestamp_ms;

            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                sent = self.tx.send(sample) => {
                    if let Err(SendError(_)) = sent {
                        warn!("publisher gone, metrics collector stopping");
                        break;
                    }
                    debug!(time, "metrics sample handed off");
                }
            }
        }

        info!("metrics collector stopped");
    }

    /// Read the provider on the blocking pool and derive this tick's sample.
    ///
    /// Returns `None` if the read did not complete; the previous reading is
    /// kept so the next tick still reports deltas against it.
    pub async fn sample(&mut self) -> Option<MetricsSample> {
        let timestamp_ms = self.clock.now_ms();
        let provider = Arc::clone(&self.provider);
        let cur = match tokio::task::spawn_blocking(move || provider.read_stats()).await {
            Ok(cur) => cur,
            Err(e) => {
                warn!(error = %e, "runtime stats read failed");
                return None;
            }
        };
        let metrics = derive_metrics(&self.prev, &cur);
        self.prev = cur;

        Some(MetricsSample {
            header: SampleHeader {
                timestamp_ms,
                identity: Arc::clone(&self.identity),
            },
            metrics,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn to_mb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_MB
}

#[allow(clippy::cast_precision_loss)]
fn to_ms(nanos: u64) -> f64 {
    nanos as f64 / NANOS_PER_MILLI
}

/// Derive one tick's metrics from the previous and current readings.
///
/// Counters described as "since last tick" are `cur - prev`; with a zeroed
/// `prev` (first tick) they equal the cumulative counters.
#[must_use]
pub fn derive_metrics(prev: &RuntimeStats, cur: &RuntimeStats) -> RuntimeMetrics {
    let (min_pause, max_pause) = min_max_pause_ns(&cur.pause_ns, prev.num_gc, cur.num_gc);

    RuntimeMetrics {
        num_cpu: cur.num_cpu,
        num_tasks: cur.num_tasks,
        alloc_mb: to_mb(cur.alloc_bytes),
        total_alloc_mb: to_mb(cur.total_alloc_bytes.saturating_sub(prev.total_alloc_bytes)),
        sys_mb: to_mb(cur.sys_bytes),
        mallocs: cur.mallocs.saturating_sub(prev.mallocs),
        frees: cur.frees.saturating_sub(prev.frees),
        live_objects: cur.mallocs.saturating_sub(cur.frees),
        num_gc: cur.num_gc.saturating_sub(prev.num_gc),
        num_forced_gc: cur.num_forced_gc.saturating_sub(prev.num_forced_gc),
        last_gc_ms: u64::try_from(Duration::from_nanos(cur.last_gc_ns).as_millis())
            .unwrap_or(u64::MAX),
        total_pause_gc_ms: to_ms(cur.pause_total_ns.saturating_sub(prev.pause_total_ns)),
        max_pause_gc_ms: to_ms(max_pause),
        min_pause_gc_ms: to_ms(min_pause),
        gc_cpu_fraction: cur.gc_cpu_fraction,
    }
}

/// Min and max pause among GCs `prev_gc + 1 ..= cur_gc`.
///
/// GC number `n` sits at `pause_ns[(n + 255) % 256]`. At most the last 256 GCs
/// are still in the ring. Zero entries never count as the minimum. Returns
/// `(0, 0)` when no GC happened.
#[must_use]
pub fn min_max_pause_ns(pause_ns: &[u64; PAUSE_HISTORY], prev_gc: u32, cur_gc: u32) -> (u64, u64) {
    let ring = u32::try_from(PAUSE_HISTORY).unwrap_or(u32::MAX);
    let count = cur_gc.saturating_sub(prev_gc).min(ring);

    (0..count)
        .map(|back| cur_gc.wrapping_sub(back))
        .filter_map(|n| {
            let slot = usize::try_from(n.wrapping_sub(1).checked_rem(ring)?).ok()?;
            pause_ns.get(slot).copied()
        })
        .fold((0, 0), |(min, max), pause| {
            let min = if pause > 0 && (min == 0 || pause < min) {
                pause
            } else {
                min
            };
            (min, max.max(pause))
        })
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use proptest::test_runner::TestCaseError;

    use super::*;

    fn slot(n: u32) -> usize {
        usize::try_from(n.wrapping_sub(1) & 0xff).unwrap_or(0)
    }

    fn ring_with(entries: &[(u32, u64)]) -> [u64; PAUSE_HISTORY] {
        let mut pauses = [0; PAUSE_HISTORY];
        for &(gc, pause) in entries {
            if let Some(entry) = pauses.get_mut(slot(gc)) {
                *entry = pause;
            }
        }
        pauses
    }

    #[test]
    fn test_no_gc_means_zero_pauses() {
        let pauses = ring_with(&[(5, 900)]);
        assert_eq!(min_max_pause_ns(&pauses, 5, 5), (0, 0));
    }

    #[test]
    fn test_window_only_covers_new_gcs() {
        // GC 3 is before the window.
        let pauses = ring_with(&[(3, 1), (4, 400), (5, 200), (6, 700)]);
        assert_eq!(min_max_pause_ns(&pauses, 3, 6), (200, 700));
    }

    #[test]
    fn test_window_wraps_around_ring() {
        let pauses = ring_with(&[(255, 50), (256, 30), (257, 90)]);

        assert_eq!(slot(256), 255);
        assert_eq!(slot(257), 0);
        assert_eq!(min_max_pause_ns(&pauses, 254, 257), (30, 90));
    }

    #[test]
    fn test_zero_entries_ignored_for_min() {
        let pauses = ring_with(&[(2, 0), (3, 80)]);
        assert_eq!(min_max_pause_ns(&pauses, 1, 3), (80, 80));
    }

    #[test]
    fn test_first_tick_reports_cumulative_counters() {
        let mut cur = RuntimeStats::zeroed();
        cur.mallocs = 1_000;
        cur.frees = 400;
        cur.num_gc = 3;
        cur.total_alloc_bytes = 3_145_728;
        cur.pause_total_ns = 2_500_000;

        let m = derive_metrics(&RuntimeStats::zeroed(), &cur);

        assert_eq!(m.mallocs, 1_000);
        assert_eq!(m.frees, 400);
        assert_eq!(m.live_objects, 600);
        assert_eq!(m.num_gc, 3);
        assert!((m.total_alloc_mb - 3.0).abs() < f64::EPSILON);
        assert!((m.total_pause_gc_ms - 2.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_deltas_between_ticks() {
        let mut prev = RuntimeStats::zeroed();
        prev.mallocs = 100;
        prev.frees = 50;
        prev.num_gc = 10;
        prev.num_forced_gc = 1;
        prev.pause_total_ns = 1_000_000;

        let mut cur = prev.clone();
        cur.mallocs = 160;
        cur.frees = 90;
        cur.num_gc = 12;
        cur.num_forced_gc = 2;
        cur.pause_total_ns = 4_000_000;
        cur.last_gc_ns = 1_700_000_000_000_000_000;
        cur.pause_ns = ring_with(&[(11, 1_000_000), (12, 2_000_000)]);

        let m = derive_metrics(&prev, &cur);

        assert_eq!(m.mallocs, 60);
        assert_eq!(m.frees, 40);
        assert_eq!(m.live_objects, 70);
        assert_eq!(m.num_gc, 2);
        assert_eq!(m.num_forced_gc, 1);
        assert_eq!(m.last_gc_ms, 1_700_000_000_000);
        assert!((m.total_pause_gc_ms - 3.0).abs() < f64::EPSILON);
        assert!((m.min_pause_gc_ms - 1.0).abs() < f64::EPSILON);
        assert!((m.max_pause_gc_ms - 2.0).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn prop_pause_window_matches_reference(
            pauses in proptest::collection::vec(0_u64..1_000, PAUSE_HISTORY),
            prev in 0_u32..10_000,
            new_gcs in 0_u32..600,
        ) {
            let ring: [u64; PAUSE_HISTORY] = pauses
                .try_into()
                .map_err(|_| TestCaseError::fail("ring has the wrong size"))?;
            let cur = prev.saturating_add(new_gcs);

            let window: Vec<u64> = (prev.saturating_add(1)..=cur)
                .rev()
                .take(PAUSE_HISTORY)
                .filter_map(|n| ring.get(slot(n)).copied())
                .collect();
            let expected_max = window.iter().copied().max().unwrap_or(0);
            let expected_min = window.iter().copied().filter(|p| *p > 0).min().unwrap_or(0);

            prop_assert_eq!(min_max_pause_ns(&ring, prev, cur), (expected_min, expected_max));
        }

        #[test]
        fn prop_monotonic_counters_are_differences(
            prev_mallocs in 0_u64..1_000_000,
            extra in 0_u64..1_000_000,
        ) {
            let mut prev = RuntimeStats::zeroed();
            prev.mallocs = prev_mallocs;
            let mut cur = RuntimeStats::zeroed();
            cur.mallocs = prev_mallocs.saturating_add(extra);

            prop_assert_eq!(derive_metrics(&prev, &cur).mallocs, extra);
        }
    }

    #[tokio::test]
    async fn test_sample_keeps_previous_reading() {
        struct Growing(std::sync::atomic::AtomicU64);

        impl RuntimeProvider for Growing {
            fn capture_point(
                &self,
                kind: crate::kind::ProfileKind,
                _buf: &mut Vec<u8>,
            ) -> Result<(), crate::error::ProviderError> {
                Err(crate::error::ProviderError::unavailable(kind))
            }

            fn begin_capture(
                &self,
                kind: crate::kind::ProfileKind,
            ) -> Result<(), crate::error::ProviderError> {
                Err(crate::error::ProviderError::unavailable(kind))
            }

            fn end_capture(
                &self,
                kind: crate::kind::ProfileKind,
                _buf: &mut Vec<u8>,
            ) -> Result<(), crate::error::ProviderError> {
                Err(crate::error::ProviderError::unavailable(kind))
            }

            fn read_stats(&self) -> RuntimeStats {
                let step = self
                    .0
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst)
                    .saturating_add(1);
                let mut stats = RuntimeStats::zeroed();
                stats.mallocs = step.saturating_mul(10);
                stats
            }
        }

        let (tx, _rx) = crate::handoff::metrics_channel();
        let identity = Arc::new(Identity {
            service: "svc".to_string(),
            pid: 1,
            hostname: String::new(),
        });
        let mut collector = MetricsCollector::new(
            Arc::new(Growing(std::sync::atomic::AtomicU64::new(0))),
            identity,
            Duration::from_secs(1),
            tx,
        );

        let first = collector.sample().await.map(|s| s.metrics.mallocs);
        let second = collector.sample().await.map(|s| s.metrics.mallocs);

        assert_eq!(first, Some(10));
        assert_eq!(second, Some(10));
    }
}
