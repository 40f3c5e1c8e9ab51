//! Profile collector.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::ticker;
use crate::envelope::{ProfileMeta, SampleHeader};
use crate::error::ProviderError;
use crate::handoff::{CaptureBuffer, HandoffError, ProfileProducer};
use crate::identity::{Identity, MonotonicClock};
use crate::kind::{CaptureStrategy, EnabledKinds, ProfileKind};
use crate::provider::RuntimeProvider;

/// Result of capturing one kind.
enum Capture {
    /// The buffer holds a fresh payload.
    Ready,
    /// The provider could not produce this kind; move on to the next.
    Skipped,
    /// Shutdown was requested mid-capture.
    Cancelled,
}

/// Captures every enabled kind once per tick, in configured order, and hands
/// each capture off before touching the buffer again.
pub struct ProfileCollector {
    provider: Arc<dyn RuntimeProvider>,
    identity: Arc<Identity>,
    kinds: EnabledKinds,
    interval: Duration,
    cpu_duration: Duration,
    clock: MonotonicClock,
    buffer: CaptureBuffer,
    producer: ProfileProducer,
}

impl ProfileCollector {
    #[must_use]
    pub fn new(
        provider: Arc<dyn RuntimeProvider>,
        identity: Arc<Identity>,
        kinds: EnabledKinds,
        interval: Duration,
        cpu_duration: Duration,
        producer: ProfileProducer,
    ) -> Self {
        Self {
            provider,
            identity,
            kinds,
            interval,
            cpu_duration,
            clock: MonotonicClock::new(),
            buffer: Arc::new(Mutex::new(Vec::new())),
            producer,
        }
    }

    /// Run until `cancel` fires or the publisher goes away.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            interval_secs = self.interval.as_secs_f64(),
            kinds = ?self.kinds.as_slice(),
            "profile collector started"
        );
        let mut ticker = ticker(self.interval);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            if let Err(e) = self.collect_tick(&cancel).await {
                if e == HandoffError::Closed {
                    warn!("publisher gone, profile collector stopping");
                }
                break;
            }
        }

        info!("profile collector stopped");
    }

    /// Capture and hand off every enabled kind once.
    async fn collect_tick(&mut self, cancel: &CancellationToken) -> Result<(), HandoffError> {
        let kinds: Vec<ProfileKind> = self.kinds.iter().collect();

        for kind in kinds {
            let timestamp_ms = self.clock.now_ms();

            match self.capture(kind, cancel).await {
                Capture::Ready => {}
                Capture::Skipped => continue,
                Capture::Cancelled => return Err(HandoffError::Cancelled),
            }

            let meta = ProfileMeta {
                header: SampleHeader {
                    timestamp_ms,
                    identity: Arc::clone(&self.identity),
                },
                kind,
                duration: (kind.strategy() == CaptureStrategy::OverDuration)
                    .then_some(self.cpu_duration),
                interval: self.interval,
            };

            self.producer.hand_off(meta, &self.buffer, cancel).await?;
            debug!(%kind, time = timestamp_ms, "profile released by publisher");
        }

        Ok(())
    }

    async fn capture(&self, kind: ProfileKind, cancel: &CancellationToken) -> Capture {
        let result = match kind.strategy() {
            CaptureStrategy::Point => {
                let provider = Arc::clone(&self.provider);
                let buffer = Arc::clone(&self.buffer);
                on_blocking_pool(kind, move || {
                    let mut buf = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                    buf.clear();
                    provider.capture_point(kind, &mut buf)
                })
                .await
            }
            CaptureStrategy::OverDuration => match self.capture_over_window(kind, cancel).await {
                Some(result) => result,
                None => return Capture::Cancelled,
            },
        };

        match result {
            Ok(()) => Capture::Ready,
            Err(ProviderError::KindUnavailable { .. }) => {
                warn!(%kind, "profile kind not available from provider, skipping");
                Capture::Skipped
            }
            Err(e) => {
                warn!(%kind, error = %e, "profile capture failed, skipping");
                Capture::Skipped
            }
        }
    }

    /// Bracket the capture window. Returns `None` when cancelled, after the
    /// partial capture has been stopped and discarded.
    async fn capture_over_window(
        &self,
        kind: ProfileKind,
        cancel: &CancellationToken,
    ) -> Option<Result<(), ProviderError>> {
        let provider = Arc::clone(&self.provider);
        if let Err(e) = on_blocking_pool(kind, move || provider.begin_capture(kind)).await {
            return Some(Err(e));
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let provider = Arc::clone(&self.provider);
                let stopped = on_blocking_pool(kind, move || {
                    let mut discarded = Vec::new();
                    provider.end_capture(kind, &mut discarded)
                })
                .await;
                if let Err(e) = stopped {
                    debug!(%kind, error = %e, "stopping cancelled capture failed");
                }
                return None;
            }
            () = tokio::time::sleep(self.cpu_duration) => {}
        }

        let provider = Arc::clone(&self.provider);
        let buffer = Arc::clone(&self.buffer);
        Some(
            on_blocking_pool(kind, move || {
                let mut buf = buffer.lock().unwrap_or_else(PoisonError::into_inner);
                buf.clear();
                provider.end_capture(kind, &mut buf)
            })
            .await,
        )
    }
}

/// Run a provider call on the blocking pool so sampling never stalls the
/// async workers.
async fn on_blocking_pool<F>(kind: ProfileKind, call: F) -> Result<(), ProviderError>
where
    F: FnOnce() -> Result<(), ProviderError> + Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .unwrap_or_else(|e| Err(ProviderError::capture_failed(kind, e.to_string())))
}
