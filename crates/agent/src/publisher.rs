//! Single consumer of both hand-off paths.

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::envelope::MetricsSample;
use crate::handoff::{MetricsConsumer, ProfileConsumer, ProfileHandoff};
use crate::sink::Sink;

/// Drains the profile and metrics channels into the active sink.
///
/// Neither channel has priority over the other. Every publish is attempted
/// once; failures are logged and the sample is dropped.
pub struct Publisher {
    sink: Sink,
    profiles: ProfileConsumer,
    metrics: MetricsConsumer,
}

impl Publisher {
    #[must_use]
    pub const fn new(sink: Sink, profiles: ProfileConsumer, metrics: MetricsConsumer) -> Self {
        Self {
            sink,
            profiles,
            metrics,
        }
    }

    /// Run until `cancel` fires or both producers are gone.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(sink = self.sink.name(), "publisher started");
        let mut profiles_open = true;
        let mut metrics_open = true;

        while profiles_open || metrics_open {
            tokio::select! {
                () = cancel.cancelled() => break,
                handoff = self.profiles.recv(), if profiles_open => match handoff {
                    Some(handoff) if !cancel.is_cancelled() => self.publish_profile(handoff).await,
                    Some(_) => break,
                    None => profiles_open = false,
                },
                sample = self.metrics.recv(), if metrics_open => match sample {
                    Some(sample) if !cancel.is_cancelled() => self.publish_metrics(sample).await,
                    Some(_) => break,
                    None => metrics_open = false,
                },
            }
        }

        info!("publisher stopped");
    }

    async fn publish_profile(&self, handoff: ProfileHandoff) {
        let kind = handoff.meta.kind;
        let time = handoff.meta.header.timestamp_ms;

        match self.sink.publish_profile(handoff).await {
            Ok(destination) => info!(%kind, time, %destination, "published profile"),
            Err(e) => warn!(%kind, time, error = %e, "failed to publish profile"),
        }
    }

    async fn publish_metrics(&self, sample: MetricsSample) {
        let time = sample.header.timestamp_ms;

        match self.sink.publish_metrics(sample).await {
            Ok(destination) => debug!(time, %destination, "published metrics"),
            Err(e) => warn!(time, error = %e, "failed to publish metrics"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::envelope::{ProfileMeta, RuntimeMetrics, SampleHeader};
    use crate::handoff::{CaptureBuffer, metrics_channel, profile_channel};
    use crate::identity::Identity;
    use crate::kind::ProfileKind;
    use crate::sink::FileWriter;

    fn header(timestamp_ms: i64) -> SampleHeader {
        SampleHeader {
            timestamp_ms,
            identity: Arc::new(Identity {
                service: "orders".to_string(),
                pid: 9,
                hostname: String::new(),
            }),
        }
    }

    #[tokio::test]
    async fn test_publishes_both_paths_to_file_sink() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (mut producer, profiles) = profile_channel();
        let (metrics_tx, metrics) = metrics_channel();
        let publisher = Publisher::new(Sink::File(FileWriter::new(dir.path())), profiles, metrics);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher.run(cancel.clone()));

        let buffer: CaptureBuffer = Arc::new(Mutex::new(b"heap-bytes".to_vec()));
        let meta = ProfileMeta {
            header: header(100),
            kind: ProfileKind::Heap,
            duration: None,
            interval: Duration::from_secs(1),
        };
        producer
            .hand_off(meta, &buffer, &cancel)
            .await
            .map_err(|e| format!("{e:?}"))?;
        metrics_tx
            .send(MetricsSample {
                header: header(101),
                metrics: RuntimeMetrics::default(),
            })
            .await?;

        drop(producer);
        drop(metrics_tx);
        timeout(Duration::from_secs(2), task).await??;

        assert_eq!(std::fs::read(dir.path().join("orders_100_9.heap"))?, b"heap-bytes");
        assert!(dir.path().join("orders_101_9.json").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_stops_on_cancel_with_producers_alive() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let (_producer, profiles) = profile_channel();
        let (_metrics_tx, metrics) = metrics_channel();
        let publisher = Publisher::new(Sink::File(FileWriter::new(dir.path())), profiles, metrics);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(publisher.run(cancel.clone()));

        cancel.cancel();
        timeout(Duration::from_secs(1), task).await??;
        Ok(())
    }

    #[tokio::test]
    async fn test_write_failure_still_releases() -> Result<(), Box<dyn Error>> {
        let (mut producer, profiles) = profile_channel();
        let (_metrics_tx, metrics) = metrics_channel();
        let sink = Sink::File(FileWriter::new("/nonexistent/definitely/missing"));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(Publisher::new(sink, profiles, metrics).run(cancel.clone()));

        let buffer: CaptureBuffer = Arc::new(Mutex::new(b"x".to_vec()));
        let meta = ProfileMeta {
            header: header(1),
            kind: ProfileKind::Goroutine,
            duration: None,
            interval: Duration::from_secs(1),
        };
        timeout(Duration::from_secs(1), producer.hand_off(meta, &buffer, &cancel))
            .await?
            .map_err(|e| format!("{e:?}"))?;

        cancel.cancel();
        timeout(Duration::from_secs(1), task).await??;
        Ok(())
    }
}
