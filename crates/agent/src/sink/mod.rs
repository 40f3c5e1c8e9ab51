//! Publish destinations. One is picked at start and kept for the run.

mod file;
mod network;

pub use file::{FileNamePattern, FileWriter};
pub use network::NetworkSender;

use crate::envelope::{Envelope, MetricsSample, ProfileSample};
use crate::error::PublishError;
use crate::handoff::ProfileHandoff;

/// Active sink strategy.
#[derive(Debug)]
pub enum Sink {
    Network(NetworkSender),
    File(FileWriter),
}

impl Sink {
    /// Publish one profile and release its lease.
    ///
    /// The network path copies the payload and releases before encoding; the
    /// file path writes the borrowed payload and releases afterwards. Returns
    /// where the sample went.
    ///
    /// # Errors
    ///
    /// Any failure of the underlying sink. The lease is released either way.
    pub async fn publish_profile(&self, handoff: ProfileHandoff) -> Result<String, PublishError> {
        match self {
            Self::Network(sender) => {
                let ProfileHandoff { meta, lease } = handoff;
                let payload = lease.copy_and_release();
                let envelope = Envelope::Profile(ProfileSample { meta, payload });
                sender.send(&envelope).await.map(ToString::to_string)
            }
            Self::File(writer) => writer
                .write_profile(handoff)
                .await
                .map(|path| path.display().to_string()),
        }
    }

    /// Publish one metrics sample.
    ///
    /// # Errors
    ///
    /// Any failure of the underlying sink.
    pub async fn publish_metrics(&self, sample: MetricsSample) -> Result<String, PublishError> {
        match self {
            Self::Network(sender) => sender
                .send(&Envelope::Metrics(sample))
                .await
                .map(ToString::to_string),
            Self::File(writer) => writer
                .write_metrics(&sample)
                .await
                .map(|path| path.display().to_string()),
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::File(_) => "file",
        }
    }
}
