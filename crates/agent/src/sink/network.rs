//! Network sink: one JSON POST per sample.

use reqwest::StatusCode;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;
use url::Url;

use crate::config::TargetConfig;
use crate::envelope::Envelope;
use crate::error::PublishError;
use crate::resolver::TargetResolver;

/// Posts envelopes to the resolved collector URL.
#[derive(Debug)]
pub struct NetworkSender {
    client: reqwest::Client,
    resolver: TargetResolver,
}

impl NetworkSender {
    /// # Errors
    ///
    /// Returns [`PublishError::ClientBuild`] if an HTTP client cannot be built.
    pub fn new(target: TargetConfig) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder()
            .timeout(target.request_timeout)
            .build()
            .map_err(PublishError::ClientBuild)?;

        Ok(Self {
            client,
            resolver: TargetResolver::new(target)?,
        })
    }

    /// Serialize and POST `envelope`. Success only on HTTP 200.
    ///
    /// Returns the URL the sample was delivered to.
    ///
    /// # Errors
    ///
    /// Serialization, transport and non-200 failures. Nothing is retried.
    pub async fn send(&self, envelope: &Envelope) -> Result<&Url, PublishError> {
        let body = match envelope {
            Envelope::Profile(sample) => sample.to_json()?,
            Envelope::Metrics(sample) => sample.to_json()?,
        };

        let url = self.resolver.resolve().await;
        debug!(
            sample = envelope.label(),
            time = envelope.header().timestamp_ms,
            bytes = body.len(),
            %url,
            "posting sample"
        );
        let response = self
            .client
            .post(url.clone())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|source| PublishError::Transport {
                target: url.to_string(),
                source,
            })?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(PublishError::UnexpectedStatus {
                target: url.to_string(),
                status: status.as_u16(),
            });
        }

        Ok(url)
    }
}
