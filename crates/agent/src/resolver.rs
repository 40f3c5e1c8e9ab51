//! Destination discovery for the network sink.
//!
//! An explicit URL always wins. Otherwise the cluster forwarder and the local
//! agent are checked in that order with a short GET; the first one answering 200
//! is adopted, and the agent URL is the fallback when neither does. Whatever is
//! chosen is kept for the rest of the process lifetime.

use reqwest::StatusCode;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::TargetConfig;
use crate::error::PublishError;

/// Resolves and caches the publish URL.
#[derive(Debug)]
pub struct TargetResolver {
    target: TargetConfig,
    liveness: reqwest::Client,
    resolved: OnceCell<Url>,
}

impl TargetResolver {
    /// Create a resolver. Nothing is checked until the first [`resolve`](Self::resolve).
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::ClientBuild`] if the liveness client cannot be built.
    pub fn new(target: TargetConfig) -> Result<Self, PublishError> {
        let liveness = reqwest::Client::builder()
            .timeout(target.liveness_timeout)
            .build()
            .map_err(PublishError::ClientBuild)?;

        Ok(Self {
            target,
            liveness,
            resolved: OnceCell::new(),
        })
    }

    /// The publish URL, resolved on first call.
    pub async fn resolve(&self) -> &Url {
        self.resolved.get_or_init(|| self.discover()).await
    }

    /// Resolved URL if resolution already happened.
    #[must_use]
    pub fn resolved(&self) -> Option<&Url> {
        self.resolved.get()
    }

    async fn discover(&self) -> Url {
        if let Some(explicit) = &self.target.explicit {
            info!(url = %explicit, "using configured target url");
            return explicit.clone();
        }

        for candidate in [&self.target.forwarder_url, &self.target.agent_url] {
            if self.is_alive(candidate).await {
                info!(url = %candidate, "target url detected");
                return candidate.clone();
            }
        }

        warn!(
            url = %self.target.agent_url,
            "no collector answered the liveness check, falling back to agent url"
        );
        self.target.agent_url.clone()
    }

    async fn is_alive(&self, url: &Url) -> bool {
        match self.liveness.get(url.clone()).send().await {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                debug!(url = %url, status = response.status().as_u16(), "liveness check rejected");
                false
            }
            Err(e) => {
                debug!(url = %url, error = %e, "liveness check failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;
    use std::time::Duration;

    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn target(
        forwarder: &MockServer,
        agent: &MockServer,
        explicit: Option<Url>,
    ) -> Result<TargetConfig, url::ParseError> {
        Ok(TargetConfig {
            explicit,
            forwarder_url: Url::parse(&forwarder.uri())?,
            agent_url: Url::parse(&agent.uri())?,
            liveness_timeout: Duration::from_millis(500),
            request_timeout: Duration::from_secs(1),
        })
    }

    async fn endpoint_answering(status: u16, expected_calls: u64) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(status))
            .expect(expected_calls)
            .mount(&server)
            .await;
        server
    }

    #[tokio::test]
    async fn test_explicit_url_skips_probing() -> Result<(), Box<dyn Error>> {
        let forwarder = endpoint_answering(200, 0).await;
        let agent = endpoint_answering(200, 0).await;
        let explicit = Url::parse("http://collector.example:9000/ingest")?;

        let resolver = TargetResolver::new(target(&forwarder, &agent, Some(explicit.clone()))?)?;

        assert_eq!(resolver.resolve().await, &explicit);
        Ok(())
    }

    #[tokio::test]
    async fn test_forwarder_preferred_when_both_answer() -> Result<(), Box<dyn Error>> {
        let forwarder = endpoint_answering(200, 1).await;
        let agent = endpoint_answering(200, 0).await;

        let resolver = TargetResolver::new(target(&forwarder, &agent, None)?)?;

        assert_eq!(resolver.resolve().await.as_str(), Url::parse(&forwarder.uri())?.as_str());
        Ok(())
    }

    #[tokio::test]
    async fn test_agent_used_when_forwarder_rejects() -> Result<(), Box<dyn Error>> {
        let forwarder = endpoint_answering(503, 1).await;
        let agent = endpoint_answering(200, 1).await;

        let resolver = TargetResolver::new(target(&forwarder, &agent, None)?)?;

        assert_eq!(resolver.resolve().await.as_str(), Url::parse(&agent.uri())?.as_str());
        Ok(())
    }

    #[tokio::test]
    async fn test_falls_back_to_agent_when_nothing_answers() -> Result<(), Box<dyn Error>> {
        let forwarder = endpoint_answering(404, 1).await;
        let agent = endpoint_answering(500, 1).await;

        let resolver = TargetResolver::new(target(&forwarder, &agent, None)?)?;

        assert_eq!(resolver.resolve().await.as_str(), Url::parse(&agent.uri())?.as_str());
        Ok(())
    }

    #[tokio::test]
    async fn test_resolution_is_cached() -> Result<(), Box<dyn Error>> {
        let forwarder = endpoint_answering(200, 1).await;
        let agent = endpoint_answering(200, 0).await;

        let resolver = TargetResolver::new(target(&forwarder, &agent, None)?)?;
        assert!(resolver.resolved().is_none());

        let first = resolver.resolve().await.clone();
        let second = resolver.resolve().await.clone();

        assert_eq!(first, second);
        assert_eq!(resolver.resolved(), Some(&first));
        Ok(())
    }
}
