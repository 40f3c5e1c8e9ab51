#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

//! # sf-profiler-agent
//!
//! In-process telemetry agent: periodically samples profiles and runtime
//! counters from a [`RuntimeProvider`] and ships them to a collector over HTTP
//! or to a local directory.
//!
//! ## Features
//!
//! - Profile collection over a configurable set of kinds, in configured order
//! - Runtime metrics with per-tick deltas
//! - Network sink with collector discovery, or file sink with age-based cleanup
//! - One cancellation token for every task; telemetry failures are only logged
//!
//! ## Example
//!
//! ```ignore
//! use sf_profiler_agent::{ProfileKind, Profiler, ProfilerConfig};
//!
//! let config = ProfilerConfig::new("checkout")?
//!     .with_interval(Duration::from_secs(30))?
//!     .enable_profile(ProfileKind::Goroutine)
//!     .with_target_url("http://collector.local:8588")?;
//!
//! let mut profiler = Profiler::new(config);
//! profiler.start();
//! // ... host application runs ...
//! profiler.stop();
//! ```

pub mod collector;
pub mod config;
pub mod envelope;
pub mod error;
pub mod handoff;
pub mod identity;
pub mod kind;
pub mod lifecycle;
pub mod provider;
pub mod publisher;
pub mod resolver;
pub mod retention;
pub mod sink;

// Re-export commonly used items
pub use config::{ProfilerConfig, ProfilerSettings, SinkMode, TargetConfig};
pub use envelope::{Envelope, MetricsSample, ProfileMeta, ProfileSample, RuntimeMetrics};
pub use error::{Error, ProviderError, PublishError, Result};
pub use identity::Identity;
pub use kind::{CaptureStrategy, EnabledKinds, ProfileKind};
pub use lifecycle::Profiler;
pub use provider::{RuntimeProvider, RuntimeStats, SysinfoProvider};
pub use retention::{RetentionPolicy, SweepReport};
pub use sink::FileNamePattern;
