//! Agent configuration.
//!
//! A [`ProfilerConfig`] is assembled with consuming `with_*` builders and then
//! handed to [`Profiler::new`](crate::Profiler::new), which takes ownership.
//! Nothing can change it after the agent starts.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::kind::{EnabledKinds, ProfileKind};
use crate::retention::RetentionPolicy;
use crate::sink::FileNamePattern;

/// Default directory where profiles are stored when writing to file.
pub const DEFAULT_PROFILES_DIR: &str = "./profiles";

/// Default age after which stored profile files are removed.
pub const DEFAULT_PROFILES_AGE: Duration = Duration::from_secs(900);

/// Default period of the retention sweep.
pub const DEFAULT_SWEEP_PERIOD: Duration = Duration::from_secs(60);

/// Default local agent endpoint.
pub const DEFAULT_AGENT_URL: &str = "http://127.0.0.1:8588";

/// Default cluster forwarder endpoint.
pub const DEFAULT_CLUSTER_FORWARDER_URL: &str = "http://forwarder.sfagent.svc";

/// Default cpu profile capture duration.
pub const DEFAULT_CPU_PROFILE_DURATION: Duration = Duration::from_secs(10);

/// Default interval between collections.
pub const DEFAULT_PROFILE_INTERVAL: Duration = Duration::from_secs(60);

/// Default timeout of a publish request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout of a target liveness check.
pub const DEFAULT_LIVENESS_TIMEOUT: Duration = Duration::from_secs(2);

/// Prefix of the environment variables read by [`ProfilerConfig::from_env`].
pub const ENV_PREFIX: &str = "SF_PROFILER_";

/// Where published samples go. Fixed for a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkMode {
    /// POST every sample to the resolved collector URL.
    Network,
    /// Write every sample under a local directory.
    File,
}

/// Destination settings for the network sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetConfig {
    /// User supplied URL. When set, no probing happens.
    pub explicit: Option<Url>,
    /// Checked first.
    pub forwarder_url: Url,
    /// Checked second, and the last-resort fallback.
    pub agent_url: Url,
    /// Timeout of each liveness check.
    pub liveness_timeout: Duration,
    /// Timeout of each publish request.
    pub request_timeout: Duration,
}

/// Configuration for one profiling agent.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    service: String,
    interval: Duration,
    cpu_duration: Duration,
    kinds: EnabledKinds,
    collect_profiles: bool,
    collect_metrics: bool,
    sink: SinkMode,
    profiles_dir: PathBuf,
    retention_age: Duration,
    sweep_period: Duration,
    target: TargetConfig,
    log_dispatch: Option<tracing::Dispatch>,
}

impl ProfilerConfig {
    /// Create a configuration with defaults for the given service.
    ///
    /// Profiles `heap` and `cpu` are enabled, runtime metrics are collected and
    /// samples are sent over the network.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyServiceName`] if `service` is blank and
    /// [`Error::InvalidServiceName`] if it contains a path separator.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sf_profiler_agent::ProfilerConfig;
    /// # use std::time::Duration;
    /// let config = ProfilerConfig::new("checkout")
    ///     .and_then(|c| c.with_interval(Duration::from_secs(30)));
    /// assert!(config.is_ok());
    /// ```
    pub fn new(service: impl Into<String>) -> Result<Self> {
        let service = validate_service(service.into())?;

        Ok(Self {
            service,
            interval: DEFAULT_PROFILE_INTERVAL,
            cpu_duration: DEFAULT_CPU_PROFILE_DURATION,
            kinds: [ProfileKind::Heap, ProfileKind::Cpu].into_iter().collect(),
            collect_profiles: true,
            collect_metrics: true,
            sink: SinkMode::Network,
            profiles_dir: PathBuf::from(DEFAULT_PROFILES_DIR),
            retention_age: DEFAULT_PROFILES_AGE,
            sweep_period: DEFAULT_SWEEP_PERIOD,
            target: TargetConfig {
                explicit: None,
                forwarder_url: parse_url(DEFAULT_CLUSTER_FORWARDER_URL)?,
                agent_url: parse_url(DEFAULT_AGENT_URL)?,
                liveness_timeout: DEFAULT_LIVENESS_TIMEOUT,
                request_timeout: DEFAULT_REQUEST_TIMEOUT,
            },
            log_dispatch: None,
        })
    }

    /// Create a configuration and overlay `SF_PROFILER_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the service name is blank or a variable is invalid.
    pub fn from_env(service: impl Into<String>) -> Result<Self> {
        Self::new(service)?.apply(ProfilerSettings::from_lookup(|key| std::env::var(key).ok())?)
    }

    /// Create a configuration from a TOML or JSON settings file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, does not parse, lacks a
    /// service name, or holds invalid values.
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = ProfilerSettings::from_file(path)?;
        let service = settings
            .service
            .clone()
            .ok_or(Error::EmptyServiceName)?;
        Self::new(service)?.apply(settings)
    }

    /// Overlay explicitly provided settings.
    ///
    /// # Errors
    ///
    /// Returns an error if any provided value is invalid.
    pub fn apply(mut self, settings: ProfilerSettings) -> Result<Self> {
        if let Some(service) = settings.service {
            self.service = validate_service(service)?;
        }
        if let Some(secs) = settings.interval_secs {
            self = self.with_interval(Duration::from_secs(secs))?;
        }
        if let Some(secs) = settings.cpu_duration_secs {
            self = self.with_cpu_profile_duration(Duration::from_secs(secs))?;
        }
        if let Some(profiles) = settings.profiles {
            self.kinds = parse_profiles(&profiles)?;
        }
        if let Some(url) = settings.target_url {
            self = self.with_target_url(&url)?;
        }
        if let Some(dir) = settings.output_dir {
            self.profiles_dir = dir;
        }
        if settings.write_to_file == Some(true) {
            self.sink = SinkMode::File;
        }
        if let Some(secs) = settings.retention_secs {
            self = self.with_retention_age(Duration::from_secs(secs))?;
        }
        if settings.collect_metrics == Some(false) {
            self.collect_metrics = false;
        }
        Ok(self)
    }

    /// Set the interval between collections.
    ///
    /// # Errors
    ///
    /// Returns an error if `interval` is zero.
    pub fn with_interval(mut self, interval: Duration) -> Result<Self> {
        if interval.is_zero() {
            return Err(Error::zero_duration("interval"));
        }
        self.interval = interval;
        Ok(self)
    }

    /// Set how long a cpu profile is captured for.
    ///
    /// # Errors
    ///
    /// Returns an error if `duration` is zero.
    pub fn with_cpu_profile_duration(mut self, duration: Duration) -> Result<Self> {
        if duration.is_zero() {
            return Err(Error::zero_duration("cpu profile duration"));
        }
        self.cpu_duration = duration;
        Ok(self)
    }

    /// Enable one profile kind. It is collected after the kinds already enabled.
    #[must_use]
    pub fn enable_profile(mut self, kind: ProfileKind) -> Self {
        self.kinds.insert(kind);
        self
    }

    /// Disable one profile kind.
    #[must_use]
    pub fn disable_profile(mut self, kind: ProfileKind) -> Self {
        self.kinds.remove(kind);
        self
    }

    /// Enable every supported profile kind.
    #[must_use]
    pub fn enable_all_profiles(mut self) -> Self {
        self.kinds.insert_all();
        self
    }

    /// Replace the enabled kinds, in the given order.
    #[must_use]
    pub fn with_profiles(mut self, kinds: impl IntoIterator<Item = ProfileKind>) -> Self {
        self.kinds = kinds.into_iter().collect();
        self
    }

    /// Turn off profile collection entirely.
    #[must_use]
    pub fn disable_profiles(mut self) -> Self {
        self.collect_profiles = false;
        self
    }

    /// Turn off runtime metrics collection.
    #[must_use]
    pub fn disable_runtime_metrics(mut self) -> Self {
        self.collect_metrics = false;
        self
    }

    /// Write samples to the profiles directory instead of sending them.
    ///
    /// File names are `service_timestamp_pid.kind` for profiles and
    /// `service_timestamp_pid.json` for metrics.
    #[must_use]
    pub fn write_profiles_to_file(mut self) -> Self {
        self.sink = SinkMode::File;
        self
    }

    /// Set the directory used by the file sink.
    #[must_use]
    pub fn with_profiles_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.profiles_dir = dir.into();
        self
    }

    /// Set how old a stored file may get before the sweeper removes it.
    ///
    /// # Errors
    ///
    /// Returns an error if `age` is zero.
    pub fn with_retention_age(mut self, age: Duration) -> Result<Self> {
        if age.is_zero() {
            return Err(Error::zero_duration("retention age"));
        }
        self.retention_age = age;
        Ok(self)
    }

    /// Set the period of the retention sweep.
    ///
    /// # Errors
    ///
    /// Returns an error if `period` is zero.
    pub fn with_sweep_period(mut self, period: Duration) -> Result<Self> {
        if period.is_zero() {
            return Err(Error::zero_duration("sweep period"));
        }
        self.sweep_period = period;
        Ok(self)
    }

    /// Send samples to this URL. Disables target probing.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` does not parse.
    pub fn with_target_url(mut self, url: &str) -> Result<Self> {
        self.target.explicit = Some(parse_url(url)?);
        Ok(self)
    }

    /// Override the checked endpoints.
    #[must_use]
    pub fn with_target_urls(mut self, forwarder: Url, agent: Url) -> Self {
        self.target.forwarder_url = forwarder;
        self.target.agent_url = agent;
        self
    }

    /// Set the timeout of each publish request.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.target.request_timeout = timeout;
        self
    }

    /// Set the timeout of each liveness check.
    #[must_use]
    pub fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.target.liveness_timeout = timeout;
        self
    }

    /// Route all agent logs to this subscriber instead of the ambient one.
    #[must_use]
    pub fn with_logger(mut self, dispatch: tracing::Dispatch) -> Self {
        self.log_dispatch = Some(dispatch);
        self
    }

    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    #[must_use]
    pub const fn cpu_profile_duration(&self) -> Duration {
        self.cpu_duration
    }

    /// Enabled kinds in collection order.
    #[must_use]
    pub const fn profiles(&self) -> &EnabledKinds {
        &self.kinds
    }

    /// Whether the profile collector runs.
    #[must_use]
    pub fn collects_profiles(&self) -> bool {
        self.collect_profiles && !self.kinds.is_empty()
    }

    #[must_use]
    pub const fn collects_metrics(&self) -> bool {
        self.collect_metrics
    }

    #[must_use]
    pub const fn sink(&self) -> &SinkMode {
        &self.sink
    }

    #[must_use]
    pub fn profiles_dir(&self) -> &Path {
        &self.profiles_dir
    }

    #[must_use]
    pub const fn target(&self) -> &TargetConfig {
        &self.target
    }

    /// Retention settings for the file sink directory. Only files named the
    /// way the file sink names this service's samples are covered.
    #[must_use]
    pub fn retention_policy(&self) -> RetentionPolicy {
        RetentionPolicy::new(
            self.profiles_dir.clone(),
            FileNamePattern::new(self.service.clone()),
            self.retention_age,
            self.sweep_period,
        )
    }

    #[must_use]
    pub const fn log_dispatch(&self) -> Option<&tracing::Dispatch> {
        self.log_dispatch.as_ref()
    }
}

/// Optional overrides read from a settings file or the environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProfilerSettings {
    pub service: Option<String>,
    pub interval_secs: Option<u64>,
    pub cpu_duration_secs: Option<u64>,
    /// Kind names, or the single entry `"all"`.
    pub profiles: Option<Vec<String>>,
    pub target_url: Option<String>,
    pub output_dir: Option<PathBuf>,
    pub write_to_file: Option<bool>,
    pub retention_secs: Option<u64>,
    pub collect_metrics: Option<bool>,
}

impl ProfilerSettings {
    /// Read settings through a variable lookup, using the `SF_PROFILER_` prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if a numeric or boolean variable does not parse.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        Ok(Self {
            service: get("SERVICE"),
            interval_secs: parse_env_u64("INTERVAL_SECS", get("INTERVAL_SECS"))?,
            cpu_duration_secs: parse_env_u64("CPU_DURATION_SECS", get("CPU_DURATION_SECS"))?,
            profiles: get("PROFILES").map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }),
            target_url: get("TARGET_URL"),
            output_dir: get("OUTPUT_DIR").map(PathBuf::from),
            write_to_file: parse_env_bool("WRITE_TO_FILE", get("WRITE_TO_FILE"))?,
            retention_secs: parse_env_u64("RETENTION_SECS", get("RETENTION_SECS"))?,
            collect_metrics: parse_env_bool("COLLECT_METRICS", get("COLLECT_METRICS"))?,
        })
    }

    /// Load settings from a `.json` or `.toml` file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::settings_load_failed(path, e.to_string()))?;

        if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&content)
                .map_err(|e| Error::settings_load_failed(path, e.to_string()))
        } else {
            toml::from_str(&content).map_err(|e| Error::settings_load_failed(path, e.to_string()))
        }
    }
}

fn validate_service(service: String) -> Result<String> {
    if service.trim().is_empty() {
        return Err(Error::EmptyServiceName);
    }
    if service.contains(['/', '\\']) {
        return Err(Error::invalid_service_name(service));
    }
    Ok(service)
}

fn parse_url(value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| Error::invalid_url(value, e.to_string()))
}

fn parse_profiles(names: &[String]) -> Result<EnabledKinds> {
    if names.iter().any(|n| n.eq_ignore_ascii_case("all")) {
        return Ok(EnabledKinds::all());
    }
    names.iter().map(|n| n.parse::<ProfileKind>()).collect()
}

fn parse_env_u64(name: &str, value: Option<String>) -> Result<Option<u64>> {
    value
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map_err(|_| Error::invalid_env_value(format!("{ENV_PREFIX}{name}"), v.clone()))
        })
        .transpose()
}

fn parse_env_bool(name: &str, value: Option<String>) -> Result<Option<bool>> {
    value
        .map(|v| match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(Error::invalid_env_value(format!("{ENV_PREFIX}{name}"), v.clone())),
        })
        .transpose()
}
