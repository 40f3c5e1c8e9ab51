//! CLI definitions using clap.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use sf_profiler_agent::ProfilerConfig;
use sf_profiler_agent::config::DEFAULT_PROFILES_DIR;

/// Synthetic allocation and CPU workload, optionally profiled.
#[derive(Parser, Debug)]
#[command(name = "sf-profiler")]
#[command(version)]
#[command(about = "Demo workload with the in-process profiling agent attached")]
pub struct Cli {
    /// Attach the profiling agent
    #[arg(long, default_value_t = false)]
    pub profile: bool,

    /// Write samples to files instead of sending them
    #[arg(long, default_value_t = false)]
    pub file: bool,

    /// Directory used with --file
    #[arg(long, default_value = DEFAULT_PROFILES_DIR)]
    pub dir: PathBuf,

    /// Seconds between collections
    #[arg(long, default_value_t = 60)]
    pub interval: u64,

    /// Seconds each cpu profile is captured for
    #[arg(long, default_value_t = 10)]
    pub cpu_duration: u64,

    /// Enable every profile kind
    #[arg(long, default_value_t = false)]
    pub all: bool,

    /// Collector URL; skips endpoint discovery
    #[arg(long)]
    pub target: Option<String>,

    /// Service name stamped on every sample
    #[arg(long, default_value = "test")]
    pub service: String,
}

impl Cli {
    /// Agent configuration described by the flags.
    ///
    /// # Errors
    ///
    /// Returns an error if a flag value is rejected by the agent.
    pub fn profiler_config(&self) -> sf_profiler_agent::Result<ProfilerConfig> {
        let mut config = ProfilerConfig::new(self.service.clone())?
            .with_interval(Duration::from_secs(self.interval))?
            .with_cpu_profile_duration(Duration::from_secs(self.cpu_duration))?;

        if self.all {
            config = config.enable_all_profiles();
        }
        if self.file {
            config = config.write_profiles_to_file().with_profiles_dir(&self.dir);
        }
        if let Some(target) = &self.target {
            config = config.with_target_url(target)?;
        }
        Ok(config)
    }
}
