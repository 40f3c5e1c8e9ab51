//! Start and stop of the agent's tasks.
//!
//! `start` spawns the publisher, the optional retention sweeper and the enabled
//! collectors on the ambient tokio runtime, all bound to one
//! [`CancellationToken`]. `stop` cancels that token and returns at once; tasks
//! notice at their next suspension point. `shutdown` additionally waits for
//! them, bounded by a timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, debug, error, info, warn};

use crate::collector::{MetricsCollector, ProfileCollector};
use crate::config::{ProfilerConfig, SinkMode};
use crate::handoff::{metrics_channel, profile_channel};
use crate::identity::Identity;
use crate::provider::{RuntimeProvider, SysinfoProvider};
use crate::publisher::Publisher;
use crate::sink::{FileWriter, NetworkSender, Sink};

struct Running {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

/// Handle to one profiling agent.
///
/// # Examples
///
/// ```no_run
/// # use sf_profiler_agent::{Profiler, ProfilerConfig};
/// # use std::time::Duration;
/// # async fn run() -> Result<(), Box<dyn std::error::Error>> {
/// let config = ProfilerConfig::new("checkout")?.write_profiles_to_file();
/// let mut profiler = Profiler::new(config);
/// profiler.start();
/// // ...
/// profiler.shutdown(Duration::from_secs(5)).await;
/// # Ok(())
/// # }
/// ```
pub struct Profiler {
    config: ProfilerConfig,
    provider: Arc<dyn RuntimeProvider>,
    running: Option<Running>,
}

impl Profiler {
    /// Agent sampling the current process through [`SysinfoProvider`].
    #[must_use]
    pub fn new(config: ProfilerConfig) -> Self {
        Self::with_provider(config, Arc::new(SysinfoProvider::new()))
    }

    #[must_use]
    pub fn with_provider(config: ProfilerConfig, provider: Arc<dyn RuntimeProvider>) -> Self {
        Self {
            config,
            provider,
            running: None,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    /// Whether `start` spawned the tasks and nothing cancelled them yet.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.cancel.is_cancelled())
    }

    fn dispatch(&self) -> Dispatch {
        self.config
            .log_dispatch()
            .cloned()
            .unwrap_or_else(|| tracing::dispatcher::get_default(Dispatch::clone))
    }

    /// Spawn the agent's tasks on the current tokio runtime.
    ///
    /// Never fails: without a runtime, or when already started, the call is
    /// logged and ignored.
    pub fn start(&mut self) {
        let dispatch = self.dispatch();
        tracing::dispatcher::with_default(&dispatch, || self.start_with(&dispatch));
    }

    fn start_with(&mut self, dispatch: &Dispatch) {
        if self.running.is_some() {
            warn!(service = self.config.service(), "profiler already started");
            return;
        }

        let Ok(runtime) = Handle::try_current() else {
            error!(
                service = self.config.service(),
                "profiler needs a tokio runtime, not starting"
            );
            return;
        };

        let sink = match self.config.sink() {
            SinkMode::Network => match NetworkSender::new(self.config.target().clone()) {
                Ok(sender) => Sink::Network(sender),
                Err(e) => {
                    error!(error = %e, "failed to set up network sink, not starting");
                    return;
                }
            },
            SinkMode::File => {
                let writer = FileWriter::new(self.config.profiles_dir());
                if let Err(e) = writer.activate() {
                    warn!(error = %e, "failed to create profiles directory");
                }
                Sink::File(writer)
            }
        };

        let cancel = CancellationToken::new();
        let mut handles = Vec::new();

        if matches!(sink, Sink::File(_)) {
            let policy = self.config.retention_policy();
            handles.push(spawn_bound(&runtime, dispatch, policy.run(cancel.clone())));
        }

        let identity = Arc::new(Identity::resolve(self.config.service()));
        let (profile_tx, profile_rx) = profile_channel();
        let (metrics_tx, metrics_rx) = metrics_channel();

        let publisher = Publisher::new(sink, profile_rx, metrics_rx);
        handles.push(spawn_bound(&runtime, dispatch, publisher.run(cancel.clone())));

        if self.config.collects_profiles() {
            let collector = ProfileCollector::new(
                Arc::clone(&self.provider),
                Arc::clone(&identity),
                self.config.profiles().clone(),
                self.config.interval(),
                self.config.cpu_profile_duration(),
                profile_tx,
            );
            handles.push(spawn_bound(&runtime, dispatch, collector.run(cancel.clone())));
        } else {
            debug!("profile collection disabled");
        }

        if self.config.collects_metrics() {
            let collector = MetricsCollector::new(
                Arc::clone(&self.provider),
                identity,
                self.config.interval(),
                metrics_tx,
            );
            handles.push(spawn_bound(&runtime, dispatch, collector.run(cancel.clone())));
        } else {
            debug!("runtime metrics collection disabled");
        }

        info!(
            service = self.config.service(),
            sink = ?self.config.sink(),
            tasks = handles.len(),
            "profiler started"
        );
        self.running = Some(Running { cancel, handles });
    }

    /// Cancel every task and return without waiting.
    ///
    /// Safe to call before `start` and more than once.
    pub fn stop(&self) {
        let Some(running) = &self.running else {
            return;
        };
        if running.cancel.is_cancelled() {
            return;
        }

        tracing::dispatcher::with_default(&self.dispatch(), || {
            info!(service = self.config.service(), "stopping profiler");
        });
        running.cancel.cancel();
    }

    /// Cancel every task and wait up to `timeout` for all of them to exit.
    ///
    /// Returns `true` if every task finished in time.
    pub async fn shutdown(&mut self, timeout: Duration) -> bool {
        self.stop();
        let Some(running) = self.running.as_mut() else {
            return true;
        };

        let handles = std::mem::take(&mut running.handles);
        let count = handles.len();
        let joined = tokio::time::timeout(timeout, async move {
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "profiler task ended abnormally");
                }
            }
        })
        .with_subscriber(self.dispatch())
        .await;

        if joined.is_err() {
            tracing::dispatcher::with_default(&self.dispatch(), || {
                warn!(
                    tasks = count,
                    timeout_secs = timeout.as_secs_f64(),
                    "profiler shutdown timed out"
                );
            });
        }
        joined.is_ok()
    }
}

/// Spawn `task` with every event it emits routed to `dispatch`.
fn spawn_bound<F>(runtime: &Handle, dispatch: &Dispatch, task: F) -> JoinHandle<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    runtime.spawn(task.with_subscriber(dispatch.clone()))
}

impl Drop for Profiler {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}
