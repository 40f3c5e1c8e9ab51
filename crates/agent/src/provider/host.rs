//! `sysinfo` based provider for the current process.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use serde::Serialize;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use super::{RuntimeProvider, RuntimeStats};
use crate::error::ProviderError;
use crate::kind::ProfileKind;

/// Provider backed by process figures from the operating system.
///
/// `heap` yields a memory snapshot, `goroutine` and `threadcreate` a thread
/// listing, and `cpu` the CPU usage over the capture window, each as JSON.
/// `block`, `mutex` and `allocs` are not available. There is no GC, so the GC
/// and allocator counters in [`RuntimeStats`] stay zero.
pub struct SysinfoProvider {
    pid: Pid,
    system: Mutex<System>,
    cpu_window: Mutex<Option<Instant>>,
}

#[derive(Serialize)]
struct MemorySnapshot {
    rss_bytes: u64,
    virtual_bytes: u64,
}

#[derive(Serialize)]
struct ThreadSnapshot {
    thread_count: usize,
    threads: Vec<u32>,
}

#[derive(Serialize)]
struct CpuReport {
    window_ms: u128,
    cpu_usage_percent: f32,
    num_cpu: u32,
}

impl SysinfoProvider {
    /// Create a provider for the current process.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pid: Pid::from_u32(std::process::id()),
            system: Mutex::new(System::new()),
            cpu_window: Mutex::new(None),
        }
    }

    fn refreshed(&self) -> MutexGuard<'_, System> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[self.pid]),
            true,
            ProcessRefreshKind::nothing()
                .with_memory()
                .with_cpu()
                .with_tasks(),
        );
        system
    }

    fn write_json<T: Serialize>(
        kind: ProfileKind,
        value: &T,
        buf: &mut Vec<u8>,
    ) -> Result<(), ProviderError> {
        serde_json::to_writer(buf, value)
            .map_err(|e| ProviderError::capture_failed(kind, e.to_string()))
    }
}

impl Default for SysinfoProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn num_cpu() -> u32 {
    std::thread::available_parallelism()
        .map(|n| u32::try_from(n.get()).unwrap_or(u32::MAX))
        .unwrap_or(1)
}

impl RuntimeProvider for SysinfoProvider {
    fn capture_point(&self, kind: ProfileKind, buf: &mut Vec<u8>) -> Result<(), ProviderError> {
        let system = self.refreshed();
        let process = system
            .process(self.pid)
            .ok_or_else(|| ProviderError::capture_failed(kind, "process not visible"))?;

        match kind {
            ProfileKind::Heap => Self::write_json(
                kind,
                &MemorySnapshot {
                    rss_bytes: process.memory(),
                    virtual_bytes: process.virtual_memory(),
                },
                buf,
            ),
            ProfileKind::Goroutine | ProfileKind::ThreadCreate => {
                let tasks = process.tasks().ok_or(ProviderError::unavailable(kind))?;
                let mut threads: Vec<u32> = tasks.iter().map(|pid| pid.as_u32()).collect();
                threads.sort_unstable();
                Self::write_json(
                    kind,
                    &ThreadSnapshot {
                        thread_count: threads.len(),
                        threads,
                    },
                    buf,
                )
            }
            ProfileKind::Cpu | ProfileKind::Block | ProfileKind::Mutex | ProfileKind::Allocs => {
                Err(ProviderError::unavailable(kind))
            }
        }
    }

    fn begin_capture(&self, kind: ProfileKind) -> Result<(), ProviderError> {
        if kind != ProfileKind::Cpu {
            return Err(ProviderError::unavailable(kind));
        }
        let mut window = self
            .cpu_window
            .lock()
            .map_err(|e| ProviderError::capture_failed(kind, e.to_string()))?;
        if window.is_some() {
            return Err(ProviderError::CaptureBusy { kind });
        }
        // Baseline refresh; cpu usage is measured between two refreshes.
        drop(self.refreshed());
        *window = Some(Instant::now());
        Ok(())
    }

    fn end_capture(&self, kind: ProfileKind, buf: &mut Vec<u8>) -> Result<(), ProviderError> {
        let started = self
            .cpu_window
            .lock()
            .map_err(|e| ProviderError::capture_failed(kind, e.to_string()))?
            .take()
            .ok_or_else(|| ProviderError::capture_failed(kind, "no capture in progress"))?;

        let system = self.refreshed();
        let usage = system.process(self.pid).map_or(0.0, sysinfo::Process::cpu_usage);
        drop(system);

        Self::write_json(
            kind,
            &CpuReport {
                window_ms: started.elapsed().as_millis(),
                cpu_usage_percent: usage,
                num_cpu: num_cpu(),
            },
            buf,
        )
    }

    fn read_stats(&self) -> RuntimeStats {
        let system = self.refreshed();
        let mut stats = RuntimeStats::zeroed();
        stats.num_cpu = num_cpu();
        if let Some(process) = system.process(self.pid) {
            stats.alloc_bytes = process.memory();
            stats.sys_bytes = process.virtual_memory();
            stats.num_tasks = process
                .tasks()
                .map_or(1, |tasks| u64::try_from(tasks.len()).unwrap_or(u64::MAX));
        }
        stats
    }
}
