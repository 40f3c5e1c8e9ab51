//! Scripted provider shared by the integration tests.

#![allow(dead_code)]

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use sf_profiler_agent::{ProfileKind, ProviderError, RuntimeProvider, RuntimeStats};

/// Provider returning a distinct payload for every capture and remembering
/// what it returned.
#[derive(Default)]
pub struct ScriptedProvider {
    captures: Mutex<Vec<(ProfileKind, Vec<u8>)>>,
    stats_reads: AtomicUsize,
    cpu_running: AtomicBool,
    cpu_aborted: AtomicUsize,
}

impl ScriptedProvider {
    pub fn captures(&self) -> Vec<(ProfileKind, Vec<u8>)> {
        self.captures
            .lock()
            .map(|c| c.clone())
            .unwrap_or_default()
    }

    pub fn capture_count(&self) -> usize {
        self.captures.lock().map(|c| c.len()).unwrap_or_default()
    }

    pub fn stats_reads(&self) -> usize {
        self.stats_reads.load(Ordering::SeqCst)
    }

    pub fn cpu_running(&self) -> bool {
        self.cpu_running.load(Ordering::SeqCst)
    }

    fn record(&self, kind: ProfileKind, buf: &mut Vec<u8>) {
        if let Ok(mut captures) = self.captures.lock() {
            let payload = format!("{kind}#{}", captures.len()).into_bytes();
            buf.extend_from_slice(&payload);
            captures.push((kind, payload));
        }
    }
}

impl RuntimeProvider for ScriptedProvider {
    fn capture_point(&self, kind: ProfileKind, buf: &mut Vec<u8>) -> Result<(), ProviderError> {
        if matches!(kind, ProfileKind::Block | ProfileKind::Mutex) {
            return Err(ProviderError::unavailable(kind));
        }
        self.record(kind, buf);
        Ok(())
    }

    fn begin_capture(&self, kind: ProfileKind) -> Result<(), ProviderError> {
        if self.cpu_running.swap(true, Ordering::SeqCst) {
            return Err(ProviderError::CaptureBusy { kind });
        }
        Ok(())
    }

    fn end_capture(&self, kind: ProfileKind, buf: &mut Vec<u8>) -> Result<(), ProviderError> {
        self.cpu_running.store(false, Ordering::SeqCst);
        self.record(kind, buf);
        Ok(())
    }

    fn read_stats(&self) -> RuntimeStats {
        let reads = self
            .stats_reads
            .fetch_add(1, Ordering::SeqCst)
            .saturating_add(1);
        let reads = u64::try_from(reads).unwrap_or(u64::MAX);
        let mut stats = RuntimeStats::zeroed();
        stats.num_cpu = 4;
        stats.mallocs = reads.saturating_mul(100);
        stats.frees = reads.saturating_mul(40);
        stats.alloc_bytes = 2_097_152;
        stats
    }
}
