//! Runtime introspection capability.
//!
//! The agent never samples the process itself. It asks a [`RuntimeProvider`]
//! for profile bytes and raw counters, and the provider may reuse whatever
//! internal buffers it likes between calls.

mod host;

pub use self::host::SysinfoProvider;

use crate::error::ProviderError;
use crate::kind::ProfileKind;

/// Number of entries in the GC pause ring.
pub const PAUSE_HISTORY: usize = 256;

/// Raw cumulative counters read from the runtime.
///
/// GC number `n` stores its pause at `pause_ns[(n + 255) % 256]`.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeStats {
    pub num_tasks: u64,
    pub num_cpu: u32,
    pub alloc_bytes: u64,
    pub total_alloc_bytes: u64,
    pub sys_bytes: u64,
    pub mallocs: u64,
    pub frees: u64,
    pub num_gc: u32,
    pub num_forced_gc: u32,
    /// End of the last GC in ns since epoch.
    pub last_gc_ns: u64,
    pub pause_total_ns: u64,
    pub pause_ns: [u64; PAUSE_HISTORY],
    pub gc_cpu_fraction: f64,
}

impl RuntimeStats {
    /// All counters at zero; the "previous" reading before the first tick.
    #[must_use]
    pub const fn zeroed() -> Self {
        Self {
            num_tasks: 0,
            num_cpu: 0,
            alloc_bytes: 0,
            total_alloc_bytes: 0,
            sys_bytes: 0,
            mallocs: 0,
            frees: 0,
            num_gc: 0,
            num_forced_gc: 0,
            last_gc_ns: 0,
            pause_total_ns: 0,
            pause_ns: [0; PAUSE_HISTORY],
            gc_cpu_fraction: 0.0,
        }
    }
}

impl Default for RuntimeStats {
    fn default() -> Self {
        Self::zeroed()
    }
}

/// Source of profile captures and runtime counters.
///
/// Which of the two capture paths applies to a kind is decided by
/// [`ProfileKind::strategy`]: point kinds go through [`capture_point`], the
/// cpu kind is bracketed by [`begin_capture`] and [`end_capture`] with the
/// capture window elapsing in between.
///
/// [`capture_point`]: RuntimeProvider::capture_point
/// [`begin_capture`]: RuntimeProvider::begin_capture
/// [`end_capture`]: RuntimeProvider::end_capture
pub trait RuntimeProvider: Send + Sync {
    /// Write a point-in-time snapshot of `kind` into `buf`.
    ///
    /// # Errors
    ///
    /// [`ProviderError::KindUnavailable`] when the kind cannot be sampled.
    fn capture_point(&self, kind: ProfileKind, buf: &mut Vec<u8>) -> Result<(), ProviderError>;

    /// Start an exclusive capture of `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is unavailable or a capture already runs.
    fn begin_capture(&self, kind: ProfileKind) -> Result<(), ProviderError>;

    /// Stop the capture started by [`begin_capture`](Self::begin_capture) and
    /// write its result into `buf`.
    ///
    /// # Errors
    ///
    /// Returns an error if no capture is running or it failed.
    fn end_capture(&self, kind: ProfileKind, buf: &mut Vec<u8>) -> Result<(), ProviderError>;

    /// Read the cumulative runtime counters.
    fn read_stats(&self) -> RuntimeStats;
}
