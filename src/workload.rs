//! Synthetic load for the agent to observe.

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CHUNK_BYTES: usize = 65_536;

/// Ticks between two releases of the retained memory.
const RELEASE_EVERY: u32 = 5;

/// Allocation batches per tick, in chunks.
const BATCHES: [usize; 3] = [32, 64, 128];

const FIB_INPUT: u32 = 27;

/// Append `chunks` freshly allocated chunks to `retained`.
pub fn allocate(retained: &mut Vec<Vec<u8>>, chunks: usize) {
    retained.extend((0..chunks).map(|i| {
        let fill = i.checked_rem(251).and_then(|v| u8::try_from(v).ok());
        vec![fill.unwrap_or(0); CHUNK_BYTES]
    }));
}

/// Deliberately naive recursive fibonacci. Saturates instead of overflowing.
#[must_use]
pub fn fibonacci(n: u32) -> u64 {
    if n <= 1 {
        return u64::from(n);
    }
    fibonacci(n.saturating_sub(2)).saturating_add(fibonacci(n.saturating_sub(1)))
}

async fn memory_churn(cancel: CancellationToken) {
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut retained = Vec::new();
    let mut ticks = 0_u32;

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for chunks in BATCHES {
            allocate(&mut retained, chunks);
        }
        ticks = ticks.wrapping_add(1);
        debug!(chunks = retained.len(), "allocated");

        if ticks.checked_rem(RELEASE_EVERY) == Some(0) {
            retained = Vec::new();
            debug!("released retained memory");
        }
    }
}

async fn cpu_burn(cancel: CancellationToken) {
    let mut ticker = interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match tokio::task::spawn_blocking(|| fibonacci(FIB_INPUT)).await {
            Ok(value) => debug!(value, "fibonacci done"),
            Err(e) => debug!(error = %e, "fibonacci task failed"),
        }
    }
}

/// Start the memory and CPU load until `cancel` fires.
#[must_use]
pub fn spawn(cancel: &CancellationToken) -> Vec<JoinHandle<()>> {
    info!("starting synthetic workload");
    vec![
        tokio::spawn(memory_churn(cancel.clone())),
        tokio::spawn(cpu_burn(cancel.clone())),
    ]
}
