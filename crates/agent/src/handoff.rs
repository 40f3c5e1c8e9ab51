//! Hand-off channels between collectors and the publisher.
//!
//! Both paths are bounded to one slot. The profile path adds an
//! acknowledgment: the collector lends its capture buffer through a
//! [`PayloadLease`] and waits until the publisher releases it before the buffer
//! is cleared for the next kind. A lease can only be released after the payload
//! has been copied out or fully consumed, so a torn payload cannot reach a sink.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::envelope::{MetricsSample, ProfileMeta};

/// Buffer a collector reuses across captures.
pub type CaptureBuffer = Arc<Mutex<Vec<u8>>>;

/// Why a hand-off did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandoffError {
    /// Shutdown was requested while waiting.
    Cancelled,
    /// The publisher is gone.
    Closed,
}

/// Loan of a collector's capture buffer, carrying its acknowledgment.
///
/// Dropping an unreleased lease releases it, so a publisher that exits never
/// leaves the collector waiting.
#[derive(Debug)]
pub struct PayloadLease {
    buffer: CaptureBuffer,
    ack: Option<mpsc::Sender<()>>,
}

impl PayloadLease {
    fn new(buffer: CaptureBuffer, ack: mpsc::Sender<()>) -> Self {
        Self {
            buffer,
            ack: Some(ack),
        }
    }

    /// Copy the payload, then release the buffer back to the collector.
    #[must_use]
    pub fn copy_and_release(mut self) -> Vec<u8> {
        let copy = self
            .buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        self.release();
        copy
    }

    /// Run `f` over the payload in place, then release the buffer.
    pub fn read_and_release<R>(mut self, f: impl FnOnce(&[u8]) -> R) -> R {
        let result = {
            let payload = self.buffer.lock().unwrap_or_else(PoisonError::into_inner);
            f(&payload)
        };
        self.release();
        result
    }

    fn release(&mut self) {
        if let Some(ack) = self.ack.take() {
            // Capacity one and one lease in flight: the slot is free.
            let _ = ack.try_send(());
        }
    }
}

impl Drop for PayloadLease {
    fn drop(&mut self) {
        self.release();
    }
}

/// A profile capture in transit: metadata plus the leased payload.
#[derive(Debug)]
pub struct ProfileHandoff {
    pub meta: ProfileMeta,
    pub lease: PayloadLease,
}

/// Producer half of the profile path.
#[derive(Debug)]
pub struct ProfileProducer {
    tx: mpsc::Sender<ProfileHandoff>,
    ack_tx: mpsc::Sender<()>,
    ack_rx: mpsc::Receiver<()>,
}

/// Consumer half of the profile path.
pub type ProfileConsumer = mpsc::Receiver<ProfileHandoff>;

/// Producer half of the metrics path.
pub type MetricsProducer = mpsc::Sender<MetricsSample>;

/// Consumer half of the metrics path.
pub type MetricsConsumer = mpsc::Receiver<MetricsSample>;

/// Create the profile path: one slot, one outstanding acknowledgment.
#[must_use]
pub fn profile_channel() -> (ProfileProducer, ProfileConsumer) {
    let (tx, rx) = mpsc::channel(1);
    let (ack_tx, ack_rx) = mpsc::channel(1);
    (ProfileProducer { tx, ack_tx, ack_rx }, rx)
}

/// Create the metrics path: one slot, no acknowledgment.
#[must_use]
pub fn metrics_channel() -> (MetricsProducer, MetricsConsumer) {
    mpsc::channel(1)
}

impl ProfileProducer {
    /// Lend `buffer` to the publisher and wait until it is released.
    ///
    /// # Errors
    ///
    /// [`HandoffError::Cancelled`] if `cancel` fires first,
    /// [`HandoffError::Closed`] if the publisher has gone away.
    pub async fn hand_off(
        &mut self,
        meta: ProfileMeta,
        buffer: &CaptureBuffer,
        cancel: &CancellationToken,
    ) -> Result<(), HandoffError> {
        // Drop acks left behind by a lease released after an aborted hand-off.
        while self.ack_rx.try_recv().is_ok() {}

        let handoff = ProfileHandoff {
            meta,
            lease: PayloadLease::new(Arc::clone(buffer), self.ack_tx.clone()),
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(HandoffError::Cancelled),
            sent = self.tx.send(handoff) => sent.map_err(|_| HandoffError::Closed)?,
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(HandoffError::Cancelled),
            ack = self.ack_rx.recv() => ack.ok_or(HandoffError::Closed),
        }
    }
}
