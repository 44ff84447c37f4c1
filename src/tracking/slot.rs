//! Single-slot hand-off of the latest pose to the network context.

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::core::TrackingSample;

/// Latest-sample buffer with a "send now" trigger.
///
/// Writers overwrite; the network context takes whatever is newest when it
/// is woken. A sample that is overwritten before being taken is never sent.
#[derive(Debug, Default)]
pub struct TrackingSlot {
    latest: Mutex<Option<TrackingSample>>,
    send_now: Notify,
    overwritten: Mutex<u64>,
}

impl TrackingSlot {
    /// Create an empty slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `sample`, replacing any sample not yet sent.
    pub fn accept(&self, sample: TrackingSample) {
        if self.latest.lock().replace(sample).is_some() {
            *self.overwritten.lock() += 1;
        }
    }

    /// Wake the network context to transmit the latest sample.
    pub fn send_now(&self) {
        self.send_now.notify_one();
    }

    /// Store `sample` and trigger its transmission.
    pub fn publish(&self, sample: TrackingSample) {
        self.accept(sample);
        self.send_now();
    }

    /// Take the latest sample, leaving the slot empty.
    pub fn take(&self) -> Option<TrackingSample> {
        self.latest.lock().take()
    }

    /// Drop any pending sample.
    pub fn clear(&self) {
        self.latest.lock().take();
    }

    /// Check if a sample is waiting.
    pub fn is_pending(&self) -> bool {
        self.latest.lock().is_some()
    }

    /// Samples replaced before they could be sent.
    pub fn overwritten(&self) -> u64 {
        *self.overwritten.lock()
    }

    /// Wait for the next send trigger.
    pub async fn notified(&self) {
        self.send_now.notified().await;
    }
}
