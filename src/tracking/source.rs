//! Periodic pose sampler.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::{ConnectionState, TrackingProvider, TrackingSample};

use super::slot::TrackingSlot;

/// Provider handle shared across manager runs.
#[derive(Clone)]
pub struct SharedProvider(Arc<Mutex<dyn TrackingProvider>>);

impl SharedProvider {
    /// Wrap a provider.
    pub fn new<P: TrackingProvider>(provider: P) -> Self {
        Self(Arc::new(Mutex::new(provider)))
    }
}

impl TrackingProvider for SharedProvider {
    fn sample(&mut self) -> Option<TrackingSample> {
        self.0.lock().sample()
    }
}

impl std::fmt::Debug for SharedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedProvider").finish_non_exhaustive()
    }
}

/// Background task polling a [`TrackingProvider`] on a fixed schedule.
///
/// Samples are only taken while the session is connected; between sessions
/// the task idles on its timer.
#[derive(Debug)]
pub struct TrackingSource {
    handle: JoinHandle<()>,
}

impl TrackingSource {
    /// Spawn the sampler on the current runtime.
    pub fn spawn<P: TrackingProvider>(
        mut provider: P,
        interval: Duration,
        slot: Arc<TrackingSlot>,
        state: watch::Receiver<ConnectionState>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval.max(Duration::from_micros(100)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut samples: u64 = 0;

            loop {
                tokio::select! {
                    biased;
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        if *state.borrow() != ConnectionState::Connected {
                            continue;
                        }
                        if let Some(sample) = provider.sample() {
                            slot.publish(sample);
                            samples += 1;
                        }
                    }
                }
            }
            tracing::debug!(samples, "tracking source stopped");
        });
        Self { handle }
    }

    /// Wait for the task to finish after shutdown was signalled.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "tracking task failed");
        }
    }

    /// Check if the task has finished.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}
