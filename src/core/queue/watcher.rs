//! Background queue refresh
//!
//! Dashboards poll on one interval configured centrally. The watcher recomputes
//! the board on that interval and publishes it on a `watch` channel; a failed
//! refresh keeps the previous snapshot.

use super::{QueueProjection, QueueSnapshot};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Periodically republishes [`QueueSnapshot`]s
pub struct QueueWatcher {
    projection: QueueProjection,
    interval: Duration,
}

impl QueueWatcher {
    pub fn new(projection: QueueProjection, interval: Duration) -> Self {
        Self {
            projection,
            interval,
        }
    }

    /// Watcher polling every `poll_interval_seconds`
    pub fn from_config(projection: QueueProjection, config: &crate::config::QueueConfig) -> Self {
        Self::new(projection, Duration::from_secs(config.poll_interval_seconds))
    }

    /// Starts polling until `shutdown` flips to `true`
    ///
    /// The first refresh happens immediately. The receiver holds `None` until
    /// one refresh has succeeded.
    pub fn spawn(
        self,
        mut shutdown: watch::Receiver<bool>,
    ) -> (watch::Receiver<Option<Arc<QueueSnapshot>>>, JoinHandle<()>) {
        let (tx, rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.projection.snapshot().await {
                            Ok(snapshot) => {
                                tracing::debug!(
                                    waiting = snapshot.total_waiting(),
                                    lab_results_ready = snapshot.lab_results_ready.len(),
                                    "Queue snapshot refreshed"
                                );
                                if tx.send(Some(Arc::new(snapshot))).is_err() {
                                    tracing::debug!("No queue subscribers left, stopping watcher");
                                    break;
                                }
                            }
                            Err(e) => {
                                tracing::warn!(error = %e, "Queue refresh failed, keeping last snapshot");
                            }
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            tracing::debug!("Queue watcher shutting down");
                            break;
                        }
                    }
                }
            }
        });

        (rx, handle)
    }
}
