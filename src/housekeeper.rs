use crate::client::AdmissionClient;
use crate::error::Result;
use crate::metrics::Metrics;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Periodic process-wide loop that expires stale entries, promotes from
/// queue to store, and stamps the sync timestamp. Safe to run on more
/// than one front-end at once (every mutation is atomic); a leader lease
/// only avoids redundant work, it's never required for correctness.
pub struct Housekeeper {
    client: Arc<AdmissionClient>,
    interval: std::time::Duration,
    shutdown_tx: broadcast::Sender<()>,
}

/// What happened in one housekeeping cycle, returned from
/// [`Housekeeper::run_once`] for callers that want to observe it directly
/// (tests, a manual trigger) instead of only through published events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub queue_expired: u64,
    pub store_expired: u64,
    pub promoted: u64,
}

impl Housekeeper {
    pub fn new(client: Arc<AdmissionClient>) -> Self {
        let interval = client.config().housekeeper_interval.as_std();
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            client,
            interval,
            shutdown_tx,
        }
    }

    /// Spawns the periodic loop. Returns a handle whose `shutdown()`
    /// stops the task; dropping the handle without calling it leaves the
    /// loop running in the background (same as `ClusterManager`'s
    /// tasks — the caller decides whether that's desired).
    pub fn spawn(self: Arc<Self>) -> HousekeeperHandle {
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = self.run_once().await {
                            warn!(error = ?e, "housekeeping cycle failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        debug!("housekeeper shutting down");
                        break;
                    }
                }
            }
        });

        HousekeeperHandle {
            shutdown_tx,
            join_handle: handle,
        }
    }

    /// Runs exactly one cycle: expire queue, expire store, promote,
    /// stamp. Exposed directly so callers (and tests) can drive
    /// housekeeping deterministically instead of waiting on the ticker.
    pub async fn run_once(&self) -> Result<CycleReport> {
        let started = Instant::now();
        self.client.ensure_initialized().await?;

        let now = current_time();
        let mut report = CycleReport::default();

        let backend = self.client.backend();

        report.queue_expired = backend.queue_timeout(now).await?;
        Metrics::record_queue_expirations(report.queue_expired);
        if report.queue_expired > 0 {
            self.publish("queue:timeout").await;
        }

        report.store_expired = backend.store_timeout(now).await?;
        Metrics::record_store_expirations(report.store_expired);
        if report.store_expired > 0 {
            self.publish("store:timeout").await;
        }

        report.promoted = backend.store_promote(now).await?;
        Metrics::record_promotions(report.promoted);
        if report.promoted > 0 {
            self.publish(&format!("store:promote:{}", report.promoted))
                .await;
        }

        backend.set_queue_sync_timestamp(now).await?;

        if backend.reloaded_scripts() {
            info!("housekeeper reloaded scripts after a backend flush");
        }

        Metrics::record_housekeeping_cycle_duration(started.elapsed());
        Ok(report)
    }

    // Publishes straight to the backend, bypassing `AdmissionClient`'s
    // throttled `Publisher`. Deliberate: cycle events already fire at most
    // once per `housekeeper_interval` (unlike the hot path's per-request
    // `store:add`/`queue:add`, which is what `publish_throttle` exists to
    // coalesce), and `store:promote:<count>` varies its suffix every cycle
    // so a string-keyed throttle would never coalesce it anyway.
    async fn publish(&self, event: &str) {
        // Housekeeping events are informational; a publish failure here
        // must not abort the cycle that already mutated state.
        if let Err(e) = self.client.backend().publish(event).await {
            warn!(error = ?e, event, "failed to publish housekeeping event");
        }
    }
}

/// Handle to a spawned [`Housekeeper`] loop.
pub struct HousekeeperHandle {
    shutdown_tx: broadcast::Sender<()>,
    join_handle: tokio::task::JoinHandle<()>,
}

impl HousekeeperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join_handle.await;
    }
}

fn current_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, LocalBackend};
    use crate::config::BouncerConfig;

    fn test_client() -> Arc<AdmissionClient> {
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new());
        Arc::new(AdmissionClient::with_backend(backend, BouncerConfig::default()))
    }

    #[tokio::test]
    async fn run_once_expires_and_promotes() {
        let client = test_client();
        client.ensure_initialized().await.unwrap();
        client.set_store_capacity(0).await.unwrap();
        client.position_or_add("a", 1000).await.unwrap();

        client.set_store_capacity(1).await.unwrap();
        let housekeeper = Housekeeper::new(client.clone());
        let report = housekeeper.run_once().await.unwrap();

        assert_eq!(report.promoted, 1);
        assert_eq!(report.queue_expired, 0);

        let status = client.status().await.unwrap();
        assert_eq!(status.store_size, 1);
        assert_eq!(status.queue_size, 0);
    }

    #[tokio::test]
    async fn run_once_sweeps_expired_queue_entries() {
        let client = test_client();
        client.ensure_initialized().await.unwrap();
        client.set_store_capacity(0).await.unwrap();
        client.position_or_add("a", 1000).await.unwrap();
        client.remove("a", 1000).await.unwrap();

        let housekeeper = Housekeeper::new(client.clone());
        let report = housekeeper.run_once().await.unwrap();

        assert_eq!(report.queue_expired, 1);
        assert_eq!(client.status().await.unwrap().queue_size, 0);
    }

    #[tokio::test]
    async fn spawn_and_shutdown_cleanly() {
        let client = test_client();
        let housekeeper = Arc::new(Housekeeper::new(client));
        let handle = housekeeper.spawn();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        handle.shutdown().await;
    }
}
