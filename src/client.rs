use crate::backend::{connect_backend, Backend, Status};
use crate::config::BouncerConfig;
use crate::error::{BouncerError, Result};
use crate::events::{Event, Publisher, Subscriber};
use crate::metrics::{AdmissionTimer, Metrics};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Result of [`AdmissionClient::position_or_add`]: `position == 0` means
/// the ID was admitted to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub added: bool,
    pub position: u64,
}

/// Stateless, process-wide façade over a [`Backend`]. Holds no admission
/// state of its own beyond the backend handle and publish-throttle
/// bookkeeping; every truth lives in the backend.
pub struct AdmissionClient {
    backend: Arc<dyn Backend>,
    publisher: Publisher<dyn Backend>,
    config: BouncerConfig,
}

impl AdmissionClient {
    pub async fn new(config: BouncerConfig) -> Result<Self> {
        let backend = connect_backend(&config.backend, &config.redis_prefix).await?;
        Ok(Self::with_backend(backend, config))
    }

    /// Builds a client over an already-connected backend, e.g. one shared
    /// with a [`crate::housekeeper::Housekeeper`] or substituted with
    /// [`crate::backend::LocalBackend`] in tests.
    pub fn with_backend(backend: Arc<dyn Backend>, config: BouncerConfig) -> Self {
        let publisher = Publisher::new(backend.clone(), config.publish_throttle.as_std());
        Self {
            backend,
            publisher,
            config,
        }
    }

    pub fn config(&self) -> &BouncerConfig {
        &self.config
    }

    /// The hot path. Touches `id`, adding it to store or queue if absent,
    /// publishing an event on successful admission/enqueue.
    pub async fn position_or_add(&self, id: &str, now: i64) -> Result<Admission> {
        if id.is_empty() {
            return Err(BouncerError::InvalidArgument("id must not be empty".into()));
        }

        let validated = self.config.validated_expiry.as_secs() as i64;
        let quarantine = self.config.quarantine_expiry.as_secs() as i64;

        let timer = AdmissionTimer::start();
        let placement = self
            .call_with_recovery(|| self.backend.id_position(id, now, validated, quarantine))
            .await?;
        timer.finish();

        if placement.added {
            Metrics::record_admission(placement.position == 0);
            if placement.position == 0 {
                self.publisher.publish("store:add").await?;
            } else {
                self.publisher.publish("queue:add").await?;
            }
        }

        Ok(Admission {
            added: placement.added,
            position: placement.position,
        })
    }

    /// Removes `id` from whichever of store/queue it occupies.
    pub async fn remove(&self, id: &str, now: i64) -> Result<()> {
        self.call_with_recovery(|| self.backend.id_remove(id, now))
            .await?;
        Metrics::record_removal();
        self.publisher.publish("queue:remove").await?;
        Ok(())
    }

    /// Unconditionally moves `id` into the store.
    pub async fn promote(&self, id: &str, now: i64) -> Result<()> {
        let validated = self.config.validated_expiry.as_secs() as i64;
        self.call_with_recovery(|| self.backend.id_promote(id, now, validated))
            .await?;
        self.publisher.publish("store:promote").await?;
        Ok(())
    }

    /// Unconditionally moves up to `n` IDs from queue to store.
    pub async fn promote_n(&self, n: u64) -> Result<u64> {
        let now = current_time();
        let moved = self
            .call_with_recovery(|| self.backend.store_promote_n(n, now))
            .await?;
        Metrics::record_promotions(moved);
        if moved > 0 {
            self.publisher
                .publish(&format!("store:promote:{moved}"))
                .await?;
        }
        Ok(moved)
    }

    pub async fn status(&self) -> Result<Status> {
        let (queue_enabled, store_capacity, queue_size, store_size) = tokio::try_join!(
            self.backend.queue_enabled(),
            self.backend.store_capacity(),
            self.backend.queue_size(),
            self.backend.store_size(),
        )?;
        Metrics::set_queue_size(queue_size);
        Metrics::set_store_size(store_size);
        Metrics::set_store_capacity(store_capacity);
        Ok(Status {
            queue_enabled,
            store_capacity,
            queue_size,
            store_size,
        })
    }

    pub async fn queue_enabled(&self) -> Result<bool> {
        self.backend.queue_enabled().await
    }

    pub async fn set_queue_enabled(&self, enabled: bool) -> Result<()> {
        self.backend.set_queue_enabled(enabled).await?;
        self.publisher.publish("settings:queue_enabled").await
    }

    pub async fn store_capacity(&self) -> Result<i64> {
        self.backend.store_capacity().await
    }

    pub async fn set_store_capacity(&self, capacity: i64) -> Result<()> {
        self.backend.set_store_capacity(capacity).await?;
        self.publisher.publish("settings:capacity").await
    }

    pub async fn queue_waiting_page(&self) -> Result<Option<String>> {
        self.backend.queue_waiting_page().await
    }

    pub async fn set_queue_waiting_page(&self, page: &str) -> Result<()> {
        self.backend.set_queue_waiting_page(page).await?;
        self.publisher.publish("settings:waiting_page").await
    }

    pub async fn queue_sync_timestamp(&self) -> Result<i64> {
        self.backend.queue_sync_timestamp().await
    }

    /// Subscribes to tagged `settings`/`queue`/`store` events. Delivery is
    /// best-effort; a lagging subscriber silently skips missed events
    /// rather than erroring.
    pub async fn subscribe(&self) -> Result<Subscriber> {
        Ok(Subscriber::new(self.backend.subscribe().await?))
    }

    /// Runs `call`, recovering from `ScriptMissing` (reload, retry once)
    /// and `Uninitialized` (reseed config from `self.config`, retry once)
    /// per the error-handling design. A second failure after recovery
    /// surfaces as-is.
    async fn call_with_recovery<T, F, Fut>(&self, call: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        match call().await {
            Err(BouncerError::ScriptMissing) => {
                Metrics::record_script_missing();
                call().await
            }
            Err(BouncerError::Uninitialized) => {
                Metrics::record_uninitialized();
                self.reseed().await?;
                call().await
            }
            other => other,
        }
    }

    async fn reseed(&self) -> Result<()> {
        warn!("backend reports uninitialized sync keys, reseeding from configuration");
        let now = current_time();
        self.backend
            .seed_sync_keys(now, self.config.store_capacity, self.config.queue_enabled)
            .await
    }

    /// Checks whether the backend was flushed (missing sync keys) and, if
    /// so, reseeds it from configuration. Called by the Housekeeper
    /// before each cycle rather than relying on a mutation to trip
    /// `Uninitialized`, since a cycle with nothing to expire would
    /// otherwise never notice.
    pub async fn ensure_initialized(&self) -> Result<()> {
        if !self.backend.check_sync_keys().await? {
            self.reseed().await?;
        }
        Ok(())
    }

    pub(crate) fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }
}

fn current_time() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the epoch")
        .as_secs() as i64
}

/// Parses a backend's `Event` stream result into a caller callback. Kept
/// separate from `Subscriber::recv` so callers that want `subscribe with
/// callback` (per the external-interfaces sketch) can build it from the
/// plain receiver without the client forcing a particular task-spawning
/// style on them.
pub async fn run_subscription<F>(mut subscriber: Subscriber, mut callback: F)
where
    F: FnMut(Event),
{
    while let Some(event) = subscriber.recv().await {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocalBackend;

    fn test_client() -> AdmissionClient {
        let backend: Arc<dyn Backend> = Arc::new(LocalBackend::new());
        AdmissionClient::with_backend(backend, BouncerConfig::default())
    }

    #[tokio::test]
    async fn position_or_add_admits_when_unbounded() {
        let client = test_client();
        let admission = client.position_or_add("a", 1000).await.unwrap();
        assert!(admission.added);
        assert_eq!(admission.position, 0);
    }

    #[tokio::test]
    async fn position_or_add_is_idempotent_for_the_same_id() {
        let client = test_client();
        client.set_store_capacity(0).await.unwrap();

        let first = client.position_or_add("a", 1000).await.unwrap();
        let second = client.position_or_add("a", 1000).await.unwrap();

        assert!(first.added);
        assert!(!second.added);
        assert_eq!(first.position, second.position);
    }

    #[tokio::test]
    async fn remove_then_position_readds() {
        let client = test_client();
        client.position_or_add("a", 1000).await.unwrap();
        client.remove("a", 1000).await.unwrap();

        let admission = client.position_or_add("a", 1000).await.unwrap();
        assert!(admission.added);
    }

    #[tokio::test]
    async fn status_reports_current_sizes() {
        let client = test_client();
        client.set_store_capacity(1).await.unwrap();
        client.position_or_add("a", 1000).await.unwrap();
        client.position_or_add("b", 1000).await.unwrap();

        let status = client.status().await.unwrap();
        assert_eq!(status.store_size, 1);
        assert_eq!(status.queue_size, 1);
        assert_eq!(status.store_capacity, 1);
    }

    #[tokio::test]
    async fn rejects_empty_id() {
        let client = test_client();
        let result = client.position_or_add("", 1000).await;
        assert!(matches!(result, Err(BouncerError::InvalidArgument(_))));
    }
}
