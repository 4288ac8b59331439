mod local;
mod redis;

pub use local::LocalBackend;
pub use redis::RedisBackend;

use crate::config::BackendConfig;
use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of `id_add`/`id_position`: whether the ID was newly placed, and
/// its 1-based queue position (0 means store membership).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub added: bool,
    pub position: u64,
}

/// Snapshot returned by `status()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub queue_enabled: bool,
    pub store_capacity: i64,
    pub queue_size: u64,
    pub store_size: u64,
}

/// The ten atomic state scripts from the data model, plus the config and
/// pub/sub plumbing the Admission Client needs on top of them.
///
/// Every method corresponds to one indivisible mutation (or read) of the
/// queue/store keys under `prefix`. Implementations MUST NOT expose any
/// operation that reads-then-writes across two round trips; the `Redis`
/// implementation enforces this with server-side Lua, the `Local`
/// implementation with a single lock held for the duration of the call.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Adds `id` if absent; idempotent placement into store-or-queue.
    /// Returns 0 if admitted to store, else the 1-based queue position.
    async fn id_add(
        &self,
        id: &str,
        now: i64,
        validated_expiry: i64,
        quarantine_expiry: i64,
    ) -> Result<u64>;

    /// The hot path: touch-or-add. Returns whether the ID was newly added
    /// and its position (0 = store).
    async fn id_position(
        &self,
        id: &str,
        now: i64,
        validated_expiry: i64,
        quarantine_expiry: i64,
    ) -> Result<Placement>;

    /// Removes `id` from queue (lazily, via antedated expiry) or store
    /// (eagerly).
    async fn id_remove(&self, id: &str, now: i64) -> Result<()>;

    /// Unconditionally moves `id` into the store regardless of capacity.
    async fn id_promote(&self, id: &str, now: i64, validated_expiry: i64) -> Result<()>;

    /// Fills free store capacity from the front of the queue. Returns the
    /// count moved.
    async fn store_promote(&self, now: i64) -> Result<u64>;

    /// Unconditionally moves up to `n` IDs from queue to store regardless
    /// of capacity.
    async fn store_promote_n(&self, n: u64, now: i64) -> Result<u64>;

    /// Scans the queue front-to-back, evicting entries whose expiry has
    /// passed and recompacting the position cache for survivors. O(queue);
    /// must only be called from the Housekeeper.
    async fn queue_timeout(&self, now: i64) -> Result<u64>;

    /// Evicts store entries whose expiry has passed. Returns count.
    async fn store_timeout(&self, now: i64) -> Result<u64>;

    /// True iff either queue or store is non-empty. A missing key is
    /// treated as non-empty (a re-init signal distinct from confirmed
    /// empty).
    async fn has_ids(&self) -> Result<bool>;

    /// True iff `queue_enabled`, `store_capacity`, and
    /// `queue_sync_timestamp` all exist.
    async fn check_sync_keys(&self) -> Result<bool>;

    /// Re-seeds `queue_enabled`, `store_capacity`, and
    /// `queue_sync_timestamp` from configuration. Called after
    /// `check_sync_keys` reports a flush.
    async fn seed_sync_keys(&self, now: i64, store_capacity: i64, queue_enabled: bool)
        -> Result<()>;

    async fn queue_size(&self) -> Result<u64>;
    async fn store_size(&self) -> Result<u64>;
    async fn store_capacity(&self) -> Result<i64>;
    async fn set_store_capacity(&self, capacity: i64) -> Result<()>;
    async fn queue_enabled(&self) -> Result<bool>;
    async fn set_queue_enabled(&self, enabled: bool) -> Result<()>;
    async fn queue_waiting_page(&self) -> Result<Option<String>>;
    async fn set_queue_waiting_page(&self, page: &str) -> Result<()>;
    async fn queue_sync_timestamp(&self) -> Result<i64>;
    async fn set_queue_sync_timestamp(&self, now: i64) -> Result<()>;

    /// Publishes a short event string on the `:events` channel.
    async fn publish(&self, event: &str) -> Result<()>;

    /// Subscribes to the `:events` channel. Delivery is best-effort;
    /// returned strings are the raw published event payloads.
    async fn subscribe(&self) -> Result<tokio::sync::broadcast::Receiver<String>>;

    /// True when this backend lost and rebuilt its script cache since the
    /// last call (Redis only: surfaces a `ScriptMissing` recovery so the
    /// Housekeeper can log it). The local backend always returns false.
    fn reloaded_scripts(&self) -> bool {
        false
    }
}

/// Builds and connects the configured backend implementation. Connection
/// failures and script loads happen here, not lazily on first request.
pub async fn connect_backend(config: &BackendConfig, prefix: &str) -> Result<Arc<dyn Backend>> {
    match config {
        BackendConfig::Local => Ok(Arc::new(LocalBackend::new())),
        BackendConfig::Redis(cfg) => {
            let backend = RedisBackend::connect(cfg.clone(), prefix).await?;
            Ok(Arc::new(backend))
        }
    }
}

pub(crate) mod keys {
    pub fn store_ids(prefix: &str) -> String {
        format!("{prefix}:store_ids")
    }
    pub fn store_expiry_secs(prefix: &str) -> String {
        format!("{prefix}:store_expiry_secs")
    }
    pub fn queue_ids(prefix: &str) -> String {
        format!("{prefix}:queue_ids")
    }
    pub fn queue_expiry_secs(prefix: &str) -> String {
        format!("{prefix}:queue_expiry_secs")
    }
    pub fn queue_position_cache(prefix: &str) -> String {
        format!("{prefix}:queue_position_cache")
    }
    pub fn store_capacity(prefix: &str) -> String {
        format!("{prefix}:store_capacity")
    }
    pub fn queue_enabled(prefix: &str) -> String {
        format!("{prefix}:queue_enabled")
    }
    pub fn queue_sync_timestamp(prefix: &str) -> String {
        format!("{prefix}:queue_sync_timestamp")
    }
    pub fn queue_waiting_page(prefix: &str) -> String {
        format!("{prefix}:queue_waiting_page")
    }
    pub fn events(prefix: &str) -> String {
        format!("{prefix}:events")
    }
}
