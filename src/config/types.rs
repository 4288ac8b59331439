use super::Duration;
use serde::{Deserialize, Serialize};

/// Configuration for an admission client / housekeeper pair.
///
/// This is the typed value the embedding application hands to
/// [`crate::client::AdmissionClient::new`]; the crate never reads a file
/// from disk itself (file discovery, live reload, and validation against a
/// surrounding deployment topology are the caller's concern).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BouncerConfig {
    /// Maximum number of concurrently admitted sessions.
    /// Negative means unbounded, zero means closed (admit none).
    #[serde(default = "default_store_capacity")]
    pub store_capacity: i64,

    /// When false, callers are expected to bypass queueing entirely; the
    /// core still stores and exposes the knob.
    #[serde(default = "default_queue_enabled")]
    pub queue_enabled: bool,

    /// TTL granted to an ID confirmed in queue or store on a live request.
    #[serde(default = "default_validated_expiry")]
    pub validated_expiry: Duration,

    /// TTL granted to a newly added ID that has not yet been re-validated.
    #[serde(default = "default_quarantine_expiry")]
    pub quarantine_expiry: Duration,

    /// Key prefix under which all backend keys for this deployment live.
    #[serde(default = "default_redis_prefix")]
    pub redis_prefix: String,

    /// Minimum interval between publications of the same event string.
    /// Zero disables coalescing.
    #[serde(default)]
    pub publish_throttle: Duration,

    /// Period between housekeeping cycles.
    #[serde(default = "default_housekeeper_interval")]
    pub housekeeper_interval: Duration,

    /// Backend connection parameters.
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Default for BouncerConfig {
    fn default() -> Self {
        Self {
            store_capacity: default_store_capacity(),
            queue_enabled: default_queue_enabled(),
            validated_expiry: default_validated_expiry(),
            quarantine_expiry: default_quarantine_expiry(),
            redis_prefix: default_redis_prefix(),
            publish_throttle: Duration::ZERO,
            housekeeper_interval: default_housekeeper_interval(),
            backend: BackendConfig::default(),
        }
    }
}

fn default_store_capacity() -> i64 {
    -1
}

fn default_queue_enabled() -> bool {
    true
}

fn default_validated_expiry() -> Duration {
    Duration::from_secs(600)
}

fn default_quarantine_expiry() -> Duration {
    Duration::from_secs(45)
}

fn default_redis_prefix() -> String {
    "omnis_bouncer".to_string()
}

fn default_housekeeper_interval() -> Duration {
    Duration::from_secs(1)
}

/// Which backend implements the atomic state scripts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendConfig {
    /// In-process, single-node. No script round trip; useful for tests and
    /// single-node deployments that don't need cross-process sharing.
    Local,
    Redis(RedisConfig),
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig::Local
    }
}

/// Redis/Valkey connection parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// "redis://host:port" or "rediss://host:port" for TLS.
    pub endpoints: Vec<String>,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    #[serde(default)]
    pub db: i64,

    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Time bound on establishing the connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout: Duration,

    /// Time bound on an individual script/command round trip.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: Duration,
}

fn default_pool_size() -> u32 {
    10
}

fn default_acquire_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}
