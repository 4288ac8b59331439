use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Registers descriptions for every metric this crate emits.
pub fn init_metrics() {
    describe_counter!(
        "bouncer_admissions_total",
        "Total IDs admitted directly to the store"
    );
    describe_counter!(
        "bouncer_enqueues_total",
        "Total IDs placed into the queue"
    );
    describe_counter!(
        "bouncer_removals_total",
        "Total IDs explicitly removed from queue or store"
    );
    describe_counter!(
        "bouncer_promotions_total",
        "Total IDs moved from queue to store"
    );
    describe_counter!(
        "bouncer_queue_expirations_total",
        "Total queue entries evicted for expiry"
    );
    describe_counter!(
        "bouncer_store_expirations_total",
        "Total store entries evicted for expiry"
    );
    describe_counter!(
        "bouncer_script_missing_total",
        "Total NOSCRIPT recoveries against the backend"
    );
    describe_counter!(
        "bouncer_uninitialized_total",
        "Total reseeds after the backend reported missing sync keys"
    );
    describe_histogram!(
        "bouncer_position_or_add_duration_seconds",
        "Latency of the admission hot path"
    );
    describe_histogram!(
        "bouncer_housekeeping_cycle_duration_seconds",
        "Latency of one housekeeping cycle"
    );
    describe_gauge!("bouncer_queue_size", "Current number of IDs waiting in the queue");
    describe_gauge!("bouncer_store_size", "Current number of IDs admitted to the store");
    describe_gauge!("bouncer_store_capacity", "Configured store capacity (-1 = unbounded)");
}

/// Starts a Prometheus exporter serving `/metrics` on `addr`.
pub fn start_metrics_server(addr: &str) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: std::net::SocketAddr = addr.parse()?;

    PrometheusBuilder::new().with_http_listener(addr).install()?;

    init_metrics();

    Ok(())
}

/// Installs a recorder without a listener, for embedding the exporter in a
/// caller's own HTTP surface.
pub fn get_prometheus_handle() -> Result<PrometheusHandle, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    init_metrics();
    Ok(handle)
}

pub struct Metrics;

impl Metrics {
    #[inline]
    pub fn record_admission(added_to_store: bool) {
        if added_to_store {
            counter!("bouncer_admissions_total").increment(1);
        } else {
            counter!("bouncer_enqueues_total").increment(1);
        }
    }

    #[inline]
    pub fn record_removal() {
        counter!("bouncer_removals_total").increment(1);
    }

    #[inline]
    pub fn record_promotions(count: u64) {
        if count > 0 {
            counter!("bouncer_promotions_total").increment(count);
        }
    }

    #[inline]
    pub fn record_queue_expirations(count: u64) {
        if count > 0 {
            counter!("bouncer_queue_expirations_total").increment(count);
        }
    }

    #[inline]
    pub fn record_store_expirations(count: u64) {
        if count > 0 {
            counter!("bouncer_store_expirations_total").increment(count);
        }
    }

    #[inline]
    pub fn record_script_missing() {
        counter!("bouncer_script_missing_total").increment(1);
    }

    #[inline]
    pub fn record_uninitialized() {
        counter!("bouncer_uninitialized_total").increment(1);
    }

    #[inline]
    pub fn record_position_or_add_duration(duration: Duration) {
        histogram!("bouncer_position_or_add_duration_seconds").record(duration.as_secs_f64());
    }

    #[inline]
    pub fn record_housekeeping_cycle_duration(duration: Duration) {
        histogram!("bouncer_housekeeping_cycle_duration_seconds").record(duration.as_secs_f64());
    }

    #[inline]
    pub fn set_queue_size(size: u64) {
        gauge!("bouncer_queue_size").set(size as f64);
    }

    #[inline]
    pub fn set_store_size(size: u64) {
        gauge!("bouncer_store_size").set(size as f64);
    }

    #[inline]
    pub fn set_store_capacity(capacity: i64) {
        gauge!("bouncer_store_capacity").set(capacity as f64);
    }
}

/// Timer for the admission hot path, mirroring `Metrics::record_admission`'s
/// duration counterpart.
pub struct AdmissionTimer {
    start: std::time::Instant,
}

impl AdmissionTimer {
    pub fn start() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }

    pub fn finish(self) {
        Metrics::record_position_or_add_duration(self.start.elapsed());
    }
}
