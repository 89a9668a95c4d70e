//! Prometheus metrics for the sync engine.
//!
//! The [`SyncMetrics`] struct owns a dedicated [`Registry`] that an HTTP
//! `/metrics` endpoint can encode into the Prometheus text exposition
//! format.

use prometheus::{
    register_histogram_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, Histogram, HistogramOpts, IntCounter, IntGauge, Opts,
    Registry,
};

/// Central collection of all engine-level Prometheus metrics.
pub struct SyncMetrics {
    /// The Prometheus registry that owns every metric below.
    pub registry: Registry,

    // ── Counters ────────────────────────────────────────────────────────
    /// Total chunks written into the chunk store.
    pub chunks_stored_total: IntCounter,
    /// Total chunks fetched from peers that passed proof validation.
    pub chunks_fetched_total: IntCounter,
    /// Total failed peer fetches (transport errors and invalid proofs).
    pub fetch_failures_total: IntCounter,
    /// Total staged chunks dropped because their data root expired.
    pub disk_pool_chunks_expired_total: IntCounter,
    /// Total reorgs processed.
    pub reorgs_total: IntCounter,

    // ── Gauges ──────────────────────────────────────────────────────────
    /// Bytes covered by the sync record (including false positives).
    pub sync_record_bytes: IntGauge,
    /// Number of intervals in the sync record.
    pub sync_record_intervals: IntGauge,
    /// Bytes currently staged in the disk pool.
    pub disk_pool_bytes: IntGauge,
    /// Current weave size in bytes.
    pub weave_size_bytes: IntGauge,

    // ── Histograms ──────────────────────────────────────────────────────
    /// Wall time of a single peer chunk fetch, in milliseconds.
    pub fetch_time_ms: Histogram,
}

impl SyncMetrics {
    /// Create a fresh set of metrics, all registered under a new
    /// [`Registry`].
    pub fn new() -> Self {
        let registry = Registry::new();

        let chunks_stored_total = register_int_counter_with_registry!(
            Opts::new("loom_chunks_stored_total", "Total chunks written"),
            registry
        )
        .expect("failed to register chunks_stored_total counter");

        let chunks_fetched_total = register_int_counter_with_registry!(
            Opts::new(
                "loom_chunks_fetched_total",
                "Total validated chunks fetched from peers"
            ),
            registry
        )
        .expect("failed to register chunks_fetched_total counter");

        let fetch_failures_total = register_int_counter_with_registry!(
            Opts::new("loom_fetch_failures_total", "Total failed peer fetches"),
            registry
        )
        .expect("failed to register fetch_failures_total counter");

        let disk_pool_chunks_expired_total = register_int_counter_with_registry!(
            Opts::new(
                "loom_disk_pool_chunks_expired_total",
                "Total staged chunks dropped on data-root expiry"
            ),
            registry
        )
        .expect("failed to register disk_pool_chunks_expired_total counter");

        let reorgs_total = register_int_counter_with_registry!(
            Opts::new("loom_reorgs_total", "Total reorgs processed"),
            registry
        )
        .expect("failed to register reorgs_total counter");

        let sync_record_bytes = register_int_gauge_with_registry!(
            Opts::new("loom_sync_record_bytes", "Bytes covered by the sync record"),
            registry
        )
        .expect("failed to register sync_record_bytes gauge");

        let sync_record_intervals = register_int_gauge_with_registry!(
            Opts::new(
                "loom_sync_record_intervals",
                "Number of intervals in the sync record"
            ),
            registry
        )
        .expect("failed to register sync_record_intervals gauge");

        let disk_pool_bytes = register_int_gauge_with_registry!(
            Opts::new("loom_disk_pool_bytes", "Bytes staged in the disk pool"),
            registry
        )
        .expect("failed to register disk_pool_bytes gauge");

        let weave_size_bytes = register_int_gauge_with_registry!(
            Opts::new("loom_weave_size_bytes", "Current weave size"),
            registry
        )
        .expect("failed to register weave_size_bytes gauge");

        let fetch_time_ms = register_histogram_with_registry!(
            HistogramOpts::new("loom_fetch_time_ms", "Peer chunk fetch time in milliseconds")
                .buckets(prometheus::exponential_buckets(1.0, 2.0, 15).unwrap()),
            registry
        )
        .expect("failed to register fetch_time_ms histogram");

        Self {
            registry,
            chunks_stored_total,
            chunks_fetched_total,
            fetch_failures_total,
            disk_pool_chunks_expired_total,
            reorgs_total,
            sync_record_bytes,
            sync_record_intervals,
            disk_pool_bytes,
            weave_size_bytes,
            fetch_time_ms,
        }
    }
}

impl Default for SyncMetrics {
    fn default() -> Self {
        Self::new()
    }
}
