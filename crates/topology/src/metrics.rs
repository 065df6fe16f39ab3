//! Topology metrics for observability.
//!
//! [`TopologyMetrics`] is a pluggable trait with no-op defaults. Two
//! implementations are included:
//!
//! - [`NoopTopologyMetrics`]: the default, discards everything.
//! - [`MetricsTopologyMetrics`]: forwards to the [`metrics`](https://docs.rs/metrics) crate facade
//!   and whatever recorder is installed in the process.
//!
//! The pick path records nothing.
//!
//! # Metric Names
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `ledger_topology_snapshots_total` | Counter | `seed` | Snapshots received from sources |
//! | `ledger_topology_address_updates_total` | Counter | `seed` | Ranked address lists emitted |
//! | `ledger_topology_ranked_addresses` | Gauge | | Size of the last emitted list |
//! | `ledger_topology_seed_failovers_total` | Counter | `seed`, `reason` | Seed failovers |
//! | `ledger_topology_discovery_retries_total` | Counter | `seed` | Polling retries after a failed fetch |
//! | `ledger_topology_picker_rebuilds_total` | Counter | | Picker generations installed |
//! | `ledger_topology_ready_connections` | Gauge | | Ready handles in the current generation |
//! | `ledger_topology_refreshes_total` | Counter | | Refreshes triggered by failed calls |

use std::{fmt, sync::Arc};

/// Trait for topology metrics collection.
///
/// All methods have default no-op implementations.
///
/// # Thread Safety
///
/// One instance is shared between the resolver task, the connection manager
/// and every refresh trigger, so implementations must be `Send + Sync`.
pub trait TopologyMetrics: Send + Sync + fmt::Debug {
    /// Records a snapshot received from `seed`.
    fn record_snapshot(&self, seed: &str, total: usize, eligible: usize) {
        let _ = (seed, total, eligible);
    }

    /// Records a changed ranked address list emitted to the listener.
    fn record_address_update(&self, seed: &str, addresses: usize) {
        let _ = (seed, addresses);
    }

    /// Records a failover away from `seed`.
    ///
    /// - `reason`: short classification ("timeout", "empty", "no_eligible", "ended", "error").
    fn record_seed_failover(&self, seed: &str, reason: &str) {
        let _ = (seed, reason);
    }

    /// Records a polling retry after a failed fetch.
    ///
    /// - `attempt`: consecutive failure count for this seed (1 = first failure).
    fn record_discovery_retry(&self, seed: &str, attempt: u32) {
        let _ = (seed, attempt);
    }

    /// Records installation of a new picker generation.
    fn record_picker_rebuild(&self, ready: usize) {
        let _ = ready;
    }

    /// Records a refresh requested by a failed call.
    fn record_refresh(&self) {}
}

/// No-op metrics implementation.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTopologyMetrics;

impl TopologyMetrics for NoopTopologyMetrics {}

/// Metrics implementation using the [`metrics`](https://docs.rs/metrics) crate facade.
///
/// All metric names use the `ledger_topology_` prefix.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsTopologyMetrics;

/// Metric name constants for the `metrics` crate facade.
mod metric_names {
    pub const SNAPSHOTS_TOTAL: &str = "ledger_topology_snapshots_total";
    pub const ADDRESS_UPDATES_TOTAL: &str = "ledger_topology_address_updates_total";
    pub const RANKED_ADDRESSES: &str = "ledger_topology_ranked_addresses";
    pub const SEED_FAILOVERS_TOTAL: &str = "ledger_topology_seed_failovers_total";
    pub const DISCOVERY_RETRIES_TOTAL: &str = "ledger_topology_discovery_retries_total";
    pub const PICKER_REBUILDS_TOTAL: &str = "ledger_topology_picker_rebuilds_total";
    pub const READY_CONNECTIONS: &str = "ledger_topology_ready_connections";
    pub const REFRESHES_TOTAL: &str = "ledger_topology_refreshes_total";
}

impl TopologyMetrics for MetricsTopologyMetrics {
    fn record_snapshot(&self, seed: &str, _total: usize, _eligible: usize) {
        metrics::counter!(metric_names::SNAPSHOTS_TOTAL, "seed" => seed.to_owned()).increment(1);
    }

    fn record_address_update(&self, seed: &str, addresses: usize) {
        metrics::counter!(metric_names::ADDRESS_UPDATES_TOTAL, "seed" => seed.to_owned())
            .increment(1);
        metrics::gauge!(metric_names::RANKED_ADDRESSES).set(addresses as f64);
    }

    fn record_seed_failover(&self, seed: &str, reason: &str) {
        metrics::counter!(
            metric_names::SEED_FAILOVERS_TOTAL,
            "seed" => seed.to_owned(),
            "reason" => reason.to_owned(),
        )
        .increment(1);
    }

    fn record_discovery_retry(&self, seed: &str, _attempt: u32) {
        metrics::counter!(metric_names::DISCOVERY_RETRIES_TOTAL, "seed" => seed.to_owned())
            .increment(1);
    }

    fn record_picker_rebuild(&self, ready: usize) {
        metrics::counter!(metric_names::PICKER_REBUILDS_TOTAL).increment(1);
        metrics::gauge!(metric_names::READY_CONNECTIONS).set(ready as f64);
    }

    fn record_refresh(&self) {
        metrics::counter!(metric_names::REFRESHES_TOTAL).increment(1);
    }
}

/// Creates the default metrics instance (no-op).
#[must_use]
pub fn default_metrics() -> Arc<dyn TopologyMetrics> {
    Arc::new(NoopTopologyMetrics)
}
