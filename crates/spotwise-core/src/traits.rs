//! Capability traits for the fleet controller
//!
//! The controller works through these interfaces ONLY - never concrete types.
//! The live variant wires provider-backed implementations; the simulated twin
//! supplies a replay oracle, a virtual clock and a fault-injecting lifecycle.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::error::Result;
use crate::types::*;

/// Read access to the current unit price of a worker type
///
/// An unknown price is `None` and must propagate as non-candidacy, never as a
/// usable zero or negative sentinel.
#[async_trait]
pub trait PriceOracle: Send + Sync {
    /// Most recent price for a (type, zone) pair, fee-exclusive
    async fn price(&self, instance_type: &str, zone: &str) -> Result<Option<f64>>;

    /// Most recent price per zone for a worker type
    async fn all_zone_prices(&self, instance_type: &str) -> Result<HashMap<String, f64>>;
}

/// Read/write access to historical throughput and accounting records
///
/// Every call is atomic from the controller's perspective; no multi-call
/// transactions are required.
#[async_trait]
pub trait PerformanceStore: Send + Sync {
    /// Resolve a parameter tuple to its signature id, registering it on first sight
    ///
    /// Idempotent: identical tuples map to the same id.
    async fn get_or_create_signature(&self, params: &ExperimentParams) -> Result<SignatureId>;

    /// Look up a dataset by content hash
    async fn dataset_id(&self, content_hash: &str) -> Result<Option<DatasetId>>;

    /// Average of the recorded work-unit counts for a (signature, dataset) pair
    async fn total_work_units(
        &self,
        signature: SignatureId,
        dataset: DatasetId,
    ) -> Result<Option<f64>>;

    /// Throughput statistics per worker type, optionally restricted to one type
    async fn throughput_stats(
        &self,
        dataset: DatasetId,
        signature: SignatureId,
        instance_type: Option<&str>,
    ) -> Result<Vec<ThroughputStats>>;

    /// Record one throughput sample for a worker type
    async fn record_throughput_sample(
        &self,
        dataset: DatasetId,
        signature: SignatureId,
        instance_type: &str,
        value: f64,
    ) -> Result<()>;

    /// Record a completed work-unit count for a (signature, dataset) pair
    async fn record_completed_units(
        &self,
        signature: SignatureId,
        dataset: DatasetId,
        units: f64,
    ) -> Result<()>;
}

/// Create, observe and terminate compute workers
///
/// Create and terminate are possibly-failing, fire-and-forget primitives; the
/// controller never retries them at the call site.
#[async_trait]
pub trait InstanceLifecycle: Send + Sync {
    /// Workers currently running under this controller's ownership tag
    async fn list_workers(&self) -> Result<Vec<DiscoveredWorker>>;

    /// Latest telemetry for a running worker; missing metrics are `None`
    async fn read_telemetry(&self, id: &WorkerId, instance_type: &str) -> Result<Telemetry>;

    /// Request a new worker of the given type in the given zone
    ///
    /// `price_ceiling` is the fee-inclusive maximum the controller is willing
    /// to pay per hour.
    async fn create_worker(
        &self,
        instance_type: &str,
        zone: &str,
        price_ceiling: f64,
    ) -> Result<DiscoveredWorker>;

    /// Request termination of a worker; outcome is not awaited or retried
    async fn terminate_worker(&self, id: &WorkerId) -> Result<()>;
}

/// Time source for the control loop
///
/// The wall clock ignores `advance`; the simulated twin's virtual clock moves
/// only through it, and the controller is its only caller.
pub trait Clock: Send + Sync {
    /// Current time
    fn now(&self) -> chrono::DateTime<chrono::Utc>;

    /// Advance a virtual clock by the given number of minutes (no-op live)
    fn advance(&self, minutes: f64);
}
