//! Core types shared across Spotwise components

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Seconds in an hour, used when converting hourly prices to per-second cost
pub const SECONDS_PER_HOUR: f64 = 3600.0;

/// Unique identifier for a worker instance
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Wrap a provider-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a registered parameter tuple in the performance store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignatureId(pub i64);

/// Key of a registered dataset in the performance store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DatasetId(pub i64);

/// Algorithm parameter tuple identifying an experiment configuration
///
/// Identical tuples map to the same signature id in the performance store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperimentParams {
    /// Aperture in half offsets
    pub aperture_h: f64,
    /// Aperture in midpoints
    pub aperture_m: f64,
    /// Window of time samples
    pub window: f64,
    /// Number of population members
    pub population: u32,
    /// Number of generations
    pub generations: u32,
}

/// A worker currently believed to be running or pending
#[derive(Debug, Clone)]
pub struct WorkerInstance {
    /// Provider-assigned identity
    pub id: WorkerId,
    /// Worker type (e.g. "c5.4xlarge")
    pub instance_type: String,
    /// Availability zone
    pub zone: String,
    /// Last observed price, fee-inclusive (USD/hour); `None` until a sample exists
    pub price_per_hour: Option<f64>,
    /// Mean minus one standard deviation of recent throughput; `None` = unknown
    pub perf_lower_bound: Option<f64>,
    /// Provider-reported launch time
    pub launch_time: DateTime<Utc>,
    /// Last time spend was accrued for this worker
    pub last_sampled: DateTime<Utc>,
    /// Validity counter, `0..=valid_count_max`; the worker is evicted at 0
    pub valid: i32,
    /// Validity counter as of the previous tick
    pub prev_valid: i32,
}

impl WorkerInstance {
    /// Work units per dollar at the current price, using the pessimistic bound
    ///
    /// `None` when either the performance bound or the price is unknown.
    pub fn effective_ratio(&self) -> Option<f64> {
        match (self.perf_lower_bound, self.price_per_hour) {
            (Some(bound), Some(price)) if price > 0.0 => {
                Some(bound / (price / SECONDS_PER_HOUR))
            }
            _ => None,
        }
    }
}

/// Process-scoped accounting aggregate, mutated only by the controller
#[derive(Debug, Clone)]
pub struct FleetState {
    /// Requested fleet size
    pub target_nodes: usize,
    /// Budget the user originally requested (USD)
    pub requested_budget: f64,
    /// Current total budget, grows on relaxation (USD)
    pub budget: f64,
    /// Spend of the always-on coordinating node (USD)
    pub fixed_spent: f64,
    /// Spend of the workers (USD)
    pub worker_spent: f64,
    /// Total work units to complete
    pub total_tasks: f64,
    /// Work units completed so far; monotonically non-decreasing
    pub tasks_completed: f64,
    /// Run start time
    pub started_at: DateTime<Utc>,
}

impl FleetState {
    /// Initialize accounting at the start of a run
    pub fn new(target_nodes: usize, budget: f64, total_tasks: f64, now: DateTime<Utc>) -> Self {
        Self {
            target_nodes,
            requested_budget: budget,
            budget,
            fixed_spent: 0.0,
            worker_spent: 0.0,
            total_tasks,
            tasks_completed: 0.0,
            started_at: now,
        }
    }

    /// Total spend so far (fixed + variable)
    pub fn spent(&self) -> f64 {
        self.fixed_spent + self.worker_spent
    }

    /// Work units still to complete
    pub fn remaining_tasks(&self) -> f64 {
        self.total_tasks - self.tasks_completed
    }

    /// Budget still available (may be negative on overrun)
    pub fn remaining_budget(&self) -> f64 {
        self.budget - self.spent()
    }

    /// Work units required per dollar of remaining spend capacity
    ///
    /// Unbounded when the budget is exhausted, so that every worker fails the
    /// threshold test and acquisition is forced into the relaxation path.
    pub fn target_ratio(&self) -> f64 {
        let remaining = self.remaining_budget();
        if remaining > 0.0 {
            self.remaining_tasks() / remaining
        } else {
            f64::INFINITY
        }
    }

    /// Fold in a freshly observed cumulative progress value
    ///
    /// Progress is monotonic by construction and never decreases.
    pub fn record_progress(&mut self, observed: f64) {
        if observed > self.tasks_completed {
            self.tasks_completed = observed;
        }
    }
}

/// (type, zone, price, timestamp) tuple; the unit of the replay price table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    /// Worker type
    pub instance_type: String,
    /// Availability zone
    pub zone: String,
    /// Price in USD/hour, fee-exclusive
    pub price: f64,
    /// When this price was recorded
    pub timestamp: DateTime<Utc>,
}

/// Historical throughput statistics for a worker type under an experiment signature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    /// Worker type the samples were recorded on
    pub instance_type: String,
    /// Mean throughput (work units per second)
    pub mean: f64,
    /// Standard deviation of throughput
    pub stddev: f64,
    /// Smallest recorded sample
    pub min: f64,
    /// Largest recorded sample
    pub max: f64,
}

/// Ephemeral ranking record produced fresh on each acquisition attempt
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Set when an already-running worker occupies this (type, zone)
    pub worker_id: Option<WorkerId>,
    /// Worker type
    pub instance_type: String,
    /// Availability zone
    pub zone: String,
    /// Fee-inclusive price (USD/hour)
    pub price: f64,
    /// Raw performance estimate used for ordering
    pub perf_estimate: f64,
    /// Work units per dollar at the mean throughput
    pub cost_per_perf: f64,
    /// Standard deviation of the cost/performance ratio
    pub cost_per_perf_stddev: f64,
    /// Pessimistic cost/performance: `(mean - stddev) / (price / 3600)`
    pub cost_per_perf_negative: f64,
}

/// A worker as reported by the lifecycle collaborator
#[derive(Debug, Clone)]
pub struct DiscoveredWorker {
    /// Provider-assigned identity
    pub id: WorkerId,
    /// Worker type
    pub instance_type: String,
    /// Availability zone
    pub zone: String,
    /// Provider-reported launch time
    pub launch_time: DateTime<Utc>,
}

/// Latest telemetry sample for a running worker
#[derive(Debug, Clone, Default)]
pub struct Telemetry {
    /// Mean throughput over the recent window
    pub perf_mean: Option<f64>,
    /// Standard deviation of throughput over the recent window
    pub perf_stddev: Option<f64>,
    /// Cumulative work units this run has completed, as seen by the worker
    pub tasks_completed: Option<f64>,
}

impl Telemetry {
    /// Pessimistic throughput estimate: mean minus one standard deviation
    pub fn perf_lower_bound(&self) -> Option<f64> {
        match (self.perf_mean, self.perf_stddev) {
            (Some(mean), Some(stddev)) => Some(mean - stddev),
            _ => None,
        }
    }
}

/// Outcome of a completed control loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalOutcome {
    /// The work target was reached
    Completed,
    /// The configured relaxation ceiling was hit with no viable candidate
    BudgetExceeded,
}
