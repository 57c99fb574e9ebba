//! Candidate ranking
//!
//! Pure functions from current prices and historical throughput statistics to
//! a ranked list of economically viable (type, zone) candidates. No IO here;
//! the controller fetches prices and stats and hands them in.

use std::collections::HashMap;

use crate::types::{Candidate, ThroughputStats, WorkerInstance, SECONDS_PER_HOUR};

/// One (type, zone) pair with its current price and throughput statistics
#[derive(Debug, Clone)]
pub struct CandidateInput {
    /// Worker type
    pub instance_type: String,
    /// Availability zone
    pub zone: String,
    /// Fee-inclusive price (USD/hour)
    pub price: f64,
    /// Mean throughput (work units per second)
    pub mean: f64,
    /// Standard deviation of throughput
    pub stddev: f64,
}

/// Rank all viable candidates for the given target ratio
///
/// A pair qualifies when even its pessimistic cost/performance estimate
/// `(mean - stddev) / (price / 3600)` is strictly greater than
/// `target_ratio`. Types on the exclusion list never qualify. When a running
/// worker already occupies a qualifying pair, its live record is preferred
/// over a fresh synthetic stub so that re-use wins over redundant
/// acquisition. The result is sorted by raw performance estimate, fastest
/// first.
pub fn rank(
    inputs: &[CandidateInput],
    running: &[&WorkerInstance],
    target_ratio: f64,
    excluded_types: &[String],
) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for input in inputs {
        if excluded_types.iter().any(|t| t == &input.instance_type) {
            continue;
        }
        let dollars_per_second = input.price / SECONDS_PER_HOUR;
        if dollars_per_second <= 0.0 {
            continue;
        }

        let cost_per_perf = input.mean / dollars_per_second;
        let cost_per_perf_stddev = input.stddev / dollars_per_second;
        let cost_per_perf_negative = cost_per_perf - cost_per_perf_stddev;

        if !(cost_per_perf_negative > target_ratio) {
            continue;
        }

        let live: Vec<&&WorkerInstance> = running
            .iter()
            .filter(|w| w.instance_type == input.instance_type && w.zone == input.zone)
            .collect();

        if live.is_empty() {
            candidates.push(Candidate {
                worker_id: None,
                instance_type: input.instance_type.clone(),
                zone: input.zone.clone(),
                price: input.price,
                perf_estimate: input.mean,
                cost_per_perf,
                cost_per_perf_stddev,
                cost_per_perf_negative,
            });
        } else {
            for worker in live {
                if candidates
                    .iter()
                    .any(|c| c.worker_id.as_ref() == Some(&worker.id))
                {
                    continue;
                }
                candidates.push(Candidate {
                    worker_id: Some(worker.id.clone()),
                    instance_type: input.instance_type.clone(),
                    zone: input.zone.clone(),
                    price: worker.price_per_hour.unwrap_or(input.price),
                    // Live workers order by their observed lower bound; a
                    // worker without one sorts last.
                    perf_estimate: worker.perf_lower_bound.unwrap_or(-1.0),
                    cost_per_perf,
                    cost_per_perf_stddev,
                    cost_per_perf_negative,
                });
            }
        }
    }

    candidates.sort_by(|a, b| b.perf_estimate.total_cmp(&a.perf_estimate));
    candidates
}

/// Estimated completion time and cost for one worker type at current prices
#[derive(Debug, Clone)]
pub struct ParetoEstimate {
    /// Worker type the estimate is for
    pub instance_type: String,
    /// Estimated seconds to finish the whole work target
    pub time_to_run_seconds: f64,
    /// Estimated total cost in USD, coordinator included
    pub cost: f64,
}

/// Estimate time/cost per worker type for a homogeneous fleet of
/// `target_nodes` workers, assuming a 0.1% throughput penalty per additional
/// worker
pub fn pareto_preview(
    stats: &[ThroughputStats],
    best_prices: &HashMap<String, f64>,
    target_nodes: usize,
    total_tasks: f64,
    fixed_hourly: f64,
    coordinator_type: &str,
) -> Vec<ParetoEstimate> {
    let coordinator_perf = stats
        .iter()
        .find(|s| s.instance_type == coordinator_type)
        .map(|s| s.mean)
        .unwrap_or(0.0);

    let nodes = target_nodes as f64;
    let crowding = 1.0 - (nodes - 1.0) / 1000.0;

    let mut estimates = Vec::new();
    for stat in stats {
        let Some(&price) = best_prices.get(&stat.instance_type) else {
            continue;
        };
        let aggregate_throughput = coordinator_perf + stat.mean * nodes * crowding;
        if aggregate_throughput <= 0.0 {
            continue;
        }
        let time = total_tasks / aggregate_throughput;
        let cost = time * nodes * price / SECONDS_PER_HOUR + time * fixed_hourly / SECONDS_PER_HOUR;
        estimates.push(ParetoEstimate {
            instance_type: stat.instance_type.clone(),
            time_to_run_seconds: time,
            cost,
        });
    }
    estimates
}
