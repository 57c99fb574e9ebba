//! Spotwise Simulation Engine CLI
//!
//! Replays a recorded spot price table against the fleet controller with a
//! virtual clock and simulated workers, so budget/fleet configurations can be
//! evaluated in seconds instead of days.
//!
//! ```bash
//! spotwise-sim --budget 100 --data-hash abc123 --nodes 4 \
//!     --prices prices.json --perf-seed seed.json \
//!     --failure-create 0.1 --failure-exec 0.01 --seed 42
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spotwise_core::{
    ControllerConfig, FleetController, MemoryPerformanceStore, StoreSeed, TerminalOutcome,
    TracingSink,
};
use spotwise_simulation_engine::{
    PerfProfile, PseudoLifecycle, RandomFaults, ReplayPriceOracle, SimClock,
};

#[derive(Parser, Debug)]
#[command(name = "spotwise-sim")]
#[command(about = "Replay a fleet control run against recorded spot prices", long_about = None)]
struct Args {
    /// Budget in USD to complete the execution
    #[arg(long)]
    budget: f64,

    /// Content hash of the dataset in the performance seed
    #[arg(long)]
    data_hash: String,

    /// Target fleet size
    #[arg(long, default_value_t = 4)]
    nodes: usize,

    /// Real milliseconds to sleep between ticks
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,

    /// Virtual minutes advanced per tick
    #[arg(long, default_value_t = 30.0)]
    time_skip: f64,

    /// Hysteresis cap for the validity counter
    #[arg(long, default_value_t = 1)]
    valid_count: i32,

    /// Work-unit target override; read from the seed when absent
    #[arg(long)]
    target_tasks: Option<f64>,

    /// JSON price table (array of price points)
    #[arg(long)]
    prices: String,

    /// JSON performance store seed
    #[arg(long)]
    perf_seed: String,

    /// Probability that a worker creation request is rejected
    #[arg(long, default_value_t = 0.0)]
    failure_create: f64,

    /// Probability per step that a running worker is reclaimed
    #[arg(long, default_value_t = 0.0)]
    failure_exec: f64,

    /// Seed for jitter and fault randomness; identical seeds replay identically
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Hourly cost of the coordinating node, fee-inclusive
    #[arg(long, default_value_t = spotwise_core::config::DEFAULT_FIXED_HOURLY
        + spotwise_core::config::DEFAULT_PRICE_MARKUP)]
    fixed_hourly: f64,

    /// Stop with a budget-exceeded outcome after this many relaxations
    #[arg(long)]
    max_relaxations: Option<u32>,
}

/// Derive per-type throughput profiles from the seed's recorded samples
fn profiles_from_seed(seed: &StoreSeed, data_hash: &str) -> HashMap<String, PerfProfile> {
    let mut profiles = HashMap::new();
    for dataset in seed.datasets.iter().filter(|d| d.hash == data_hash) {
        for sample in &dataset.samples {
            if sample.values.is_empty() {
                continue;
            }
            let n = sample.values.len() as f64;
            let mean = sample.values.iter().sum::<f64>() / n;
            let variance = sample.values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            profiles.insert(
                sample.instance_type.clone(),
                PerfProfile {
                    mean,
                    stddev: variance.sqrt(),
                },
            );
        }
    }
    profiles
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "spotwise=info,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let clock = Arc::new(SimClock::default());
    let oracle = Arc::new(
        ReplayPriceOracle::from_file(&args.prices, clock.clone())
            .with_context(|| format!("loading price table from {}", args.prices))?,
    );

    let seed_raw = std::fs::read_to_string(&args.perf_seed)
        .with_context(|| format!("reading performance seed from {}", args.perf_seed))?;
    let seed: StoreSeed = serde_json::from_str(&seed_raw).context("malformed performance seed")?;

    let profiles = profiles_from_seed(&seed, &args.data_hash);
    anyhow::ensure!(
        !profiles.is_empty(),
        "no throughput samples for dataset {} in the seed",
        args.data_hash
    );
    let coordinator = profiles
        .get(spotwise_core::config::DEFAULT_COORDINATOR_TYPE)
        .copied()
        .unwrap_or(PerfProfile {
            mean: 0.0,
            stddev: 0.0,
        });

    let config = ControllerConfig::new(args.budget, &args.data_hash, args.nodes)
        .with_interval(Duration::from_millis(args.interval_ms))
        .with_time_skip(args.time_skip)
        .with_valid_count(args.valid_count)
        .with_fixed_hourly(args.fixed_hourly);
    let config = match args.target_tasks {
        Some(tasks) => config.with_target_tasks(tasks),
        None => config,
    };
    let config = match args.max_relaxations {
        Some(ceiling) => config.with_max_relaxations(ceiling),
        None => config,
    };

    let params = config.params.clone();
    let store = Arc::new(MemoryPerformanceStore::from_seed(&params, &seed));
    let faults = Arc::new(RandomFaults::new(
        args.failure_create,
        args.failure_exec,
        args.seed,
    ));
    let lifecycle = Arc::new(PseudoLifecycle::new(
        clock.clone(),
        faults,
        profiles,
        coordinator,
        args.seed,
    ));

    let mut controller = FleetController::new(
        config,
        oracle,
        store,
        lifecycle,
        clock,
        Arc::new(TracingSink),
    );

    let outcome = controller.run().await?;
    let state = controller.state();
    match outcome {
        TerminalOutcome::Completed => info!(
            tasks_completed = state.tasks_completed,
            spent = state.spent(),
            budget = state.budget,
            requested_budget = state.requested_budget,
            "simulation finished: work target reached"
        ),
        TerminalOutcome::BudgetExceeded => info!(
            tasks_completed = state.tasks_completed,
            spent = state.spent(),
            budget = state.budget,
            requested_budget = state.requested_budget,
            "simulation finished: no viable candidate within the relaxation ceiling"
        ),
    }
    Ok(())
}
