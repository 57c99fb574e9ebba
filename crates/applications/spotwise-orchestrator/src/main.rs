//! Spotwise live orchestrator CLI
//!
//! Runs the budget-constrained fleet control loop against real EC2 spot
//! capacity until the dataset's work target is met.
//!
//! ```bash
//! spotwise --budget 250 --data-hash abc123 --nodes 8 \
//!     --ami ami-0123456789abcdef0 --perf-seed seed.json
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use aws_config::BehaviorVersion;
use aws_types::region::Region;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use spotwise_core::{
    ControllerConfig, FleetController, MemoryPerformanceStore, StoreSeed, TerminalOutcome,
    TracingSink, WallClock,
};
use spotwise_orchestrator::{Ec2Lifecycle, LaunchSpec, SpotPriceOracle};

const DEFAULT_REGION: &str = "us-east-1";

#[derive(Parser, Debug)]
#[command(name = "spotwise")]
#[command(about = "Run a budget-constrained spot worker fleet", long_about = None)]
struct Args {
    /// Budget in USD to complete the execution
    #[arg(long)]
    budget: f64,

    /// Content hash of the dataset in the performance store
    #[arg(long)]
    data_hash: String,

    /// Target fleet size
    #[arg(long, default_value_t = 4)]
    nodes: usize,

    /// Seconds between control ticks
    #[arg(long, default_value_t = 60)]
    interval_secs: u64,

    /// Hysteresis cap for the validity counter
    #[arg(long, default_value_t = 1)]
    valid_count: i32,

    /// Work-unit target override; read from the store when absent
    #[arg(long)]
    target_tasks: Option<f64>,

    /// JSON performance store seed
    #[arg(long)]
    perf_seed: String,

    /// AWS region
    #[arg(long, default_value = DEFAULT_REGION)]
    region: String,

    /// AMI the workers boot from
    #[arg(long)]
    ami: String,

    /// Security group ids applied to each worker
    #[arg(long)]
    security_group: Vec<String>,

    /// SSH key pair name
    #[arg(long)]
    key_name: Option<String>,

    /// Subnet the workers join
    #[arg(long)]
    subnet: Option<String>,

    /// Boot script passed to each worker as EC2 user data
    #[arg(long)]
    user_data: Option<String>,

    /// Stop with a budget-exceeded outcome after this many relaxations
    #[arg(long)]
    max_relaxations: Option<u32>,

    /// Hourly cost of the coordinating node, fee-inclusive
    #[arg(long, default_value_t = spotwise_core::config::DEFAULT_FIXED_HOURLY
        + spotwise_core::config::DEFAULT_PRICE_MARKUP)]
    fixed_hourly: f64,
}

/// Read a boot script and encode it the way the EC2 API expects
fn load_user_data(path: Option<&str>) -> anyhow::Result<Option<String>> {
    use base64::prelude::*;
    match path {
        Some(path) => {
            let script = std::fs::read_to_string(path)
                .with_context(|| format!("reading user data script from {path}"))?;
            Ok(Some(BASE64_STANDARD.encode(script)))
        }
        None => Ok(None),
    }
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

    let aws_config = aws_config::defaults(BehaviorVersion::latest())
        .region(Region::new(args.region.clone()))
        .load()
        .await;
    let ec2 = aws_sdk_ec2::Client::new(&aws_config);
    let cloudwatch = aws_sdk_cloudwatch::Client::new(&aws_config);

    let seed_raw = std::fs::read_to_string(&args.perf_seed)
        .with_context(|| format!("reading performance seed from {}", args.perf_seed))?;
    let seed: StoreSeed = serde_json::from_str(&seed_raw).context("malformed performance seed")?;

    let config = ControllerConfig::new(args.budget, &args.data_hash, args.nodes)
        .with_interval(Duration::from_secs(args.interval_secs))
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

    let spec = LaunchSpec {
        ami_id: args.ami,
        security_group_ids: args.security_group,
        key_name: args.key_name,
        subnet_id: args.subnet,
        user_data: load_user_data(args.user_data.as_deref())?,
    };
    let lookback = 2 * args.interval_secs as i64;

    let params = config.params.clone();
    let store = Arc::new(MemoryPerformanceStore::from_seed(&params, &seed));
    let oracle = Arc::new(SpotPriceOracle::new(ec2.clone()));
    let lifecycle = Arc::new(Ec2Lifecycle::new(ec2, cloudwatch, spec, lookback));

    let mut controller = FleetController::new(
        config,
        oracle,
        store,
        lifecycle,
        Arc::new(WallClock),
        Arc::new(TracingSink),
    );

    let outcome = controller.run().await?;
    let state = controller.state();
    match outcome {
        TerminalOutcome::Completed => info!(
            tasks_completed = state.tasks_completed,
            spent = state.spent(),
            budget = state.budget,
            "run finished: work target reached"
        ),
        TerminalOutcome::BudgetExceeded => info!(
            tasks_completed = state.tasks_completed,
            spent = state.spent(),
            budget = state.budget,
            "run finished: no viable candidate within the relaxation ceiling"
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::prelude::*;

    #[test]
    fn boot_script_is_read_and_encoded() {
        let path = std::env::temp_dir().join("spotwise-user-data-test.sh");
        std::fs::write(&path, "#!/bin/bash\necho boot\n").unwrap();

        let encoded = load_user_data(path.to_str()).unwrap().unwrap();
        let decoded = BASE64_STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, b"#!/bin/bash\necho boot\n");

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn absent_boot_script_stays_absent() {
        assert!(load_user_data(None).unwrap().is_none());
    }

    #[test]
    fn unreadable_boot_script_is_an_error() {
        let missing = std::env::temp_dir().join("spotwise-no-such-script.sh");
        assert!(load_user_data(missing.to_str()).is_err());
    }
}
