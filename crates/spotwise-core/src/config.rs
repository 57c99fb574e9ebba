//! Controller configuration

use std::time::Duration;

use crate::types::ExperimentParams;

/// Fee added on top of the raw market price (EBS volume and data transfer)
pub const DEFAULT_PRICE_MARKUP: f64 = 0.09375;

/// Hourly price of the always-on coordinating node (c5.4xlarge on-demand)
pub const DEFAULT_FIXED_HOURLY: f64 = 0.68;

/// Worker type running the coordinating node
pub const DEFAULT_COORDINATOR_TYPE: &str = "c5.4xlarge";

/// Maximum number of fan-out rounds per acquisition attempt
pub const DEFAULT_ACQUISITION_ROUNDS: u32 = 5;

/// Configuration for one controller run
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Tick period
    pub interval: Duration,
    /// Virtual minutes to advance the clock per tick (simulated twin only)
    pub time_skip_minutes: Option<f64>,
    /// Budget in USD to complete the execution
    pub budget: f64,
    /// Content hash identifying the dataset in the performance store
    pub data_hash: String,
    /// Target fleet size
    pub target_nodes: usize,
    /// Hysteresis cap for the validity counter
    pub valid_count_max: i32,
    /// Work-unit target override; read from the store when absent
    pub target_tasks: Option<f64>,
    /// Algorithm parameters identifying the experiment signature
    pub params: ExperimentParams,
    /// Hourly cost of the coordinating node, fee-inclusive
    pub fixed_hourly: f64,
    /// Fee added to every observed market price
    pub price_markup: f64,
    /// Worker types never considered for acquisition
    pub excluded_types: Vec<String>,
    /// Fan-out round cap per acquisition attempt
    pub acquisition_rounds: u32,
    /// Ceiling on budget relaxations; unbounded when `None`
    pub max_relaxations: Option<u32>,
}

impl ControllerConfig {
    /// Configuration with the defaults the original deployment used
    pub fn new(budget: f64, data_hash: impl Into<String>, target_nodes: usize) -> Self {
        Self {
            interval: Duration::from_secs(60),
            time_skip_minutes: None,
            budget,
            data_hash: data_hash.into(),
            target_nodes,
            valid_count_max: 1,
            target_tasks: None,
            params: ExperimentParams::default(),
            fixed_hourly: DEFAULT_FIXED_HOURLY + DEFAULT_PRICE_MARKUP,
            price_markup: DEFAULT_PRICE_MARKUP,
            excluded_types: vec!["p3.2xlarge".to_string()],
            acquisition_rounds: DEFAULT_ACQUISITION_ROUNDS,
            max_relaxations: None,
        }
    }

    /// Set the tick period
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Advance a virtual clock by this many minutes after each tick
    pub fn with_time_skip(mut self, minutes: f64) -> Self {
        self.time_skip_minutes = Some(minutes);
        self
    }

    /// Set the validity counter cap
    pub fn with_valid_count(mut self, cap: i32) -> Self {
        self.valid_count_max = cap.max(1);
        self
    }

    /// Override the work-unit target instead of reading it from the store
    pub fn with_target_tasks(mut self, tasks: f64) -> Self {
        self.target_tasks = Some(tasks);
        self
    }

    /// Set the experiment parameter tuple
    pub fn with_params(mut self, params: ExperimentParams) -> Self {
        self.params = params;
        self
    }

    /// Set the hourly cost of the coordinating node
    pub fn with_fixed_hourly(mut self, price: f64) -> Self {
        self.fixed_hourly = price;
        self
    }

    /// Bound the relaxation loop; the run terminates with `BudgetExceeded`
    /// once the ceiling is passed
    pub fn with_max_relaxations(mut self, ceiling: u32) -> Self {
        self.max_relaxations = Some(ceiling);
        self
    }
}
