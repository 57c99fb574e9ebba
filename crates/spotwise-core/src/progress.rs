//! Typed per-tick progress reporting
//!
//! The controller emits a `TickReport` once per tick instead of ad hoc
//! formatted log lines. The default sink renders it as structured tracing
//! events plus one machine-parseable record for downstream CSV ingestion.

use std::sync::Mutex;

use tracing::{info, warn};

/// Snapshot of fleet accounting at the end of a tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    /// Tick sequence number, starting at 1
    pub tick: u64,
    /// Seconds since the run started (virtual seconds in the simulated twin)
    pub elapsed_seconds: f64,
    /// Work units completed so far
    pub tasks_completed: f64,
    /// Total work units to complete
    pub total_tasks: f64,
    /// Coordinator spend (USD)
    pub fixed_spent: f64,
    /// Worker spend (USD)
    pub worker_spent: f64,
    /// Total spend (USD)
    pub spent: f64,
    /// Current budget, including any relaxations (USD)
    pub budget: f64,
    /// Budget the user originally requested (USD)
    pub requested_budget: f64,
    /// Work units required per remaining dollar
    pub target_ratio: f64,
    /// Active fleet size
    pub active_workers: usize,
    /// Requested fleet size
    pub target_nodes: usize,
}

/// Receives typed progress events from the controller
pub trait ProgressSink: Send + Sync {
    /// Called once per tick with the fresh accounting snapshot
    fn on_tick(&self, report: &TickReport);

    /// Called every time the budget is relaxed by 10%
    fn on_relaxation(&self, new_budget: f64, relaxations: u32);
}

/// Default sink: structured tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn on_tick(&self, report: &TickReport) {
        info!(
            tick = report.tick,
            tasks_completed = report.tasks_completed,
            total_tasks = report.total_tasks,
            spent = report.spent,
            fixed_spent = report.fixed_spent,
            worker_spent = report.worker_spent,
            budget = report.budget,
            requested_budget = report.requested_budget,
            target_ratio = report.target_ratio,
            active_workers = report.active_workers,
            target_nodes = report.target_nodes,
            "tick complete"
        );
        // One record per tick for downstream CSV ingestion
        info!(
            target: "spotwise::csv",
            elapsed_seconds = report.elapsed_seconds,
            cumulative_spend = report.spent,
        );
    }

    fn on_relaxation(&self, new_budget: f64, relaxations: u32) {
        warn!(
            new_budget,
            relaxations, "impossible to run with this configuration; budget increased by 10%"
        );
    }
}

/// Sink that keeps every event in memory; used by tests and the simulation
/// summary
#[derive(Debug, Default)]
pub struct CollectingSink {
    /// Captured per-tick reports, in emission order
    pub reports: Mutex<Vec<TickReport>>,
    /// Captured relaxed budgets, in emission order
    pub relaxations: Mutex<Vec<f64>>,
}

impl ProgressSink for CollectingSink {
    fn on_tick(&self, report: &TickReport) {
        self.reports.lock().unwrap().push(report.clone());
    }

    fn on_relaxation(&self, new_budget: f64, _relaxations: u32) {
        self.relaxations.lock().unwrap().push(new_budget);
    }
}
