//! Simulated worker lifecycle
//!
//! Stands in for the cloud provider: workers exist only as records, progress
//! is synthesized from recorded per-type throughput whenever the virtual
//! clock moves, and the fault injector decides which creations are rejected
//! and which running workers the market reclaims.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use spotwise_core::error::{FleetError, Result};
use spotwise_core::traits::{Clock, InstanceLifecycle};
use spotwise_core::types::{DiscoveredWorker, Telemetry, WorkerId};

use crate::fault::FaultInjector;
use crate::replay::SimClock;

/// Per-type throughput profile driving synthetic progress
#[derive(Debug, Clone, Copy)]
pub struct PerfProfile {
    /// Mean throughput (work units per second)
    pub mean: f64,
    /// Standard deviation of throughput
    pub stddev: f64,
}

struct PseudoState {
    workers: HashMap<WorkerId, (String, String, DateTime<Utc>)>,
    tasks: f64,
    last_advanced: DateTime<Utc>,
    next_id: u64,
}

/// [`InstanceLifecycle`] implementation backing the simulated twin
pub struct PseudoLifecycle {
    clock: Arc<SimClock>,
    faults: Arc<dyn FaultInjector>,
    profiles: HashMap<String, PerfProfile>,
    coordinator: PerfProfile,
    rng: Mutex<StdRng>,
    state: Mutex<PseudoState>,
}

impl PseudoLifecycle {
    /// Simulated provider over the given throughput profiles
    ///
    /// `coordinator` is the always-on coordinating node's own throughput
    /// profile, counted toward progress even when the fleet is empty.
    pub fn new(
        clock: Arc<SimClock>,
        faults: Arc<dyn FaultInjector>,
        profiles: HashMap<String, PerfProfile>,
        coordinator: PerfProfile,
        seed: u64,
    ) -> Self {
        let start = clock.now();
        Self {
            clock,
            faults,
            profiles,
            coordinator,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            state: Mutex::new(PseudoState {
                workers: HashMap::new(),
                tasks: 0.0,
                last_advanced: start,
                next_id: 0,
            }),
        }
    }

    /// Synthesize progress for the virtual time elapsed since the last step
    ///
    /// Each surviving worker contributes `mean x jitter x seconds`, where the
    /// jitter is uniform in `(0.9 - bias, 1.1 - bias)` and the crowding bias
    /// is 0.1% per worker beyond the first.
    fn step(&self, state: &mut PseudoState) {
        let now = self.clock.now();
        let seconds = (now - state.last_advanced).num_milliseconds() as f64 / 1000.0;
        state.last_advanced = now;
        if seconds <= 0.0 {
            return;
        }

        let reclaimed: Vec<WorkerId> = state
            .workers
            .keys()
            .filter(|_| self.faults.should_reclaim())
            .cloned()
            .collect();
        for id in &reclaimed {
            info!(worker = %id, "market reclaimed worker");
            state.workers.remove(id);
        }

        let fleet_size = state.workers.len() as f64;
        let bias = (fleet_size - 1.0).max(0.0) / 1000.0;
        let mut rng = self.rng.lock().unwrap();
        for (instance_type, _, _) in state.workers.values() {
            let Some(profile) = self.profiles.get(instance_type) else {
                continue;
            };
            let jitter = rng.gen_range((0.9 - bias)..(1.1 - bias));
            state.tasks += profile.mean * jitter * seconds;
        }
        let coordinator_rate = if self.coordinator.stddev > 0.0 {
            rng.gen_range(
                (self.coordinator.mean - self.coordinator.stddev)
                    ..(self.coordinator.mean + self.coordinator.stddev),
            )
        } else {
            self.coordinator.mean
        };
        state.tasks += coordinator_rate * seconds;

        debug!(
            seconds,
            tasks = state.tasks,
            workers = state.workers.len(),
            "simulated step"
        );
    }
}

#[async_trait]
impl InstanceLifecycle for PseudoLifecycle {
    async fn list_workers(&self) -> Result<Vec<DiscoveredWorker>> {
        let mut state = self.state.lock().unwrap();
        self.step(&mut state);
        Ok(state
            .workers
            .iter()
            .map(|(id, (instance_type, zone, launch_time))| DiscoveredWorker {
                id: id.clone(),
                instance_type: instance_type.clone(),
                zone: zone.clone(),
                launch_time: *launch_time,
            })
            .collect())
    }

    async fn read_telemetry(&self, id: &WorkerId, instance_type: &str) -> Result<Telemetry> {
        let state = self.state.lock().unwrap();
        if !state.workers.contains_key(id) {
            return Err(FleetError::provider(format!("unknown worker {id}")));
        }
        let profile = self.profiles.get(instance_type);
        Ok(Telemetry {
            perf_mean: profile.map(|p| p.mean),
            perf_stddev: profile.map(|p| p.stddev),
            tasks_completed: Some(state.tasks),
        })
    }

    async fn create_worker(
        &self,
        instance_type: &str,
        zone: &str,
        _price_ceiling: f64,
    ) -> Result<DiscoveredWorker> {
        if self.faults.should_fail_create() {
            return Err(FleetError::provider(format!(
                "simulated market rejected {instance_type} in {zone}"
            )));
        }
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = WorkerId::new(format!("sim-{:04}", state.next_id));
        let launch_time = self.clock.now();
        state.workers.insert(
            id.clone(),
            (instance_type.to_string(), zone.to_string(), launch_time),
        );
        Ok(DiscoveredWorker {
            id,
            instance_type: instance_type.to_string(),
            zone: zone.to_string(),
            launch_time,
        })
    }

    async fn terminate_worker(&self, id: &WorkerId) -> Result<()> {
        self.state.lock().unwrap().workers.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{NoFaults, ScriptedFaults};
    use crate::replay::table_epoch;

    fn idle_coordinator() -> PerfProfile {
        PerfProfile {
            mean: 0.0,
            stddev: 0.0,
        }
    }

    fn profiles() -> HashMap<String, PerfProfile> {
        let mut profiles = HashMap::new();
        profiles.insert(
            "c5.4xlarge".to_string(),
            PerfProfile {
                mean: 2.0,
                stddev: 0.2,
            },
        );
        profiles
    }

    #[tokio::test]
    async fn progress_stays_within_jitter_bounds() {
        let clock = Arc::new(SimClock::starting_at(table_epoch()));
        let lifecycle = PseudoLifecycle::new(
            clock.clone(),
            Arc::new(NoFaults),
            profiles(),
            idle_coordinator(),
            1,
        );

        let worker = lifecycle
            .create_worker("c5.4xlarge", "us-east-1a", 1.1)
            .await
            .unwrap();

        clock.advance(60.0);
        lifecycle.list_workers().await.unwrap();

        let telemetry = lifecycle
            .read_telemetry(&worker.id, "c5.4xlarge")
            .await
            .unwrap();
        let tasks = telemetry.tasks_completed.unwrap();
        // Single worker: jitter in (0.9, 1.1) applied to 2.0 units/sec over 1h
        assert!(tasks > 2.0 * 0.9 * 3600.0);
        assert!(tasks < 2.0 * 1.1 * 3600.0);
    }

    #[tokio::test]
    async fn coordinator_contributes_without_workers() {
        let clock = Arc::new(SimClock::starting_at(table_epoch()));
        let lifecycle = PseudoLifecycle::new(
            clock.clone(),
            Arc::new(NoFaults),
            profiles(),
            PerfProfile {
                mean: 0.5,
                stddev: 0.0,
            },
            1,
        );

        clock.advance(10.0);
        assert!(lifecycle.list_workers().await.unwrap().is_empty());

        let worker = lifecycle
            .create_worker("c5.4xlarge", "us-east-1a", 1.1)
            .await
            .unwrap();
        let telemetry = lifecycle
            .read_telemetry(&worker.id, "c5.4xlarge")
            .await
            .unwrap();
        assert_eq!(telemetry.tasks_completed, Some(0.5 * 600.0));
    }

    #[tokio::test]
    async fn reclaimed_worker_disappears_from_listing() {
        let clock = Arc::new(SimClock::starting_at(table_epoch()));
        let faults = Arc::new(ScriptedFaults::default());
        let lifecycle =
            PseudoLifecycle::new(clock.clone(), faults.clone(), profiles(), idle_coordinator(), 1);

        lifecycle
            .create_worker("c5.4xlarge", "us-east-1a", 1.1)
            .await
            .unwrap();

        faults.script_reclaims([true]);
        clock.advance(1.0);
        assert!(lifecycle.list_workers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scripted_create_failure_surfaces_as_provider_error() {
        let clock = Arc::new(SimClock::starting_at(table_epoch()));
        let faults = Arc::new(ScriptedFaults::default());
        faults.script_creates([true]);
        let lifecycle = PseudoLifecycle::new(clock, faults, profiles(), idle_coordinator(), 1);

        assert!(lifecycle
            .create_worker("c5.4xlarge", "us-east-1a", 1.1)
            .await
            .is_err());
        // Queue drained: the retry succeeds
        assert!(lifecycle
            .create_worker("c5.4xlarge", "us-east-1a", 1.1)
            .await
            .is_ok());
    }
}
