//! Fault injection for the simulated provider
//!
//! Creation failures and mid-run reclaims are the two ways a spot market
//! misbehaves; both are decided through this trait so scenarios can be either
//! statistical (seeded) or fully scripted.

use std::collections::VecDeque;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides when simulated provider operations fail
pub trait FaultInjector: Send + Sync {
    /// Whether the next worker creation request is rejected
    fn should_fail_create(&self) -> bool;

    /// Whether a running worker is reclaimed by the market this step
    fn should_reclaim(&self) -> bool;
}

/// Never fails
#[derive(Debug, Clone, Copy, Default)]
pub struct NoFaults;

impl FaultInjector for NoFaults {
    fn should_fail_create(&self) -> bool {
        false
    }

    fn should_reclaim(&self) -> bool {
        false
    }
}

/// Seeded statistical faults; identical seeds replay identical runs
pub struct RandomFaults {
    create_failure_rate: f64,
    reclaim_rate: f64,
    rng: Mutex<StdRng>,
}

impl RandomFaults {
    /// Fault source with the given per-call probabilities
    pub fn new(create_failure_rate: f64, reclaim_rate: f64, seed: u64) -> Self {
        Self {
            create_failure_rate,
            reclaim_rate,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl FaultInjector for RandomFaults {
    fn should_fail_create(&self) -> bool {
        self.rng.lock().unwrap().gen_bool(self.create_failure_rate.clamp(0.0, 1.0))
    }

    fn should_reclaim(&self) -> bool {
        self.rng.lock().unwrap().gen_bool(self.reclaim_rate.clamp(0.0, 1.0))
    }
}

/// Scripted faults for deterministic tests; queues drain per call and an
/// empty queue means success
#[derive(Debug, Default)]
pub struct ScriptedFaults {
    creates: Mutex<VecDeque<bool>>,
    reclaims: Mutex<VecDeque<bool>>,
}

impl ScriptedFaults {
    /// Script the outcomes of upcoming creation requests
    pub fn script_creates(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.creates.lock().unwrap().extend(outcomes);
    }

    /// Script the outcomes of upcoming reclaim checks
    pub fn script_reclaims(&self, outcomes: impl IntoIterator<Item = bool>) {
        self.reclaims.lock().unwrap().extend(outcomes);
    }
}

impl FaultInjector for ScriptedFaults {
    fn should_fail_create(&self) -> bool {
        self.creates.lock().unwrap().pop_front().unwrap_or(false)
    }

    fn should_reclaim(&self) -> bool {
        self.reclaims.lock().unwrap().pop_front().unwrap_or(false)
    }
}
