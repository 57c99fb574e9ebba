//! Spotwise Simulation Engine
//!
//! Deterministic twin of the live fleet controller: same control loop, same
//! ranking, but time is virtual, prices come from a recorded table, and
//! workers are simulated with seeded jitter and fault injection.

pub mod fault;
pub mod pseudo;
pub mod replay;

pub use fault::{FaultInjector, NoFaults, RandomFaults, ScriptedFaults};
pub use pseudo::{PerfProfile, PseudoLifecycle};
pub use replay::{ReplayPriceOracle, SimClock};
