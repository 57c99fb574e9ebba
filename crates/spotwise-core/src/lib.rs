//! Budget-constrained spot fleet control
//!
//! Maintains a fleet of spot workers chewing through a fixed pool of work
//! units under a dollar budget. The controller evaluates every worker each
//! tick against the target cost/performance ratio, evicts sustained
//! underperformers, and acquires replacements from a ranked list of
//! economically viable (type, zone) pairs.
//!
//! The same [`controller::FleetController`] drives both the live deployment
//! and its deterministic simulated twin; providers, clocks and stores plug in
//! through the [`traits`] module.

pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod progress;
pub mod ranker;
pub mod store;
pub mod traits;
pub mod types;

pub use clock::WallClock;
pub use config::ControllerConfig;
pub use controller::FleetController;
pub use error::{FleetError, Result};
pub use progress::{CollectingSink, ProgressSink, TickReport, TracingSink};
pub use store::{DatasetSeed, MemoryPerformanceStore, SampleSeed, StoreSeed};
pub use traits::{Clock, InstanceLifecycle, PerformanceStore, PriceOracle};
pub use types::{
    Candidate, DatasetId, DiscoveredWorker, ExperimentParams, FleetState, PricePoint, SignatureId,
    Telemetry, TerminalOutcome, ThroughputStats, WorkerId, WorkerInstance,
};
