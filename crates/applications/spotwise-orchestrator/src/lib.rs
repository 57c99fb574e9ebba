//! Spotwise live orchestrator
//!
//! Wires the fleet controller to EC2: spot price history as the price
//! oracle, tagged spot instances as the worker lifecycle, CloudWatch as the
//! telemetry source.

pub mod lifecycle;
pub mod price;

pub use lifecycle::{Ec2Lifecycle, LaunchSpec};
pub use price::SpotPriceOracle;
