//! Wall-clock time source for the live controller

use chrono::{DateTime, Utc};

use crate::traits::Clock;

/// System time; `advance` is a no-op
#[derive(Debug, Clone, Copy, Default)]
pub struct WallClock;

impl Clock for WallClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn advance(&self, _minutes: f64) {}
}
