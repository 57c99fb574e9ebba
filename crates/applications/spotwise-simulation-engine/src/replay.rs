//! Virtual clock and historical price replay
//!
//! The simulated twin runs against a recorded price table instead of the live
//! market. Time moves only when the controller advances the virtual clock, so
//! a multi-day run replays in seconds while every price lookup sees exactly
//! the sample that was current at the virtual moment.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use spotwise_core::error::{FleetError, Result};
use spotwise_core::traits::{Clock, PriceOracle};
use spotwise_core::types::PricePoint;

/// Origin of the recorded price table
pub fn table_epoch() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap()
}

/// Default virtual start of a simulated run, six weeks into the table
pub fn default_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 2, 15, 0, 0, 0).unwrap()
}

/// Virtual clock advanced only by the controller
pub struct SimClock {
    now: Mutex<DateTime<Utc>>,
}

impl SimClock {
    /// Clock starting at the given virtual time
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }
}

impl Default for SimClock {
    fn default() -> Self {
        Self::starting_at(default_start())
    }
}

impl Clock for SimClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    fn advance(&self, minutes: f64) {
        let mut now = self.now.lock().unwrap();
        *now += Duration::milliseconds((minutes * 60_000.0) as i64);
    }
}

/// [`PriceOracle`] answering from a recorded table at the virtual current time
///
/// Each lookup returns the most recent sample at or before the clock's
/// position, bounded below by [`table_epoch`]; a (type, zone) pair with no
/// sample inside that window is unknown, not free.
pub struct ReplayPriceOracle {
    clock: Arc<SimClock>,
    // (type, zone) -> samples sorted by timestamp
    table: HashMap<(String, String), Vec<(DateTime<Utc>, f64)>>,
}

impl ReplayPriceOracle {
    /// Oracle over an in-memory price table
    ///
    /// Samples recorded before the table epoch are discarded at load time.
    pub fn new(points: Vec<PricePoint>, clock: Arc<SimClock>) -> Self {
        let epoch = table_epoch();
        let mut table: HashMap<(String, String), Vec<(DateTime<Utc>, f64)>> = HashMap::new();
        for point in points {
            if point.timestamp < epoch {
                continue;
            }
            table
                .entry((point.instance_type, point.zone))
                .or_default()
                .push((point.timestamp, point.price));
        }
        for samples in table.values_mut() {
            samples.sort_by_key(|(timestamp, _)| *timestamp);
        }
        Self { clock, table }
    }

    /// Oracle loaded from a JSON array of [`PricePoint`] records
    pub fn from_file(path: impl AsRef<Path>, clock: Arc<SimClock>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let points: Vec<PricePoint> = serde_json::from_str(&raw)
            .map_err(|e| FleetError::config(format!("malformed price table: {e}")))?;
        Ok(Self::new(points, clock))
    }

    fn lookup(&self, instance_type: &str, zone: &str, at: DateTime<Utc>) -> Option<f64> {
        let samples = self
            .table
            .get(&(instance_type.to_string(), zone.to_string()))?;
        let position = samples.partition_point(|(timestamp, _)| *timestamp <= at);
        position
            .checked_sub(1)
            .map(|index| samples[index].1)
    }
}

#[async_trait]
impl PriceOracle for ReplayPriceOracle {
    async fn price(&self, instance_type: &str, zone: &str) -> Result<Option<f64>> {
        Ok(self.lookup(instance_type, zone, self.clock.now()))
    }

    async fn all_zone_prices(&self, instance_type: &str) -> Result<HashMap<String, f64>> {
        let at = self.clock.now();
        let mut prices = HashMap::new();
        for ((known_type, zone), _) in &self.table {
            if known_type == instance_type {
                if let Some(price) = self.lookup(instance_type, zone, at) {
                    prices.insert(zone.clone(), price);
                }
            }
        }
        Ok(prices)
    }
}
