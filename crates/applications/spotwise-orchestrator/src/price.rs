//! Live spot price oracle
//!
//! Answers price queries from the EC2 spot price history feed. Only Linux
//! workers are priced; an empty history for a (type, zone) pair is an unknown
//! price, never a zero.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_sdk_ec2::primitives::DateTime as AwsDateTime;
use aws_sdk_ec2::types::InstanceType;
use aws_sdk_ec2::Client as Ec2Client;
use chrono::Utc;
use tracing::debug;

use spotwise_core::error::{FleetError, Result};
use spotwise_core::traits::PriceOracle;

const PRODUCT_DESCRIPTION: &str = "Linux/UNIX";

/// [`PriceOracle`] backed by `DescribeSpotPriceHistory`
pub struct SpotPriceOracle {
    client: Ec2Client,
}

impl SpotPriceOracle {
    /// Oracle over the given EC2 client's region
    pub fn new(client: Ec2Client) -> Self {
        Self { client }
    }

    /// Latest price per zone, keeping only the most recent sample for each
    async fn history(&self, instance_type: &str, zone: Option<&str>) -> Result<HashMap<String, f64>> {
        let now = AwsDateTime::from_secs(Utc::now().timestamp());
        let mut request = self
            .client
            .describe_spot_price_history()
            .instance_types(InstanceType::from(instance_type))
            .product_descriptions(PRODUCT_DESCRIPTION)
            .start_time(now)
            .end_time(now);
        if let Some(zone) = zone {
            request = request.availability_zone(zone);
        }

        let response = request
            .send()
            .await
            .map_err(|e| FleetError::provider(format!("spot price history: {e}")))?;

        let mut latest: HashMap<String, (AwsDateTime, f64)> = HashMap::new();
        for entry in response.spot_price_history() {
            let (Some(zone), Some(raw), Some(timestamp)) = (
                entry.availability_zone(),
                entry.spot_price(),
                entry.timestamp(),
            ) else {
                continue;
            };
            let Ok(price) = raw.parse::<f64>() else {
                debug!(instance_type, zone, raw, "unparseable spot price sample");
                continue;
            };
            match latest.get(zone) {
                Some((seen, _)) if *seen >= *timestamp => {}
                _ => {
                    latest.insert(zone.to_string(), (*timestamp, price));
                }
            }
        }
        Ok(latest.into_iter().map(|(z, (_, p))| (z, p)).collect())
    }
}

#[async_trait]
impl PriceOracle for SpotPriceOracle {
    async fn price(&self, instance_type: &str, zone: &str) -> Result<Option<f64>> {
        let prices = self.history(instance_type, Some(zone)).await?;
        Ok(prices.get(zone).copied())
    }

    async fn all_zone_prices(&self, instance_type: &str) -> Result<HashMap<String, f64>> {
        self.history(instance_type, None).await
    }
}
