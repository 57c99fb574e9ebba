//! EC2-backed worker lifecycle
//!
//! Workers are spot instances tagged `spotwise:role=worker`; discovery is by
//! tag so a restarted controller adopts the fleet it finds. Telemetry comes
//! from the CloudWatch metrics the worker image publishes about itself.

use async_trait::async_trait;
use aws_sdk_cloudwatch::types::{Dimension, Statistic};
use aws_sdk_cloudwatch::Client as CloudWatchClient;
use aws_sdk_ec2::primitives::DateTime as AwsDateTime;
use aws_sdk_ec2::types::{
    Filter, InstanceMarketOptionsRequest, InstanceType, MarketType, Placement, ResourceType,
    SpotMarketOptions, Tag, TagSpecification,
};
use aws_sdk_ec2::Client as Ec2Client;
use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, info};

use spotwise_core::error::{FleetError, Result};
use spotwise_core::traits::InstanceLifecycle;
use spotwise_core::types::{DiscoveredWorker, Telemetry, WorkerId};

const ROLE_TAG_KEY: &str = "spotwise:role";
const ROLE_TAG_VALUE: &str = "worker";

/// Namespace the worker image publishes its metrics under
const METRIC_NAMESPACE: &str = "Performance";
const METRIC_PERF: &str = "perf_sec";
const METRIC_PERF_STDDEV: &str = "perf_sec_stdev";
const METRIC_TASKS: &str = "tasks_completed";
const METRIC_PERIOD_SECONDS: i32 = 60;

/// Static launch parameters shared by every worker
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// AMI the workers boot from
    pub ami_id: String,
    /// Security groups applied to each worker
    pub security_group_ids: Vec<String>,
    /// SSH key pair name
    pub key_name: Option<String>,
    /// Subnet override; the zone placement is still explicit per request
    pub subnet_id: Option<String>,
    /// Base64-encoded boot script
    pub user_data: Option<String>,
}

/// [`InstanceLifecycle`] over the EC2 and CloudWatch APIs
pub struct Ec2Lifecycle {
    ec2: Ec2Client,
    cloudwatch: CloudWatchClient,
    spec: LaunchSpec,
    /// Telemetry lookback window in seconds, twice the controller tick
    lookback_seconds: i64,
}

impl Ec2Lifecycle {
    /// Lifecycle launching workers from `spec`
    pub fn new(
        ec2: Ec2Client,
        cloudwatch: CloudWatchClient,
        spec: LaunchSpec,
        lookback_seconds: i64,
    ) -> Self {
        Self {
            ec2,
            cloudwatch,
            spec,
            lookback_seconds,
        }
    }

    /// Latest datapoint of one metric for one worker
    async fn metric(
        &self,
        id: &WorkerId,
        instance_type: &str,
        name: &str,
        statistic: Statistic,
    ) -> Result<Option<f64>> {
        let end = Utc::now().timestamp();
        let start = end - self.lookback_seconds;

        let response = self
            .cloudwatch
            .get_metric_statistics()
            .namespace(METRIC_NAMESPACE)
            .metric_name(name)
            .dimensions(
                Dimension::builder()
                    .name("Instance Id")
                    .value(id.to_string())
                    .build(),
            )
            .dimensions(
                Dimension::builder()
                    .name("Instance Type")
                    .value(instance_type)
                    .build(),
            )
            .start_time(aws_sdk_cloudwatch::primitives::DateTime::from_secs(start))
            .end_time(aws_sdk_cloudwatch::primitives::DateTime::from_secs(end))
            .period(METRIC_PERIOD_SECONDS)
            .statistics(statistic.clone())
            .send()
            .await
            .map_err(|e| FleetError::provider(format!("metric {name}: {e}")))?;

        let latest = response
            .datapoints()
            .iter()
            .max_by_key(|point| point.timestamp().map(|t| t.secs()));
        Ok(latest.and_then(|point| match statistic {
            Statistic::Maximum => point.maximum(),
            _ => point.average(),
        }))
    }
}

fn to_chrono(timestamp: Option<&AwsDateTime>) -> DateTime<Utc> {
    timestamp
        .and_then(|t| Utc.timestamp_opt(t.secs(), 0).single())
        .unwrap_or_else(Utc::now)
}

#[async_trait]
impl InstanceLifecycle for Ec2Lifecycle {
    async fn list_workers(&self) -> Result<Vec<DiscoveredWorker>> {
        let response = self
            .ec2
            .describe_instances()
            .filters(
                Filter::builder()
                    .name(format!("tag:{ROLE_TAG_KEY}"))
                    .values(ROLE_TAG_VALUE)
                    .build(),
            )
            .filters(
                Filter::builder()
                    .name("instance-state-name")
                    .values("pending")
                    .values("running")
                    .build(),
            )
            .send()
            .await
            .map_err(|e| FleetError::provider(format!("describe instances: {e}")))?;

        let mut workers = Vec::new();
        for reservation in response.reservations() {
            for instance in reservation.instances() {
                let (Some(id), Some(instance_type)) =
                    (instance.instance_id(), instance.instance_type())
                else {
                    continue;
                };
                let zone = instance
                    .placement()
                    .and_then(|p| p.availability_zone())
                    .unwrap_or_default()
                    .to_string();
                workers.push(DiscoveredWorker {
                    id: WorkerId::new(id),
                    instance_type: instance_type.as_str().to_string(),
                    zone,
                    launch_time: to_chrono(instance.launch_time()),
                });
            }
        }
        debug!(count = workers.len(), "discovered tagged workers");
        Ok(workers)
    }

    async fn read_telemetry(&self, id: &WorkerId, instance_type: &str) -> Result<Telemetry> {
        let perf_mean = self
            .metric(id, instance_type, METRIC_PERF, Statistic::Average)
            .await?;
        let perf_stddev = self
            .metric(id, instance_type, METRIC_PERF_STDDEV, Statistic::Average)
            .await?;
        let tasks_completed = self
            .metric(id, instance_type, METRIC_TASKS, Statistic::Maximum)
            .await?;
        Ok(Telemetry {
            perf_mean,
            perf_stddev,
            tasks_completed,
        })
    }

    async fn create_worker(
        &self,
        instance_type: &str,
        zone: &str,
        price_ceiling: f64,
    ) -> Result<DiscoveredWorker> {
        let market_options = InstanceMarketOptionsRequest::builder()
            .market_type(MarketType::Spot)
            .spot_options(
                SpotMarketOptions::builder()
                    .max_price(format!("{price_ceiling:.6}"))
                    .build(),
            )
            .build();

        let tag_spec = TagSpecification::builder()
            .resource_type(ResourceType::Instance)
            .tags(Tag::builder().key(ROLE_TAG_KEY).value(ROLE_TAG_VALUE).build())
            .build();

        let response = self
            .ec2
            .run_instances()
            .image_id(&self.spec.ami_id)
            .instance_type(InstanceType::from(instance_type))
            .placement(Placement::builder().availability_zone(zone).build())
            .set_security_group_ids(if self.spec.security_group_ids.is_empty() {
                None
            } else {
                Some(self.spec.security_group_ids.clone())
            })
            .set_key_name(self.spec.key_name.clone())
            .set_subnet_id(self.spec.subnet_id.clone())
            .set_user_data(self.spec.user_data.clone())
            .instance_market_options(market_options)
            .tag_specifications(tag_spec)
            .min_count(1)
            .max_count(1)
            .send()
            .await
            .map_err(|e| FleetError::provider(format!("run instances: {e}")))?;

        let instance = response
            .instances()
            .first()
            .ok_or_else(|| FleetError::provider("no instance in run response"))?;
        let id = instance
            .instance_id()
            .ok_or_else(|| FleetError::provider("instance without id in run response"))?;

        info!(worker = id, instance_type, zone, "spot worker launched");
        Ok(DiscoveredWorker {
            id: WorkerId::new(id),
            instance_type: instance_type.to_string(),
            zone: zone.to_string(),
            launch_time: to_chrono(instance.launch_time()),
        })
    }

    async fn terminate_worker(&self, id: &WorkerId) -> Result<()> {
        self.ec2
            .terminate_instances()
            .instance_ids(id.to_string())
            .send()
            .await
            .map_err(|e| FleetError::provider(format!("terminate instances: {e}")))?;
        info!(worker = %id, "termination initiated");
        Ok(())
    }
}
