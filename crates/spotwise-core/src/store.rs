//! In-memory performance store
//!
//! The relational accounting store is an external collaborator; this
//! implementation backs the simulated twin and tests, and lets the live
//! binary run from a JSON seed file when no store service is wired in.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::traits::PerformanceStore;
use crate::types::{DatasetId, ExperimentParams, SignatureId, ThroughputStats};

#[derive(Default)]
struct StoreInner {
    signatures: Vec<(SignatureId, ExperimentParams)>,
    datasets: HashMap<String, DatasetId>,
    next_dataset: i64,
    // (dataset, signature, type) -> throughput samples
    samples: HashMap<(i64, i64, String), Vec<f64>>,
    // (signature, dataset) -> completed work-unit counts
    completed: HashMap<(i64, i64), Vec<f64>>,
}

/// Thread-safe in-memory implementation of [`PerformanceStore`]
#[derive(Default)]
pub struct MemoryPerformanceStore {
    inner: Mutex<StoreInner>,
}

impl MemoryPerformanceStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated from a seed, with every sample recorded under the
    /// signature of `params`
    pub fn from_seed(params: &ExperimentParams, seed: &StoreSeed) -> Self {
        let store = Self::new();
        let signature = store.signature_sync(params);
        for dataset_seed in &seed.datasets {
            let dataset = store.register_dataset(&dataset_seed.hash);
            let mut inner = store.inner.lock().unwrap();
            for &count in &dataset_seed.work_unit_counts {
                inner
                    .completed
                    .entry((signature.0, dataset.0))
                    .or_default()
                    .push(count);
            }
            for sample in &dataset_seed.samples {
                inner
                    .samples
                    .entry((dataset.0, signature.0, sample.instance_type.clone()))
                    .or_default()
                    .extend_from_slice(&sample.values);
            }
        }
        store
    }

    /// Register a dataset hash, returning the existing id when already known
    pub fn register_dataset(&self, content_hash: &str) -> DatasetId {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.datasets.get(content_hash) {
            return id;
        }
        inner.next_dataset += 1;
        let id = DatasetId(inner.next_dataset);
        inner.datasets.insert(content_hash.to_string(), id);
        id
    }

    fn signature_sync(&self, params: &ExperimentParams) -> SignatureId {
        let mut inner = self.inner.lock().unwrap();
        if let Some((id, _)) = inner.signatures.iter().find(|(_, p)| p == params) {
            return *id;
        }
        let id = SignatureId(inner.signatures.len() as i64 + 1);
        inner.signatures.push((id, params.clone()));
        id
    }

    fn stats_for(values: &[f64], instance_type: &str) -> Option<ThroughputStats> {
        if values.is_empty() {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(ThroughputStats {
            instance_type: instance_type.to_string(),
            mean,
            stddev: variance.sqrt(),
            min,
            max,
        })
    }
}

#[async_trait]
impl PerformanceStore for MemoryPerformanceStore {
    async fn get_or_create_signature(&self, params: &ExperimentParams) -> Result<SignatureId> {
        Ok(self.signature_sync(params))
    }

    async fn dataset_id(&self, content_hash: &str) -> Result<Option<DatasetId>> {
        Ok(self.inner.lock().unwrap().datasets.get(content_hash).copied())
    }

    async fn total_work_units(
        &self,
        signature: SignatureId,
        dataset: DatasetId,
    ) -> Result<Option<f64>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.completed.get(&(signature.0, dataset.0)).map(|counts| {
            counts.iter().sum::<f64>() / counts.len() as f64
        }))
    }

    async fn throughput_stats(
        &self,
        dataset: DatasetId,
        signature: SignatureId,
        instance_type: Option<&str>,
    ) -> Result<Vec<ThroughputStats>> {
        let inner = self.inner.lock().unwrap();
        let mut stats: Vec<ThroughputStats> = inner
            .samples
            .iter()
            .filter(|((d, s, t), _)| {
                *d == dataset.0
                    && *s == signature.0
                    && instance_type.map_or(true, |wanted| wanted == t)
            })
            .filter_map(|((_, _, t), values)| Self::stats_for(values, t))
            .collect();
        stats.sort_by(|a, b| a.instance_type.cmp(&b.instance_type));
        Ok(stats)
    }

    async fn record_throughput_sample(
        &self,
        dataset: DatasetId,
        signature: SignatureId,
        instance_type: &str,
        value: f64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .samples
            .entry((dataset.0, signature.0, instance_type.to_string()))
            .or_default()
            .push(value);
        Ok(())
    }

    async fn record_completed_units(
        &self,
        signature: SignatureId,
        dataset: DatasetId,
        units: f64,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner
            .completed
            .entry((signature.0, dataset.0))
            .or_default()
            .push(units);
        Ok(())
    }
}

/// JSON-loadable seed for a [`MemoryPerformanceStore`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSeed {
    /// Datasets to register, with their recorded history
    pub datasets: Vec<DatasetSeed>,
}

/// One dataset entry of a [`StoreSeed`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSeed {
    /// Content hash identifying the dataset
    pub hash: String,
    /// Previously recorded completed work-unit counts; averaged for the target
    #[serde(default)]
    pub work_unit_counts: Vec<f64>,
    /// Throughput samples per worker type
    #[serde(default)]
    pub samples: Vec<SampleSeed>,
}

/// Throughput samples for one worker type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleSeed {
    /// Worker type the samples were recorded on
    pub instance_type: String,
    /// Raw throughput samples (work units per second)
    pub values: Vec<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> ExperimentParams {
        ExperimentParams {
            aperture_h: 100.0,
            aperture_m: 50.0,
            window: 0.02,
            population: 30,
            generations: 10,
        }
    }

    #[tokio::test]
    async fn signature_registration_is_idempotent() {
        let store = MemoryPerformanceStore::new();
        let first = store.get_or_create_signature(&params()).await.unwrap();
        let second = store.get_or_create_signature(&params()).await.unwrap();
        assert_eq!(first, second);

        let other = ExperimentParams {
            generations: 20,
            ..params()
        };
        let third = store.get_or_create_signature(&other).await.unwrap();
        assert_ne!(first, third);
    }

    #[tokio::test]
    async fn work_unit_target_is_averaged() {
        let store = MemoryPerformanceStore::new();
        let signature = store.get_or_create_signature(&params()).await.unwrap();
        let dataset = store.register_dataset("abc123");

        assert_eq!(store.total_work_units(signature, dataset).await.unwrap(), None);

        store.record_completed_units(signature, dataset, 900.0).await.unwrap();
        store.record_completed_units(signature, dataset, 1100.0).await.unwrap();
        assert_eq!(
            store.total_work_units(signature, dataset).await.unwrap(),
            Some(1000.0)
        );
    }

    #[tokio::test]
    async fn stats_aggregate_recorded_samples() {
        let store = MemoryPerformanceStore::new();
        let signature = store.get_or_create_signature(&params()).await.unwrap();
        let dataset = store.register_dataset("abc123");

        for value in [1.0, 2.0, 3.0] {
            store
                .record_throughput_sample(dataset, signature, "c5.4xlarge", value)
                .await
                .unwrap();
        }

        let stats = store.throughput_stats(dataset, signature, None).await.unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].mean, 2.0);
        assert_eq!(stats[0].min, 1.0);
        assert_eq!(stats[0].max, 3.0);
        // population standard deviation of [1,2,3]
        assert!((stats[0].stddev - (2.0f64 / 3.0).sqrt()).abs() < 1e-12);

        let filtered = store
            .throughput_stats(dataset, signature, Some("m5.xlarge"))
            .await
            .unwrap();
        assert!(filtered.is_empty());
    }

    #[test]
    fn seed_round_trip() {
        let seed = StoreSeed {
            datasets: vec![DatasetSeed {
                hash: "abc123".to_string(),
                work_unit_counts: vec![1000.0],
                samples: vec![SampleSeed {
                    instance_type: "c5.4xlarge".to_string(),
                    values: vec![2.0, 2.0],
                }],
            }],
        };
        let store = MemoryPerformanceStore::from_seed(&params(), &seed);
        let dataset = store.register_dataset("abc123");
        let signature = store.signature_sync(&params());

        let inner = store.inner.lock().unwrap();
        assert_eq!(inner.completed[&(signature.0, dataset.0)], vec![1000.0]);
        assert_eq!(
            inner.samples[&(dataset.0, signature.0, "c5.4xlarge".to_string())],
            vec![2.0, 2.0]
        );
    }
}
