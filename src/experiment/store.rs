//! Experiment Store - concurrent in-memory storage for experiment tracking data
//!
//! Every method takes `&self`: background logging threads write metrics and
//! artifacts while the owning run keeps reading.

use dashmap::DashMap;

use super::{ArtifactRecord, ExperimentRecord, MetricRecord, RunRecord};

/// In-memory store for experiment tracking data.
///
/// ## Design
///
/// Uses `DashMap` shards for lock-free-ish O(1) lookups by ID. Metrics are
/// kept per run in insertion order and sorted on read, so concurrent writers
/// for different keys never contend on a single vector lock for long.
///
/// ## Time-Series Optimization
///
/// `get_metrics_for_run` returns metrics ordered by step (then wall time),
/// enabling time-series visualization and analysis.
#[derive(Debug, Default)]
pub struct ExperimentStore {
    experiments: DashMap<String, ExperimentRecord>,
    runs: DashMap<String, RunRecord>,
    metrics: DashMap<String, Vec<MetricRecord>>,
    artifacts: DashMap<String, Vec<ArtifactRecord>>,
}

impl ExperimentStore {
    /// Create a new empty experiment store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Check if the store is empty (no experiments, runs, or metrics).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.experiments.is_empty() && self.runs.is_empty() && self.metrics.is_empty()
    }

    /// Get the number of experiments in the store.
    #[must_use]
    pub fn experiment_count(&self) -> usize {
        self.experiments.len()
    }

    /// Get the number of runs in the store.
    #[must_use]
    pub fn run_count(&self) -> usize {
        self.runs.len()
    }

    /// Get the number of metric points in the store.
    #[must_use]
    pub fn metric_count(&self) -> usize {
        self.metrics.iter().map(|entry| entry.value().len()).sum()
    }

    /// Insert or replace an experiment.
    pub fn put_experiment(&self, experiment: ExperimentRecord) {
        self.experiments
            .insert(experiment.experiment_id().to_string(), experiment);
    }

    /// Get an experiment by ID.
    #[must_use]
    pub fn get_experiment(&self, experiment_id: &str) -> Option<ExperimentRecord> {
        self.experiments.get(experiment_id).map(|e| e.value().clone())
    }

    /// Find an experiment by exact (case-sensitive) name.
    #[must_use]
    pub fn find_experiment_by_name(&self, name: &str) -> Option<ExperimentRecord> {
        self.experiments
            .iter()
            .find(|entry| entry.value().name() == name)
            .map(|entry| entry.value().clone())
    }

    /// Insert or replace a run.
    pub fn put_run(&self, run: RunRecord) {
        self.runs.insert(run.run_id().to_string(), run);
    }

    /// Get a run by ID.
    #[must_use]
    pub fn get_run(&self, run_id: &str) -> Option<RunRecord> {
        self.runs.get(run_id).map(|r| r.value().clone())
    }

    /// Get all runs for an experiment, oldest first.
    #[must_use]
    pub fn get_runs_for_experiment(&self, experiment_id: &str) -> Vec<RunRecord> {
        let mut runs: Vec<RunRecord> = self
            .runs
            .iter()
            .filter(|entry| entry.value().experiment_id() == experiment_id)
            .map(|entry| entry.value().clone())
            .collect();
        runs.sort_by_key(RunRecord::started_at);
        runs
    }

    /// Append a metric point.
    pub fn add_metric(&self, metric: MetricRecord) {
        self.metrics
            .entry(metric.run_id().to_string())
            .or_default()
            .push(metric);
    }

    /// Get metrics for a specific run and key, ordered by step.
    ///
    /// ## Example
    ///
    /// ```rust
    /// use trueno_tracker::experiment::{ExperimentStore, MetricRecord};
    ///
    /// let store = ExperimentStore::new();
    ///
    /// for step in 0..100 {
    ///     let loss = 1.0 / (step as f64 + 1.0);
    ///     store.add_metric(MetricRecord::new("run-001", "loss", step, loss));
    /// }
    ///
    /// let loss_metrics = store.get_metrics_for_run("run-001", "loss");
    /// assert_eq!(loss_metrics.len(), 100);
    /// ```
    #[must_use]
    pub fn get_metrics_for_run(&self, run_id: &str, key: &str) -> Vec<MetricRecord> {
        let mut metrics: Vec<MetricRecord> = self
            .metrics
            .get(run_id)
            .map(|points| points.iter().filter(|m| m.key() == key).cloned().collect())
            .unwrap_or_default();
        metrics.sort_by_key(MetricRecord::series_order);
        metrics
    }

    /// Record an artifact, replacing any earlier record at the same path.
    pub fn add_artifact(&self, artifact: ArtifactRecord) {
        let mut entry = self.artifacts.entry(artifact.run_id().to_string()).or_default();
        entry.retain(|existing| existing.path() != artifact.path());
        entry.push(artifact);
    }

    /// List artifacts for a run, sorted by path.
    #[must_use]
    pub fn get_artifacts_for_run(&self, run_id: &str) -> Vec<ArtifactRecord> {
        let mut artifacts = self
            .artifacts
            .get(run_id)
            .map(|a| a.value().clone())
            .unwrap_or_default();
        artifacts.sort_by(|a, b| a.path().cmp(b.path()));
        artifacts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_store_default() {
        let store = ExperimentStore::new();
        assert!(store.is_empty());
        assert_eq!(store.experiment_count(), 0);
        assert_eq!(store.run_count(), 0);
        assert_eq!(store.metric_count(), 0);
    }

    #[test]
    fn test_store_add_and_get() {
        let store = ExperimentStore::new();

        store.put_experiment(ExperimentRecord::new("exp-1", "Test"));
        store.put_run(RunRecord::new("run-1", "exp-1"));
        store.add_metric(MetricRecord::new("run-1", "loss", 0, 0.5));

        assert!(!store.is_empty());
        assert!(store.get_experiment("exp-1").is_some());
        assert_eq!(store.find_experiment_by_name("Test").unwrap().experiment_id(), "exp-1");
        assert!(store.find_experiment_by_name("test").is_none());
        assert!(store.get_run("run-1").is_some());
        assert_eq!(store.get_runs_for_experiment("exp-1").len(), 1);
    }

    #[test]
    fn test_get_metrics_for_run_ordering() {
        let store = ExperimentStore::new();

        store.add_metric(MetricRecord::new("run-1", "loss", 2, 0.2));
        store.add_metric(MetricRecord::new("run-1", "loss", 0, 0.0));
        store.add_metric(MetricRecord::new("run-1", "acc", 0, 0.9));
        store.add_metric(MetricRecord::new("run-1", "loss", 1, 0.1));

        let metrics = store.get_metrics_for_run("run-1", "loss");

        assert_eq!(metrics.len(), 3);
        assert_eq!(metrics[0].step(), 0);
        assert_eq!(metrics[1].step(), 1);
        assert_eq!(metrics[2].step(), 2);
    }

    #[test]
    fn test_artifact_replaced_at_same_path() {
        let store = ExperimentStore::new();
        store.add_artifact(ArtifactRecord::new("run-1", "b.bin", "fxhash:1", 1));
        store.add_artifact(ArtifactRecord::new("run-1", "a.bin", "fxhash:2", 2));
        store.add_artifact(ArtifactRecord::new("run-1", "b.bin", "fxhash:3", 3));

        let artifacts = store.get_artifacts_for_run("run-1");
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].path(), "a.bin");
        assert_eq!(artifacts[1].content_hash(), "fxhash:3");
    }

    #[test]
    fn test_concurrent_metric_writers() {
        let store = Arc::new(ExperimentStore::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for step in 0..100 {
                        store.add_metric(MetricRecord::new("run-1", format!("k{t}"), step, 0.0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.metric_count(), 800);
        assert_eq!(store.get_metrics_for_run("run-1", "k3").len(), 100);
    }
}
