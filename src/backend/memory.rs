//! In-memory backend built on [`ExperimentStore`].
//!
//! Data is lost when the process exits and cannot be reached from a worker
//! process, so process isolation is refused for this backend.

use std::path::Path;

use dashmap::DashMap;
use uuid::Uuid;

use super::{clean_artifact_path, TrackingBackend};
use crate::experiment::{
    content_hash_bytes, ArtifactRecord, ExperimentRecord, ExperimentStore, MetricRecord,
    RunRecord, Tags,
};
use crate::uri::TrackingUri;
use crate::{Error, Result};

/// Process-local tracking store.
///
/// # Example
///
/// ```rust
/// use trueno_tracker::backend::{MemoryBackend, TrackingBackend};
/// use trueno_tracker::experiment::Tags;
///
/// let backend = MemoryBackend::new();
/// let exp = backend.create_experiment("demo", None, Tags::new())?;
/// assert_eq!(backend.get_experiment_by_name("demo")?, Some(exp));
/// # Ok::<(), trueno_tracker::Error>(())
/// ```
#[derive(Debug)]
pub struct MemoryBackend {
    uri: TrackingUri,
    store: ExperimentStore,
    blobs: DashMap<(String, String), Vec<u8>>,
}

impl MemoryBackend {
    /// Create an anonymous in-memory backend.
    #[must_use]
    pub fn new() -> Self {
        Self::named("default")
    }

    /// Create an in-memory backend reported as `memory://<name>`.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            uri: TrackingUri::Memory(name.into()),
            store: ExperimentStore::new(),
            blobs: DashMap::new(),
        }
    }

    /// Direct access to the underlying record store.
    #[must_use]
    pub const fn store(&self) -> &ExperimentStore {
        &self.store
    }

    fn ensure_run(&self, run_id: &str) -> Result<()> {
        if self.store.get_run(run_id).is_none() {
            return Err(Error::RunNotFound(run_id.to_string()));
        }
        Ok(())
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingBackend for MemoryBackend {
    fn uri(&self) -> &TrackingUri {
        &self.uri
    }

    fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>> {
        Ok(self.store.get_experiment(experiment_id))
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>> {
        Ok(self.store.find_experiment_by_name(name))
    }

    fn create_experiment(
        &self,
        name: &str,
        artifact_location: Option<&str>,
        tags: Tags,
    ) -> Result<ExperimentRecord> {
        if self.store.find_experiment_by_name(name).is_some() {
            return Err(Error::Storage(format!("experiment {name:?} already exists")));
        }
        let experiment_id = Uuid::new_v4().simple().to_string();
        let location = artifact_location.map_or_else(
            || format!("{}/{experiment_id}", self.uri),
            ToString::to_string,
        );
        let experiment = ExperimentRecord::builder(experiment_id, name)
            .artifact_location(location)
            .tags(tags)
            .build();
        self.store.put_experiment(experiment.clone());
        Ok(experiment)
    }

    fn update_experiment(&self, experiment: &ExperimentRecord) -> Result<()> {
        if self.store.get_experiment(experiment.experiment_id()).is_none() {
            return Err(Error::Storage(format!(
                "experiment {} does not exist",
                experiment.experiment_id()
            )));
        }
        self.store.put_experiment(experiment.clone());
        Ok(())
    }

    fn search_runs(&self, experiment_id: &str) -> Result<Vec<RunRecord>> {
        Ok(self.store.get_runs_for_experiment(experiment_id))
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.store.get_run(run_id))
    }

    fn put_run(&self, run: &RunRecord) -> Result<()> {
        self.store.put_run(run.clone());
        Ok(())
    }

    fn log_metric(&self, metric: MetricRecord) -> Result<()> {
        self.ensure_run(metric.run_id())?;
        self.store.add_metric(metric);
        Ok(())
    }

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<MetricRecord>> {
        Ok(self.store.get_metrics_for_run(run_id, key))
    }

    fn log_artifact_bytes(
        &self,
        run_id: &str,
        artifact_path: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRecord> {
        self.ensure_run(run_id)?;
        let path = clean_artifact_path(artifact_path)?;
        let record = ArtifactRecord::new(
            run_id,
            path.clone(),
            content_hash_bytes(bytes),
            bytes.len() as u64,
        );
        self.blobs.insert((run_id.to_string(), path), bytes.to_vec());
        self.store.add_artifact(record.clone());
        Ok(record)
    }

    fn log_artifact_file(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: &str,
    ) -> Result<ArtifactRecord> {
        let bytes = std::fs::read(local_path)?;
        self.log_artifact_bytes(run_id, artifact_path, &bytes)
    }

    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        Ok(self.store.get_artifacts_for_run(run_id))
    }

    fn read_artifact(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>> {
        let key = (run_id.to_string(), clean_artifact_path(artifact_path)?);
        self.blobs
            .get(&key)
            .map(|blob| blob.value().clone())
            .ok_or_else(|| Error::Storage(format!("artifact {artifact_path:?} not found in run {run_id}")))
    }
}
