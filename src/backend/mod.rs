//! Tracking backends
//!
//! A backend is the store experiments, runs, metrics and artifacts are
//! written to. It is passed around as an explicit `Arc<dyn TrackingBackend>`
//! handle; there is no process-wide "current run".
//!
//! - [`MemoryBackend`]: process-local, `memory://` URIs
//! - [`FileBackend`]: directory tree, `file://` URIs, shareable with worker processes

mod file;
mod memory;

pub use file::FileBackend;
pub use memory::MemoryBackend;

use std::fmt::Debug;
use std::path::Path;
use std::sync::Arc;

use crate::experiment::{ArtifactRecord, ExperimentRecord, MetricRecord, RunRecord, Tags};
use crate::uri::TrackingUri;
use crate::Result;

/// Store operations the tracker and the background dispatcher rely on.
///
/// Implementations must tolerate concurrent calls from background threads.
/// All methods are blocking.
pub trait TrackingBackend: Send + Sync + Debug {
    /// The URI this store was opened from.
    fn uri(&self) -> &TrackingUri;

    /// Get an experiment by ID.
    fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>>;

    /// Get an experiment by exact name.
    fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>>;

    /// Create an experiment. Names are unique per store.
    ///
    /// When `artifact_location` is `None` the store picks its default.
    fn create_experiment(
        &self,
        name: &str,
        artifact_location: Option<&str>,
        tags: Tags,
    ) -> Result<ExperimentRecord>;

    /// Persist changes to an existing experiment (rename, lifecycle stage).
    fn update_experiment(&self, experiment: &ExperimentRecord) -> Result<()>;

    /// List every run of an experiment, oldest first.
    fn search_runs(&self, experiment_id: &str) -> Result<Vec<RunRecord>>;

    /// Get a run by ID.
    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>>;

    /// Insert or replace a run record.
    fn put_run(&self, run: &RunRecord) -> Result<()>;

    /// Append one metric point.
    fn log_metric(&self, metric: MetricRecord) -> Result<()>;

    /// Metric history for a run and key, ordered by step.
    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<MetricRecord>>;

    /// Store an in-memory blob at `artifact_path` under the run's artifact root.
    fn log_artifact_bytes(
        &self,
        run_id: &str,
        artifact_path: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRecord>;

    /// Copy a local file to `artifact_path` under the run's artifact root.
    fn log_artifact_file(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: &str,
    ) -> Result<ArtifactRecord>;

    /// List a run's artifacts, sorted by path.
    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>>;

    /// Read an artifact's content back.
    fn read_artifact(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>>;
}

/// Open the store a tracking URI names.
///
/// Every call returns a fresh handle. For `memory://` that means a fresh,
/// empty store: share the returned `Arc` to share data.
///
/// # Errors
///
/// Returns an error if the file store's root cannot be created.
pub fn open(uri: &TrackingUri) -> Result<Arc<dyn TrackingBackend>> {
    match uri {
        TrackingUri::File(root) => Ok(Arc::new(FileBackend::open(root)?)),
        TrackingUri::Memory(name) => Ok(Arc::new(MemoryBackend::named(name.clone()))),
    }
}

/// Normalize an artifact path: forward slashes, no leading `/`, no `..`.
pub(crate) fn clean_artifact_path(artifact_path: &str) -> Result<String> {
    let parts: Vec<&str> = artifact_path
        .split(['/', '\\'])
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();
    if parts.is_empty() || parts.contains(&"..") {
        return Err(crate::Error::Storage(format!(
            "invalid artifact path: {artifact_path:?}"
        )));
    }
    Ok(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_artifact_path() {
        assert_eq!(clean_artifact_path("a/b.txt").unwrap(), "a/b.txt");
        assert_eq!(clean_artifact_path("/a//./b.txt").unwrap(), "a/b.txt");
        assert_eq!(clean_artifact_path("a\\b.txt").unwrap(), "a/b.txt");
        assert!(clean_artifact_path("../escape").is_err());
        assert!(clean_artifact_path("").is_err());
    }

    #[test]
    fn test_open_memory_is_fresh_each_time() {
        let uri = TrackingUri::parse("memory://x").unwrap();
        let a = open(&uri).unwrap();
        let b = open(&uri).unwrap();
        a.create_experiment("only-in-a", None, Tags::new()).unwrap();
        assert!(b.get_experiment_by_name("only-in-a").unwrap().is_none());
    }
}
