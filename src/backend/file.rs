//! Directory-backed backend.
//!
//! ## Layout
//!
//! ```text
//! <root>/<experiment_id>/meta.json
//! <root>/<experiment_id>/<run_id>/meta.json
//! <root>/<experiment_id>/<run_id>/metrics.jsonl      one MetricRecord per line
//! <root>/<experiment_id>/<run_id>/artifacts.jsonl    one ArtifactRecord per line, last wins
//! <artifact_location>/<run_id>/artifacts/<path>      artifact content
//! ```
//!
//! Metadata files are replaced atomically (write + rename). Metric and
//! artifact indexes are append-only with one `write_all` per line, so a
//! worker process and the parent can log to the same run concurrently.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use super::{clean_artifact_path, TrackingBackend};
use crate::experiment::{
    content_hash, ArtifactRecord, ExperimentRecord, MetricRecord, RunRecord, Tags,
};
use crate::uri::TrackingUri;
use crate::{Error, Result};

const META_FILE: &str = "meta.json";
const METRICS_FILE: &str = "metrics.jsonl";
const ARTIFACT_INDEX_FILE: &str = "artifacts.jsonl";

/// Tracking store rooted at a local directory.
#[derive(Debug)]
pub struct FileBackend {
    root: PathBuf,
    uri: TrackingUri,
}

impl FileBackend {
    /// Open (creating if needed) the store rooted at `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let uri = TrackingUri::parse(&root.as_ref().to_string_lossy())?;
        let TrackingUri::File(root) = uri.clone() else {
            return Err(Error::InvalidTrackingUri(uri.to_string()));
        };
        fs::create_dir_all(&root)?;
        Ok(Self { root, uri })
    }

    /// Root directory of the store.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn experiment_dir(&self, experiment_id: &str) -> PathBuf {
        self.root.join(experiment_id)
    }

    fn experiments(&self) -> Result<Vec<ExperimentRecord>> {
        let mut experiments = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let meta = entry?.path().join(META_FILE);
            if meta.is_file() {
                experiments.push(read_json(&meta)?);
            }
        }
        Ok(experiments)
    }

    /// Locate `<root>/<experiment_id>/<run_id>` by scanning experiments.
    fn run_dir(&self, run_id: &str) -> Result<Option<PathBuf>> {
        for entry in fs::read_dir(&self.root)? {
            let candidate = entry?.path().join(run_id);
            if candidate.join(META_FILE).is_file() {
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    fn require_run_dir(&self, run_id: &str) -> Result<PathBuf> {
        self.run_dir(run_id)?
            .ok_or_else(|| Error::RunNotFound(run_id.to_string()))
    }

    /// `<artifact_location>/<run_id>/artifacts`
    fn artifact_root(&self, run_id: &str) -> Result<PathBuf> {
        let run: RunRecord = read_json(&self.require_run_dir(run_id)?.join(META_FILE))?;
        let experiment = self
            .get_experiment(run.experiment_id())?
            .ok_or_else(|| Error::Storage(format!("run {run_id} has no experiment")))?;
        match TrackingUri::parse(experiment.artifact_location())? {
            TrackingUri::File(location) => Ok(location.join(run_id).join("artifacts")),
            other => Err(Error::Storage(format!(
                "artifact location {other} is not a local directory"
            ))),
        }
    }

    fn index_artifact(&self, record: &ArtifactRecord) -> Result<()> {
        let index = self.require_run_dir(record.run_id())?.join(ARTIFACT_INDEX_FILE);
        append_json_line(&index, record)
    }
}

impl TrackingBackend for FileBackend {
    fn uri(&self) -> &TrackingUri {
        &self.uri
    }

    fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>> {
        if experiment_id.is_empty() || experiment_id.contains(['/', '\\', '.']) {
            return Ok(None);
        }
        let meta = self.experiment_dir(experiment_id).join(META_FILE);
        if !meta.is_file() {
            return Ok(None);
        }
        read_json(&meta).map(Some)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>> {
        Ok(self.experiments()?.into_iter().find(|e| e.name() == name))
    }

    fn create_experiment(
        &self,
        name: &str,
        artifact_location: Option<&str>,
        tags: Tags,
    ) -> Result<ExperimentRecord> {
        if self.get_experiment_by_name(name)?.is_some() {
            return Err(Error::Storage(format!("experiment {name:?} already exists")));
        }
        let experiment_id = Uuid::new_v4().simple().to_string();
        let dir = self.experiment_dir(&experiment_id);
        fs::create_dir_all(&dir)?;

        let location = match artifact_location {
            Some(location) => TrackingUri::parse(location)?,
            None => TrackingUri::File(dir.clone()),
        };
        let experiment = ExperimentRecord::builder(experiment_id, name)
            .artifact_location(location.to_string())
            .tags(tags)
            .build();
        write_json_atomic(&dir.join(META_FILE), &experiment)?;
        Ok(experiment)
    }

    fn update_experiment(&self, experiment: &ExperimentRecord) -> Result<()> {
        let meta = self.experiment_dir(experiment.experiment_id()).join(META_FILE);
        if !meta.is_file() {
            return Err(Error::Storage(format!(
                "experiment {} does not exist",
                experiment.experiment_id()
            )));
        }
        write_json_atomic(&meta, experiment)
    }

    fn search_runs(&self, experiment_id: &str) -> Result<Vec<RunRecord>> {
        let dir = self.experiment_dir(experiment_id);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(dir)? {
            let meta = entry?.path().join(META_FILE);
            if meta.is_file() {
                runs.push(read_json::<RunRecord>(&meta)?);
            }
        }
        runs.sort_by_key(RunRecord::started_at);
        Ok(runs)
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        match self.run_dir(run_id)? {
            Some(dir) => read_json(&dir.join(META_FILE)).map(Some),
            None => Ok(None),
        }
    }

    fn put_run(&self, run: &RunRecord) -> Result<()> {
        let exp_dir = self.experiment_dir(run.experiment_id());
        if !exp_dir.join(META_FILE).is_file() {
            return Err(Error::Storage(format!(
                "experiment {} does not exist",
                run.experiment_id()
            )));
        }
        let dir = exp_dir.join(run.run_id());
        fs::create_dir_all(&dir)?;
        write_json_atomic(&dir.join(META_FILE), run)
    }

    fn log_metric(&self, metric: MetricRecord) -> Result<()> {
        let dir = self.require_run_dir(metric.run_id())?;
        append_json_line(&dir.join(METRICS_FILE), &metric)
    }

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<MetricRecord>> {
        let Some(dir) = self.run_dir(run_id)? else {
            return Ok(Vec::new());
        };
        let mut metrics: Vec<MetricRecord> = read_json_lines(&dir.join(METRICS_FILE))?
            .into_iter()
            .filter(|m: &MetricRecord| m.key() == key)
            .collect();
        metrics.sort_by_key(MetricRecord::series_order);
        Ok(metrics)
    }

    fn log_artifact_bytes(
        &self,
        run_id: &str,
        artifact_path: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRecord> {
        let path = clean_artifact_path(artifact_path)?;
        let target = self.artifact_root(run_id)?.join(&path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes)?;
        let (digest, size) = content_hash(bytes)?;
        let record = ArtifactRecord::new(run_id, path, digest, size);
        self.index_artifact(&record)?;
        Ok(record)
    }

    fn log_artifact_file(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: &str,
    ) -> Result<ArtifactRecord> {
        let path = clean_artifact_path(artifact_path)?;
        let target = self.artifact_root(run_id)?.join(&path);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(local_path, &target)?;
        let (digest, size) = content_hash(File::open(&target)?)?;
        let record = ArtifactRecord::new(run_id, path, digest, size);
        self.index_artifact(&record)?;
        Ok(record)
    }

    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        let Some(dir) = self.run_dir(run_id)? else {
            return Ok(Vec::new());
        };
        let latest: BTreeMap<String, ArtifactRecord> =
            read_json_lines::<ArtifactRecord>(&dir.join(ARTIFACT_INDEX_FILE))?
                .into_iter()
                .map(|record| (record.path().to_string(), record))
                .collect();
        Ok(latest.into_values().collect())
    }

    fn read_artifact(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>> {
        let path = clean_artifact_path(artifact_path)?;
        Ok(fs::read(self.artifact_root(run_id)?.join(path))?)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));
    fs::write(&tmp, serde_json::to_vec_pretty(value)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn append_json_line<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut line = serde_json::to_vec(value)?;
    line.push(b'\n');
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    file.write_all(&line)?;
    Ok(())
}

fn read_json_lines<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.is_file() {
        return Ok(Vec::new());
    }
    let mut values = Vec::new();
    for (index, line) in BufReader::new(File::open(path)?).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        // One torn or foreign line must not hide the rest of the series
        match serde_json::from_str(&line) {
            Ok(value) => values.push(value),
            Err(err) => warn!(
                path = %path.display(),
                line = index + 1,
                error = %err,
                "skipping unreadable index line"
            ),
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend_with_run(dir: &Path) -> (FileBackend, RunRecord) {
        let backend = FileBackend::open(dir).unwrap();
        let exp = backend
            .create_experiment("exp", None, Tags::new())
            .unwrap();
        let mut run = RunRecord::builder("run-1", exp.experiment_id())
            .run_name("first")
            .build();
        run.start();
        backend.put_run(&run).unwrap();
        (backend, run)
    }

    #[test]
    fn test_experiment_persists_across_handles() {
        let dir = tempfile::tempdir().unwrap();
        let created = FileBackend::open(dir.path())
            .unwrap()
            .create_experiment("persisted", None, Tags::new())
            .unwrap();

        let reopened = FileBackend::open(dir.path()).unwrap();
        assert_eq!(
            reopened.get_experiment_by_name("persisted").unwrap(),
            Some(created.clone())
        );
        assert_eq!(
            reopened.get_experiment(created.experiment_id()).unwrap(),
            Some(created)
        );
        assert!(reopened.get_experiment("../etc").unwrap().is_none());
    }

    #[test]
    fn test_run_round_trip_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, run) = backend_with_run(dir.path());
        assert_eq!(backend.get_run("run-1").unwrap(), Some(run.clone()));
        assert_eq!(backend.search_runs(run.experiment_id()).unwrap(), vec![run]);
        assert!(backend.get_run("missing").unwrap().is_none());
    }

    #[test]
    fn test_metrics_sorted_by_step() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _) = backend_with_run(dir.path());
        for step in [3, 1, 2] {
            backend
                .log_metric(MetricRecord::new("run-1", "loss", step, 1.0 / step as f64))
                .unwrap();
        }
        backend.log_metric(MetricRecord::new("run-1", "acc", 0, 0.5)).unwrap();

        let steps: Vec<u64> = backend
            .get_metric_history("run-1", "loss")
            .unwrap()
            .iter()
            .map(MetricRecord::step)
            .collect();
        assert_eq!(steps, vec![1, 2, 3]);
    }

    #[test]
    fn test_non_finite_metrics_keep_history_readable() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _) = backend_with_run(dir.path());
        backend.log_metric(MetricRecord::new("run-1", "acc", 0, 0.5)).unwrap();
        backend.log_metric(MetricRecord::new("run-1", "loss", 0, f64::NAN)).unwrap();
        backend
            .log_metric(MetricRecord::new("run-1", "loss", 1, f64::INFINITY))
            .unwrap();

        let acc = backend.get_metric_history("run-1", "acc").unwrap();
        assert_eq!(acc.len(), 1);
        assert!((acc[0].value() - 0.5).abs() < f64::EPSILON);

        let loss = backend.get_metric_history("run-1", "loss").unwrap();
        assert_eq!(loss.len(), 2);
        assert!(loss[0].value().is_nan());
        assert_eq!(loss[1].value(), f64::INFINITY);
    }

    #[test]
    fn test_unreadable_metric_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, _) = backend_with_run(dir.path());
        backend.log_metric(MetricRecord::new("run-1", "loss", 0, 1.0)).unwrap();

        let metrics = backend.require_run_dir("run-1").unwrap().join(METRICS_FILE);
        let mut file = OpenOptions::new().append(true).open(&metrics).unwrap();
        file.write_all(b"{\"run_id\":\"run-1\",\"key\":\"loss\",\"step\":1,\"value\":null\n")
            .unwrap();
        drop(file);
        backend.log_metric(MetricRecord::new("run-1", "loss", 2, 0.5)).unwrap();

        let steps: Vec<u64> = backend
            .get_metric_history("run-1", "loss")
            .unwrap()
            .iter()
            .map(MetricRecord::step)
            .collect();
        assert_eq!(steps, vec![0, 2]);
    }

    #[test]
    fn test_artifact_file_copy_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let (backend, run) = backend_with_run(dir.path());
        let source = dir.path().join("weights.bin");
        fs::write(&source, vec![1u8; 4096]).unwrap();

        let record = backend
            .log_artifact_file(run.run_id(), &source, "ckpt/weights.bin")
            .unwrap();
        assert_eq!(record.size_bytes(), 4096);

        // Re-logging the same path keeps a single index entry
        backend
            .log_artifact_bytes(run.run_id(), "ckpt/weights.bin", b"new")
            .unwrap();
        let listed = backend.list_artifacts(run.run_id()).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].size_bytes(), 3);
        assert_eq!(backend.read_artifact(run.run_id(), "ckpt/weights.bin").unwrap(), b"new");
    }

    #[test]
    fn test_put_run_requires_experiment() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::open(dir.path()).unwrap();
        let run = RunRecord::new("run-x", "no-such-experiment");
        assert!(matches!(backend.put_run(&run), Err(Error::Storage(_))));
    }
}
