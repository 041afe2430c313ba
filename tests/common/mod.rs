//! Shared test fixtures
//!
//! [`GatedBackend`] wraps a [`MemoryBackend`] and instruments `log_metric`:
//! per-key concurrency is recorded, and a closed gate holds calls for that
//! key until it is opened.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use trueno_tracker::backend::{MemoryBackend, TrackingBackend};
use trueno_tracker::experiment::{
    ArtifactRecord, ExperimentRecord, MetricRecord, RunRecord, Tags,
};
use trueno_tracker::uri::TrackingUri;
use trueno_tracker::Result;

pub const RUN_ID: &str = "run-test";

#[derive(Debug, Default)]
struct GateState {
    closed: HashSet<String>,
    active: HashMap<String, usize>,
    max_active: HashMap<String, usize>,
    entered: HashMap<String, usize>,
}

#[derive(Debug)]
pub struct GatedBackend {
    inner: MemoryBackend,
    state: Mutex<GateState>,
    changed: Condvar,
    delay: Duration,
}

impl GatedBackend {
    /// Backend with one experiment and a run under [`RUN_ID`].
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Like [`new`](Self::new), with every metric write taking at least `delay`.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        let inner = MemoryBackend::named("gated");
        let exp = inner
            .create_experiment("gated", None, Tags::new())
            .expect("create experiment");
        inner
            .put_run(&RunRecord::new(RUN_ID, exp.experiment_id()))
            .expect("create run");
        Arc::new(Self {
            inner,
            state: Mutex::new(GateState::default()),
            changed: Condvar::new(),
            delay,
        })
    }

    pub fn close(&self, key: &str) {
        self.state.lock().unwrap().closed.insert(key.to_string());
    }

    pub fn open(&self, key: &str) {
        self.state.lock().unwrap().closed.remove(key);
        self.changed.notify_all();
    }

    /// Highest number of simultaneous `log_metric` calls seen for `key`.
    pub fn max_active(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .max_active
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Number of `log_metric` calls that have started for `key`.
    pub fn entered(&self, key: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .entered
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    /// Block until `count` calls for `key` have started, or `timeout` passes.
    pub fn wait_entered(&self, key: &str, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().unwrap();
        loop {
            if state.entered.get(key).copied().unwrap_or(0) >= count {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self.changed.wait_timeout(state, deadline - now).unwrap().0;
        }
    }

    pub fn history(&self, key: &str) -> Vec<MetricRecord> {
        self.inner.get_metric_history(RUN_ID, key).unwrap()
    }
}

impl TrackingBackend for GatedBackend {
    fn uri(&self) -> &TrackingUri {
        self.inner.uri()
    }

    fn get_experiment(&self, experiment_id: &str) -> Result<Option<ExperimentRecord>> {
        self.inner.get_experiment(experiment_id)
    }

    fn get_experiment_by_name(&self, name: &str) -> Result<Option<ExperimentRecord>> {
        self.inner.get_experiment_by_name(name)
    }

    fn create_experiment(
        &self,
        name: &str,
        artifact_location: Option<&str>,
        tags: Tags,
    ) -> Result<ExperimentRecord> {
        self.inner.create_experiment(name, artifact_location, tags)
    }

    fn update_experiment(&self, experiment: &ExperimentRecord) -> Result<()> {
        self.inner.update_experiment(experiment)
    }

    fn search_runs(&self, experiment_id: &str) -> Result<Vec<RunRecord>> {
        self.inner.search_runs(experiment_id)
    }

    fn get_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        self.inner.get_run(run_id)
    }

    fn put_run(&self, run: &RunRecord) -> Result<()> {
        self.inner.put_run(run)
    }

    fn log_metric(&self, metric: MetricRecord) -> Result<()> {
        let key = metric.key().to_string();
        {
            let mut state = self.state.lock().unwrap();
            *state.entered.entry(key.clone()).or_default() += 1;
            let active = {
                let active = state.active.entry(key.clone()).or_default();
                *active += 1;
                *active
            };
            let max = state.max_active.entry(key.clone()).or_default();
            *max = (*max).max(active);
            self.changed.notify_all();
            while state.closed.contains(&key) {
                state = self.changed.wait(state).unwrap();
            }
        }

        std::thread::sleep(self.delay);
        let result = self.inner.log_metric(metric);

        let mut state = self.state.lock().unwrap();
        if let Some(active) = state.active.get_mut(&key) {
            *active -= 1;
        }
        self.changed.notify_all();
        result
    }

    fn get_metric_history(&self, run_id: &str, key: &str) -> Result<Vec<MetricRecord>> {
        self.inner.get_metric_history(run_id, key)
    }

    fn log_artifact_bytes(
        &self,
        run_id: &str,
        artifact_path: &str,
        bytes: &[u8],
    ) -> Result<ArtifactRecord> {
        self.inner.log_artifact_bytes(run_id, artifact_path, bytes)
    }

    fn log_artifact_file(
        &self,
        run_id: &str,
        local_path: &Path,
        artifact_path: &str,
    ) -> Result<ArtifactRecord> {
        self.inner.log_artifact_file(run_id, local_path, artifact_path)
    }

    fn list_artifacts(&self, run_id: &str) -> Result<Vec<ArtifactRecord>> {
        self.inner.list_artifacts(run_id)
    }

    fn read_artifact(&self, run_id: &str, artifact_path: &str) -> Result<Vec<u8>> {
        self.inner.read_artifact(run_id, artifact_path)
    }
}
