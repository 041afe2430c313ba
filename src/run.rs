//! Run scope
//!
//! An [`ActiveRun`] owns the run's [`Dispatcher`]. Ending the run, by
//! [`ActiveRun::finish`] or by dropping it (including during a panic), first
//! drains every background task and only then writes the final status.
//! Finalization happens exactly once.

use std::path::Path;
use std::sync::Arc;

use tracing::{info, warn};

use crate::backend::TrackingBackend;
use crate::dispatch::{Dispatcher, DrainReport, Isolation, LogCall, WorkerCommand};
use crate::experiment::{MetricRecord, RunRecord, RunStatus, Tags};
use crate::Result;

/// How to find or create a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    pub(crate) run_name: Option<String>,
    pub(crate) run_id: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) parent_run_id: Option<String>,
    pub(crate) tags: Tags,
}

impl RunOptions {
    /// No name, no id: always a new run with a generated name.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse the most recent run with this name, or create one.
    #[must_use]
    pub fn named(run_name: impl Into<String>) -> Self {
        Self::new().run_name(run_name)
    }

    /// Run name (looked up before the id).
    #[must_use]
    pub fn run_name(mut self, run_name: impl Into<String>) -> Self {
        self.run_name = Some(run_name.into());
        self
    }

    /// Existing run id to resume.
    #[must_use]
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Description stored on the run.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Nest a new run under `parent_run_id`.
    #[must_use]
    pub fn nested_in(mut self, parent_run_id: impl Into<String>) -> Self {
        self.parent_run_id = Some(parent_run_id.into());
        self
    }

    /// Add a run tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Final state of a run plus what its background tasks did.
#[derive(Debug, Clone)]
pub struct RunSummary {
    record: RunRecord,
    tasks: DrainReport,
}

impl RunSummary {
    /// Run record as stored after finalization.
    #[must_use]
    pub const fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Outcome of the final drain.
    #[must_use]
    pub const fn tasks(&self) -> &DrainReport {
        &self.tasks
    }
}

/// A started run. See the module docs for the end-of-scope contract.
#[derive(Debug)]
pub struct ActiveRun {
    backend: Arc<dyn TrackingBackend>,
    experiment_name: String,
    record: RunRecord,
    dispatcher: Dispatcher,
    finished: bool,
}

impl ActiveRun {
    pub(crate) fn new(
        backend: Arc<dyn TrackingBackend>,
        experiment_name: String,
        record: RunRecord,
        worker: Option<WorkerCommand>,
    ) -> Self {
        let mut dispatcher = Dispatcher::new(Arc::clone(&backend), record.run_id());
        if let Some(worker) = worker {
            dispatcher = dispatcher.with_worker(worker);
        }
        Self {
            backend,
            experiment_name,
            record,
            dispatcher,
            finished: false,
        }
    }

    /// Run id.
    #[must_use]
    pub fn run_id(&self) -> &str {
        self.record.run_id()
    }

    /// Run name.
    #[must_use]
    pub fn run_name(&self) -> &str {
        self.record.run_name()
    }

    /// Parent experiment id.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        self.record.experiment_id()
    }

    /// Run record as last written by this handle.
    #[must_use]
    pub const fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Submit a background logging call. See [`Dispatcher::submit`].
    ///
    /// # Errors
    ///
    /// Usage faults only.
    pub fn submit(&mut self, name: &str, call: LogCall, isolation: Isolation) -> Result<()> {
        self.dispatcher.submit(name, call, isolation)
    }

    /// Wait for every background task submitted so far.
    pub fn drain(&mut self) -> DrainReport {
        self.dispatcher.drain()
    }

    /// Whether the background task under `name` is still executing.
    pub fn is_running(&mut self, name: &str) -> bool {
        self.dispatcher.is_running(name)
    }

    /// Names with a registered background task.
    #[must_use]
    pub fn pending_tasks(&self) -> Vec<&str> {
        self.dispatcher.names()
    }

    /// Execute a logging call on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn log(&self, call: &LogCall) -> Result<()> {
        call.execute(self.backend.as_ref(), self.run_id())
    }

    /// Record a metric on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn log_metric(&self, key: &str, value: f64, step: u64) -> Result<()> {
        self.backend
            .log_metric(MetricRecord::new(self.run_id(), key, step, value))
    }

    /// Copy a file into the run's artifacts on the calling thread.
    ///
    /// # Errors
    ///
    /// Returns the backend's or filesystem's error.
    pub fn log_artifact(&self, local_path: impl AsRef<Path>) -> Result<()> {
        self.log(&LogCall::artifact(local_path.as_ref()))
    }

    /// Set a run tag and persist it.
    ///
    /// # Errors
    ///
    /// Returns the backend's error.
    pub fn set_tag(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        self.record.set_tag(key, value);
        self.backend.put_run(&self.record)
    }

    /// Drain background tasks, then end the run with `status`.
    ///
    /// # Errors
    ///
    /// Returns the backend's error when writing the final status.
    pub fn finish(mut self, status: RunStatus) -> Result<RunSummary> {
        self.finalize(status)
    }

    fn finalize(&mut self, status: RunStatus) -> Result<RunSummary> {
        self.finished = true;

        let tasks = self.dispatcher.drain();
        if !tasks.is_clean() {
            warn!(
                run_id = self.record.run_id(),
                failed = tasks.failures().len(),
                "background tasks failed during run"
            );
        }

        self.record.complete(status);
        self.backend.put_run(&self.record)?;
        let record = self
            .backend
            .get_run(self.record.run_id())?
            .unwrap_or_else(|| self.record.clone());

        info!(
            "{} ({}) - {} ({}): {}",
            self.experiment_name,
            record.experiment_id(),
            record.run_name(),
            record.run_id(),
            record.status()
        );
        if let Some(parent) = record.parent_run_id() {
            info!(parent_run_id = parent, "returning to parent run");
        }

        Ok(RunSummary { record, tasks })
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let status = if std::thread::panicking() {
            RunStatus::Failed
        } else {
            RunStatus::Success
        };
        if let Err(err) = self.finalize(status) {
            warn!(run_id = self.record.run_id(), %err, "failed to finalize run on drop");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn active_run() -> (Arc<MemoryBackend>, ActiveRun) {
        let backend = Arc::new(MemoryBackend::new());
        let exp = backend.create_experiment("runs", None, Tags::new()).unwrap();
        let mut record = RunRecord::builder("run-1", exp.experiment_id())
            .run_name("unit")
            .build();
        record.start();
        backend.put_run(&record).unwrap();
        let run = ActiveRun::new(backend.clone(), "runs".to_string(), record, None);
        (backend, run)
    }

    #[test]
    fn test_options_builder() {
        let options = RunOptions::named("train")
            .description("first try")
            .nested_in("parent")
            .tag("lr", "0.01");
        assert_eq!(options.run_name.as_deref(), Some("train"));
        assert_eq!(options.parent_run_id.as_deref(), Some("parent"));
        assert_eq!(options.tags["lr"], "0.01");
    }

    #[test]
    fn test_finish_drains_then_completes() {
        let (backend, mut run) = active_run();
        run.submit("loss", LogCall::metric("loss", 0.5, 0), Isolation::Thread)
            .unwrap();
        let summary = run.finish(RunStatus::Success).unwrap();

        assert_eq!(summary.tasks().completed(), 1);
        assert_eq!(summary.record().status(), RunStatus::Success);
        assert!(summary.record().ended_at().is_some());
        assert_eq!(backend.get_metric_history("run-1", "loss").unwrap().len(), 1);
    }

    #[test]
    fn test_drop_finalizes_once_as_success() {
        let (backend, mut run) = active_run();
        run.submit("loss", LogCall::metric("loss", 0.5, 0), Isolation::Thread)
            .unwrap();
        drop(run);
        let stored = backend.get_run("run-1").unwrap().unwrap();
        assert_eq!(stored.status(), RunStatus::Success);
        assert_eq!(backend.get_metric_history("run-1", "loss").unwrap().len(), 1);
    }

    #[test]
    fn test_set_tag_persists() {
        let (backend, mut run) = active_run();
        run.set_tag("phase", "warmup").unwrap();
        let stored = backend.get_run("run-1").unwrap().unwrap();
        assert_eq!(stored.tags()["phase"], "warmup");
    }

    #[test]
    fn test_background_failure_does_not_fail_run() {
        let (_, mut run) = active_run();
        run.submit("bad", LogCall::artifact("/missing/file"), Isolation::Thread)
            .unwrap();
        let summary = run.finish(RunStatus::Success).unwrap();
        assert_eq!(summary.record().status(), RunStatus::Success);
        assert_eq!(summary.tasks().failures().len(), 1);
    }
}
