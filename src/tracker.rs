//! Experiment resolution
//!
//! [`ExperimentTracker`] finds an experiment by name (then by id) or creates
//! it, and opens runs inside it.
//!
//! ## Example
//!
//! ```rust
//! use trueno_tracker::{ExperimentTracker, RunOptions, TrackerConfig};
//! use trueno_tracker::dispatch::{Isolation, LogCall};
//!
//! let tracker = TrackerConfig::builder()
//!     .experiment_name("Cool Experiment")
//!     .tracking_uri("memory://doc")
//!     .open()?;
//!
//! tracker.run(RunOptions::named("baseline"), |run| {
//!     for epoch in 0u32..3 {
//!         run.submit("loss", LogCall::metric("loss", 1.0 / f64::from(epoch + 1), u64::from(epoch)), Isolation::Thread)?;
//!     }
//!     Ok::<_, trueno_tracker::Error>(())
//! })?;
//! # Ok::<(), trueno_tracker::Error>(())
//! ```

use std::fmt;
use std::process::Command;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use crate::backend::{self, TrackingBackend};
use crate::config::{TrackerConfig, TrackerConfigBuilder};
use crate::dispatch::WorkerCommand;
use crate::experiment::{ExperimentRecord, LifecycleStage, RunRecord, RunStatus, Tags};
use crate::run::{ActiveRun, RunOptions};
use crate::uri::TrackingUri;
use crate::{Error, Result};

/// Experiment tag holding the commit the experiment was created from.
pub const GIT_COMMIT_TAG: &str = "git_commit";

/// Handle on one experiment in one store.
#[derive(Debug)]
pub struct ExperimentTracker {
    backend: Arc<dyn TrackingBackend>,
    experiment: ExperimentRecord,
    git_commit: Option<String>,
    worker: Option<WorkerCommand>,
}

impl ExperimentTracker {
    /// Start configuring a tracker; finish with
    /// [`open`](TrackerConfigBuilder::open) or [`build`](TrackerConfigBuilder::build).
    #[must_use]
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfig::builder()
    }

    /// Open the configured store and resolve the experiment.
    ///
    /// # Errors
    ///
    /// Returns an error if the tracking URI is invalid or resolution fails
    /// (see [`with_backend`](Self::with_backend)).
    pub fn open(config: &TrackerConfig) -> Result<Self> {
        let uri = config.resolve_tracking_uri()?;
        Self::with_backend(backend::open(&uri)?, config)
    }

    /// Resolve the experiment in an already-open store.
    ///
    /// `config.tracking_uri` is ignored; `backend` is used as given.
    ///
    /// Resolution order:
    /// 1. by `experiment_name` (error if missing and `create_new` is false);
    /// 2. by `experiment_id` (error if missing);
    /// 3. create `experiment_name` with the configured tags plus `git_commit`.
    ///
    /// # Errors
    ///
    /// [`Error::ExperimentNotFound`], [`Error::ExperimentIdNotFound`],
    /// [`Error::MissingExperimentName`], or a store error.
    pub fn with_backend(backend: Arc<dyn TrackingBackend>, config: &TrackerConfig) -> Result<Self> {
        let uri = backend.uri().to_string();
        let mut experiment = None;

        if let Some(name) = &config.experiment_name {
            experiment = backend.get_experiment_by_name(name)?;
            if experiment.is_none() && !config.create_new {
                return Err(Error::ExperimentNotFound {
                    name: name.clone(),
                    uri,
                });
            }
        }

        if experiment.is_none() {
            if let Some(id) = &config.experiment_id {
                experiment = Some(backend.get_experiment(id)?.ok_or_else(|| {
                    Error::ExperimentIdNotFound {
                        id: id.clone(),
                        uri: uri.clone(),
                    }
                })?);
            }
        }

        let experiment = match experiment {
            Some(existing) => existing,
            None => {
                let name = config
                    .experiment_name
                    .as_deref()
                    .ok_or(Error::MissingExperimentName)?;
                let mut tags: Tags = config.tags.clone();
                tags.insert(GIT_COMMIT_TAG.to_string(), git_revision_hash());
                info!(experiment = name, uri = %uri, "creating a new experiment");
                backend.create_experiment(name, config.artifact_location.as_deref(), tags)?
            }
        };

        let tracker = Self {
            git_commit: experiment.tags().get(GIT_COMMIT_TAG).cloned(),
            backend,
            experiment,
            worker: config.worker.clone(),
        };
        info!("\n{}", tracker.report());
        Ok(tracker)
    }

    /// Experiment id.
    #[must_use]
    pub fn id(&self) -> &str {
        self.experiment.experiment_id()
    }

    /// Current experiment name, re-read from the store (it may be renamed).
    ///
    /// # Errors
    ///
    /// Returns [`Error::ExperimentIdNotFound`] if the experiment is gone.
    pub fn name(&self) -> Result<String> {
        self.backend
            .get_experiment(self.id())?
            .map(|e| e.name().to_string())
            .ok_or_else(|| Error::ExperimentIdNotFound {
                id: self.id().to_string(),
                uri: self.uri().to_string(),
            })
    }

    /// Lifecycle stage; an experiment that can no longer be found is `Deleted`.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn lifecycle_stage(&self) -> Result<LifecycleStage> {
        Ok(self
            .backend
            .get_experiment(self.id())?
            .map_or(LifecycleStage::Deleted, |e| e.lifecycle_stage()))
    }

    /// Last update time, re-read from the store.
    ///
    /// # Errors
    ///
    /// Returns a store error or [`Error::ExperimentIdNotFound`].
    pub fn last_update_time(&self) -> Result<DateTime<Utc>> {
        Ok(self.current()?.last_update_time())
    }

    /// Artifact location, re-read from the store.
    ///
    /// # Errors
    ///
    /// Returns a store error or [`Error::ExperimentIdNotFound`].
    pub fn artifact_location(&self) -> Result<String> {
        Ok(self.current()?.artifact_location().to_string())
    }

    /// Tracking URI of the store.
    #[must_use]
    pub fn uri(&self) -> &TrackingUri {
        self.backend.uri()
    }

    /// Tags as of resolution.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        self.experiment.tags()
    }

    /// Creation time.
    #[must_use]
    pub const fn creation_time(&self) -> DateTime<Utc> {
        self.experiment.created_at()
    }

    /// Commit recorded when the experiment was created, if any.
    #[must_use]
    pub fn git_commit(&self) -> Option<&str> {
        self.git_commit.as_deref()
    }

    /// Store handle.
    #[must_use]
    pub const fn backend(&self) -> &Arc<dyn TrackingBackend> {
        &self.backend
    }

    /// All runs of the experiment, oldest first.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn runs(&self) -> Result<Vec<RunRecord>> {
        self.backend.search_runs(self.id())
    }

    /// Find a run by name (most recent match) or, failing that, by id.
    ///
    /// # Errors
    ///
    /// Returns a store error.
    pub fn find_run(&self, run_name: Option<&str>, run_id: Option<&str>) -> Result<Option<RunRecord>> {
        let runs = self.runs()?;
        if let Some(name) = run_name {
            if let Some(found) = runs.iter().rev().find(|r| r.run_name() == name) {
                return Ok(Some(found.clone()));
            }
        }
        Ok(run_id.and_then(|id| runs.into_iter().find(|r| r.run_id() == id)))
    }

    /// Start (or resume) a run.
    ///
    /// An existing run is reused when `options` names one, by name first and
    /// then by id, instead of creating a duplicate.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RunNotFound`] when an explicit run id does not exist,
    /// or a store error.
    pub fn start_run(&self, options: RunOptions) -> Result<ActiveRun> {
        let RunOptions {
            run_name,
            run_id,
            description,
            parent_run_id,
            tags,
        } = options;

        let existing = self.find_run(run_name.as_deref(), run_id.as_deref())?;

        let mut record = match (existing, run_id) {
            (Some(mut found), _) => {
                info!(run_name = found.run_name(), run_id = found.run_id(), "using a previous run");
                for (key, value) in tags {
                    found.set_tag(key, value);
                }
                if let Some(description) = description {
                    found.set_description(description);
                }
                found
            }
            (None, Some(id)) => match self.backend.get_run(&id)? {
                Some(other) if other.experiment_id() != self.id() => {
                    return Err(Error::Storage(format!(
                        "run {id} belongs to experiment {}",
                        other.experiment_id()
                    )));
                }
                _ => return Err(Error::RunNotFound(id)),
            },
            (None, None) => {
                let run_id = uuid::Uuid::new_v4().simple().to_string();
                let name = run_name.unwrap_or_else(|| format!("run-{}", &run_id[..8]));
                let mut builder = RunRecord::builder(run_id, self.id()).run_name(name).tags(tags);
                if let Some(description) = description {
                    builder = builder.description(description);
                }
                if let Some(parent) = parent_run_id {
                    builder = builder.parent_run_id(parent);
                }
                builder.build()
            }
        };

        record.start();
        self.backend.put_run(&record)?;

        let experiment_name = self.display_name();
        info!(
            "{experiment_name} ({}) - {} ({}): {}",
            self.id(),
            record.run_name(),
            record.run_id(),
            record.status()
        );
        Ok(ActiveRun::new(
            Arc::clone(&self.backend),
            experiment_name,
            record,
            self.worker.clone(),
        ))
    }

    /// Run `body` inside a run, finalizing it on every exit path.
    ///
    /// `Ok` ends the run as `Success`, `Err` as `Failed` (the error is
    /// returned unchanged), a panic as `Failed` during unwinding. Background
    /// tasks are drained before the run is finalized in all three cases.
    ///
    /// # Errors
    ///
    /// Returns the body's error, or a store error from starting/ending the run.
    pub fn run<T, E>(
        &self,
        options: RunOptions,
        body: impl FnOnce(&mut ActiveRun) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        let mut run = self.start_run(options)?;
        match body(&mut run) {
            Ok(value) => {
                run.finish(RunStatus::Success)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(end_err) = run.finish(RunStatus::Failed) {
                    tracing::warn!(%end_err, "failed to finalize run after error");
                }
                Err(err)
            }
        }
    }

    /// Multi-line status report of the experiment.
    #[must_use]
    pub fn report(&self) -> String {
        let current = self.current().ok();
        let record = current.as_ref().unwrap_or(&self.experiment);
        let stage = current
            .as_ref()
            .map_or(LifecycleStage::Deleted, ExperimentRecord::lifecycle_stage);
        format!(
            "--\n\
             Experiment Name: {}\n\
             Experiment ID: {}\n\
             Tracking URI: {}\n\
             Artifact Location: {}\n\
             Experiment Tags: {:?}\n\
             Lifecycle Stage: {}\n\
             Creation Timestamp: {}\n\
             Git commit: {}\n\
             --",
            record.name(),
            record.experiment_id(),
            self.uri(),
            record.artifact_location(),
            record.tags(),
            stage,
            record.created_at().timestamp_millis(),
            self.git_commit().unwrap_or("None"),
        )
    }

    fn current(&self) -> Result<ExperimentRecord> {
        self.backend
            .get_experiment(self.id())?
            .ok_or_else(|| Error::ExperimentIdNotFound {
                id: self.id().to_string(),
                uri: self.uri().to_string(),
            })
    }

    fn display_name(&self) -> String {
        self.name()
            .unwrap_or_else(|_| self.experiment.name().to_string())
    }
}

impl fmt::Display for ExperimentTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report())
    }
}

/// `git rev-parse HEAD` in the current directory, or an empty string.
#[must_use]
pub fn git_revision_hash() -> String {
    Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()
        .filter(|output| output.status.success())
        .map(|output| String::from_utf8_lossy(&output.stdout).trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn memory() -> Arc<dyn TrackingBackend> {
        Arc::new(MemoryBackend::new())
    }

    #[test]
    fn test_creates_then_reuses_by_name() {
        let backend = memory();
        let config = TrackerConfig::builder().experiment_name("exp").build();
        let first = ExperimentTracker::with_backend(Arc::clone(&backend), &config).unwrap();
        let second = ExperimentTracker::with_backend(backend, &config).unwrap();
        assert_eq!(first.id(), second.id());
        assert!(first.tags().contains_key(GIT_COMMIT_TAG));
    }

    #[test]
    fn test_builder_shortcut_opens_store() {
        let tracker = ExperimentTracker::builder()
            .experiment_name("short")
            .tracking_uri("memory://short")
            .open()
            .unwrap();
        assert_eq!(tracker.name().unwrap(), "short");
        assert_eq!(tracker.uri().to_string(), "memory://short");
    }

    #[test]
    fn test_create_new_false_refuses() {
        let config = TrackerConfig::builder()
            .experiment_name("absent")
            .create_new(false)
            .build();
        let err = ExperimentTracker::with_backend(memory(), &config).unwrap_err();
        assert!(matches!(err, Error::ExperimentNotFound { name, .. } if name == "absent"));
    }

    #[test]
    fn test_unknown_id_is_an_error() {
        let config = TrackerConfig::builder().experiment_id("nope").build();
        let err = ExperimentTracker::with_backend(memory(), &config).unwrap_err();
        assert!(matches!(err, Error::ExperimentIdNotFound { id, .. } if id == "nope"));
    }

    #[test]
    fn test_name_required_to_create() {
        let err = ExperimentTracker::with_backend(memory(), &TrackerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::MissingExperimentName));
    }

    #[test]
    fn test_lookup_by_id_when_name_unknown() {
        let backend = memory();
        let created = backend.create_experiment("by-id", None, Tags::new()).unwrap();
        let config = TrackerConfig::builder()
            .experiment_name("other-name")
            .experiment_id(created.experiment_id())
            .build();
        let tracker = ExperimentTracker::with_backend(backend, &config).unwrap();
        assert_eq!(tracker.id(), created.experiment_id());
        // Existing experiment without the tag: no commit recorded
        assert!(tracker.git_commit().is_none());
    }

    #[test]
    fn test_name_follows_renames_and_deletion() {
        let backend = memory();
        let config = TrackerConfig::builder().experiment_name("before").build();
        let tracker = ExperimentTracker::with_backend(Arc::clone(&backend), &config).unwrap();

        let mut record = backend.get_experiment(tracker.id()).unwrap().unwrap();
        record.rename("after");
        backend.update_experiment(&record).unwrap();
        assert_eq!(tracker.name().unwrap(), "after");
        assert_eq!(tracker.lifecycle_stage().unwrap(), LifecycleStage::Active);

        record.set_lifecycle_stage(LifecycleStage::Deleted);
        backend.update_experiment(&record).unwrap();
        assert_eq!(tracker.lifecycle_stage().unwrap(), LifecycleStage::Deleted);
    }

    #[test]
    fn test_report_lists_fields() {
        let config = TrackerConfig::builder()
            .experiment_name("reported")
            .tag("team", "vision")
            .build();
        let tracker = ExperimentTracker::with_backend(memory(), &config).unwrap();
        let report = tracker.to_string();
        assert!(report.starts_with("--\nExperiment Name: reported\n"));
        assert!(report.contains(&format!("Experiment ID: {}", tracker.id())));
        assert!(report.contains("Tracking URI: memory://default"));
        assert!(report.contains("\"team\": \"vision\""));
        assert!(report.contains("Lifecycle Stage: active"));
        assert!(report.ends_with("\n--"));
    }

    #[test]
    fn test_start_run_resumes_by_name() {
        let config = TrackerConfig::builder().experiment_name("resume").build();
        let tracker = ExperimentTracker::with_backend(memory(), &config).unwrap();

        let first = tracker.start_run(RunOptions::named("train")).unwrap();
        let first_id = first.run_id().to_string();
        first.finish(RunStatus::Success).unwrap();

        let again = tracker.start_run(RunOptions::named("train")).unwrap();
        assert_eq!(again.run_id(), first_id);
        assert_eq!(again.record().status(), RunStatus::Running);
        drop(again);
        assert_eq!(tracker.runs().unwrap().len(), 1);
    }

    #[test]
    fn test_start_run_unknown_id() {
        let config = TrackerConfig::builder().experiment_name("ids").build();
        let tracker = ExperimentTracker::with_backend(memory(), &config).unwrap();
        let err = tracker
            .start_run(RunOptions::new().run_id("missing"))
            .unwrap_err();
        assert!(matches!(err, Error::RunNotFound(id) if id == "missing"));
    }

    #[test]
    fn test_find_run_prefers_name() {
        let config = TrackerConfig::builder().experiment_name("find").build();
        let tracker = ExperimentTracker::with_backend(memory(), &config).unwrap();
        let a = tracker.start_run(RunOptions::named("a")).unwrap();
        let a_id = a.run_id().to_string();
        drop(a);
        let b = tracker.start_run(RunOptions::named("b")).unwrap();
        let b_id = b.run_id().to_string();
        drop(b);

        let by_name = tracker.find_run(Some("a"), Some(&b_id)).unwrap().unwrap();
        assert_eq!(by_name.run_id(), a_id);
        let by_id = tracker.find_run(Some("zzz"), Some(&b_id)).unwrap().unwrap();
        assert_eq!(by_id.run_name(), "b");
        assert!(tracker.find_run(None, None).unwrap().is_none());
    }
}
