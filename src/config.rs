//! Tracker configuration
//!
//! Built in code with [`TrackerConfig::builder`] or loaded from JSON:
//!
//! ```json
//! {
//!   "experiment_name": "Cool Experiment",
//!   "tracking_uri": "./mlruns",
//!   "tags": { "team": "vision" },
//!   "worker": { "program": "/usr/local/bin/trueno-tracker", "args": ["worker"] }
//! }
//! ```
//!
//! Tracking URI precedence: explicit value, then `TRUENO_TRACKING_URI`, then `./mlruns`.

use std::path::Path;

use serde::Deserialize;

use crate::dispatch::WorkerCommand;
use crate::experiment::Tags;
use crate::tracker::ExperimentTracker;
use crate::uri::TrackingUri;
use crate::Result;

const fn default_create_new() -> bool {
    true
}

/// Settings for resolving (or creating) an experiment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackerConfig {
    /// Experiment name to look up first (and to create under).
    #[serde(default)]
    pub experiment_name: Option<String>,
    /// Experiment id to fall back to when the name is not found.
    #[serde(default)]
    pub experiment_id: Option<String>,
    /// Tracking URI or bare path.
    #[serde(default)]
    pub tracking_uri: Option<String>,
    /// Artifact location for a newly created experiment.
    #[serde(default)]
    pub artifact_location: Option<String>,
    /// Create the experiment when no experiment has `experiment_name`.
    #[serde(default = "default_create_new")]
    pub create_new: bool,
    /// Tags for a newly created experiment.
    #[serde(default)]
    pub tags: Tags,
    /// Worker program for process-isolated tasks.
    #[serde(default)]
    pub worker: Option<WorkerCommand>,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            experiment_name: None,
            experiment_id: None,
            tracking_uri: None,
            artifact_location: None,
            create_new: default_create_new(),
            tags: Tags::new(),
            worker: None,
        }
    }
}

impl TrackerConfig {
    /// Start building a configuration.
    #[must_use]
    pub fn builder() -> TrackerConfigBuilder {
        TrackerConfigBuilder::default()
    }

    /// Load a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Resolve the tracking URI using the precedence rules.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured or environment URI is invalid.
    pub fn resolve_tracking_uri(&self) -> Result<TrackingUri> {
        match &self.tracking_uri {
            Some(uri) => TrackingUri::parse(uri),
            None => TrackingUri::from_env_or_default(),
        }
    }
}

/// Builder for [`TrackerConfig`].
#[derive(Debug, Default)]
pub struct TrackerConfigBuilder {
    config: TrackerConfig,
}

impl TrackerConfigBuilder {
    /// Experiment name.
    #[must_use]
    pub fn experiment_name(mut self, name: impl Into<String>) -> Self {
        self.config.experiment_name = Some(name.into());
        self
    }

    /// Experiment id.
    #[must_use]
    pub fn experiment_id(mut self, id: impl Into<String>) -> Self {
        self.config.experiment_id = Some(id.into());
        self
    }

    /// Tracking URI (`file://...`, `memory://...`) or bare path.
    #[must_use]
    pub fn tracking_uri(mut self, uri: impl Into<String>) -> Self {
        self.config.tracking_uri = Some(uri.into());
        self
    }

    /// Artifact location for a new experiment.
    #[must_use]
    pub fn artifact_location(mut self, location: impl Into<String>) -> Self {
        self.config.artifact_location = Some(location.into());
        self
    }

    /// Whether a missing experiment may be created (default `true`).
    #[must_use]
    pub const fn create_new(mut self, create_new: bool) -> Self {
        self.config.create_new = create_new;
        self
    }

    /// Add an experiment tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config.tags.insert(key.into(), value.into());
        self
    }

    /// Worker program for process isolation.
    #[must_use]
    pub fn worker(mut self, worker: WorkerCommand) -> Self {
        self.config.worker = Some(worker);
        self
    }

    /// Finish the configuration.
    #[must_use]
    pub fn build(self) -> TrackerConfig {
        self.config
    }

    /// Finish the configuration and resolve the experiment.
    ///
    /// # Errors
    ///
    /// See [`ExperimentTracker::open`].
    pub fn open(self) -> Result<ExperimentTracker> {
        ExperimentTracker::open(&self.config)
    }
}
