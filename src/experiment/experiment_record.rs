//! Experiment Record - root entity for experiment tracking

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tag map shared by experiments and runs.
pub type Tags = BTreeMap<String, String>;

/// Lifecycle stage of an experiment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifecycleStage {
    /// Experiment is visible and accepts new runs.
    Active,
    /// Experiment was deleted (or can no longer be found by name).
    Deleted,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Deleted => f.write_str("deleted"),
        }
    }
}

/// Experiment Record represents a tracked experiment.
///
/// This is the root entity in the experiment tracking schema.
/// Each experiment can have multiple runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExperimentRecord {
    experiment_id: String,
    name: String,
    artifact_location: String,
    tags: Tags,
    lifecycle_stage: LifecycleStage,
    created_at: DateTime<Utc>,
    last_update_time: DateTime<Utc>,
}

impl ExperimentRecord {
    /// Create a new active experiment record with the given ID and name.
    ///
    /// # Arguments
    ///
    /// * `experiment_id` - Unique identifier for the experiment
    /// * `name` - Human-readable name for the experiment
    ///
    /// # Returns
    ///
    /// A new `ExperimentRecord` with the current timestamp, no tags and an
    /// empty artifact location (stores fill in their default).
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        ExperimentRecordBuilder::new(experiment_id, name).build()
    }

    /// Create a builder for constructing an experiment record with optional fields.
    #[must_use]
    pub fn builder(
        experiment_id: impl Into<String>,
        name: impl Into<String>,
    ) -> ExperimentRecordBuilder {
        ExperimentRecordBuilder::new(experiment_id, name)
    }

    /// Get the experiment ID.
    #[must_use]
    pub fn experiment_id(&self) -> &str {
        &self.experiment_id
    }

    /// Get the experiment name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the artifact location.
    #[must_use]
    pub fn artifact_location(&self) -> &str {
        &self.artifact_location
    }

    /// Get the experiment tags.
    #[must_use]
    pub const fn tags(&self) -> &Tags {
        &self.tags
    }

    /// Get the lifecycle stage.
    #[must_use]
    pub const fn lifecycle_stage(&self) -> LifecycleStage {
        self.lifecycle_stage
    }

    /// Get the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Get the last update timestamp.
    #[must_use]
    pub const fn last_update_time(&self) -> DateTime<Utc> {
        self.last_update_time
    }

    /// Rename the experiment and bump the update time.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
        self.touch();
    }

    /// Set the lifecycle stage and bump the update time.
    pub fn set_lifecycle_stage(&mut self, stage: LifecycleStage) {
        self.lifecycle_stage = stage;
        self.touch();
    }

    /// Set the artifact location when the store assigns one.
    pub fn set_artifact_location(&mut self, location: impl Into<String>) {
        self.artifact_location = location.into();
    }

    fn touch(&mut self) {
        self.last_update_time = Utc::now();
    }
}

/// Builder for `ExperimentRecord`.
#[derive(Debug)]
pub struct ExperimentRecordBuilder {
    experiment_id: String,
    name: String,
    artifact_location: String,
    tags: Tags,
    created_at: DateTime<Utc>,
}

impl ExperimentRecordBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(experiment_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            experiment_id: experiment_id.into(),
            name: name.into(),
            artifact_location: String::new(),
            tags: Tags::new(),
            created_at: Utc::now(),
        }
    }

    /// Set the artifact location.
    #[must_use]
    pub fn artifact_location(mut self, location: impl Into<String>) -> Self {
        self.artifact_location = location.into();
        self
    }

    /// Add a single tag.
    #[must_use]
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Merge a tag map.
    #[must_use]
    pub fn tags(mut self, tags: Tags) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Set a custom creation timestamp (useful for deserialization/testing).
    #[must_use]
    pub const fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Build the `ExperimentRecord`.
    #[must_use]
    pub fn build(self) -> ExperimentRecord {
        ExperimentRecord {
            experiment_id: self.experiment_id,
            name: self.name,
            artifact_location: self.artifact_location,
            tags: self.tags,
            lifecycle_stage: LifecycleStage::Active,
            created_at: self.created_at,
            last_update_time: self.created_at,
        }
    }
}
