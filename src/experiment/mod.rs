//! Experiment Tracking Schema
//!
//! Records persisted by every [`TrackingBackend`](crate::backend::TrackingBackend).
//!
//! ## Schema Overview
//!
//! ```text
//! ExperimentRecord (1) ──< RunRecord (N)
//!                              │
//!                              ├──< MetricRecord (N) [time-series]
//!                              └──< ArtifactRecord (N) [content-hashed]
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use trueno_tracker::experiment::{ExperimentRecord, RunRecord, MetricRecord, RunStatus};
//!
//! let experiment = ExperimentRecord::new("exp-001", "My Experiment");
//!
//! let mut run = RunRecord::builder("run-001", experiment.experiment_id())
//!     .run_name("baseline")
//!     .build();
//! run.start();
//!
//! let metric = MetricRecord::new(run.run_id(), "loss", 0, 0.5);
//! assert_eq!(metric.step(), 0);
//!
//! run.complete(RunStatus::Success);
//! ```

mod artifact_record;
mod experiment_record;
mod metric_record;
pub(crate) mod metric_value;
mod run_record;
mod store;

pub use artifact_record::{content_hash, content_hash_bytes, ArtifactRecord};
pub use experiment_record::{ExperimentRecord, ExperimentRecordBuilder, LifecycleStage, Tags};
pub use metric_record::MetricRecord;
pub use run_record::{RunRecord, RunRecordBuilder, RunStatus};
pub use store::ExperimentStore;
