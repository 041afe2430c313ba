//! # trueno-tracker: Experiment Tracking with Background Logging
//!
//! Locate-or-create an experiment, locate-or-create a run inside it, and log
//! to it without blocking the training loop.
//!
//! ## Design Principles
//!
//! - **Explicit handles**: every tracker, run and dispatcher holds the store
//!   it writes to. No process-wide "active run".
//! - **Named background units**: one unit in flight per name; the next
//!   submission under that name waits for it (backpressure).
//! - **Drain before finalize**: a run never ends with work outstanding.
//! - **Failures stay non-fatal**: a failed background log is reported, never
//!   turned into a failure of the run.
//!
//! ## Example Usage
//!
//! ```rust
//! use trueno_tracker::{RunOptions, TrackerConfig};
//! use trueno_tracker::dispatch::{Isolation, LogCall};
//!
//! let tracker = TrackerConfig::builder()
//!     .experiment_name("Cool Experiment")
//!     .tracking_uri("memory://example")
//!     .open()?;
//!
//! let mut run = tracker.start_run(RunOptions::named("BackgroundLogger"))?;
//! for epoch in 0..10u64 {
//!     run.submit("cool_loss", LogCall::metric("cool_loss", 0.1, epoch), Isolation::Thread)?;
//! }
//! let summary = run.finish(trueno_tracker::experiment::RunStatus::Success)?;
//! assert_eq!(summary.tasks().completed(), 10);
//! # Ok::<(), trueno_tracker::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod backend;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod experiment;
pub mod run;
pub mod tracker;
pub mod uri;

pub use config::{TrackerConfig, TrackerConfigBuilder};
pub use error::{Error, Result};
pub use run::{ActiveRun, RunOptions, RunSummary};
pub use tracker::ExperimentTracker;
pub use uri::TrackingUri;
