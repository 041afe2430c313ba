//! Background task dispatcher
//!
//! Named, fire-and-forget logging units with a synchronous-replace contract:
//!
//! - [`Dispatcher::submit`] under a name that already has a unit first joins
//!   that unit (blocking the caller if it is still running), then launches
//!   the new one and returns without waiting for it.
//! - Units under different names never wait on each other.
//! - [`Dispatcher::drain`] joins every registered unit and empties the registry.
//!
//! Per name the units therefore form a total order with no overlap. Across
//! names there is no ordering.
//!
//! Failures inside a unit are never returned from `submit`. They are logged
//! and collected when the unit is joined, and reported by `drain` as values.
//! There is no cancellation and no timeout: a unit that never finishes blocks
//! the next same-name `submit` and every `drain` forever.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use trueno_tracker::backend::{MemoryBackend, TrackingBackend};
//! use trueno_tracker::dispatch::{Dispatcher, Isolation, LogCall};
//! use trueno_tracker::experiment::{RunRecord, Tags};
//!
//! let backend = Arc::new(MemoryBackend::new());
//! let exp = backend.create_experiment("demo", None, Tags::new())?;
//! backend.put_run(&RunRecord::new("run-1", exp.experiment_id()))?;
//!
//! let mut dispatcher = Dispatcher::new(backend.clone(), "run-1");
//! dispatcher.submit("loss", LogCall::metric("loss", 0.9, 0), Isolation::Thread)?;
//! dispatcher.submit("loss", LogCall::metric("loss", 0.7, 1), Isolation::Thread)?;
//!
//! let report = dispatcher.drain();
//! assert_eq!(report.completed(), 2);
//! assert_eq!(backend.get_metric_history("run-1", "loss")?.len(), 2);
//! # Ok::<(), trueno_tracker::Error>(())
//! ```

mod call;
mod isolation;
mod outcome;
pub mod worker;

pub use call::{ImageData, LogCall};
pub use isolation::Isolation;
pub use outcome::{DrainReport, FailureCause, TaskFailure};
pub use worker::WorkerCommand;

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use crate::backend::TrackingBackend;
use crate::{Error, Result};
use isolation::Unit;
use worker::WorkerRequest;

/// The most recent unit submitted under one name.
struct Slot {
    unit: Unit,
    operation: &'static str,
    isolation: Isolation,
}

/// Registry of named background units for one run.
///
/// Owned by a single control flow (`&mut self` everywhere); the map itself is
/// not shared with the units.
pub struct Dispatcher {
    backend: Arc<dyn TrackingBackend>,
    run_id: String,
    worker: Option<WorkerCommand>,
    slots: FxHashMap<String, Slot>,
    completed: usize,
    failures: Vec<TaskFailure>,
}

impl Dispatcher {
    /// Create a dispatcher logging to `run_id` through `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn TrackingBackend>, run_id: impl Into<String>) -> Self {
        Self {
            backend,
            run_id: run_id.into(),
            worker: None,
            slots: FxHashMap::default(),
            completed: 0,
            failures: Vec::new(),
        }
    }

    /// Use `worker` for process-isolated units instead of the current executable.
    #[must_use]
    pub fn with_worker(mut self, worker: WorkerCommand) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Run the units log to.
    #[must_use]
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Number of registered units (running or finished-but-unjoined).
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// No units registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registered task names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.slots.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether the unit under `name` is still executing.
    ///
    /// Unknown names are not an error: there is nothing running.
    pub fn is_running(&mut self, name: &str) -> bool {
        self.slots
            .get_mut(name)
            .is_some_and(|slot| !slot.unit.is_finished())
    }

    /// Submit `call` under `name`.
    ///
    /// Blocks only while a previous unit under the same name is still
    /// running; returns as soon as the new unit is launched.
    ///
    /// # Errors
    ///
    /// Usage faults only: an empty name, process isolation against a store a
    /// worker cannot reopen, [`Error::WorkerReentry`] when the default worker
    /// is needed inside a worker process, or failure to launch the unit. Failures of the
    /// call itself are reported by [`drain`](Self::drain).
    pub fn submit(&mut self, name: &str, call: LogCall, isolation: Isolation) -> Result<()> {
        if name.is_empty() {
            return Err(Error::EmptyTaskName);
        }
        if isolation == Isolation::Process && !self.backend.uri().is_shareable() {
            return Err(Error::ProcessIsolationUnsupported {
                uri: self.backend.uri().to_string(),
            });
        }
        if isolation == Isolation::Process && self.worker.is_none() {
            self.worker = Some(WorkerCommand::current_exe()?);
        }

        if let Some(previous) = self.slots.remove(name) {
            debug!(task = name, "waiting for previous unit under the same name");
            self.settle(name, previous);
        }

        let operation = call.operation();
        let unit = match isolation {
            Isolation::Thread => {
                Unit::spawn_thread(name, Arc::clone(&self.backend), self.run_id.clone(), call)?
            }
            Isolation::Process => {
                let request = WorkerRequest {
                    tracking_uri: self.backend.uri().clone(),
                    run_id: self.run_id.clone(),
                    call,
                };
                let worker = self.worker.as_ref().ok_or_else(|| {
                    Error::Storage("no worker command configured".to_string())
                })?;
                Unit::spawn_process(name, worker, request)?
            }
        };
        debug!(task = name, op = operation, %isolation, "background unit started");

        self.slots.insert(
            name.to_string(),
            Slot {
                unit,
                operation,
                isolation,
            },
        );
        Ok(())
    }

    /// Join every registered unit and clear the registry.
    ///
    /// Never fails: unit failures are returned in the report. Calling again
    /// with nothing registered returns an empty report.
    pub fn drain(&mut self) -> DrainReport {
        let slots: Vec<(String, Slot)> = self.slots.drain().collect();
        if !slots.is_empty() {
            debug!(units = slots.len(), run_id = %self.run_id, "draining background units");
        }
        for (name, slot) in slots {
            self.settle(&name, slot);
        }
        DrainReport::new(
            std::mem::take(&mut self.completed),
            std::mem::take(&mut self.failures),
        )
    }

    /// Join one unit and record its outcome.
    fn settle(&mut self, name: &str, slot: Slot) {
        match slot.unit.join() {
            Ok(()) => {
                self.completed += 1;
                debug!(task = name, op = slot.operation, "background unit completed");
            }
            Err(cause) => {
                let failure = TaskFailure::new(name, slot.operation, slot.isolation, cause);
                warn!(run_id = %self.run_id, "background {failure}");
                self.failures.push(failure);
            }
        }
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if !self.slots.is_empty() {
            let report = self.drain();
            debug!(
                joined = report.joined(),
                "dispatcher dropped with registered units"
            );
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("run_id", &self.run_id)
            .field("tasks", &self.names())
            .field("worker", &self.worker)
            .finish_non_exhaustive()
    }
}
