//! Error types for trueno-tracker
//!
//! Background task failures are NOT errors of this type: they are reported as
//! [`TaskFailure`](crate::dispatch::TaskFailure) values when a task is joined.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// trueno-tracker error types
#[derive(Error, Debug)]
pub enum Error {
    /// Background task submitted without a name
    #[error("Background task name must not be empty")]
    EmptyTaskName,

    /// Isolation mode string was neither `thread` nor `process`
    #[error("Invalid isolation mode: {0:?} (expected \"thread\" or \"process\")")]
    InvalidIsolation(String),

    /// Process isolation needs a store another process can reopen
    #[error("Process isolation is not supported by the store at {uri}\nUse a file:// tracking URI or thread isolation")]
    ProcessIsolationUnsupported {
        /// Tracking URI of the store
        uri: String,
    },

    /// The worker process could not be started
    #[error("Failed to spawn background worker {program}: {source}")]
    WorkerSpawn {
        /// Program that was executed
        program: String,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// Process isolation fell back to the current executable from inside a
    /// worker, which would only launch another copy of the same worker
    #[error(
        "Process isolation requested from inside a worker process with no worker command \
         configured; call serve_if_worker() first in main or set a WorkerCommand"
    )]
    WorkerReentry,

    /// No experiment with the given name (and creation disabled)
    #[error("Error while trying to find experiment NAME \"{name}\" at {uri}")]
    ExperimentNotFound {
        /// Requested experiment name
        name: String,
        /// Tracking URI searched
        uri: String,
    },

    /// No experiment with the given id
    #[error("Error while trying to find experiment ID \"{id}\" at {uri}")]
    ExperimentIdNotFound {
        /// Requested experiment id
        id: String,
        /// Tracking URI searched
        uri: String,
    },

    /// A new experiment needs a name
    #[error("An experiment name is required to create a new experiment")]
    MissingExperimentName,

    /// Requested run id does not exist
    #[error("Run \"{0}\" not found")]
    RunNotFound(String),

    /// Tracking URI scheme has no local store
    #[error("Unsupported tracking URI scheme: {0}\nOnly file:// and memory:// stores are available")]
    UnsupportedTrackingUri(String),

    /// Tracking URI could not be parsed
    #[error("Invalid tracking URI: {0}")]
    InvalidTrackingUri(String),

    /// Store-level inconsistency
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
