//! Worker process side of [`Isolation::Process`](super::Isolation::Process)
//!
//! ## Protocol
//!
//! 1. The parent spawns the worker program with `TRUENO_TRACKER_WORKER=1`.
//! 2. It writes one JSON [`WorkerRequest`] to the worker's stdin and closes it.
//! 3. The worker opens the store named by the request's tracking URI,
//!    executes the call, and prints one JSON [`WorkerReply`] line on stdout.
//! 4. Exit code 0 means `Done`; anything else is a failure.
//!
//! stdout is reserved for the reply. Workers log to stderr.
//!
//! ## Re-entry
//!
//! The default worker program is the current executable. Binaries that submit
//! process-isolated tasks without configuring a [`WorkerCommand`] must call
//! [`serve_if_worker`] first thing in `main`. The bundled `trueno-tracker`
//! binary does this and also accepts an explicit `worker` subcommand.
//! A worker that reaches the current-executable fallback itself (because
//! `main` never called [`serve_if_worker`]) gets [`Error::WorkerReentry`]
//! instead of spawning another copy of itself.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::LogCall;
use crate::backend;
use crate::uri::TrackingUri;
use crate::{Error, Result};

/// Environment marker set on every worker process.
pub const WORKER_ENV: &str = "TRUENO_TRACKER_WORKER";

/// Program (and arguments) launched for process-isolated units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCommand {
    program: PathBuf,
    #[serde(default)]
    args: Vec<String>,
}

impl WorkerCommand {
    /// Launch `program` with no arguments.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Re-execute the current binary (which must call [`serve_if_worker`]).
    ///
    /// # Errors
    ///
    /// Returns an error if the current executable cannot be determined, or
    /// [`Error::WorkerReentry`] when called inside a worker process.
    pub fn current_exe() -> Result<Self> {
        Self::current_exe_unless_worker(std::env::var_os(WORKER_ENV).is_some())
    }

    pub(crate) fn current_exe_unless_worker(inside_worker: bool) -> Result<Self> {
        if inside_worker {
            return Err(Error::WorkerReentry);
        }
        Ok(Self::new(std::env::current_exe()?))
    }

    /// Append an argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Program path.
    #[must_use]
    pub fn program(&self) -> &Path {
        &self.program
    }

    pub(crate) fn to_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// What a worker is asked to do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    /// Store to open
    pub tracking_uri: TrackingUri,
    /// Run the call logs to
    pub run_id: String,
    /// The call itself
    pub call: LogCall,
}

/// What a worker reports back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkerReply {
    /// The call completed.
    Done,
    /// The call failed with this message.
    Failed {
        /// Error text
        error: String,
    },
}

impl WorkerReply {
    /// Process exit code matching the reply.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        match self {
            Self::Done => 0,
            Self::Failed { .. } => 1,
        }
    }
}

/// Serve one request: read it from `input`, execute, write the reply to `output`.
///
/// Request and execution failures become a [`WorkerReply::Failed`]; only a
/// failure to write the reply is an `Err`.
///
/// # Errors
///
/// Returns an error if the reply cannot be written.
pub fn serve(input: impl Read, mut output: impl Write) -> Result<WorkerReply> {
    let reply = match handle(input) {
        Ok(()) => WorkerReply::Done,
        Err(err) => WorkerReply::Failed {
            error: err.to_string(),
        },
    };
    let mut line = serde_json::to_vec(&reply)?;
    line.push(b'\n');
    output.write_all(&line)?;
    output.flush()?;
    Ok(reply)
}

fn handle(input: impl Read) -> Result<()> {
    let request: WorkerRequest = serde_json::from_reader(input)?;
    debug!(
        run_id = %request.run_id,
        op = request.call.operation(),
        uri = %request.tracking_uri,
        "worker executing call"
    );
    let backend = backend::open(&request.tracking_uri)?;
    request.call.execute(backend.as_ref(), &request.run_id)
}

/// If this process was launched as a worker, serve stdin/stdout and exit.
///
/// Returns normally when [`WORKER_ENV`] is not set.
pub fn serve_if_worker() {
    if std::env::var_os(WORKER_ENV).is_none() {
        return;
    }
    let code = match serve(std::io::stdin().lock(), std::io::stdout().lock()) {
        Ok(reply) => reply.exit_code(),
        Err(_) => 2,
    };
    std::process::exit(code);
}
