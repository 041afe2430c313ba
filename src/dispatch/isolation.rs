//! Isolation strategies for background units
//!
//! - [`Isolation::Thread`]: shares memory (and the backend handle) with the
//!   caller. Errors and panics come back with their message.
//! - [`Isolation::Process`]: a worker process opens the store by URI. A
//!   worker that dies before replying leaves only its exit status.

use std::any::Any;
use std::fmt;
use std::io::{BufWriter, Write};
use std::process::{Child, Stdio};
use std::str::FromStr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::outcome::FailureCause;
use super::worker::{WorkerCommand, WorkerReply, WorkerRequest, WORKER_ENV};
use super::LogCall;
use crate::backend::TrackingBackend;
use crate::{Error, Result};

/// Where a background unit executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    /// Separate OS thread in this process.
    #[default]
    Thread,
    /// Separate OS process (worker program).
    Process,
}

impl fmt::Display for Isolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Thread => f.write_str("thread"),
            Self::Process => f.write_str("process"),
        }
    }
}

impl FromStr for Isolation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "thread" => Ok(Self::Thread),
            "process" => Ok(Self::Process),
            _ => Err(Error::InvalidIsolation(s.to_string())),
        }
    }
}

/// A launched unit of work.
pub(crate) enum Unit {
    Thread(JoinHandle<Result<()>>),
    /// `feeder` streams the request into the child's stdin.
    Process { child: Child, feeder: JoinHandle<()> },
}

impl Unit {
    pub(crate) fn spawn_thread(
        name: &str,
        backend: Arc<dyn TrackingBackend>,
        run_id: String,
        call: LogCall,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("task-{name}"))
            .spawn(move || call.execute(backend.as_ref(), &run_id))?;
        Ok(Self::Thread(handle))
    }

    pub(crate) fn spawn_process(
        name: &str,
        command: &WorkerCommand,
        request: WorkerRequest,
    ) -> Result<Self> {
        let mut child = command
            .to_command()
            .env(WORKER_ENV, "1")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|source| Error::WorkerSpawn {
                program: command.program().display().to_string(),
                source,
            })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let spawned = thread::Builder::new()
            .name(format!("feed-{name}"))
            .spawn(move || {
                let Some(stdin) = stdin else { return };
                let mut writer = BufWriter::new(stdin);
                // A worker that exits early surfaces as a missing reply at join
                let written = serde_json::to_writer(&mut writer, &request)
                    .map_err(std::io::Error::from)
                    .and_then(|()| writer.flush());
                if let Err(err) = written {
                    debug!(pid, %err, "worker closed stdin before reading request");
                }
            });
        match spawned {
            Ok(feeder) => Ok(Self::Process { child, feeder }),
            Err(err) => {
                // Without a request the worker would wait on stdin forever
                let _ = child.kill();
                let _ = child.wait();
                Err(err.into())
            }
        }
    }

    /// Non-blocking liveness check.
    pub(crate) fn is_finished(&mut self) -> bool {
        match self {
            Self::Thread(handle) => handle.is_finished(),
            Self::Process { child, .. } => !matches!(child.try_wait(), Ok(None)),
        }
    }

    /// Block until the unit completes.
    pub(crate) fn join(self) -> std::result::Result<(), FailureCause> {
        match self {
            Self::Thread(handle) => match handle.join() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(FailureCause::Error(err.to_string())),
                Err(payload) => Err(FailureCause::Panic(panic_message(payload.as_ref()))),
            },
            Self::Process { child, feeder } => {
                let output = child.wait_with_output();
                // stdin is closed once the child has exited, so this returns
                let _ = feeder.join();
                let output = output.map_err(|_| FailureCause::Lost { exit_code: None })?;
                let reply = String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .rev()
                    .find(|line| !line.trim().is_empty())
                    .and_then(|line| serde_json::from_str::<WorkerReply>(line).ok());
                match reply {
                    Some(WorkerReply::Done) if output.status.success() => Ok(()),
                    Some(WorkerReply::Failed { error }) => Err(FailureCause::Error(error)),
                    _ => Err(FailureCause::Lost {
                        exit_code: output.status.code(),
                    }),
                }
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}
