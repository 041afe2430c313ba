//! Results of joining background units

use std::fmt;

use super::Isolation;

/// Why a background unit did not complete cleanly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureCause {
    /// The call returned an error (message preserved).
    Error(String),
    /// The thread panicked (panic message preserved).
    Panic(String),
    /// The worker process ended without a reply; no cause crossed the boundary.
    Lost {
        /// Exit code, if the process exited normally
        exit_code: Option<i32>,
    },
}

impl FailureCause {
    /// Propagated failure message, if any.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Error(msg) | Self::Panic(msg) => Some(msg),
            Self::Lost { .. } => None,
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(msg) => write!(f, "{msg}"),
            Self::Panic(msg) => write!(f, "panicked: {msg}"),
            Self::Lost {
                exit_code: Some(code),
            } => write!(f, "worker exited with code {code} without reporting a cause"),
            Self::Lost { exit_code: None } => {
                f.write_str("worker terminated without reporting a cause")
            }
        }
    }
}

/// A background unit that finished unsuccessfully.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    name: String,
    operation: &'static str,
    isolation: Isolation,
    cause: FailureCause,
}

impl TaskFailure {
    pub(crate) fn new(
        name: impl Into<String>,
        operation: &'static str,
        isolation: Isolation,
        cause: FailureCause,
    ) -> Self {
        Self {
            name: name.into(),
            operation,
            isolation,
            cause,
        }
    }

    /// Task name the unit was submitted under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Logging operation (`metric`, `artifact`, `image`, `model`).
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        self.operation
    }

    /// Isolation mode the unit ran under.
    #[must_use]
    pub const fn isolation(&self) -> Isolation {
        self.isolation
    }

    /// Failure cause.
    #[must_use]
    pub const fn cause(&self) -> &FailureCause {
        &self.cause
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} task {:?} ({}): {}",
            self.operation, self.name, self.isolation, self.cause
        )
    }
}

/// Summary returned by [`Dispatcher::drain`](super::Dispatcher::drain).
///
/// Covers every unit joined since the previous drain, including units joined
/// early because a same-name submission replaced them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    completed: usize,
    failures: Vec<TaskFailure>,
}

impl DrainReport {
    pub(crate) const fn new(completed: usize, failures: Vec<TaskFailure>) -> Self {
        Self {
            completed,
            failures,
        }
    }

    /// Units that finished without error.
    #[must_use]
    pub const fn completed(&self) -> usize {
        self.completed
    }

    /// Units that failed.
    #[must_use]
    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Total units joined.
    #[must_use]
    pub fn joined(&self) -> usize {
        self.completed + self.failures.len()
    }

    /// No unit failed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cause_detail() {
        assert_eq!(FailureCause::Error("x".into()).detail(), Some("x"));
        assert_eq!(FailureCause::Lost { exit_code: Some(3) }.detail(), None);
    }

    #[test]
    fn test_failure_display() {
        let failure = TaskFailure::new(
            "artifact",
            "artifact",
            Isolation::Process,
            FailureCause::Lost { exit_code: Some(3) },
        );
        assert_eq!(
            failure.to_string(),
            "artifact task \"artifact\" (process): worker exited with code 3 without reporting a cause"
        );
    }

    #[test]
    fn test_report_counts() {
        let report = DrainReport::new(
            2,
            vec![TaskFailure::new(
                "m",
                "metric",
                Isolation::Thread,
                FailureCause::Panic("boom".into()),
            )],
        );
        assert_eq!(report.joined(), 3);
        assert!(!report.is_clean());
        assert!(DrainReport::default().is_clean());
    }
}
