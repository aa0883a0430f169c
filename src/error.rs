//! Error types used by runners, sub-task groups and user operations.
//!
//! This module defines the error taxonomy of the crate:
//!
//! - [`TaskError`] failure of one operation or one sub-operation.
//! - [`StageError`] failure of a whole stage run (what the pipeline caller sees).
//! - [`AggregateError`] every failure captured by a delay-error run, in drain order.
//! - [`UsageError`] programming errors detected eagerly (zero budget, fork after join, ...).
//!
//! All types provide helper methods (`as_label`, `as_message`) for logging/metrics.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Boxed error accepted by [`TaskError::fail`].
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Shared error cause; cloned to every reader of a failed group.
pub type SharedError = Arc<dyn StdError + Send + Sync + 'static>;

/// # Programming errors.
///
/// Raised eagerly when the API is used in a way that can never succeed.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageError {
    /// Concurrency budget must be at least 1.
    #[error("max_concurrency must be >= 1")]
    ZeroConcurrency,

    /// `fork` was called after the group started joining (or was closed).
    #[error("cannot fork into a group that is joining, joined or closed")]
    ForkAfterJoin,

    /// `submit` was called after the runner finished or aborted.
    #[error("runner already finished or aborted")]
    RunnerClosed,
}

impl UsageError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            UsageError::ZeroConcurrency => "usage_zero_concurrency",
            UsageError::ForkAfterJoin => "usage_fork_after_join",
            UsageError::RunnerClosed => "usage_runner_closed",
        }
    }
}

/// # Errors produced by a single operation.
///
/// Returned by user operations and sub-operations, and raised by a
/// [`SubtaskGroup`](crate::SubtaskGroup) join. Cheap to clone: the underlying
/// cause is shared, so every handle of a failed group observes the same error.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The operation failed.
    #[error("execution failed: {source}")]
    Fail {
        /// The underlying cause.
        source: SharedError,
    },

    /// A sub-task group deadline elapsed before every sub-operation finished.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The configured group deadline.
        timeout: Duration,
    },

    /// The operation was cancelled by its scope.
    #[error("context cancelled")]
    Canceled,

    /// The operation panicked.
    #[error("operation panicked: {reason}")]
    Panicked {
        /// Panic payload rendered as text.
        reason: String,
    },

    /// The operation misused the API.
    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl TaskError {
    /// Wraps any error (or message) as an operation failure.
    ///
    /// # Example
    /// ```
    /// use stagevisor::TaskError;
    ///
    /// let err = TaskError::fail("connection refused");
    /// assert_eq!(err.as_label(), "task_failed");
    /// assert_eq!(err.to_string(), "execution failed: connection refused");
    /// ```
    pub fn fail(error: impl Into<BoxError>) -> Self {
        TaskError::Fail {
            source: Arc::from(error.into()),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Fail { .. } => "task_failed",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Canceled => "task_canceled",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Usage(e) => e.as_label(),
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            TaskError::Fail { source } => format!("error: {source}"),
            TaskError::Timeout { timeout } => format!("timeout: {timeout:?}"),
            TaskError::Canceled => "context cancelled".to_string(),
            TaskError::Panicked { reason } => format!("panic: {reason}"),
            TaskError::Usage(e) => format!("usage: {e}"),
        }
    }

    /// True for the expected outcome of a discarded sibling (not a real failure).
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Canceled)
    }

    /// Renders a panic payload caught with `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let reason = if let Some(msg) = payload.downcast_ref::<&'static str>() {
            (*msg).to_string()
        } else if let Some(msg) = payload.downcast_ref::<String>() {
            msg.clone()
        } else {
            "unknown panic".to_string()
        };
        TaskError::Panicked { reason }
    }
}

/// A captured operation failure plus the identity of the item that caused it.
#[derive(Debug, Clone)]
pub struct TaskFailure {
    /// Submission index of the originating item (0-based, per run).
    pub index: u64,
    /// The failure.
    pub error: TaskError,
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "item #{}: {}", self.index, self.error)
    }
}

/// # Composite failure of a delay-error run.
///
/// Holds every failure observed during the run, in drain order.
#[derive(Error, Debug, Clone)]
#[error("{} operation(s) failed: {}", .failures.len(), render(.failures))]
pub struct AggregateError {
    failures: Vec<TaskFailure>,
}

fn render(failures: &[TaskFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl AggregateError {
    pub(crate) fn new(failures: Vec<TaskFailure>) -> Self {
        Self { failures }
    }

    /// Number of captured failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// Always false for an error produced by a run.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Captured failures in drain order.
    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Iterates the captured failures in drain order.
    pub fn iter(&self) -> std::slice::Iter<'_, TaskFailure> {
        self.failures.iter()
    }

    /// Consumes the error, returning the failures.
    pub fn into_failures(self) -> Vec<TaskFailure> {
        self.failures
    }
}

/// # Errors produced by a stage run.
///
/// - `Failed`: fail-fast run aborted on the first drained failure.
/// - `Aggregate`: delay-error run ended with one or more failures.
/// - `Usage`: the stage was driven incorrectly.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum StageError {
    /// An operation failed and the run was aborted.
    #[error("item #{index} failed: {source}")]
    Failed {
        /// Submission index of the failing item.
        index: u64,
        /// The operation failure.
        source: TaskError,
    },

    /// Every failure of a delay-error run.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),

    /// The stage was used incorrectly.
    #[error(transparent)]
    Usage(#[from] UsageError),
}

impl StageError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use stagevisor::{StageError, TaskError};
    ///
    /// let err = StageError::Failed { index: 3, source: TaskError::Canceled };
    /// assert_eq!(err.as_label(), "stage_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            StageError::Failed { .. } => "stage_failed",
            StageError::Aggregate(_) => "stage_aggregate",
            StageError::Usage(e) => e.as_label(),
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            StageError::Failed { index, source } => {
                format!("item #{index} failed; {}", source.as_message())
            }
            StageError::Aggregate(agg) => format!("{} failures", agg.len()),
            StageError::Usage(e) => format!("usage: {e}"),
        }
    }

    /// Returns the aggregate, if this is a delay-error failure.
    pub fn as_aggregate(&self) -> Option<&AggregateError> {
        match self {
            StageError::Aggregate(agg) => Some(agg),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fail_preserves_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TaskError::fail(io);
        let cause = StdError::source(&err).expect("cause");
        assert_eq!(cause.to_string(), "refused");
    }

    #[test]
    fn test_clone_shares_cause() {
        let err = TaskError::fail("boom");
        let copy = err.clone();
        match (&err, &copy) {
            (TaskError::Fail { source: a }, TaskError::Fail { source: b }) => {
                assert!(Arc::ptr_eq(a, b));
            }
            _ => panic!("expected Fail"),
        }
    }

    #[test]
    fn test_from_panic_payloads() {
        let err = TaskError::from_panic(Box::new("static"));
        assert_eq!(err.as_message(), "panic: static");
        let err = TaskError::from_panic(Box::new(String::from("owned")));
        assert_eq!(err.as_message(), "panic: owned");
        let err = TaskError::from_panic(Box::new(42u8));
        assert_eq!(err.as_message(), "panic: unknown panic");
    }

    #[test]
    fn test_aggregate_display_lists_failures() {
        let agg = AggregateError::new(vec![
            TaskFailure {
                index: 4,
                error: TaskError::fail("a"),
            },
            TaskFailure {
                index: 1,
                error: TaskError::fail("b"),
            },
        ]);
        assert_eq!(agg.len(), 2);
        assert_eq!(
            agg.to_string(),
            "2 operation(s) failed: item #4: execution failed: a; item #1: execution failed: b"
        );
        let stage: StageError = agg.into();
        assert_eq!(stage.as_label(), "stage_aggregate");
        assert_eq!(stage.as_aggregate().map(AggregateError::len), Some(2));
    }

    #[test]
    fn test_usage_labels() {
        let err: TaskError = UsageError::ForkAfterJoin.into();
        assert_eq!(err.as_label(), "usage_fork_after_join");
        let err: StageError = UsageError::ZeroConcurrency.into();
        assert_eq!(err.as_label(), "usage_zero_concurrency");
    }
}
