//! # Failure handling policy for bounded runners.
//!
//! [`ErrorPolicy`] decides what a [`BoundedRunner`](crate::BoundedRunner) does when a
//! drained task turns out to be a failure.
//!
//! - [`ErrorPolicy::FailFast`] the first drained failure aborts the run (default).
//! - [`ErrorPolicy::DelayError`] failures are recorded and raised together at the end.
//!
//! ## Choosing the right policy
//!
//! **All-or-nothing batches** (a single failure invalidates the output):
//! ```text
//! ErrorPolicy::FailFast    → abort, cancel in-flight tasks, raise StageError::Failed
//! ```
//!
//! **Best-effort batches** (keep every success, report every failure once):
//! ```text
//! ErrorPolicy::DelayError  → emit successes, ledger failures,
//!                            raise StageError::Aggregate after the last drain
//! ```

/// Policy controlling how drained failures are handled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ErrorPolicy {
    /// Raise the first drained failure immediately and tear the pool down.
    #[default]
    FailFast,
    /// Record failures and raise one aggregate failure at finish.
    DelayError,
}

impl ErrorPolicy {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorPolicy::FailFast => "fail_fast",
            ErrorPolicy::DelayError => "delay_error",
        }
    }
}
