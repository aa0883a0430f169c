//! # Runner and group configuration.
//!
//! Provides [`RunnerConfig`] (settings for one [`BoundedRunner`](crate::BoundedRunner))
//! and [`GroupConfig`] (settings for one [`SubtaskGroup`](crate::SubtaskGroup)).
//!
//! ## Sentinel values
//! - `max_concurrency = 0` is rejected with [`UsageError::ZeroConcurrency`] when a runner is built
//! - `deadline = Some(0s)` → no deadline (treated as `None`)

use std::num::NonZeroUsize;
use std::time::Duration;

use crate::error::UsageError;
use crate::policies::ErrorPolicy;

/// Configuration for a bounded-concurrency runner.
///
/// ## Field semantics
/// - `max_concurrency`: admission budget, the maximum number of unresolved tasks (`>= 1`)
/// - `error_policy`: what happens when a drained task failed
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped)
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Maximum number of tasks in flight at any instant.
    pub max_concurrency: usize,

    /// Failure handling strategy.
    pub error_policy: ErrorPolicy,

    /// Capacity of the event bus created by [`RunnerBuilder`](crate::RunnerBuilder).
    pub bus_capacity: usize,
}

impl RunnerConfig {
    /// Creates a fail-fast configuration with the given budget.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            ..Self::default()
        }
    }

    /// Returns a copy with the given error policy.
    pub fn with_error_policy(mut self, error_policy: ErrorPolicy) -> Self {
        self.error_policy = error_policy;
        self
    }

    /// Returns the admission budget, rejecting zero.
    #[inline]
    pub fn budget(&self) -> Result<NonZeroUsize, UsageError> {
        NonZeroUsize::new(self.max_concurrency).ok_or(UsageError::ZeroConcurrency)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for RunnerConfig {
    /// Default configuration:
    ///
    /// - `max_concurrency = 1000`
    /// - `error_policy = ErrorPolicy::FailFast`
    /// - `bus_capacity = 1024`
    fn default() -> Self {
        Self {
            max_concurrency: 1000,
            error_policy: ErrorPolicy::default(),
            bus_capacity: 1024,
        }
    }
}

/// Configuration for a structured sub-task group.
#[derive(Clone, Copy, Debug, Default)]
pub struct GroupConfig {
    /// Time budget for every sub-operation of the group, measured from open.
    pub deadline: Option<Duration>,
}

impl GroupConfig {
    /// Group without deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy with the given deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Returns the deadline as an `Option`, treating zero as none.
    #[inline]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline.filter(|d| *d > Duration::ZERO)
    }
}
