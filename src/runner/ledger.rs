//! # Error ledger for delay-error runs.
//!
//! Append-only list of drained failures, kept in drain order. Only the runner's
//! drain loop writes to it, so it needs no lock: the runner owns it exclusively.

use crate::error::{AggregateError, TaskFailure};

/// Failures captured by a delay-error run, in drain order.
#[derive(Debug, Default, Clone)]
pub struct ErrorLedger {
    failures: Vec<TaskFailure>,
}

impl ErrorLedger {
    /// Appends a failure; returns the ledger size after the append.
    pub(crate) fn record(&mut self, failure: TaskFailure) -> usize {
        self.failures.push(failure);
        self.failures.len()
    }

    /// Number of recorded failures.
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    /// True if no failure was recorded.
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// Recorded failures in drain order.
    pub fn failures(&self) -> &[TaskFailure] {
        &self.failures
    }

    /// Converts the ledger into the composite failure, or `None` when empty.
    pub(crate) fn into_aggregate(self) -> Option<AggregateError> {
        if self.failures.is_empty() {
            None
        } else {
            Some(AggregateError::new(self.failures))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;

    #[test]
    fn test_empty_ledger_has_no_aggregate() {
        assert!(ErrorLedger::default().into_aggregate().is_none());
    }

    #[test]
    fn test_record_keeps_drain_order() {
        let mut ledger = ErrorLedger::default();
        let late = TaskFailure {
            index: 5,
            error: TaskError::fail("late"),
        };
        let canceled = TaskFailure {
            index: 2,
            error: TaskError::Canceled,
        };
        assert_eq!(ledger.record(late), 1);
        assert_eq!(ledger.record(canceled), 2);

        let agg = ledger.into_aggregate().expect("aggregate");
        let order: Vec<u64> = agg.iter().map(|f| f.index).collect();
        assert_eq!(order, vec![5, 2]);
    }
}
