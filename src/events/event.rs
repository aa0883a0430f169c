//! # Runtime events emitted by runners and sub-task groups.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Runner events**: admission, completion, failure handling, teardown
//! - **Group events**: structured fan-out lifecycle (open, fork, join, close)
//! - **Subscriber events**: delivery problems inside the [`SubscriberSet`](crate::SubscriberSet)
//!
//! The [`Event`] struct carries additional metadata such as timestamps, source
//! name, item index, in-flight count and reasons.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use stagevisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_source("fetch-product")
//!     .with_index(7)
//!     .with_reason("connection refused");
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.source.as_deref(), Some("fetch-product"));
//! assert_eq!(ev.index, Some(7));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `source`: subscriber name
    /// - `reason`: panic info/message
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `source`: subscriber name
    /// - `reason`: reason string (e.g., "full", "closed")
    SubscriberOverflow,

    // === Runner events ===
    /// An item was admitted and its task spawned.
    ///
    /// Sets:
    /// - `source`: operation name
    /// - `index`: submission index
    /// - `in_flight`: unresolved tasks after the spawn
    TaskSubmitted,

    /// The admission budget is full; the runner drains one result before returning.
    ///
    /// Sets:
    /// - `source`: operation name
    /// - `in_flight`: unresolved tasks (equals the budget)
    BudgetSaturated,

    /// A successful result was drained and pushed downstream.
    ///
    /// Sets:
    /// - `source`: operation name
    /// - `index`: submission index
    TaskCompleted,

    /// A drained result was a failure (fail-fast: the run aborts next).
    ///
    /// Sets:
    /// - `source`: operation name
    /// - `index`: submission index
    /// - `reason`: failure message
    TaskFailed,

    /// A drained failure was appended to the error ledger (delay-error).
    ///
    /// Sets:
    /// - `source`: operation name
    /// - `index`: submission index
    /// - `reason`: failure message
    /// - `count`: ledger size after the append
    FailureDeferred,

    /// Downstream stopped accepting results.
    ///
    /// Sets:
    /// - `source`: operation name
    /// - `in_flight`: tasks discarded by the teardown
    DownstreamRejected,

    /// The runner tore its pool down before draining everything.
    ///
    /// Sets:
    /// - `source`: operation name
    /// - `in_flight`: tasks aborted
    /// - `reason`: why (failure label)
    RunnerAborted,

    /// The runner finished draining.
    ///
    /// Sets:
    /// - `source`: operation name
    /// - `count`: results emitted downstream
    /// - `reason`: aggregate summary when the ledger was non-empty
    RunFinished,

    // === Group events ===
    /// A sub-task group was opened.
    ///
    /// Sets:
    /// - `source`: group name
    /// - `timeout_ms`: deadline, if any
    GroupOpened,

    /// A sub-operation was forked into a group.
    ///
    /// Sets:
    /// - `source`: sub-operation name
    /// - `index`: fork position inside the group
    SubtaskForked,

    /// Every sub-operation of a group succeeded.
    ///
    /// Sets:
    /// - `source`: group name
    /// - `count`: number of sub-operations
    GroupJoined,

    /// A sub-operation failed; siblings were cancelled.
    ///
    /// Sets:
    /// - `source`: group name
    /// - `reason`: the first failure
    GroupFailed,

    /// The group deadline elapsed; outstanding sub-operations were cancelled.
    ///
    /// Sets:
    /// - `source`: group name
    /// - `timeout_ms`: the deadline
    GroupTimedOut,

    /// The group was closed and every child awaited.
    ///
    /// Sets:
    /// - `source`: group name
    /// - `count`: children still attached when the close began (0 after a join)
    GroupClosed,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Operation, group or subscriber name, if applicable.
    pub source: Option<Arc<str>>,
    /// Submission index of an item (or fork position inside a group).
    pub index: Option<u64>,
    /// Unresolved tasks at the time of the event.
    pub in_flight: Option<u32>,
    /// Generic counter (emitted results, ledger size, sub-operations).
    pub count: Option<u64>,
    /// Group deadline in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            source: None,
            index: None,
            in_flight: None,
            count: None,
            timeout_ms: None,
            reason: None,
        }
    }

    /// Attaches a source name.
    #[inline]
    pub fn with_source(mut self, source: impl Into<Arc<str>>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attaches an item index.
    #[inline]
    pub fn with_index(mut self, index: u64) -> Self {
        self.index = Some(index);
        self
    }

    /// Attaches an in-flight count.
    #[inline]
    pub fn with_in_flight(mut self, n: usize) -> Self {
        self.in_flight = Some(n.min(u32::MAX as usize) as u32);
        self
    }

    /// Attaches a counter.
    #[inline]
    pub fn with_count(mut self, n: u64) -> Self {
        self.count = Some(n);
        self
    }

    /// Attaches a deadline (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.timeout_ms = Some(ms);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_source(subscriber)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_source(subscriber)
            .with_reason(info)
    }

    #[inline]
    pub fn is_subscriber_overflow(&self) -> bool {
        matches!(self.kind, EventKind::SubscriberOverflow)
    }

    #[inline]
    pub fn is_group_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::GroupOpened
                | EventKind::SubtaskForked
                | EventKind::GroupJoined
                | EventKind::GroupFailed
                | EventKind::GroupTimedOut
                | EventKind::GroupClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_is_monotonic() {
        let a = Event::new(EventKind::TaskSubmitted);
        let b = Event::new(EventKind::TaskSubmitted);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_timeout_saturates() {
        let ev = Event::new(EventKind::GroupTimedOut).with_timeout(Duration::from_secs(u64::MAX));
        assert_eq!(ev.timeout_ms, Some(u32::MAX));
    }

    #[test]
    fn test_subscriber_overflow_reason() {
        let ev = Event::subscriber_overflow("audit", "full");
        assert!(ev.is_subscriber_overflow());
        assert_eq!(ev.reason.as_deref(), Some("subscriber=audit reason=full"));
    }
}
