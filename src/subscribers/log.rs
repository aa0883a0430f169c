//! # LogWriter: simple event printer
//!
//! A minimal subscriber that prints incoming [`Event`]s to stdout.
//! Use it for tests or demos.
//!
//! ## Example output
//! ```text
//! [submitted] op="fetch" item=Some(3) in_flight=Some(2)
//! [saturated] op="fetch" in_flight=Some(3)
//! [completed] op="fetch" item=Some(1)
//! [deferred] op="fetch" item=Some(4) ledger=Some(1) err="execution failed: boom"
//! [finished] op="fetch" emitted=Some(9)
//! [group-timeout] group="item-7" timeout_ms=Some(250)
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

/// Renders one event as a single log line.
pub(crate) fn render(e: &Event) -> String {
    let src = e.source.as_deref().unwrap_or("unknown");
    let reason = e.reason.as_deref().unwrap_or("");
    match e.kind {
        EventKind::TaskSubmitted => format!(
            "[submitted] op={src:?} item={:?} in_flight={:?}",
            e.index, e.in_flight
        ),
        EventKind::BudgetSaturated => {
            format!("[saturated] op={src:?} in_flight={:?}", e.in_flight)
        }
        EventKind::TaskCompleted => format!("[completed] op={src:?} item={:?}", e.index),
        EventKind::TaskFailed => {
            format!("[failed] op={src:?} item={:?} err={reason:?}", e.index)
        }
        EventKind::FailureDeferred => format!(
            "[deferred] op={src:?} item={:?} ledger={:?} err={reason:?}",
            e.index, e.count
        ),
        EventKind::DownstreamRejected => {
            format!("[rejected] op={src:?} discarded={:?}", e.in_flight)
        }
        EventKind::RunnerAborted => format!(
            "[aborted] op={src:?} discarded={:?} reason={reason:?}",
            e.in_flight
        ),
        EventKind::RunFinished => format!("[finished] op={src:?} emitted={:?}", e.count),
        EventKind::GroupOpened => {
            format!("[group-open] group={src:?} timeout_ms={:?}", e.timeout_ms)
        }
        EventKind::SubtaskForked => format!("[fork] subtask={src:?} pos={:?}", e.index),
        EventKind::GroupJoined => format!("[group-joined] group={src:?} subtasks={:?}", e.count),
        EventKind::GroupFailed => format!("[group-failed] group={src:?} err={reason:?}"),
        EventKind::GroupTimedOut => {
            format!("[group-timeout] group={src:?} timeout_ms={:?}", e.timeout_ms)
        }
        EventKind::GroupClosed => format!("[group-closed] group={src:?} cancelled={:?}", e.count),
        EventKind::SubscriberOverflow => {
            format!("[subscriber-overflow] subscriber={src:?} reason={reason:?}")
        }
        EventKind::SubscriberPanicked => {
            format!("[subscriber-panicked] subscriber={src} info={reason}")
        }
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        println!("{}", render(e));
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
