//! # Admission-windowed task runner.
//!
//! [`BoundedRunner`] executes one task per upstream item, keeps at most
//! `max_concurrency` of them unresolved, and emits results downstream in
//! **completion order**. Both error policies share the admission/drain core below;
//! only the "drained failure" and "finish" steps consult [`ErrorPolicy`].
//!
//! ## Admission
//! ```text
//! submit(item):
//!   index = next_index++            (submission identity)
//!   in_flight.spawn(op(item))
//!   in_flight < budget ? return true
//!                      : drain_one()          ◄── blocks until *any* task completes
//!
//! drain_one():
//!   Ok(value)  ─► downstream.push(value) ─► false? teardown (Rejected)
//!   Err(error) ─► FailFast   : teardown (Aborted), raise StageError::Failed
//!                 DelayError : ledger.record(error), continue
//!
//! finish():
//!   while downstream accepts && in_flight > 0: drain_one()
//!   teardown (Finished)
//!   DelayError && ledger non-empty && downstream accepted ─► raise StageError::Aggregate
//! ```
//!
//! ## Cancellation
//! Teardown drops the [`JoinSet`], which aborts every undrained task without waiting
//! for it. Tasks that were never polled never start; running tasks stop at their next
//! `.await`. Their results are discarded. Dropping the runner has the same effect.

use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinSet;

use crate::config::RunnerConfig;
use crate::error::{StageError, TaskError, TaskFailure, UsageError};
use crate::events::{self, Bus, Event, EventKind};
use crate::policies::ErrorPolicy;
use crate::runner::{ErrorLedger, Listener};
use crate::stage::{Downstream, Stage};
use crate::tasks::OperationRef;

/// Lifecycle of one runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    /// Accepting submissions.
    Running,
    /// Downstream stopped accepting; in-flight tasks were discarded.
    Rejected,
    /// A fail-fast failure aborted the run.
    Aborted,
    /// `finish` drained every result.
    Finished,
}

/// Output of one task: the submission index plus the operation result.
struct Completion<R> {
    index: u64,
    result: Result<R, TaskError>,
}

/// Bounded-concurrency stage executing an [`Operation`](crate::Operation) per item.
///
/// Construct it per run; a runner is single-use (see [`RunState`]).
///
/// # Example
/// ```
/// use futures::stream;
/// use stagevisor::{collect, BoundedRunner, OperationFn, OperationRef, TaskError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let op: OperationRef<u32, u32> =
///     OperationFn::arc("double", |x: u32| async move { Ok::<_, TaskError>(x * 2) });
/// let runner = BoundedRunner::fail_fast(4, op)?;
///
/// let mut out = collect(stream::iter(1..=3u32), runner).await?;
/// out.sort_unstable();
/// assert_eq!(out, vec![2, 4, 6]);
/// # Ok(())
/// # }
/// ```
pub struct BoundedRunner<T, R> {
    budget: NonZeroUsize,
    policy: ErrorPolicy,
    op: OperationRef<T, R>,
    in_flight: JoinSet<Completion<R>>,
    next_index: u64,
    emitted: u64,
    ledger: ErrorLedger,
    state: RunState,
    bus: Option<Bus>,
    listener: Option<Listener>,
}

impl<T, R> BoundedRunner<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Creates a runner from `cfg`, without an event bus.
    ///
    /// Fails with [`UsageError::ZeroConcurrency`] if `cfg.max_concurrency == 0`.
    pub fn new(cfg: RunnerConfig, op: OperationRef<T, R>) -> Result<Self, UsageError> {
        Ok(Self::from_parts(cfg.budget()?, cfg.error_policy, op, None, None))
    }

    /// Fail-fast runner with the given budget.
    pub fn fail_fast(max_concurrency: usize, op: OperationRef<T, R>) -> Result<Self, UsageError> {
        Self::new(RunnerConfig::new(max_concurrency), op)
    }

    /// Delay-error runner with the given budget.
    pub fn delay_error(max_concurrency: usize, op: OperationRef<T, R>) -> Result<Self, UsageError> {
        Self::new(
            RunnerConfig::new(max_concurrency).with_error_policy(ErrorPolicy::DelayError),
            op,
        )
    }

    pub(crate) fn from_parts(
        budget: NonZeroUsize,
        policy: ErrorPolicy,
        op: OperationRef<T, R>,
        bus: Option<Bus>,
        listener: Option<Listener>,
    ) -> Self {
        Self {
            budget,
            policy,
            op,
            in_flight: JoinSet::new(),
            next_index: 0,
            emitted: 0,
            ledger: ErrorLedger::default(),
            state: RunState::Running,
            bus,
            listener,
        }
    }

    /// Admits `item`, draining exactly one completion when the budget is saturated.
    ///
    /// Returns whether more input is wanted (`false` once downstream rejects).
    /// Must be called from within a tokio runtime.
    pub async fn submit(
        &mut self,
        item: T,
        downstream: &mut dyn Downstream<R>,
    ) -> Result<bool, StageError> {
        if self.state != RunState::Running {
            return Err(UsageError::RunnerClosed.into());
        }

        let index = self.next_index;
        self.next_index += 1;

        let op = Arc::clone(&self.op);
        self.in_flight.spawn(async move {
            let result = AssertUnwindSafe(async move { op.call(item).await })
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(TaskError::from_panic(panic)));
            Completion { index, result }
        });
        let in_flight = self.in_flight.len();
        self.publish(|| {
            Event::new(EventKind::TaskSubmitted)
                .with_index(index)
                .with_in_flight(in_flight)
        });

        if in_flight < self.budget.get() {
            return Ok(true);
        }
        self.publish(|| Event::new(EventKind::BudgetSaturated).with_in_flight(in_flight));
        self.drain_one(downstream).await
    }

    /// Drains every remaining result (completion order) while downstream accepts,
    /// then tears the pool down.
    ///
    /// Under [`ErrorPolicy::DelayError`] a non-empty ledger is raised as
    /// [`StageError::Aggregate`], unless downstream short-circuited the run.
    pub async fn finish(&mut self, downstream: &mut dyn Downstream<R>) -> Result<(), StageError> {
        if matches!(self.state, RunState::Finished | RunState::Aborted) {
            return Ok(());
        }

        let mut accepting = self.state == RunState::Running && !downstream.is_rejecting();
        while accepting && !self.in_flight.is_empty() {
            accepting = self.drain_one(downstream).await?;
        }
        let state = match self.state {
            RunState::Running => RunState::Finished,
            other => other,
        };
        self.teardown(state);

        let aggregate = if accepting {
            std::mem::take(&mut self.ledger).into_aggregate()
        } else {
            None
        };
        let emitted = self.emitted;
        self.publish(|| {
            let ev = Event::new(EventKind::RunFinished).with_count(emitted);
            match &aggregate {
                Some(agg) => ev.with_reason(agg.to_string()),
                None => ev,
            }
        });

        self.release_listener().await;

        match aggregate {
            Some(agg) => Err(agg.into()),
            None => Ok(()),
        }
    }

    /// Waits for one completion and applies the error policy to it.
    async fn drain_one(&mut self, downstream: &mut dyn Downstream<R>) -> Result<bool, StageError> {
        let Some(Completion { index, result }) = self.next_completion().await else {
            return Ok(!downstream.is_rejecting());
        };

        match result {
            Ok(value) => {
                self.publish(|| Event::new(EventKind::TaskCompleted).with_index(index));
                self.emitted += 1;
                if downstream.push(value) {
                    return Ok(true);
                }
                let discarded = self.in_flight.len();
                self.publish(|| {
                    Event::new(EventKind::DownstreamRejected).with_in_flight(discarded)
                });
                self.teardown(RunState::Rejected);
                Ok(false)
            }
            Err(error) => match self.policy {
                ErrorPolicy::FailFast => {
                    let discarded = self.in_flight.len();
                    self.publish(|| {
                        Event::new(EventKind::TaskFailed)
                            .with_index(index)
                            .with_reason(error.as_message())
                    });
                    self.publish(|| {
                        Event::new(EventKind::RunnerAborted)
                            .with_in_flight(discarded)
                            .with_reason(error.as_label())
                    });
                    self.teardown(RunState::Aborted);
                    self.release_listener().await;
                    Err(StageError::Failed {
                        index,
                        source: error,
                    })
                }
                ErrorPolicy::DelayError => {
                    let reason = error.as_message();
                    let recorded = self.ledger.record(TaskFailure { index, error });
                    self.publish(|| {
                        Event::new(EventKind::FailureDeferred)
                            .with_index(index)
                            .with_count(recorded as u64)
                            .with_reason(reason)
                    });
                    Ok(true)
                }
            },
        }
    }

    /// Next completion in completion order.
    ///
    /// Panics are caught inside each task, so a join error can only be an abort;
    /// those are skipped.
    async fn next_completion(&mut self) -> Option<Completion<R>> {
        while let Some(joined) = self.in_flight.join_next().await {
            if let Ok(completion) = joined {
                return Some(completion);
            }
        }
        None
    }

    /// Discards every undrained task without waiting for it.
    fn teardown(&mut self, state: RunState) {
        drop(std::mem::take(&mut self.in_flight));
        self.state = state;
    }

    /// Lets the subscribers catch up with the run's last events.
    async fn release_listener(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.shutdown().await;
        }
    }

    fn publish(&self, ev: impl FnOnce() -> Event) {
        events::publish(self.bus.as_ref(), || ev().with_source(self.op.name()));
    }
}

impl<T, R> BoundedRunner<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Name of the operation this runner executes.
    pub fn name(&self) -> &str {
        self.op.name()
    }

    /// Admission budget.
    pub fn max_concurrency(&self) -> usize {
        self.budget.get()
    }

    /// Error policy of this runner.
    pub fn policy(&self) -> ErrorPolicy {
        self.policy
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Tasks submitted but not yet drained.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Items admitted so far (also the next submission index).
    pub fn submitted(&self) -> u64 {
        self.next_index
    }

    /// Results handed to downstream so far.
    pub fn emitted(&self) -> u64 {
        self.emitted
    }

    /// Failures deferred so far (always empty under fail-fast).
    pub fn ledger(&self) -> &ErrorLedger {
        &self.ledger
    }

    /// Event bus attached by [`RunnerBuilder`](crate::RunnerBuilder), if any.
    pub fn bus(&self) -> Option<&Bus> {
        self.bus.as_ref()
    }
}

#[async_trait]
impl<T, R> Stage<T, R> for BoundedRunner<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    async fn integrate(
        &mut self,
        item: T,
        downstream: &mut dyn Downstream<R>,
    ) -> Result<bool, StageError> {
        self.submit(item, downstream).await
    }

    async fn finish(&mut self, downstream: &mut dyn Downstream<R>) -> Result<(), StageError> {
        BoundedRunner::finish(self, downstream).await
    }
}
