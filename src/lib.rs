//! # stagevisor
//!
//! **Stagevisor** runs a user operation over a lazy stream of items with bounded
//! concurrency, and lets every item fan out into sub-operations under structured
//! cancellation.
//!
//! The crate is a building block for pipelines that call slow, variable-latency
//! backends per item: results are emitted in completion order (no head-of-line
//! blocking), while the admission budget keeps memory and load bounded.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Stream<T> (upstream, pulled one item at a time)
//!        │
//!        ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  BoundedRunner<T, R>  (one Stage per run)                         │
//! │  - budget: max_concurrency unresolved tasks                       │
//! │  - JoinSet: completion queue (join_next = completion order)       │
//! │  - ErrorPolicy: FailFast | DelayError (+ ErrorLedger)             │
//! └──────┬──────────────────┬──────────────────┬──────────────┬───────┘
//!        ▼                  ▼                  ▼              │
//!   ┌──────────┐       ┌──────────┐       ┌──────────┐        │
//!   │ task #0  │       │ task #1  │       │ task #k  │        │ Publishes:
//!   │ op(item) │       │ op(item) │       │ op(item) │        │ - TaskSubmitted
//!   └────┬─────┘       └──────────┘       └──────────┘        │ - BudgetSaturated
//!        │ (aggregate adapters only)                          │ - TaskCompleted / TaskFailed
//!        ▼                                                    │ - RunFinished ...
//!   ┌───────────────────────────────┐                         │
//!   │ SubtaskGroup (per item)       │── GroupOpened/Joined ──►│
//!   │ fork ─ fork ─ fork ─► join    │                         │
//!   └───────────────────────────────┘                         ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                     Bus (broadcast channel)                       │
//! │              (capacity: RunnerConfig::bus_capacity)               │
//! └─────────────────────────────────┬─────────────────────────────────┘
//!                                   ▼
//!                         listener (RunnerBuilder)
//!                                   ▼
//!                             SubscriberSet
//!                          ┌────────┼────────┐
//!                          ▼        ▼        ▼
//!                       worker1  worker2  workerN
//! ```
//!
//! ### Lifecycle of one run
//! ```text
//! drive(upstream, runner, downstream)
//!
//! for item in upstream {
//!   ├─► spawn op(item) into the JoinSet, publish TaskSubmitted
//!   ├─► in_flight < max_concurrency ─► next item
//!   └─► otherwise drain ONE completion:
//!          ├─ Ok(value) ─► downstream.push(value)
//!          │                 └─ false ─► drop every in-flight task, stop pulling
//!          └─ Err(error)
//!               ├─ FailFast   ─► drop every in-flight task, raise StageError::Failed
//!               └─ DelayError ─► ErrorLedger.record(error), continue
//! }
//! finish:
//!   ├─► drain the rest in completion order while downstream accepts
//!   └─► DelayError with a non-empty ledger ─► raise StageError::Aggregate
//! ```
//!
//! ## Features
//! | Area              | Description                                                         | Key types / traits                          |
//! |-------------------|---------------------------------------------------------------------|---------------------------------------------|
//! | **Stages**        | Stream-to-downstream driving contract.                              | [`Stage`], [`Downstream`], [`drive`]        |
//! | **Runner**        | Bounded-concurrency execution with fail-fast or delay-error policy. | [`BoundedRunner`], [`ErrorPolicy`]          |
//! | **Fan-out**       | Structured sub-task groups with shared join and deadline.           | [`SubtaskGroup`], [`SubtaskHandle`]         |
//! | **Adapters**      | Runner + group composition per item.                                | [`aggregate_concurrent`], [`aggregate_with`]|
//! | **Subscriber API**| Hook into runner and group events.                                  | [`Subscribe`], [`Bus`]                      |
//! | **Errors**        | Typed errors for operations and whole runs.                         | [`TaskError`], [`StageError`]               |
//! | **Configuration** | Runner and group settings.                                          | [`RunnerConfig`], [`GroupConfig`]           |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use futures::stream;
//! use stagevisor::{collect, OperationFn, OperationRef, RunnerBuilder, RunnerConfig, TaskError};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Build subscribers (optional)
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn stagevisor::Subscribe>> =
//!         vec![Arc::new(stagevisor::LogWriter::new())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn stagevisor::Subscribe>> = Vec::new();
//!
//!     let fetch: OperationRef<u32, String> = OperationFn::arc("fetch", |id: u32| async move {
//!         tokio::time::sleep(std::time::Duration::from_millis(u64::from(10 - id))).await;
//!         Ok::<_, TaskError>(format!("product-{id}"))
//!     });
//!
//!     let runner = RunnerBuilder::new(RunnerConfig::new(4))
//!         .with_subscribers(subs)
//!         .build(fetch)?;
//!
//!     // Completion order: faster items come out first.
//!     let out = collect(stream::iter(1..=8u32), runner).await?;
//!     assert_eq!(out.len(), 8);
//!     Ok(())
//! }
//! ```
mod aggregate;
mod config;
mod error;
mod events;
mod group;
mod policies;
mod runner;
mod stage;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use aggregate::{aggregate_concurrent, aggregate_with, execute_concurrent};
pub use config::{GroupConfig, RunnerConfig};
pub use error::{
    AggregateError, BoxError, SharedError, StageError, TaskError, TaskFailure, UsageError,
};
pub use events::{Bus, Event, EventKind};
pub use group::{scoped, GroupPhase, SubtaskGroup, SubtaskHandle, SubtaskState};
pub use policies::ErrorPolicy;
pub use runner::{BoundedRunner, ErrorLedger, RunState, RunnerBuilder};
pub use stage::{collect, drive, spawn_stage, ChannelDownstream, Collect, Downstream, Stage, Take};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{BoxOpFuture, Operation, OperationFn, OperationRef};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
