//! # Aggregate-concurrency adapters.
//!
//! Compose a [`BoundedRunner`] (inter-item concurrency) with a [`SubtaskGroup`]
//! (intra-item concurrency). The outer budget counts **items**; the sub-operations an
//! item forks are not counted against it.
//!
//! ```text
//! item ─► runner slot ─► open group ─┬─ fork(first(item.clone())) ─┐
//!                                    └─ fork(second(item))        ─┴─ join ─► combine ─► close
//! ```
//!
//! All constructors accept a [`RunnerConfig`](crate::RunnerConfig) or a
//! [`RunnerBuilder`]; with a bus attached, each group publishes its lifecycle there.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::config::GroupConfig;
use crate::error::{TaskError, UsageError};
use crate::group::{within, SubtaskGroup};
use crate::runner::{BoundedRunner, RunnerBuilder};
use crate::tasks::{OperationFn, OperationRef};

/// Runner executing `op` once per item.
pub fn execute_concurrent<T, R>(
    runner: impl Into<RunnerBuilder>,
    op: OperationRef<T, R>,
) -> Result<BoundedRunner<T, R>, UsageError>
where
    T: Send + 'static,
    R: Send + 'static,
{
    runner.into().build(op)
}

/// Runner that, per item, runs `first` and `second` concurrently and combines both results.
///
/// If either sub-operation fails the other is cancelled and the item fails with that error.
///
/// # Example
/// ```
/// use futures::stream;
/// use stagevisor::{aggregate_concurrent, collect, RunnerConfig, TaskError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let runner = aggregate_concurrent(
///     RunnerConfig::new(8),
///     |id: u32| async move { Ok::<_, TaskError>(format!("name-{id}")) },
///     |id: u32| async move { Ok::<_, TaskError>(id * 2) },
///     |name, twice| (name, twice),
/// )?;
///
/// let out = collect(stream::iter([7u32]), runner).await?;
/// assert_eq!(out, vec![("name-7".to_string(), 14)]);
/// # Ok(())
/// # }
/// ```
pub fn aggregate_concurrent<T, A, B, R, F1, Fut1, F2, Fut2, C>(
    runner: impl Into<RunnerBuilder>,
    first: F1,
    second: F2,
    combine: C,
) -> Result<BoundedRunner<T, R>, UsageError>
where
    T: Clone + Send + 'static,
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
    F1: Fn(T) -> Fut1 + Send + Sync + 'static,
    Fut1: Future<Output = Result<A, TaskError>> + Send + 'static,
    F2: Fn(T) -> Fut2 + Send + Sync + 'static,
    Fut2: Future<Output = Result<B, TaskError>> + Send + 'static,
    C: Fn(A, B) -> R + Send + Sync + 'static,
{
    let combine = Arc::new(combine);
    aggregate_with(
        runner,
        GroupConfig::new(),
        move |item: T, group: SubtaskGroup| {
            let first = first(item.clone());
            let second = second(item);
            let combine = Arc::clone(&combine);
            async move {
                let a = group.fork(first)?;
                let b = group.fork(second)?;
                Ok::<_, TaskError>((*combine)(a.get().await?, b.get().await?))
            }
        },
    )
}

/// Runner handing a fresh [`SubtaskGroup`] to `callback` for every item.
///
/// The callback may fork any number of (named) sub-operations and read them; the
/// group is closed once the callback's future completes. `group_cfg.deadline`
/// bounds every item's sub-operations (measured from the moment the item starts).
pub fn aggregate_with<T, R, F, Fut>(
    runner: impl Into<RunnerBuilder>,
    group_cfg: GroupConfig,
    callback: F,
) -> Result<BoundedRunner<T, R>, UsageError>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T, SubtaskGroup) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
{
    runner.into().build_with(move |bus| {
        let bus = bus.cloned();
        let seq = AtomicU64::new(0);
        let op: OperationRef<T, R> = OperationFn::arc("aggregate", move |item: T| {
            let name = format!("aggregate#{}", seq.fetch_add(1, Ordering::Relaxed));
            let group = SubtaskGroup::open_with(name, group_cfg, bus.clone());
            let fut = callback(item, group.clone());
            within(group, fut)
        });
        op
    })
}
