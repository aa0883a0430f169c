//! # Structured fan-out scope.
//!
//! A [`SubtaskGroup`] runs sub-operations concurrently under one cancellation scope
//! and joins them all-or-nothing:
//!
//! ```text
//!   Open ──get()/join()──► Joining ──every child done──► Joined
//!     │                       │
//!     │                       └─ abort + await whatever is left
//!     └──close()──────────────────────────────────► Closed
//!
//!   Tripwire (any phase): first failure | deadline ─► record cause, cancel scope
//! ```
//!
//! ## Rules
//! - `fork` is only accepted while `Open`; afterwards it is [`UsageError::ForkAfterJoin`].
//! - The join runs **once**; every handle observes the same outcome.
//! - The deadline is measured from `open` and enforced by a watchdog task, whether or
//!   not anyone is joining when it passes.
//! - The first failing child cancels its siblings as soon as it fails.
//! - Dropping the last reference cancels the scope and aborts every child.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::OnceCell;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::GroupConfig;
use crate::error::{TaskError, UsageError};
use crate::events::{self, Bus, Event, EventKind};
use crate::group::handle::{Slot, SubtaskHandle};

/// Observable phase of a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupPhase {
    /// Accepting forks.
    Open,
    /// A join is waiting for the children.
    Joining,
    /// Outcome recorded; handles read without blocking.
    Joined,
    /// Closed; every child was cancelled and awaited.
    Closed,
}

enum GroupState {
    Open(JoinSet<Result<(), TaskError>>),
    Joining,
    Joined,
    Closed,
}

/// Cancellation shared by the children, the deadline watchdog and the join.
///
/// `cause` keeps whatever tripped the scope first.
struct Tripwire {
    token: CancellationToken,
    cause: OnceLock<TaskError>,
}

impl Tripwire {
    fn trip(&self, cause: TaskError) {
        let _ = self.cause.set(cause);
        self.token.cancel();
    }

    fn cause(&self) -> Option<TaskError> {
        self.cause.get().cloned()
    }

    /// Trips the scope with [`TaskError::Timeout`] once `at` passes.
    fn arm(self: Arc<Self>, at: Instant, timeout: Duration) {
        tokio::spawn(async move {
            tokio::select! {
                _ = self.token.cancelled() => {}
                _ = tokio::time::sleep_until(at) => self.trip(TaskError::Timeout { timeout }),
            }
        });
    }
}

struct GroupInner {
    name: Arc<str>,
    deadline: Option<(Instant, Duration)>,
    tripwire: Arc<Tripwire>,
    state: Mutex<GroupState>,
    outcome: OnceCell<Result<(), TaskError>>,
    forks: AtomicU64,
    bus: Option<Bus>,
}

impl Drop for GroupInner {
    fn drop(&mut self) {
        self.tripwire.token.cancel();
    }
}

/// Cancellation scope owning a set of concurrently running sub-operations.
///
/// Cheap to clone; clones share the same scope.
///
/// # Example
/// ```
/// use stagevisor::{GroupConfig, SubtaskGroup, TaskError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), TaskError> {
/// let group = SubtaskGroup::open(GroupConfig::new());
/// let name = group.fork(async { Ok::<_, TaskError>(String::from("name-7")) })?;
/// let twice = group.fork(async { Ok::<_, TaskError>(7 * 2) })?;
///
/// assert_eq!((name.get().await?, twice.get().await?), ("name-7".to_string(), 14));
/// group.close().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SubtaskGroup {
    inner: Arc<GroupInner>,
}

impl SubtaskGroup {
    /// Opens an anonymous group.
    ///
    /// With a deadline configured this spawns the watchdog, so it must be called
    /// from within a tokio runtime.
    pub fn open(cfg: GroupConfig) -> Self {
        Self::open_with("group", cfg, None)
    }

    /// Opens a named group (the name shows up in events and default child names).
    pub fn open_named(name: impl Into<Arc<str>>, cfg: GroupConfig) -> Self {
        Self::open_with(name, cfg, None)
    }

    /// Opens a named group publishing its lifecycle on `bus`.
    pub fn open_observed(name: impl Into<Arc<str>>, cfg: GroupConfig, bus: Bus) -> Self {
        Self::open_with(name, cfg, Some(bus))
    }

    pub(crate) fn open_with(name: impl Into<Arc<str>>, cfg: GroupConfig, bus: Option<Bus>) -> Self {
        let name = name.into();
        let deadline = cfg.deadline().map(|d| (Instant::now() + d, d));

        events::publish(bus.as_ref(), || {
            let ev = Event::new(EventKind::GroupOpened).with_source(Arc::clone(&name));
            match cfg.deadline() {
                Some(d) => ev.with_timeout(d),
                None => ev,
            }
        });

        let tripwire = Arc::new(Tripwire {
            token: CancellationToken::new(),
            cause: OnceLock::new(),
        });
        if let Some((at, timeout)) = deadline {
            Arc::clone(&tripwire).arm(at, timeout);
        }

        Self {
            inner: Arc::new(GroupInner {
                name,
                deadline,
                tripwire,
                state: Mutex::new(GroupState::Open(JoinSet::new())),
                outcome: OnceCell::new(),
                forks: AtomicU64::new(0),
                bus,
            }),
        }
    }

    /// Forks a sub-operation named `<group>#<position>`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn fork<R, F>(&self, fut: F) -> Result<SubtaskHandle<R>, UsageError>
    where
        R: Send + 'static,
        F: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        self.spawn(None, fut)
    }

    /// Forks a named sub-operation.
    pub fn fork_named<R, F>(
        &self,
        name: impl Into<Arc<str>>,
        fut: F,
    ) -> Result<SubtaskHandle<R>, UsageError>
    where
        R: Send + 'static,
        F: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        self.spawn(Some(name.into()), fut)
    }

    fn spawn<R, F>(&self, name: Option<Arc<str>>, fut: F) -> Result<SubtaskHandle<R>, UsageError>
    where
        R: Send + 'static,
        F: Future<Output = Result<R, TaskError>> + Send + 'static,
    {
        let slot = Arc::new(Mutex::new(Slot::Running));
        let pos = {
            let mut state = self.lock_state();
            let GroupState::Open(set) = &mut *state else {
                return Err(UsageError::ForkAfterJoin);
            };

            let tripwire = Arc::clone(&self.inner.tripwire);
            let child_slot = Arc::clone(&slot);
            set.spawn(async move {
                let res = tokio::select! {
                    biased;
                    _ = tripwire.token.cancelled() => Err(TaskError::Canceled),
                    res = AssertUnwindSafe(fut).catch_unwind() => {
                        let res = res.unwrap_or_else(|panic| Err(TaskError::from_panic(panic)));
                        if let Err(e) = &res {
                            tripwire.trip(e.clone());
                        }
                        res
                    }
                };
                let mut slot = lock(&child_slot);
                match res {
                    Ok(value) => {
                        *slot = Slot::Succeeded(value);
                        Ok(())
                    }
                    Err(e) => {
                        *slot = Slot::Failed;
                        Err(e)
                    }
                }
            });
            self.inner.forks.fetch_add(1, Ordering::Relaxed)
        };

        let name = name.unwrap_or_else(|| format!("{}#{pos}", self.inner.name).into());
        self.publish(|| {
            Event::new(EventKind::SubtaskForked)
                .with_source(Arc::clone(&name))
                .with_index(pos)
        });
        Ok(SubtaskHandle::new(name, self.clone(), slot))
    }

    /// Joins the group: waits for every child, honoring the failure and deadline policy.
    ///
    /// Runs once; concurrent and later callers share the recorded outcome.
    pub async fn join(&self) -> Result<(), TaskError> {
        self.inner
            .outcome
            .get_or_init(|| self.run_join())
            .await
            .clone()
    }

    async fn run_join(&self) -> Result<(), TaskError> {
        let set = {
            let mut state = self.lock_state();
            match std::mem::replace(&mut *state, GroupState::Joining) {
                GroupState::Open(set) => Some(set),
                other => {
                    *state = other;
                    None
                }
            }
        };
        let Some(mut set) = set else {
            return Err(TaskError::Canceled);
        };

        let outcome = self.drain(&mut set).await;
        *self.lock_state() = GroupState::Joined;

        match &outcome {
            Ok(()) => {
                let forks = self.forked();
                self.publish(|| Event::new(EventKind::GroupJoined).with_count(forks));
            }
            Err(TaskError::Timeout { timeout }) => {
                let timeout = *timeout;
                self.publish(|| Event::new(EventKind::GroupTimedOut).with_timeout(timeout));
            }
            Err(e) => {
                self.publish(|| Event::new(EventKind::GroupFailed).with_reason(e.as_message()));
            }
        }
        outcome
    }

    /// Waits for children until all succeeded, one failed, or the deadline passed.
    ///
    /// A failed join reports the cause that tripped the scope, not the
    /// cancellation its siblings observed.
    async fn drain(&self, set: &mut JoinSet<Result<(), TaskError>>) -> Result<(), TaskError> {
        let tripwire = &self.inner.tripwire;
        let outcome = loop {
            let next = match self.inner.deadline {
                Some((at, timeout)) => match tokio::time::timeout_at(at, set.join_next()).await {
                    Ok(next) => next,
                    Err(_elapsed) => {
                        tripwire.trip(TaskError::Timeout { timeout });
                        break Err(TaskError::Timeout { timeout });
                    }
                },
                None => set.join_next().await,
            };
            match next {
                None => break Ok(()),
                Some(Ok(Ok(()))) => continue,
                Some(Ok(Err(e))) => break Err(e),
                Some(Err(join_err)) if join_err.is_panic() => {
                    break Err(TaskError::from_panic(join_err.into_panic()));
                }
                Some(Err(_aborted)) => break Err(TaskError::Canceled),
            }
        };

        tripwire.token.cancel();
        set.abort_all();
        while set.join_next().await.is_some() {}

        match (outcome, tripwire.cause()) {
            (Err(_), Some(cause)) => Err(cause),
            (outcome, _) => outcome,
        }
    }

    /// Cancels every child still running and waits for all of them.
    ///
    /// Idempotent. Handles read after a close observe the join outcome
    /// (typically [`TaskError::Canceled`] for children that had not finished).
    pub async fn close(&self) {
        let attached = {
            let state = self.lock_state();
            match &*state {
                GroupState::Open(set) => set.len(),
                GroupState::Closed => return,
                _ => 0,
            }
        };

        self.inner.tripwire.token.cancel();
        let _ = self.join().await;
        *self.lock_state() = GroupState::Closed;
        self.publish(|| Event::new(EventKind::GroupClosed).with_count(attached as u64));
    }

    /// Group name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current phase.
    pub fn phase(&self) -> GroupPhase {
        match &*self.lock_state() {
            GroupState::Open(_) => GroupPhase::Open,
            GroupState::Joining => GroupPhase::Joining,
            GroupState::Joined => GroupPhase::Joined,
            GroupState::Closed => GroupPhase::Closed,
        }
    }

    /// Number of sub-operations forked so far.
    pub fn forked(&self) -> u64 {
        self.inner.forks.load(Ordering::Relaxed)
    }

    /// True once the join outcome is recorded.
    pub(crate) fn is_joined(&self) -> bool {
        self.inner.outcome.initialized()
    }

    /// Token cancelled on first failure, deadline or close.
    ///
    /// Sub-operations may watch it to stop work that is not an `.await` point.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.tripwire.token.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, GroupState> {
        lock(&self.inner.state)
    }

    fn publish(&self, ev: impl FnOnce() -> Event) {
        events::publish(self.inner.bus.as_ref(), || {
            let ev = ev();
            if ev.source.is_some() {
                ev
            } else {
                ev.with_source(Arc::clone(&self.inner.name))
            }
        });
    }
}

/// Runs `f` inside a fresh group and always closes the group afterwards.
///
/// # Example
/// ```
/// use stagevisor::{scoped, GroupConfig, TaskError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), TaskError> {
/// let total = scoped(GroupConfig::new(), |group| async move {
///     let a = group.fork(async { Ok::<_, TaskError>(2) })?;
///     let b = group.fork(async { Ok::<_, TaskError>(3) })?;
///     Ok::<_, TaskError>(a.get().await? + b.get().await?)
/// })
/// .await?;
/// assert_eq!(total, 5);
/// # Ok(())
/// # }
/// ```
pub async fn scoped<F, Fut, O>(cfg: GroupConfig, f: F) -> O
where
    F: FnOnce(SubtaskGroup) -> Fut,
    Fut: Future<Output = O>,
{
    let group = SubtaskGroup::open(cfg);
    let fut = f(group.clone());
    within(group, fut).await
}

/// Awaits `fut` and closes `group` afterwards.
pub(crate) async fn within<Fut, O>(group: SubtaskGroup, fut: Fut) -> O
where
    Fut: Future<Output = O>,
{
    let out = fut.await;
    group.close().await;
    out
}

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::SubtaskState;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Arc<AtomicUsize>) {
        let c = Arc::new(AtomicUsize::new(0));
        (c.clone(), c)
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_success_each_handle_gets_own_result() {
        let group = SubtaskGroup::open(GroupConfig::new());
        let name = group
            .fork_named("name", async { Ok::<_, TaskError>(format!("name-{}", 7)) })
            .unwrap();
        let twice = group.fork(async { Ok::<_, TaskError>(7u64 * 2) }).unwrap();
        assert_eq!(twice.name(), "group#1");

        assert_eq!(name.get().await.unwrap(), "name-7");
        assert_eq!(twice.get().await.unwrap(), 14);
        assert_eq!(group.phase(), GroupPhase::Joined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_runs_once() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let group = SubtaskGroup::open_observed("once", GroupConfig::new(), bus);
        let handles: Vec<_> = (0..3u64)
            .map(|i| {
                group
                    .fork(async move {
                        tokio::time::sleep(Duration::from_millis(10 * i)).await;
                        Ok::<_, TaskError>(i)
                    })
                    .unwrap()
            })
            .collect();

        let results = futures::future::join_all(handles.into_iter().map(SubtaskHandle::get)).await;
        let values: Vec<u64> = results.into_iter().map(Result::unwrap).collect();
        assert_eq!(values, vec![0, 1, 2]);
        assert!(group.join().await.is_ok());

        let mut joined = 0;
        while let Ok(ev) = rx.try_recv() {
            if ev.kind == EventKind::GroupJoined {
                joined += 1;
                assert_eq!(ev.count, Some(3));
            }
        }
        assert_eq!(joined, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_cancels_siblings() {
        let (finished, seen) = counter();
        let group = SubtaskGroup::open(GroupConfig::new());
        let failing = group
            .fork(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>(TaskError::fail("backend down"))
            })
            .unwrap();
        let slow: Vec<_> = (0..2)
            .map(|_| {
                let seen = seen.clone();
                group
                    .fork(async move {
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok::<u32, TaskError>(1)
                    })
                    .unwrap()
            })
            .collect();

        for handle in slow {
            let err = handle.get().await.unwrap_err();
            assert_eq!(err.to_string(), "execution failed: backend down");
        }
        assert_eq!(failing.state(), SubtaskState::Joined);
        assert!(failing.get().await.is_err());

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_outstanding() {
        let (finished, seen) = counter();
        let group =
            SubtaskGroup::open(GroupConfig::new().with_deadline(Duration::from_millis(100)));
        let fast = group
            .fork(async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok::<_, TaskError>("fast")
            })
            .unwrap();
        let late = group
            .fork(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TaskError>("late")
            })
            .unwrap();

        let start = Instant::now();
        let err = late.get().await.unwrap_err();
        let elapsed = start.elapsed();
        assert!(matches!(
            err,
            TaskError::Timeout { timeout } if timeout == Duration::from_millis(100)
        ));
        assert!(elapsed >= Duration::from_millis(100) && elapsed < Duration::from_millis(110));
        assert!(matches!(fast.get().await, Err(TaskError::Timeout { .. })));

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires_while_nobody_joins() {
        let (finished, seen) = counter();
        let group =
            SubtaskGroup::open(GroupConfig::new().with_deadline(Duration::from_millis(100)));
        let h = group
            .fork(async move {
                tokio::time::sleep(Duration::from_millis(150)).await;
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TaskError>(1u32)
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(group.cancellation_token().is_cancelled());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        assert!(matches!(
            h.get().await,
            Err(TaskError::Timeout { timeout }) if timeout == Duration::from_millis(100)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_before_deadline_survive_late_join() {
        let group =
            SubtaskGroup::open(GroupConfig::new().with_deadline(Duration::from_millis(100)));
        let h = group
            .fork(async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok::<_, TaskError>("early")
            })
            .unwrap();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(h.get().await.unwrap(), "early");
        assert_eq!(group.phase(), GroupPhase::Joined);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_cancels_siblings_while_nobody_joins() {
        let (finished, seen) = counter();
        let group = SubtaskGroup::open(GroupConfig::new());
        let _failing = group
            .fork(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                Err::<u32, _>(TaskError::fail("backend down"))
            })
            .unwrap();
        let slow = group
            .fork(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, TaskError>(1)
            })
            .unwrap();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(group.cancellation_token().is_cancelled());
        assert_eq!(finished.load(Ordering::SeqCst), 0);
        let err = slow.get().await.unwrap_err();
        assert_eq!(err.to_string(), "execution failed: backend down");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fork_after_join_is_usage_error() {
        let group = SubtaskGroup::open(GroupConfig::new());
        let h = group.fork(async { Ok::<_, TaskError>(1) }).unwrap();
        h.get().await.unwrap();

        let err = group.fork(async { Ok::<_, TaskError>(2) }).err();
        assert_eq!(err, Some(UsageError::ForkAfterJoin));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_and_awaits_children() {
        let (finished, seen) = counter();
        let group = SubtaskGroup::open_named("closing", GroupConfig::new());
        let h = group
            .fork(async move {
                tokio::time::sleep(Duration::from_secs(1)).await;
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TaskError>(())
            })
            .unwrap();

        group.close().await;
        assert_eq!(group.phase(), GroupPhase::Closed);
        assert!(group.cancellation_token().is_cancelled());
        assert!(matches!(h.get().await, Err(TaskError::Canceled)));
        assert!(group.fork(async { Ok::<_, TaskError>(()) }).is_err());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicking_child_fails_group() {
        let group = SubtaskGroup::open(GroupConfig::new());
        let h = group
            .fork(async {
                if true {
                    panic!("child blew up");
                }
                Ok::<u8, TaskError>(0)
            })
            .unwrap();
        let err = h.get().await.unwrap_err();
        assert_eq!(err.as_message(), "panic: child blew up");
    }

    #[tokio::test(start_paused = true)]
    async fn test_scoped_closes_group() {
        let mut kept = None;
        let sum = scoped(GroupConfig::new(), |group| {
            kept = Some(group.clone());
            async move {
                let a = group.fork(async { Ok::<_, TaskError>(2u32) })?;
                let b = group.fork(async { Ok::<_, TaskError>(3u32) })?;
                Ok::<_, TaskError>(a.get().await? + b.get().await?)
            }
        })
        .await
        .unwrap();
        assert_eq!(sum, 5);
        assert_eq!(kept.map(|g| g.phase()), Some(GroupPhase::Closed));
    }
}
