use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::RunnerConfig;
use crate::error::UsageError;
use crate::events::Bus;
use crate::runner::BoundedRunner;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::OperationRef;

/// Forwarding task spawned by [`RunnerBuilder::build`].
///
/// Stopping it never discards events already on the bus: the task forwards
/// them, then shuts the subscriber workers down.
pub(crate) struct Listener {
    stop: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Listener {
    fn spawn(subs: SubscriberSet, bus: &Bus) -> Self {
        let stop = CancellationToken::new();
        let handle = Arc::new(subs).listen(bus, stop.clone());
        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stops forwarding and waits until every subscriber has processed its queue.
    pub(crate) async fn shutdown(mut self) {
        self.stop.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

/// Builder for constructing a [`BoundedRunner`] with optional observability.
pub struct RunnerBuilder {
    cfg: RunnerConfig,
    bus: Option<Bus>,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl RunnerBuilder {
    /// Creates a new builder with the given configuration.
    pub fn new(cfg: RunnerConfig) -> Self {
        Self {
            cfg,
            bus: None,
            subscribers: Vec::new(),
        }
    }

    /// Publishes runtime events on an existing bus.
    ///
    /// Several runners (and the groups their operations open) may share one bus.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Sets event subscribers for observability.
    ///
    /// Subscribers receive runtime events (admission, drain, group lifecycle)
    /// through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Configuration the runner will be built with.
    pub fn config(&self) -> &RunnerConfig {
        &self.cfg
    }

    /// Builds the runner executing `op`.
    ///
    /// With subscribers attached this spawns the forwarding task, so it must be
    /// called from within a tokio runtime. The run's last events (`RunFinished`,
    /// `RunnerAborted`) reach every subscriber before `finish` or the failing
    /// `submit` returns.
    pub fn build<T, R>(self, op: OperationRef<T, R>) -> Result<BoundedRunner<T, R>, UsageError>
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        self.build_with(|_| op)
    }

    /// Builds the runner, handing the event bus (if any) to the operation factory.
    pub(crate) fn build_with<T, R, F>(self, make_op: F) -> Result<BoundedRunner<T, R>, UsageError>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: FnOnce(Option<&Bus>) -> OperationRef<T, R>,
    {
        let budget = self.cfg.budget()?;

        let bus = match self.bus {
            Some(bus) => Some(bus),
            None if !self.subscribers.is_empty() => Some(Bus::new(self.cfg.bus_capacity_clamped())),
            None => None,
        };
        let listener = match &bus {
            Some(bus) if !self.subscribers.is_empty() => {
                let subs = SubscriberSet::new(self.subscribers, bus.clone());
                Some(Listener::spawn(subs, bus))
            }
            _ => None,
        };

        let op = make_op(bus.as_ref());
        Ok(BoundedRunner::from_parts(
            budget,
            self.cfg.error_policy,
            op,
            bus,
            listener,
        ))
    }
}

impl From<RunnerConfig> for RunnerBuilder {
    fn from(cfg: RunnerConfig) -> Self {
        Self::new(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StageError, TaskError};
    use crate::events::{Event, EventKind};
    use crate::stage::{collect, Collect};
    use crate::tasks::OperationFn;
    use async_trait::async_trait;
    use futures::stream;
    use std::sync::Mutex;

    fn identity() -> OperationRef<u32, u32> {
        OperationFn::arc("identity", |x: u32| async move { Ok::<_, TaskError>(x) })
    }

    #[test]
    fn test_zero_budget_rejected_before_spawning() {
        let res = RunnerBuilder::new(RunnerConfig::new(0)).build(identity());
        assert_eq!(res.err(), Some(UsageError::ZeroConcurrency));
    }

    #[tokio::test(start_paused = true)]
    async fn test_runner_publishes_lifecycle() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let runner = RunnerBuilder::new(RunnerConfig::new(2))
            .with_bus(bus)
            .build(identity())
            .unwrap();
        let out = collect(stream::iter([1u32, 2, 3]), runner).await.unwrap();
        assert_eq!(out.len(), 3);

        let mut kinds = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            assert_eq!(ev.source.as_deref(), Some("identity"));
            kinds.push(ev.kind);
        }
        let submitted = kinds.iter().filter(|k| **k == EventKind::TaskSubmitted).count();
        let completed = kinds.iter().filter(|k| **k == EventKind::TaskCompleted).count();
        assert_eq!(submitted, 3);
        assert_eq!(completed, 3);
        assert!(kinds.contains(&EventKind::BudgetSaturated));
        assert_eq!(kinds.last(), Some(&EventKind::RunFinished));
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<EventKind>>);

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, ev: &Event) {
            self.0.lock().unwrap().push(ev.kind);
        }
        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_receive_events() {
        let rec = Arc::new(Recorder::default());
        let runner = RunnerBuilder::new(RunnerConfig::new(1))
            .with_subscribers(vec![rec.clone()])
            .build(identity())
            .unwrap();
        assert!(runner.bus().is_some());
        collect(stream::iter([7u32]), runner).await.unwrap();

        assert_eq!(
            *rec.0.lock().unwrap(),
            vec![
                EventKind::TaskSubmitted,
                EventKind::BudgetSaturated,
                EventKind::TaskCompleted,
                EventKind::RunFinished,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_every_event_of_the_run() {
        let rec = Arc::new(Recorder::default());
        let runner = RunnerBuilder::new(RunnerConfig::new(2))
            .with_subscribers(vec![rec.clone()])
            .build(identity())
            .unwrap();
        let out = collect(stream::iter([1u32, 2, 3]), runner).await.unwrap();
        assert_eq!(out.len(), 3);

        let kinds = rec.0.lock().unwrap().clone();
        let count = |kind: EventKind| kinds.iter().filter(|k| **k == kind).count();
        assert_eq!(count(EventKind::TaskSubmitted), 3);
        assert_eq!(count(EventKind::TaskCompleted), 3);
        assert_eq!(kinds.last(), Some(&EventKind::RunFinished));
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribers_see_abort() {
        let rec = Arc::new(Recorder::default());
        let op: OperationRef<u32, u32> = OperationFn::arc("flaky", |x: u32| async move {
            if x == 2 {
                return Err(TaskError::fail("boom"));
            }
            Ok(x)
        });
        let runner = RunnerBuilder::new(RunnerConfig::new(1))
            .with_subscribers(vec![rec.clone()])
            .build(op)
            .unwrap();
        let err = collect(stream::iter([1u32, 2, 3]), runner).await.unwrap_err();
        assert!(matches!(err, StageError::Failed { index: 1, .. }));

        let kinds = rec.0.lock().unwrap().clone();
        assert_eq!(
            &kinds[kinds.len() - 2..],
            &[EventKind::TaskFailed, EventKind::RunnerAborted]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_runner_still_forwards_queued_events() {
        let rec = Arc::new(Recorder::default());
        let mut runner = RunnerBuilder::new(RunnerConfig::new(4))
            .with_subscribers(vec![rec.clone()])
            .build(identity())
            .unwrap();
        let mut out: Collect<u32> = Collect::new();
        runner.submit(5, &mut out).await.unwrap();
        drop(runner);

        for _ in 0..100 {
            if !rec.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(*rec.0.lock().unwrap(), vec![EventKind::TaskSubmitted]);
    }
}
