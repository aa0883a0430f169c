//! # SubscriberSet: non-blocking fan-out over multiple subscribers
//!
//! [`SubscriberSet`] distributes each [`Event`] to multiple subscribers
//! **without awaiting** their processing.
//!
//! ## What it guarantees
//! - `emit(&Event)` returns immediately.
//! - Per-subscriber FIFO (queue order).
//! - Panics inside subscribers are caught and reported as `SubscriberPanicked`.
//!
//! ## What it does **not** guarantee
//! - No global ordering across different subscribers.
//! - No retries on per-subscriber queue overflow (events are dropped for that subscriber).
//!
//! ## Diagram
//! ```text
//!    emit(&Event)
//!        │                        (Arc-clone per subscriber)
//!        ├────────────────► [queue S1] ─► worker S1 ─► on_event()
//!        ├────────────────► [queue S2] ─► worker S2 ─► on_event()
//!        └────────────────► [queue SN] ─► worker SN ─► on_event()
//! ```

use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::subscribers::Subscribe;

/// Per-subscriber channel metadata.
struct SubscriberChannel {
    name: &'static str,
    sender: mpsc::Sender<Arc<Event>>,
}

/// Fan-out coordinator for multiple event subscribers.
///
/// Manages per-subscriber queues and worker tasks, providing:
/// - **Isolation**: each subscriber has a dedicated queue and worker
/// - **Panic safety**: panics caught and reported, they don't take the runner down
/// - **Overflow handling**: dropped events reported via `SubscriberOverflow`
pub struct SubscriberSet {
    channels: Vec<SubscriberChannel>,
    workers: Vec<JoinHandle<()>>,
    bus: Bus,
}

impl SubscriberSet {
    /// Creates a new set and spawns one worker task per subscriber.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>, bus: Bus) -> Self {
        let mut channels = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let cap = sub.queue_capacity().max(1);
            let name = sub.name();
            let (tx, mut rx) = mpsc::channel::<Arc<Event>>(cap);
            let s = Arc::clone(&sub);
            let bus_for_worker = bus.clone();

            let handle = tokio::spawn(async move {
                while let Some(ev) = rx.recv().await {
                    let fut = s.on_event(ev.as_ref());
                    if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                        let info = TaskError::from_panic(panic_err).as_message();
                        bus_for_worker.publish(Event::subscriber_panicked(s.name(), info));
                    }
                }
            });
            channels.push(SubscriberChannel { name, sender: tx });
            workers.push(handle);
        }
        Self {
            channels,
            workers,
            bus,
        }
    }

    /// Emits an event to all subscribers (non-blocking).
    ///
    /// On queue full/closed the event is dropped for that subscriber and a
    /// `SubscriberOverflow` event is published (never for overflow events themselves).
    pub fn emit(&self, event: &Event) {
        let event = Arc::new(event.clone());
        let is_overflow_evt = matches!(event.kind, EventKind::SubscriberOverflow);

        for channel in &self.channels {
            let reason = match channel.sender.try_send(Arc::clone(&event)) {
                Ok(()) => continue,
                Err(mpsc::error::TrySendError::Full(_)) => "full",
                Err(mpsc::error::TrySendError::Closed(_)) => "closed",
            };
            if !is_overflow_evt {
                self.bus
                    .publish(Event::subscriber_overflow(channel.name, reason));
            }
        }
    }

    /// Subscribes to `bus` and forwards every event to this set.
    ///
    /// Once `stop` is cancelled (or the bus closes) the task forwards whatever is
    /// already buffered on the bus and, if it holds the last reference, shuts the
    /// set down gracefully.
    pub fn listen(self: Arc<Self>, bus: &Bus, stop: CancellationToken) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    res = rx.recv() => match res {
                        Ok(ev) => self.emit(&ev),
                        Err(RecvError::Lagged(_)) => continue,
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => break,
                }
            }
            loop {
                match rx.try_recv() {
                    Ok(ev) => self.emit(&ev),
                    Err(TryRecvError::Lagged(_)) => continue,
                    Err(TryRecvError::Empty | TryRecvError::Closed) => break,
                }
            }
            if let Ok(set) = Arc::try_unwrap(self) {
                set.shutdown().await;
            }
        })
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Gracefully shuts down all subscriber workers.
    ///
    /// 1. Drops all channel senders (workers see channel closed)
    /// 2. Awaits all worker tasks to finish
    pub async fn shutdown(self) {
        drop(self.channels);

        for h in self.workers {
            let _ = h.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

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

    struct Exploder;

    #[async_trait]
    impl Subscribe for Exploder {
        async fn on_event(&self, ev: &Event) {
            if ev.kind == EventKind::TaskFailed {
                panic!("exploder");
            }
        }
        fn name(&self) -> &'static str {
            "exploder"
        }
    }

    #[tokio::test]
    async fn test_emit_delivers_in_order() {
        let bus = Bus::new(16);
        let rec = Arc::new(Recorder::default());
        let set = SubscriberSet::new(vec![rec.clone()], bus);
        set.emit(&Event::new(EventKind::TaskSubmitted));
        set.emit(&Event::new(EventKind::TaskCompleted));
        set.shutdown().await;
        assert_eq!(
            *rec.0.lock().unwrap(),
            vec![EventKind::TaskSubmitted, EventKind::TaskCompleted]
        );
    }

    #[tokio::test]
    async fn test_panic_is_reported_on_bus() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let set = SubscriberSet::new(vec![Arc::new(Exploder)], bus);
        set.emit(&Event::new(EventKind::TaskFailed));
        set.shutdown().await;

        let ev = rx.recv().await.expect("panic event");
        assert_eq!(ev.kind, EventKind::SubscriberPanicked);
        assert_eq!(ev.source.as_deref(), Some("exploder"));
        assert_eq!(ev.reason.as_deref(), Some("panic: exploder"));
    }

    #[tokio::test]
    async fn test_listen_forwards_bus_events() {
        let bus = Bus::new(16);
        let rec = Arc::new(Recorder::default());
        let set = Arc::new(SubscriberSet::new(vec![rec.clone()], bus.clone()));
        let stop = CancellationToken::new();
        let listener = set.listen(&bus, stop.clone());

        bus.publish(Event::new(EventKind::RunFinished));
        for _ in 0..100 {
            if !rec.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
        stop.cancel();
        listener.await.unwrap();
        assert_eq!(*rec.0.lock().unwrap(), vec![EventKind::RunFinished]);
    }

    #[tokio::test]
    async fn test_stop_forwards_buffered_events_first() {
        let bus = Bus::new(16);
        let rec = Arc::new(Recorder::default());
        let set = Arc::new(SubscriberSet::new(vec![rec.clone()], bus.clone()));
        let stop = CancellationToken::new();
        let listener = set.listen(&bus, stop.clone());

        bus.publish(Event::new(EventKind::TaskCompleted));
        bus.publish(Event::new(EventKind::RunFinished));
        stop.cancel();
        listener.await.unwrap();

        assert_eq!(
            *rec.0.lock().unwrap(),
            vec![EventKind::TaskCompleted, EventKind::RunFinished]
        );
    }
}
