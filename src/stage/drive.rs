//! # Stage drivers.
//!
//! Connect an upstream [`Stream`] to a [`Stage`] and a [`Downstream`]:
//! - [`drive`] runs a stage to completion against a caller-owned downstream
//!   (partial output stays inspectable after an error);
//! - [`collect`] gathers the output into a `Vec`;
//! - [`spawn_stage`] runs the stage on its own task and exposes the output as a channel.
//!
//! The upstream is pulled one item at a time; nothing is read ahead of the stage.

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::StageError;
use crate::stage::{ChannelDownstream, Collect, Downstream, Stage};

/// Runs `stage` over `upstream`, pushing results into `downstream`.
///
/// ### Flow
/// 1. Pull one item, hand it to [`Stage::integrate`]
/// 2. Stop pulling when the upstream ends, the stage wants no more input,
///    or the downstream is rejecting
/// 3. Call [`Stage::finish`] exactly once
///
/// An error from `integrate` aborts the run immediately (`finish` is not called).
pub async fn drive<T, R, S, U, D>(
    upstream: U,
    stage: &mut S,
    downstream: &mut D,
) -> Result<(), StageError>
where
    T: Send + 'static,
    R: Send + 'static,
    S: Stage<T, R> + ?Sized,
    U: Stream<Item = T>,
    D: Downstream<R>,
{
    futures::pin_mut!(upstream);

    if !downstream.is_rejecting() {
        while let Some(item) = upstream.next().await {
            let more = stage.integrate(item, &mut *downstream).await?;
            if !more || downstream.is_rejecting() {
                break;
            }
        }
    }
    stage.finish(&mut *downstream).await
}

/// Runs `stage` over `upstream` and returns every emitted result.
pub async fn collect<T, R, S, U>(upstream: U, mut stage: S) -> Result<Vec<R>, StageError>
where
    T: Send + 'static,
    R: Send + 'static,
    S: Stage<T, R>,
    U: Stream<Item = T>,
{
    let mut out = Collect::new();
    drive(upstream, &mut stage, &mut out).await?;
    Ok(out.into_items())
}

/// Spawns `stage` on its own task; results arrive on the returned receiver.
///
/// Dropping the receiver makes the downstream reject, which tears the stage down
/// at its next push. The join handle yields the run outcome.
pub fn spawn_stage<T, R, S, U>(
    upstream: U,
    mut stage: S,
) -> (mpsc::UnboundedReceiver<R>, JoinHandle<Result<(), StageError>>)
where
    T: Send + 'static,
    R: Send + 'static,
    S: Stage<T, R> + 'static,
    U: Stream<Item = T> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut down = ChannelDownstream::new(tx);
        drive(upstream, &mut stage, &mut down).await
    });
    (rx, handle)
}
