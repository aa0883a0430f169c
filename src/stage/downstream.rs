//! # Downstream side of a pipeline stage.
//!
//! A [`Downstream`] receives the results a stage emits. `push` answers whether more
//! results are wanted; once it returns `false` the downstream is *rejecting* and
//! [`Downstream::is_rejecting`] must keep reporting so.
//!
//! Provided implementations:
//! - [`Collect`] buffers every result in a `Vec` and never rejects.
//! - [`Take`] wraps another downstream and starts rejecting after `n` accepted results.
//! - [`ChannelDownstream`] forwards into an unbounded mpsc channel and rejects once
//!   the receiver is gone.

use tokio::sync::mpsc;

/// Consumer of stage results.
///
/// Runners call `push` from whichever task is draining, so implementations must be `Send`.
pub trait Downstream<R>: Send {
    /// Offers one result. Returns `false` when no further results are wanted.
    fn push(&mut self, item: R) -> bool;

    /// True once the downstream stopped accepting results.
    fn is_rejecting(&self) -> bool;
}

impl<R, D> Downstream<R> for &mut D
where
    D: Downstream<R> + ?Sized,
{
    fn push(&mut self, item: R) -> bool {
        (**self).push(item)
    }

    fn is_rejecting(&self) -> bool {
        (**self).is_rejecting()
    }
}

/// Buffers every result, in arrival order.
#[derive(Debug)]
pub struct Collect<R> {
    items: Vec<R>,
}

impl<R> Default for Collect<R> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<R> Collect<R> {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Results received so far.
    pub fn items(&self) -> &[R] {
        &self.items
    }

    /// Number of results received so far.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if nothing was received.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Consumes the collector, returning the results.
    pub fn into_items(self) -> Vec<R> {
        self.items
    }
}

impl<R: Send> Downstream<R> for Collect<R> {
    fn push(&mut self, item: R) -> bool {
        self.items.push(item);
        true
    }

    fn is_rejecting(&self) -> bool {
        false
    }
}

/// Accepts at most `limit` results, then rejects.
#[derive(Debug)]
pub struct Take<D> {
    inner: D,
    remaining: usize,
    rejecting: bool,
}

impl<D> Take<D> {
    /// Wraps `inner`, accepting at most `limit` results.
    pub fn new(inner: D, limit: usize) -> Self {
        Self {
            inner,
            remaining: limit,
            rejecting: limit == 0,
        }
    }

    /// Returns the wrapped downstream.
    pub fn into_inner(self) -> D {
        self.inner
    }

    /// Borrows the wrapped downstream.
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<R, D: Downstream<R>> Downstream<R> for Take<D> {
    fn push(&mut self, item: R) -> bool {
        if self.rejecting {
            return false;
        }
        self.remaining -= 1;
        let more = self.inner.push(item);
        self.rejecting = !more || self.remaining == 0;
        !self.rejecting
    }

    fn is_rejecting(&self) -> bool {
        self.rejecting || self.inner.is_rejecting()
    }
}

/// Forwards results into an unbounded channel.
#[derive(Debug)]
pub struct ChannelDownstream<R> {
    tx: mpsc::UnboundedSender<R>,
}

impl<R> ChannelDownstream<R> {
    /// Wraps the sending half of a channel.
    pub fn new(tx: mpsc::UnboundedSender<R>) -> Self {
        Self { tx }
    }
}

impl<R: Send> Downstream<R> for ChannelDownstream<R> {
    fn push(&mut self, item: R) -> bool {
        self.tx.send(item).is_ok() && !self.tx.is_closed()
    }

    fn is_rejecting(&self) -> bool {
        self.tx.is_closed()
    }
}
