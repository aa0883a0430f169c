//! # Stage contract.
//!
//! A [`Stage`] is one step of a lazy pipeline. Its per-run state is the stage value
//! itself (constructed fresh for every run), and it is driven in two phases:
//!
//! ```text
//! for item in upstream:
//!     more = stage.integrate(item, downstream)?   // push 0..n results, want more input?
//!     if !more || downstream.is_rejecting(): break
//! stage.finish(downstream)?                        // flush whatever is buffered / in flight
//! ```
//!
//! Stages run sequentially; partitioned state (and therefore a combiner) is not supported.

use async_trait::async_trait;

use crate::error::StageError;
use crate::stage::Downstream;

/// One pipeline step with mutable per-run state.
#[async_trait]
pub trait Stage<T, R>: Send
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Consumes one upstream item; returns whether more input is wanted.
    async fn integrate(
        &mut self,
        item: T,
        downstream: &mut dyn Downstream<R>,
    ) -> Result<bool, StageError>;

    /// Called once at upstream exhaustion or short-circuit to flush pending results.
    async fn finish(&mut self, downstream: &mut dyn Downstream<R>) -> Result<(), StageError>;
}
