//! # Operation abstraction.
//!
//! This module defines the [`Operation`] trait: the user-supplied `T -> R` step a
//! runner executes once per item. The common handle type is [`OperationRef`], an
//! `Arc<dyn Operation<T, R>>` shared by every task the runner spawns.
//!
//! An operation must be safe to call concurrently from many tasks; shared mutable
//! state belongs behind an explicit `Arc<Mutex<..>>` (or atomics) inside the closure.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::TaskError;

/// Boxed future returned by [`Operation::call`].
pub type BoxOpFuture<R> = Pin<Box<dyn Future<Output = Result<R, TaskError>> + Send + 'static>>;

/// Shared handle to an operation.
pub type OperationRef<T, R> = Arc<dyn Operation<T, R>>;

/// # Asynchronous per-item operation.
///
/// An `Operation` has a stable [`name`](Operation::name) (used in events) and a
/// [`call`](Operation::call) method producing a fresh future per item.
///
/// # Example
/// ```
/// use stagevisor::{BoxOpFuture, Operation, TaskError};
///
/// struct Double;
///
/// impl Operation<u32, u32> for Double {
///     fn name(&self) -> &str { "double" }
///
///     fn call(&self, item: u32) -> BoxOpFuture<u32> {
///         Box::pin(async move { Ok::<_, TaskError>(item * 2) })
///     }
/// }
/// ```
pub trait Operation<T, R>: Send + Sync + 'static {
    /// Returns a stable, human-readable operation name.
    fn name(&self) -> &str;

    /// Creates the future that processes `item`.
    fn call(&self, item: T) -> BoxOpFuture<R>;
}
