//! # Function-backed operation (`OperationFn`)
//!
//! [`OperationFn`] wraps a closure `F: Fn(T) -> Fut`, producing a fresh future per
//! item. No hidden mutation between calls; if shared state is needed, capture an
//! `Arc<...>` explicitly inside the closure.
//!
//! ## Example
//! ```rust
//! use stagevisor::{OperationFn, OperationRef, TaskError};
//!
//! let op: OperationRef<u32, String> = OperationFn::arc("render", |id: u32| async move {
//!     Ok::<_, TaskError>(format!("item-{id}"))
//! });
//!
//! assert_eq!(op.name(), "render");
//! ```

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;

use crate::error::TaskError;
use crate::tasks::operation::{BoxOpFuture, Operation};

/// Function-backed operation.
///
/// Wraps a closure that *creates* a new future per item.
#[derive(Debug)]
pub struct OperationFn<F> {
    name: Cow<'static, str>,
    f: F,
}

impl<F> OperationFn<F> {
    /// Creates a new function-backed operation.
    ///
    /// Prefer [`OperationFn::arc`] when you immediately need an
    /// [`OperationRef`](crate::OperationRef).
    pub fn new(name: impl Into<Cow<'static, str>>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }

    /// Creates the operation and returns it as a shared handle.
    pub fn arc(name: impl Into<Cow<'static, str>>, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

impl<T, R, F, Fut> Operation<T, R> for OperationFn<F>
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, TaskError>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, item: T) -> BoxOpFuture<R> {
        Box::pin((self.f)(item))
    }
}
