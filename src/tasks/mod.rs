//! # Operation abstractions.
//!
//! This module provides the per-item operation types:
//! - [`Operation`] - trait for async per-item operations
//! - [`OperationFn`] - closure-based operation implementation
//! - [`OperationRef`] - shared reference to an operation (`Arc<dyn Operation<T, R>>`)

mod operation;
mod operation_fn;

pub use operation::{BoxOpFuture, Operation, OperationRef};
pub use operation_fn::OperationFn;
