//! Runtime events: types and broadcast bus.
//!
//! This module groups the event **data model** and the **bus** used to
//! publish/subscribe to runtime events emitted by runners and sub-task groups.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `BoundedRunner` (admission, drain, teardown),
//!   `SubtaskGroup` (open, fork, join, close), `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the listener spawned by `RunnerBuilder::build` (fans out to `SubscriberSet`).

mod bus;
mod event;

pub use bus::Bus;
pub(crate) use bus::publish;
pub use event::{Event, EventKind};
