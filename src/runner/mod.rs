//! # Bounded-concurrency runner.
//!
//! - [`BoundedRunner`] admission-windowed stage, completion-order emission
//! - [`ErrorLedger`] failures deferred by a delay-error run
//! - [`RunnerBuilder`] attaches an event bus and subscribers
//! - [`RunState`] lifecycle of one run
//!
//! ```text
//! upstream ─► submit ─► JoinSet (≤ max_concurrency tasks) ─► join_next ─► policy ─► downstream
//!                                                                            │
//!                                                                  DelayError: ErrorLedger
//! ```

mod bounded;
mod builder;
mod ledger;

pub use bounded::{BoundedRunner, RunState};
pub(crate) use builder::Listener;
pub use builder::RunnerBuilder;
pub use ledger::ErrorLedger;
