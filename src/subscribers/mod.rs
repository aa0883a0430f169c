//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait and the [`SubscriberSet`] fan-out
//! used to observe runners and groups through the [`Bus`](crate::Bus).
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   BoundedRunner / SubtaskGroup ── publish(Event) ──► Bus ──► listener
//!                                                               │
//!                                                      SubscriberSet::emit(&Event)
//!                                                               │
//!                                                  ┌────────────┼────────────┐
//!                                                  ▼            ▼            ▼
//!                                              LogWriter     Metrics      Custom
//! ```

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
