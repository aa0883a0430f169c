//! # Structured fan-out.
//!
//! - [`SubtaskGroup`] cancellation scope that forks and joins sub-operations
//! - [`SubtaskHandle`] per-child result with an optional error substitution
//! - [`scoped`] runs a callback inside a group and always closes it
//!
//! ```text
//! outer task ─► SubtaskGroup::open ─┬─ fork(a) ─► handle a ─┐
//!                                   ├─ fork(b) ─► handle b ─┼─ get() ─► join (once) ─► values
//!                                   └─ fork(c) ─► handle c ─┘
//!            ◄─ close() (cancel + await every child) ◄───────────────────────────────┘
//! ```

mod handle;
mod scope;

pub use handle::{SubtaskHandle, SubtaskState};
pub use scope::{scoped, GroupPhase, SubtaskGroup};
pub(crate) use scope::within;
