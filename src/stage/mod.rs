//! # Pipeline-stage contract.
//!
//! The boundary between a lazy upstream, a stage with per-run state and a
//! downstream consumer:
//! - [`Downstream`] - `push(value) -> bool` / `is_rejecting()`
//! - [`Stage`] - `integrate` once per item, `finish` once at the end
//! - [`drive`], [`collect`], [`spawn_stage`] - drivers connecting a `Stream` to a stage
//!
//! ```text
//!   Stream<T> ──next()──► Stage::integrate ──push(R)──► Downstream
//!                               │
//!   (exhausted / rejected) ──► Stage::finish ──push(R)──► Downstream
//! ```

mod downstream;
mod drive;
mod stage;

pub use downstream::{ChannelDownstream, Collect, Downstream, Take};
pub use drive::{collect, drive, spawn_stage};
pub use stage::Stage;
