//! Runner policies.
//!
//! ## Contents
//! - [`ErrorPolicy`] what a runner does with a drained failure (fail-fast / delay-error)
//!
//! ## Quick wiring
//! ```text
//! RunnerConfig { max_concurrency, error_policy: ErrorPolicy, .. }
//!      └─► runner::BoundedRunner uses:
//!           - error_policy on every drained failure (abort vs. ledger)
//!           - error_policy at finish (raise the aggregate or complete)
//! ```

mod error;

pub use error::ErrorPolicy;
