//! Retry policies.
//!
//! This module groups the knobs that control **if** a failed attempt re-runs and **how
//! long** to wait before it does.
//!
//! ## Contents
//! - [`RetryPolicy`] ready-made retry predicates (never / max attempts / timeouts only)
//! - [`BackoffPolicy`] delay before an in-place retry (first / factor / max + jitter)
//! - [`JitterPolicy`]  randomization strategy to avoid retry storms
//!
//! ## Quick wiring
//! ```text
//! Registry { retry: Fn(&Descriptor, &TaskSnapshot, &TaskError) -> bool }
//! Config   { backoff: BackoffPolicy }
//!      └─► core::actor::TaskActor uses:
//!           - retry to decide re-run / reject
//!           - backoff.next(failures - 1) before the next attempt
//! ```

mod backoff;
mod jitter;
mod retry;

pub use backoff::BackoffPolicy;
pub use jitter::JitterPolicy;
pub use retry::RetryPolicy;
