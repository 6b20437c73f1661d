//! # Event subscribers for the depvisor engine.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out and the
//! built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! Engine / TaskActor / Scheduler ── publish(Event) ──► Bus ──► engine listener
//!                                                                   │
//!                                                           SubscriberSet::emit
//!                                                     ┌─────────┬─────┴───┐
//!                                                     ▼         ▼         ▼
//!                                                 LogWriter  Metrics   Custom
//! ```

mod embedded;
mod set;
mod subscriber;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use subscriber::Subscribe;
