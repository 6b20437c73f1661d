//! Engine events: types and broadcast bus.
//!
//! ## Contents
//! - [`EventKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Engine`, scheduler passes, `TaskActor`/`run_once`, the lifecycle
//!   manager, `SubscriberSet` workers (overflow/panic).
//! - **Consumers**: the engine listener (fans out to `SubscriberSet`) and any receiver
//!   obtained through `Engine::subscribe`, which doubles as the out-of-band error channel
//!   for disposal failures.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
