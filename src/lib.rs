//! # depvisor
//!
//! **Depvisor** is a dependency-aware async task orchestration library for Rust.
//!
//! Tasks are identified by a key ([`TaskId`]). A task may depend on the results of other
//! tasks; the engine runs each task once its dependencies succeeded, shares one in-flight
//! execution between every caller, retries failures according to a policy, caps concurrency
//! per bucket, breaks scheduling deadlocks, races every attempt against a timeout, and
//! disposes results exactly once when nothing references them any more.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   Engine::run("report")
//!          │
//!          ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Engine (orchestrator)                                            │
//! │  - Registry (task / dependencies / run / dispose / retry / ...)   │
//! │  - TaskGraph behind one Mutex (records, refs, queue, running)     │
//! │  - Bus (broadcast events)                                         │
//! └──────┬──────────────────────────┬──────────────────────────┬──────┘
//!        │ resolve + retain deps    │ scheduling pass          │ refcount 0
//!        ▼                          ▼                          ▼
//!   "report" ──► "session" ──►   Scheduler                 Lifecycle
//!                 "server"       (admission, bucket caps,  (dispose, release deps,
//!                                 deadlock detection)       cascade)
//!                                   │
//!                                   ▼
//!                              TaskActor ──► run_once (timeout race)
//!                              (retry loop)
//!        │                          │                          │
//!        └──── publish(Event) ──────┴──────────────────────────┘
//!                                   ▼
//!                         Bus ──► listener ──► SubscriberSet ──► LogWriter, ...
//! ```
//!
//! ### Lifecycle of one task
//! ```text
//! Registered ──► Enqueued ──► Pending ──┬──► Complete ──┐
//!      │                        ▲       └──► Error ─────┤
//!      │                        └── retry ───┘          ▼
//!      └── dependency failed ──► Error ──────────► disposed (refs == 0), unregistered
//! ```
//!
//! ## Features
//! | Area              | Description                                                   | Key types / traits                        |
//! |-------------------|---------------------------------------------------------------|-------------------------------------------|
//! | **Engine**        | Run task graphs, invalidate results, report progress.         | [`Engine`], [`EngineBuilder`], [`Config`] |
//! | **Registry**      | Pluggable policies, validated once.                           | [`Registry`], [`RegistryBuilder`]         |
//! | **Catalog**       | Define task types by name with `name@context` ids.            | [`Catalog`], [`TaskDef`]                  |
//! | **Policies**      | Retry predicates and backoff between attempts.                | [`RetryPolicy`], [`BackoffPolicy`]        |
//! | **Subscriber API**| Hook into engine events (logging, metrics, alerts).           | [`Subscribe`], [`Event`]                  |
//! | **Errors**        | Typed errors for configuration, tasks and API misuse.         | [`ConfigError`], [`TaskError`]            |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] that forwards events to `tracing`.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use depvisor::{Catalog, Engine, TaskDef};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let registry = Catalog::new()
//!         .define(TaskDef::new("server", |_, _, _| async { Ok("http://grid:4444".to_string()) }))
//!         .define(
//!             TaskDef::new("session", |d, deps: Vec<String>, _| {
//!                 let browser = d.context().unwrap_or("chrome").to_string();
//!                 async move { Ok(format!("{browser} session on {}", deps[0])) }
//!             })
//!             .depends_on(["server"]),
//!         )
//!         .into_registry()
//!         .build()?;
//!
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn depvisor::Subscribe>> = vec![Arc::new(depvisor::LogWriter::default())];
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn depvisor::Subscribe>> = Vec::new();
//!
//!     let engine = Engine::builder(registry).with_subscribers(subs).build();
//!
//!     let session = engine.run("session@firefox").await?;
//!     assert_eq!(session, "firefox session on http://grid:4444");
//!     Ok(())
//! }
//! ```
mod core;
mod error;
mod events;
mod policies;
mod registry;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use core::{
    Config, DEFAULT_TIMEOUT, Engine, EngineBuilder, GraphSnapshot, TaskHandle, TaskSnapshot,
    TaskStatus,
};
pub use error::{ConfigError, RuntimeError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use policies::{BackoffPolicy, JitterPolicy, RetryPolicy};
pub use registry::{Bucket, Descriptor, DisposeFuture, Registry, RegistryBuilder, TaskFuture};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{CONTEXT_SEPARATOR, Catalog, TaskContext, TaskDef, TaskId};

// Built-in logger subscriber.
// Enable with: `--features logging` (on by default)
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
