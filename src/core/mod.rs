//! Runtime core: task graph, scheduling, execution and disposal.
//!
//! The public API from this module is [`Engine`] (with its [`EngineBuilder`] and
//! [`Config`]) plus the read-only snapshot types.
//!
//! Internal modules:
//! - [`graph`]: the task graph store and its named transitions;
//! - [`engine`]: `run` resolution, manual invalidation, progress, scheduling passes;
//! - [`scheduler`]: admission, bucket caps and deadlock detection for one pass;
//! - [`actor`]: runs one admitted task with its retry loop;
//! - [`runner`]: executes one attempt with timeout race and panic capture;
//! - [`lifecycle`]: reference counting and cascading disposal.

mod actor;
mod builder;
mod config;
mod engine;
mod graph;
mod lifecycle;
mod runner;
mod scheduler;
mod snapshot;

#[cfg(test)]
mod tests;

pub use builder::EngineBuilder;
pub use config::{Config, DEFAULT_TIMEOUT};
pub use engine::Engine;
pub use graph::TaskHandle;
pub use snapshot::{GraphSnapshot, TaskSnapshot, TaskStatus};
