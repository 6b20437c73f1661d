//! # Task-facing types.
//!
//! - [`TaskId`] opaque task key with `name@context` helpers
//! - [`TaskContext`] per-attempt context (cancellation token, progress reporting)
//! - [`Catalog`] / [`TaskDef`] define task types by name and turn them into a registry

mod catalog;
mod context;
mod id;

pub use catalog::{Catalog, TaskDef};
pub(crate) use context::ReportProgress;
pub use context::TaskContext;
pub use id::{CONTEXT_SEPARATOR, TaskId};
