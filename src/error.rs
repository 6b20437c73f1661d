//! Error types used by the depvisor engine, its registry and tasks.
//!
//! This module defines three enums:
//!
//! - [`ConfigError`]: invalid registry configuration (missing mandatory policies,
//!   admission policies that name tasks which are not queued).
//! - [`TaskError`]: failures that settle a single task's handle.
//! - [`RuntimeError`]: misuse of the engine API (ids that are not live, records still in flight).
//!
//! All of them provide `as_label` for logs/metrics. [`TaskError`] is `Clone`: one failure
//! is delivered to every consumer sharing a task handle.

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use crate::tasks::TaskId;

/// # Errors raised while building or validating a registry.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No `run` policy was supplied to the registry builder.
    #[error("registry has no `run` policy")]
    MissingRun,

    /// No `dependencies` policy was supplied to the registry builder.
    #[error("registry has no `dependencies` policy")]
    MissingDependencies,

    /// The admission policy returned ids that are not in the pending queue.
    #[error("admission policy returned ids that are not queued: {ids:?}")]
    UnknownAdmission {
        /// The offending ids, in the order the policy returned them.
        ids: Vec<TaskId>,
    },
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::MissingRun => "config_missing_run",
            ConfigError::MissingDependencies => "config_missing_dependencies",
            ConfigError::UnknownAdmission { .. } => "config_unknown_admission",
        }
    }
}

/// # Errors that settle a task's handle.
///
/// Engine-produced variants (`Timeout`, `Deadlock`, `Dependency`, ...) sit next to the
/// opaque task-level variants [`TaskError::Fail`] and [`TaskError::Source`], which carry
/// whatever the work function rejected with, unmodified.
#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum TaskError {
    /// The work function panicked instead of producing (or while driving) its future.
    #[error("work function broke its contract: {reason}")]
    ContractViolation {
        /// Panic payload or description.
        reason: Arc<str>,
    },

    /// A dependency failed before this task could be queued.
    #[error("dependency `{dependency}` failed: {source}")]
    Dependency {
        /// The first dependency that rejected.
        dependency: TaskId,
        /// The dependency's own error.
        source: Arc<TaskError>,
    },

    /// The attempt exceeded its timeout.
    #[error("timed out after {timeout:?}")]
    Timeout {
        /// The timeout that was exceeded.
        timeout: Duration,
    },

    /// Queued work could never be admitted while nothing was running.
    #[error("deadlock: queued tasks cannot be admitted and nothing is running")]
    Deadlock,

    /// The task (transitively) depends on itself.
    #[error("dependency cycle through `{id}`")]
    Cycle {
        /// The id that closed the cycle.
        id: TaskId,
    },

    /// The task-resolution policy does not know this id.
    #[error("cannot resolve task `{id}`")]
    Unresolved {
        /// The id that failed to resolve.
        id: TaskId,
    },

    /// Task-level failure described by a message.
    #[error("{error}")]
    Fail {
        /// The failure message.
        error: Arc<str>,
    },

    /// Task-level failure carrying the original error value.
    #[error("{0}")]
    Source(Arc<dyn StdError + Send + Sync + 'static>),

    /// The engine went away before the task settled.
    #[error("task abandoned before it settled")]
    Abandoned,
}

impl TaskError {
    /// Builds a task-level failure from a message.
    pub fn fail(error: impl Into<Arc<str>>) -> Self {
        TaskError::Fail {
            error: error.into(),
        }
    }

    /// Wraps an arbitrary error value, keeping it available through `source()`-style inspection.
    pub fn from_error<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        TaskError::Source(Arc::new(error))
    }

    pub(crate) fn dependency(dependency: TaskId, source: TaskError) -> Self {
        TaskError::Dependency {
            dependency,
            source: Arc::new(source),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use depvisor::TaskError;
    /// use std::time::Duration;
    ///
    /// let err = TaskError::Timeout { timeout: Duration::from_secs(1) };
    /// assert_eq!(err.as_label(), "task_timeout");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::ContractViolation { .. } => "task_contract_violation",
            TaskError::Dependency { .. } => "task_dependency_failed",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Deadlock => "task_deadlock",
            TaskError::Cycle { .. } => "task_cycle",
            TaskError::Unresolved { .. } => "task_unresolved",
            TaskError::Fail { .. } | TaskError::Source(_) => "task_failed",
            TaskError::Abandoned => "task_abandoned",
        }
    }

    /// Follows `Dependency` wrappers down to the error that started the failure chain.
    ///
    /// # Example
    /// ```
    /// use depvisor::TaskError;
    ///
    /// let inner = TaskError::fail("boom");
    /// assert_eq!(inner.root_cause().to_string(), "boom");
    /// ```
    pub fn root_cause(&self) -> &TaskError {
        let mut current = self;
        while let TaskError::Dependency { source, .. } = current {
            current = source.as_ref();
        }
        current
    }

    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout { .. })
    }

    #[inline]
    pub fn is_deadlock(&self) -> bool {
        matches!(self, TaskError::Deadlock)
    }

    #[inline]
    pub fn is_dependency(&self) -> bool {
        matches!(self, TaskError::Dependency { .. })
    }
}

impl From<&str> for TaskError {
    fn from(error: &str) -> Self {
        TaskError::fail(error)
    }
}

impl From<String> for TaskError {
    fn from(error: String) -> Self {
        TaskError::fail(error)
    }
}

/// # Errors produced by engine API calls.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// The id has no live record.
    #[error("task `{id}` is not registered")]
    UnknownTask {
        /// The id that was looked up.
        id: TaskId,
    },
    /// The record has not settled yet; only settled results can be invalidated.
    #[error("task `{id}` has not settled yet")]
    NotSettled {
        /// The id that is still in flight.
        id: TaskId,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::UnknownTask { .. } => "runtime_unknown_task",
            RuntimeError::NotSettled { .. } => "runtime_not_settled",
        }
    }
}

/// Extracts a readable message from a caught panic payload.
pub(crate) fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_cause_unwraps_nested_dependencies() {
        let original = TaskError::fail("socket closed");
        let mid = TaskError::dependency(TaskId::from("server"), original);
        let top = TaskError::dependency(TaskId::from("session"), mid);

        assert!(top.is_dependency());
        assert_eq!(top.root_cause().to_string(), "socket closed");
        assert_eq!(top.root_cause().as_label(), "task_failed");
    }

    #[test]
    fn dependency_display_names_the_dependency() {
        let err = TaskError::dependency(TaskId::from("a"), TaskError::Deadlock);
        let text = err.to_string();
        assert!(text.contains("`a`"), "{text}");
        assert!(text.contains("deadlock"), "{text}");
    }

    #[test]
    fn source_errors_pass_through_unmodified() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = TaskError::from_error(io);
        assert_eq!(err.to_string(), "refused");
        assert_eq!(err.as_label(), "task_failed");
    }
}
