//! # Read-only views of the task graph.
//!
//! Snapshots are plain owned copies taken under the graph lock. They are what the retry
//! policy sees and what [`Engine::task`](crate::Engine::task) and
//! [`Engine::snapshot`](crate::Engine::snapshot) return.
//!
//! ```text
//! Registered ──► Enqueued ──► Pending ──┬──► Complete ──┐
//!                               ▲       └──► Error ─────┼──► (disposed, unregistered)
//!                               └──── retry ───┘        │
//!                     Engine::fail: Complete ──► Error ─┘
//! ```

use std::time::{Duration, SystemTime};

use crate::error::TaskError;
use crate::registry::Bucket;
use crate::tasks::TaskId;

/// Status of a task record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    /// Registered, waiting for dependencies.
    Registered,
    /// Dependencies succeeded; waiting in the queue for admission.
    Enqueued,
    /// An attempt is running.
    Pending,
    /// The last attempt succeeded.
    Complete,
    /// The last attempt (or a dependency) failed, or the result was invalidated.
    Error,
}

impl TaskStatus {
    /// Whether the status is `Complete` or `Error`.
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Error)
    }

    /// Lowercase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Registered => "registered",
            TaskStatus::Enqueued => "enqueued",
            TaskStatus::Pending => "pending",
            TaskStatus::Complete => "complete",
            TaskStatus::Error => "error",
        }
    }
}

/// Copy of one task record.
#[derive(Clone, Debug)]
pub struct TaskSnapshot {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Incremented each time the id gets a fresh record.
    pub generation: u64,
    /// Failed attempts (and invalidations) of this record.
    pub failures: u32,
    /// Last reported progress in `[0, 1]`.
    pub progress: f64,
    /// Last error, cleared by a successful attempt.
    pub error: Option<TaskError>,
    /// Decision of the retry policy for the last failure.
    pub retry: bool,
    pub dependencies: Vec<TaskId>,
    pub bucket: Option<Bucket>,
    /// Number of dependents (and callers) holding a reference.
    pub refs: usize,
    pub queued_at: Option<SystemTime>,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    /// Whether the task's handle has resolved.
    pub settled: bool,
}

impl TaskSnapshot {
    /// Snapshot of a freshly registered record.
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            status: TaskStatus::Registered,
            generation: 0,
            failures: 0,
            progress: 0.0,
            error: None,
            retry: false,
            dependencies: Vec::new(),
            bucket: None,
            refs: 0,
            queued_at: None,
            started_at: None,
            ended_at: None,
            settled: false,
        }
    }

    /// Wall-clock time between the last start and the end of the record, if both are known.
    pub fn duration(&self) -> Option<Duration> {
        let (start, end) = (self.started_at?, self.ended_at?);
        end.duration_since(start).ok()
    }
}

/// Copy of the whole graph.
#[derive(Clone, Debug, Default)]
pub struct GraphSnapshot {
    /// Live records, sorted by id.
    pub tasks: Vec<TaskSnapshot>,
    /// Queued ids in FIFO order.
    pub queued: Vec<TaskId>,
    /// Ids currently admitted to run, sorted.
    pub running: Vec<TaskId>,
}

impl GraphSnapshot {
    pub fn get(&self, id: &str) -> Option<&TaskSnapshot> {
        self.tasks
            .binary_search_by(|t| t.id.as_str().cmp(id))
            .ok()
            .map(|i| &self.tasks[i])
    }

    /// Nothing queued, nothing running.
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.running.is_empty()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
