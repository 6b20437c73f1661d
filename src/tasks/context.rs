//! # Per-attempt context handed to work functions.
//!
//! A [`TaskContext`] tells the work function which task and attempt it is running, carries a
//! [`CancellationToken`] and lets it report progress back to the engine.
//!
//! The token is a child of the engine token. It is cancelled when the attempt times out or
//! the engine shuts down. Cancellation is a hint: the engine never aborts the future, it
//! keeps draining it and disposes a late result.

use std::fmt;
use std::sync::Weak;

use tokio_util::sync::CancellationToken;

use super::TaskId;

/// Sink for progress reports. Implemented by the engine core.
pub(crate) trait ReportProgress: Send + Sync {
    fn report(&self, id: &TaskId, generation: u64, amount: f64);
}

/// Context of one attempt.
///
/// # Example
/// ```
/// use depvisor::{Registry, TaskError};
///
/// let registry = Registry::<u64>::builder()
///     .dependencies(|_| Ok(vec![]))
///     .run(|_, _, ctx| async move {
///         let mut done = 0;
///         for step in 0..4u64 {
///             if ctx.is_cancelled() {
///                 return Err(TaskError::fail("cancelled"));
///             }
///             done += step;
///             ctx.progress((step + 1) as f64 / 4.0);
///         }
///         Ok(done)
///     })
///     .build();
/// assert!(registry.is_ok());
/// ```
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    generation: u64,
    attempt: u32,
    token: CancellationToken,
    reporter: Weak<dyn ReportProgress>,
}

impl TaskContext {
    pub(crate) fn new(
        id: TaskId,
        generation: u64,
        attempt: u32,
        token: CancellationToken,
        reporter: Weak<dyn ReportProgress>,
    ) -> Self {
        Self {
            id,
            generation,
            attempt,
            token,
            reporter,
        }
    }

    /// Id of the running task.
    #[inline]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Attempt number, starting from 1.
    #[inline]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Cancellation token for this attempt.
    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the attempt is cancelled (timeout or engine shutdown).
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Reports progress in `[0, 1]` (clamped).
    ///
    /// Ignored once the engine is gone or the record this attempt belongs to was replaced.
    pub fn progress(&self, amount: f64) {
        if let Some(reporter) = self.reporter.upgrade() {
            reporter.report(&self.id, self.generation, amount);
        }
    }
}

impl fmt::Debug for TaskContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskContext")
            .field("id", &self.id)
            .field("attempt", &self.attempt)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
