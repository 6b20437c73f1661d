//! # LogWriter: forwards engine events to `tracing`.
//!
//! Failures are logged at `warn`, lifecycle noise at `debug`, everything else at `info`.
//! Install any `tracing` subscriber in the host application to see the output.
//!
//! ## Example output (with `tracing-subscriber`'s fmt layer)
//! ```text
//! INFO  depvisor: starting task="server" attempt=1
//! WARN  depvisor: failed task="session@chrome" attempt=1 err="connection refused"
//! INFO  depvisor: retry task="session@chrome" delay_ms=0 after_attempt=1
//! WARN  depvisor: timeout task="session@chrome" timeout_ms=6000
//! DEBUG depvisor: disposed task="session@chrome"
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Event writer subscriber.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Construct a new [`LogWriter`].
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let task = e.task.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");

        match e.kind {
            EventKind::TaskRegistered => tracing::debug!(target: "depvisor", task, "registered"),
            EventKind::TaskEnqueued => tracing::debug!(target: "depvisor", task, "enqueued"),
            EventKind::TaskUnregistered => {
                tracing::debug!(target: "depvisor", task, "unregistered")
            }
            EventKind::TaskStarting => {
                tracing::info!(target: "depvisor", task, attempt = e.attempt, "starting")
            }
            EventKind::TaskCompleted => {
                tracing::info!(target: "depvisor", task, attempt = e.attempt, "completed")
            }
            EventKind::TaskFailed => {
                tracing::warn!(target: "depvisor", task, attempt = e.attempt, err = reason, "failed")
            }
            EventKind::TimeoutHit => {
                tracing::warn!(target: "depvisor", task, timeout_ms = e.timeout_ms, "timeout")
            }
            EventKind::RetryScheduled => tracing::info!(
                target: "depvisor",
                task,
                delay_ms = e.delay_ms,
                after_attempt = e.attempt,
                err = reason,
                "retry"
            ),
            EventKind::TaskInvalidated => {
                tracing::warn!(target: "depvisor", task, err = reason, "invalidated")
            }
            EventKind::TaskProgress => {
                tracing::debug!(target: "depvisor", task, progress = e.progress, "progress")
            }
            EventKind::TaskDisposed => tracing::debug!(target: "depvisor", task, "disposed"),
            EventKind::LateResultDisposed => {
                tracing::info!(target: "depvisor", task, "late result disposed")
            }
            EventKind::DisposeFailed => {
                tracing::warn!(target: "depvisor", task, err = reason, "dispose failed")
            }
            EventKind::DeadlockDetected => {
                tracing::warn!(target: "depvisor", rejected = reason, "deadlock")
            }
            EventKind::AdmissionRejected => {
                tracing::warn!(target: "depvisor", err = reason, "admission rejected")
            }
            EventKind::SubscriberOverflow => {
                tracing::warn!(target: "depvisor", subscriber = task, reason, "subscriber overflow")
            }
            EventKind::SubscriberPanicked => {
                tracing::warn!(target: "depvisor", subscriber = task, info = reason, "subscriber panicked")
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}
