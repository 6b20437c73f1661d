//! # Runtime events emitted by the engine.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Graph events**: registration, queueing and unregistration of task records
//! - **Execution events**: attempts starting, completing, failing, timing out, retrying
//! - **Lifecycle events**: disposal (including late results and disposal failures)
//! - **Scheduler events**: deadlock and rejected admissions
//!
//! Subscriber workers add their own overflow/panic events.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//! Use `seq` to restore the exact order when events are delivered out of order.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use depvisor::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::TaskFailed)
//!     .with_task("session@chrome")
//!     .with_reason("boom")
//!     .with_attempt(3)
//!     .with_timeout(Duration::from_secs(5));
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.task.as_deref(), Some("session@chrome"));
//! assert_eq!(ev.reason.as_deref(), Some("boom"));
//! assert_eq!(ev.timeout_ms, Some(5000));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets `task` (subscriber name) and `reason` (panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets `task` (subscriber name) and `reason` (`"full"` / `"closed"`).
    SubscriberOverflow,

    // === Graph events ===
    /// A new record (or a new generation of a retried record) was registered.
    ///
    /// Sets `task`.
    TaskRegistered,

    /// All dependencies succeeded; the task entered the pending queue.
    ///
    /// Sets `task`.
    TaskEnqueued,

    /// The record was removed after disposal.
    ///
    /// Sets `task`.
    TaskUnregistered,

    // === Execution events ===
    /// An attempt is starting.
    ///
    /// Sets `task` and `attempt` (1-based, per queue entry).
    TaskStarting,

    /// An attempt produced a result that was delivered.
    ///
    /// Sets `task` and `attempt`.
    TaskCompleted,

    /// An attempt failed, or the task failed before it could be queued.
    ///
    /// Sets `task`, `reason`, and `attempt` when an attempt was running.
    TaskFailed,

    /// An attempt exceeded its timeout; the work keeps draining in the background.
    ///
    /// Sets `task`, `attempt` and `timeout_ms`.
    TimeoutHit,

    /// The retry policy asked for another attempt.
    ///
    /// Sets `task`, `attempt` (the failed one), `delay_ms` and `reason`.
    RetryScheduled,

    /// A settled result was invalidated from outside via `Engine::fail`.
    ///
    /// Sets `task` and `reason`.
    TaskInvalidated,

    /// Progress was reported for a task.
    ///
    /// Sets `task` and `progress`.
    TaskProgress,

    // === Lifecycle events ===
    /// A record's outcome was handed to the dispose policy.
    ///
    /// Sets `task`.
    TaskDisposed,

    /// The dispose policy failed or panicked. Never blocks cleanup.
    ///
    /// Sets `task` and `reason`.
    DisposeFailed,

    /// A result arrived after its attempt timed out and was disposed without delivery.
    ///
    /// Sets `task`.
    LateResultDisposed,

    // === Scheduler events ===
    /// Nothing could be admitted while nothing was running; the queue was flushed.
    ///
    /// Sets `reason` (number of rejected entries).
    DeadlockDetected,

    /// The admission policy returned ids that are not queued; they were ignored.
    ///
    /// Sets `reason` (the configuration error).
    AdmissionRejected,
}

/// Runtime event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Task id, if applicable.
    pub task: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Human-readable reason (errors, overflow details, etc.).
    pub reason: Option<Arc<str>>,
    /// Attempt timeout in milliseconds (compact).
    pub timeout_ms: Option<u32>,
    /// Delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Reported progress in `[0, 1]`.
    pub progress: Option<f64>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            task: None,
            attempt: None,
            reason: None,
            timeout_ms: None,
            delay_ms: None,
            progress: None,
        }
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches an attempt count.
    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a timeout duration (stored as milliseconds).
    #[inline]
    pub fn with_timeout(mut self, d: Duration) -> Self {
        self.timeout_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a retry delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay_ms = Some(compact_ms(d));
        self
    }

    /// Attaches a progress value.
    #[inline]
    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_task(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_task(subscriber)
            .with_reason(info)
    }

    /// True for events that report a failure somewhere in the engine.
    pub fn is_failure(&self) -> bool {
        matches!(
            self.kind,
            EventKind::TaskFailed
                | EventKind::TimeoutHit
                | EventKind::DisposeFailed
                | EventKind::DeadlockDetected
                | EventKind::AdmissionRejected
                | EventKind::SubscriberPanicked
        )
    }
}

fn compact_ms(d: Duration) -> u32 {
    d.as_millis().min(u128::from(u32::MAX)) as u32
}
