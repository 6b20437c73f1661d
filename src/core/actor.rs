//! # TaskActor: drives one admitted queue entry to a settled outcome.
//!
//! ## Event flow
//! ```text
//! TaskStarting → [attempt] → TaskCompleted                          (settle Ok)
//!                          → [TimeoutHit] → TaskFailed → retry?
//!                                             ├─ no  → settle Err
//!                                             └─ yes → RetryScheduled → [backoff] → next attempt
//! ```
//!
//! ## Architecture
//! ```text
//! scheduler admits Entry ──► TaskActor::run()
//!
//! loop {
//!   ├─► attempt += 1
//!   ├─► start transition (Pending, progress 0), publish TaskStarting
//!   ├─► run_once() ──► work function (timeout race)
//!   │      ├─ Ok  ──► complete transition, publish TaskCompleted, break
//!   │      └─ Err ──► retry policy sees the snapshot with this failure counted
//!   │                 fail transition stores error + decision, publish TaskFailed
//!   │                 ├─ no  ──► break
//!   │                 └─ yes ──► publish RetryScheduled, sleep(backoff) (cancellable)
//! }
//! settle transition (frees the running slot) ──► resolve handle ──► cleanup(id)
//! ```
//!
//! ## Rules
//! - Attempts run **sequentially** and reuse the same dependency values
//! - The running slot is held across retries and only freed by the final settle
//! - The retry policy runs outside the graph lock

use std::sync::Arc;

use tokio::{select, time};

use super::engine::Core;
use super::graph::Entry;
use super::runner::run_once;
use crate::error::TaskError;
use crate::events::{Event, EventKind};

/// Executes one admitted entry with retries.
pub(crate) struct TaskActor<T> {
    core: Arc<Core<T>>,
    entry: Entry<T>,
}

impl<T> TaskActor<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn new(core: Arc<Core<T>>, entry: Entry<T>) -> Self {
        Self { core, entry }
    }

    /// Runs attempts until one succeeds or the retry policy gives up, then settles the
    /// handle and triggers cleanup for the task.
    pub(crate) async fn run(self) {
        let Self { core, entry } = self;
        let Entry {
            id,
            generation,
            deps,
            settle,
        } = entry;

        let descriptor = core.graph.lock().descriptor(&id, generation);
        let Some(descriptor) = descriptor else {
            core.graph.lock().settle(&id, generation);
            let _ = settle.send(Err(TaskError::Abandoned));
            core.schedule();
            return;
        };

        let mut attempt: u32 = 0;
        let outcome = loop {
            attempt += 1;
            core.graph.lock().start(&id, generation);
            core.bus.publish(
                Event::new(EventKind::TaskStarting)
                    .with_task(&id)
                    .with_attempt(attempt),
            );

            let attempt_run = run_once(&core, &descriptor, generation, deps.clone(), attempt);
            let err = match attempt_run.await {
                Ok(value) => {
                    core.graph.lock().complete(&id, generation, value.clone());
                    core.bus.publish(
                        Event::new(EventKind::TaskCompleted)
                            .with_task(&id)
                            .with_attempt(attempt),
                    );
                    break Ok(value);
                }
                Err(err) => err,
            };

            let prospective = core.graph.lock().prospective(&id, Some(generation), &err);
            let retry = prospective.is_some_and(|(descriptor, snapshot)| {
                core.registry.should_retry(&descriptor, &snapshot, &err)
            });
            let failures = core
                .graph
                .lock()
                .fail(&id, Some(generation), err.clone(), retry)
                .unwrap_or(attempt);
            core.bus.publish(
                Event::new(EventKind::TaskFailed)
                    .with_task(&id)
                    .with_attempt(attempt)
                    .with_reason(err.to_string()),
            );
            if !retry {
                break Err(err);
            }

            let delay = core.config.backoff.next(failures.saturating_sub(1));
            core.bus.publish(
                Event::new(EventKind::RetryScheduled)
                    .with_task(&id)
                    .with_attempt(attempt)
                    .with_delay(delay)
                    .with_reason(err.to_string()),
            );
            if core.token.is_cancelled() {
                break Err(err);
            }
            if !delay.is_zero() {
                select! {
                    _ = time::sleep(delay) => {}
                    _ = core.token.cancelled() => break Err(err),
                }
            }
        };

        core.graph.lock().settle(&id, generation);
        let _ = settle.send(outcome);
        core.cleanup(Some(vec![id])).await;
    }
}
