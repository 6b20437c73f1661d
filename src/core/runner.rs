//! # Run a single attempt of a task.
//!
//! - **Invoke** the work function with the dependency values and a fresh [`TaskContext`]
//! - **Catch panics** while building or polling the future (→ `ContractViolation`)
//! - **Race a timer** when the timeout policy yields one (a panicking policy fails the
//!   attempt with `ContractViolation` before the work function is invoked)
//!
//! ## Timeout
//! ```text
//! timer first ──► cancel the attempt's child token (a hint only)
//!             ──► publish TimeoutHit
//!             ──► keep draining the work future in the background:
//!                   late Ok  ──► dispose it, publish LateResultDisposed (never delivered)
//!                   late Err ──► dropped
//!             ──► return TaskError::Timeout
//! ```
//!
//! The attempt's terminal event (`TaskCompleted` / `TaskFailed`) is published by the actor,
//! after the retry decision.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::time;

use super::engine::Core;
use crate::error::{TaskError, panic_reason};
use crate::events::{Event, EventKind};
use crate::registry::Descriptor;
use crate::tasks::TaskContext;

/// Executes attempt number `attempt` of the task described by `descriptor`.
pub(crate) async fn run_once<T>(
    core: &Arc<Core<T>>,
    descriptor: &Arc<Descriptor>,
    generation: u64,
    deps: Vec<T>,
    attempt: u32,
) -> Result<T, TaskError>
where
    T: Clone + Send + Sync + 'static,
{
    let id = descriptor.id();
    let timeout = core
        .registry
        .timeout_for(descriptor, core.config.default_timeout())?;

    let child = core.token.child_token();
    let ctx = TaskContext::new(
        id.clone(),
        generation,
        attempt,
        child.clone(),
        core.reporter(),
    );

    let fut = core.registry.invoke(descriptor, deps, ctx)?;
    let mut work: BoxFuture<'static, Result<T, TaskError>> = AssertUnwindSafe(fut)
        .catch_unwind()
        .map(|res| {
            res.unwrap_or_else(|payload| {
                Err(TaskError::ContractViolation {
                    reason: panic_reason(&*payload).into(),
                })
            })
        })
        .boxed();

    let Some(timeout) = timeout else {
        return work.await;
    };

    match time::timeout(timeout, &mut work).await {
        Ok(res) => res,
        Err(_elapsed) => {
            child.cancel();
            core.bus.publish(
                Event::new(EventKind::TimeoutHit)
                    .with_task(id)
                    .with_attempt(attempt)
                    .with_timeout(timeout),
            );
            drain_late(Arc::clone(core), Arc::clone(descriptor), work);
            Err(TaskError::Timeout { timeout })
        }
    }
}

/// Keeps polling a timed-out attempt; a late success is disposed, never delivered.
fn drain_late<T>(
    core: Arc<Core<T>>,
    descriptor: Arc<Descriptor>,
    work: BoxFuture<'static, Result<T, TaskError>>,
) where
    T: Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let late = work.await;
        if late.is_ok() {
            let id = descriptor.id();
            core.bus
                .publish(Event::new(EventKind::LateResultDisposed).with_task(id));
            core.dispose_outcome(id, &descriptor, &late).await;
        }
    });
}
