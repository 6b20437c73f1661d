//! # Registry: the engine's pluggable policies.
//!
//! A [`Registry`] is a validated bundle of policy callbacks. It holds no state and has no
//! side effects; the engine consults it at fixed points:
//!
//! ```text
//! Engine::run(id)
//!   ├─► task(id)                      → Descriptor
//!   ├─► dependencies(&descriptor)     → Vec<TaskId>
//!   └─► bucket(&descriptor)           → Option<Bucket>
//! Scheduler pass
//!   ├─► schedule(&queued_ids)         → admitted subset (runs under the graph lock)
//!   └─► limits[bucket]                → max concurrently running
//! TaskActor
//!   ├─► timeout(&descriptor)          → per-attempt timer
//!   ├─► run(&descriptor, deps, ctx)   → work future
//!   └─► retry(&descriptor, &snapshot, &error)
//! Lifecycle
//!   └─► dispose(&descriptor, &outcome)
//! ```
//!
//! `run` and `dependencies` are mandatory; [`RegistryBuilder::build`] rejects a registry
//! without them. Everything else has a default (see [`RegistryBuilder`]).
//!
//! `schedule` is called while the engine's graph is locked and must not call back into the
//! engine.

mod builder;
mod descriptor;

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

pub use builder::RegistryBuilder;
pub use descriptor::Descriptor;

use crate::core::TaskSnapshot;
use crate::error::{TaskError, panic_reason};
use crate::tasks::{TaskContext, TaskId};

/// Grouping key for concurrency limits.
pub type Bucket = Arc<str>;

/// Future returned by a work function.
pub type TaskFuture<T> = BoxFuture<'static, Result<T, TaskError>>;

/// Future returned by a dispose function.
pub type DisposeFuture = BoxFuture<'static, Result<(), TaskError>>;

pub(crate) type ResolveFn = Arc<dyn Fn(&TaskId) -> Result<Descriptor, TaskError> + Send + Sync>;
pub(crate) type DependenciesFn =
    Arc<dyn Fn(&Descriptor) -> Result<Vec<TaskId>, TaskError> + Send + Sync>;
pub(crate) type RunFn<T> =
    Arc<dyn Fn(&Descriptor, Vec<T>, TaskContext) -> TaskFuture<T> + Send + Sync>;
pub(crate) type DisposeFn<T> =
    Arc<dyn Fn(&Descriptor, &Result<T, TaskError>) -> DisposeFuture + Send + Sync>;
pub(crate) type TimeoutFn = Arc<dyn Fn(&Descriptor) -> Option<Duration> + Send + Sync>;
pub(crate) type RetryFn = Arc<dyn Fn(&Descriptor, &TaskSnapshot, &TaskError) -> bool + Send + Sync>;
pub(crate) type ScheduleFn = Arc<dyn Fn(&[TaskId]) -> Vec<TaskId> + Send + Sync>;
pub(crate) type BucketFn = Arc<dyn Fn(&Descriptor) -> Option<Bucket> + Send + Sync>;

/// Validated policy bundle. Build one with [`Registry::builder`].
pub struct Registry<T> {
    pub(crate) task: ResolveFn,
    pub(crate) dependencies: DependenciesFn,
    pub(crate) run: RunFn<T>,
    pub(crate) dispose: DisposeFn<T>,
    pub(crate) timeout: TimeoutFn,
    pub(crate) retry: RetryFn,
    pub(crate) schedule: ScheduleFn,
    pub(crate) bucket: BucketFn,
    pub(crate) limits: HashMap<Bucket, usize>,
}

impl<T> Registry<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Starts an empty builder.
    pub fn builder() -> RegistryBuilder<T> {
        RegistryBuilder::new()
    }

    /// Resolves `id` to its descriptor. Panics in the policy become contract violations.
    pub(crate) fn resolve(&self, id: &TaskId) -> Result<Descriptor, TaskError> {
        guarded(|| (self.task)(id))
    }

    pub(crate) fn dependencies_of(&self, descriptor: &Descriptor) -> Result<Vec<TaskId>, TaskError> {
        guarded(|| (self.dependencies)(descriptor))
    }

    pub(crate) fn bucket_of(&self, descriptor: &Descriptor) -> Result<Option<Bucket>, TaskError> {
        guarded(|| Ok((self.bucket)(descriptor)))
    }

    /// Maximum concurrently running tasks for `bucket`; `None` means unlimited.
    ///
    /// A configured limit of `0` also means unlimited.
    pub fn limit(&self, bucket: &Bucket) -> Option<usize> {
        self.limits.get(bucket).copied().filter(|n| *n > 0)
    }

    /// Timeout for one attempt; `Ok(None)` when the timer is disabled.
    ///
    /// `fallback` applies when the policy returns `None`. A zero duration from the policy
    /// disables the timer.
    pub(crate) fn timeout_for(
        &self,
        descriptor: &Descriptor,
        fallback: Option<Duration>,
    ) -> Result<Option<Duration>, TaskError> {
        let timeout = guarded(|| Ok((self.timeout)(descriptor)))?;
        Ok(match timeout {
            Some(timeout) => (!timeout.is_zero()).then_some(timeout),
            None => fallback,
        })
    }

    /// Invokes the work function. A panic while building the future is a contract violation.
    pub(crate) fn invoke(
        &self,
        descriptor: &Descriptor,
        deps: Vec<T>,
        ctx: TaskContext,
    ) -> Result<TaskFuture<T>, TaskError> {
        guarded(|| Ok((self.run)(descriptor, deps, ctx)))
    }

    /// Invokes the dispose function; a synchronous panic becomes a failed disposal.
    pub(crate) fn dispose_outcome(
        &self,
        descriptor: &Descriptor,
        outcome: &Result<T, TaskError>,
    ) -> Result<DisposeFuture, TaskError> {
        guarded(|| Ok((self.dispose)(descriptor, outcome)))
    }

    pub(crate) fn should_retry(
        &self,
        descriptor: &Descriptor,
        snapshot: &TaskSnapshot,
        error: &TaskError,
    ) -> bool {
        catch_unwind(AssertUnwindSafe(|| (self.retry)(descriptor, snapshot, error))).unwrap_or(false)
    }

    /// Admission policy over the queued ids. A panic rejects the whole pass.
    pub(crate) fn admit(&self, queued: &[TaskId]) -> Result<Vec<TaskId>, TaskError> {
        guarded(|| Ok((self.schedule)(queued)))
    }
}

fn guarded<R>(f: impl FnOnce() -> Result<R, TaskError>) -> Result<R, TaskError> {
    catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(TaskError::ContractViolation {
            reason: panic_reason(&*payload).into(),
        })
    })
}
