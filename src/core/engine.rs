//! # Engine: dependency-aware task orchestration.
//!
//! The [`Engine`] owns the task graph, the event bus and the validated [`Registry`]. Its
//! entry point is [`Engine::run`], which resolves a task and (recursively) its
//! dependencies, and returns a shared handle to the task's outcome.
//!
//! ## High-level flow
//! ```text
//! run(id)
//!   ├─► live record?  in flight / complete ──► same handle (single-flight)
//!   │                 failed, no retry     ──► rejected handle (stored error)
//!   │                 failed, retry        ──► retire it, new generation
//!   ├─► task(id), dependencies(descriptor)      (outside the lock)
//!   ├─► register record + handle, publish TaskRegistered
//!   ├─► for dep in dependencies: retain(dep), run(dep)
//!   └─► spawn: await deps (fail-fast)
//!          ├─ Err ──► fail(Dependency), settle, cleanup(id)
//!          └─ Ok  ──► enqueue, schedule()
//!                        └─► TaskActor (timeout race, retry loop) ──► settle, cleanup(id)
//! ```
//!
//! ## Rules
//! - One `parking_lot::Mutex` guards the graph; it is never held across an `.await`.
//! - `run` (and anything that may start work) must be called inside a Tokio runtime.
//! - A task's error only rejects its own handle; dependents see
//!   [`TaskError::Dependency`] wrapping it.

use std::sync::{Arc, Weak};

use futures::FutureExt;
use futures::future;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;

use super::actor::TaskActor;
use super::builder::EngineBuilder;
use super::config::Config;
use super::graph::{Entry, Existing, TaskGraph, TaskHandle};
use super::scheduler;
use super::snapshot::{GraphSnapshot, TaskSnapshot};
use crate::error::{ConfigError, RuntimeError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::registry::{Descriptor, Registry};
use crate::tasks::{ReportProgress, TaskId};

/// Shared engine state. Every spawned actor and pipeline holds an `Arc` to it.
pub(crate) struct Core<T> {
    pub(crate) registry: Registry<T>,
    pub(crate) config: Config,
    pub(crate) graph: Mutex<TaskGraph<T>>,
    pub(crate) bus: Bus,
    pub(crate) token: CancellationToken,
}

/// Dependency-aware task orchestrator.
///
/// Cheap to clone; clones share the same graph.
///
/// # Example
/// ```
/// use depvisor::{Engine, Registry, TaskError};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let registry = Registry::<u32>::builder()
///     .dependencies(|d| Ok(match d.name() {
///         "b" => vec!["a".into()],
///         _ => vec![],
///     }))
///     .run(|d, deps, _ctx| {
///         let name = d.name().to_string();
///         async move {
///             match name.as_str() {
///                 "a" => Ok(3),
///                 "b" => Ok(5 + deps[0]),
///                 _ => Err(TaskError::fail("unknown")),
///             }
///         }
///     })
///     .build()?;
///
/// let engine = Engine::new(registry);
/// assert_eq!(engine.run("b").await?, 8);
/// # Ok(())
/// # }
/// ```
pub struct Engine<T> {
    pub(crate) core: Arc<Core<T>>,
}

impl<T> Clone for Engine<T> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
        }
    }
}

impl<T> Engine<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Engine with the default [`Config`] and no subscribers.
    pub fn new(registry: Registry<T>) -> Self {
        EngineBuilder::new(registry).build()
    }

    /// Starts a builder for config and subscribers.
    pub fn builder(registry: Registry<T>) -> EngineBuilder<T> {
        EngineBuilder::new(registry)
    }

    pub(crate) fn from_parts(registry: Registry<T>, config: Config, bus: Bus) -> Self {
        Self {
            core: Arc::new(Core {
                registry,
                config,
                graph: Mutex::new(TaskGraph::default()),
                bus,
                token: CancellationToken::new(),
            }),
        }
    }

    /// Runs `id` (and whatever it depends on) and returns a handle to its outcome.
    ///
    /// Calling `run` again while the task is in flight, or after it completed, returns a
    /// clone of the same handle. The handle rejects with:
    /// - the task's own error,
    /// - [`TaskError::Dependency`] when a dependency failed first,
    /// - [`TaskError::Cycle`] / [`TaskError::Unresolved`] for resolution problems,
    /// - [`TaskError::Timeout`] / [`TaskError::Deadlock`] from the executor and scheduler.
    ///
    /// # Panics
    /// Panics when called outside a Tokio runtime.
    pub fn run(&self, id: impl Into<TaskId>) -> TaskHandle<T> {
        let id = id.into();
        self.core.run(&id, &mut Vec::new())
    }

    /// Invalidates a live record from outside: it becomes `Error` (even if it had
    /// completed) and its cached result is dropped.
    ///
    /// The retry policy is consulted against the updated snapshot; when it agrees, the next
    /// `run(id)` starts a new generation, otherwise `run(id)` rejects with `error`. Nothing
    /// is cleaned up or re-run here.
    ///
    /// # Errors
    /// - [`RuntimeError::UnknownTask`] when `id` has no live record;
    /// - [`RuntimeError::NotSettled`] while the record is still in flight.
    pub fn fail(
        &self,
        id: impl Into<TaskId>,
        error: impl Into<TaskError>,
    ) -> Result<(), RuntimeError> {
        let id = id.into();
        let error = error.into();
        let core = &self.core;

        let prospective = core.graph.lock().prospective(&id, None, &error);
        let Some((descriptor, snapshot)) = prospective else {
            return Err(RuntimeError::UnknownTask { id });
        };
        if !snapshot.settled {
            return Err(RuntimeError::NotSettled { id });
        }
        let retry = core.registry.should_retry(&descriptor, &snapshot, &error);

        let applied = core
            .graph
            .lock()
            .fail(&id, Some(snapshot.generation), error.clone(), retry);
        if applied.is_none() {
            return Err(RuntimeError::UnknownTask { id });
        }

        core.bus.publish(
            Event::new(EventKind::TaskInvalidated)
                .with_task(&id)
                .with_reason(error.to_string()),
        );
        Ok(())
    }

    /// Records progress for a live task, clamped to `[0, 1]`.
    pub fn progress(&self, id: impl Into<TaskId>, amount: f64) -> Result<(), RuntimeError> {
        let id = id.into();
        self.core.set_progress(&id, None, amount)
    }

    /// Adds a reference to `id`, keeping its result alive until [`Engine::release`].
    pub fn retain(&self, id: impl Into<TaskId>) -> usize {
        self.core.retain(&id.into())
    }

    /// Drops a reference to `id` (saturating at zero) and disposes whatever became
    /// unreferenced in the background.
    pub fn release(&self, id: impl Into<TaskId>) -> usize {
        let id = id.into();
        let refs = self.core.release(&id);
        if refs == 0 {
            self.core.spawn_cleanup(Some(vec![id]));
        }
        refs
    }

    /// Disposes settled, unreferenced records: the given ids, or every record when `None`.
    ///
    /// Cascades through dependencies until a pass disposes nothing.
    pub async fn cleanup(&self, ids: Option<Vec<TaskId>>) {
        self.core.cleanup(ids).await
    }

    /// Snapshot of one live record.
    pub fn task(&self, id: impl Into<TaskId>) -> Option<TaskSnapshot> {
        self.core.graph.lock().task(&id.into())
    }

    /// Cached result of a completed, live record.
    pub fn result(&self, id: impl Into<TaskId>) -> Option<T> {
        self.core.graph.lock().result(&id.into())
    }

    /// Snapshot of the whole graph.
    pub fn snapshot(&self) -> GraphSnapshot {
        self.core.graph.lock().snapshot()
    }

    /// Receives every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.core.bus.subscribe()
    }

    pub fn config(&self) -> &Config {
        &self.core.config
    }

    /// Cancels the engine token: running contexts see cancellation and the subscriber
    /// listener stops. Records and handles stay as they are.
    pub fn shutdown(&self) {
        self.core.token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.core.token.is_cancelled()
    }
}

impl<T> Core<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn run(self: &Arc<Self>, id: &TaskId, path: &mut Vec<TaskId>) -> TaskHandle<T> {
        match self.graph.lock().existing(id) {
            Existing::Handle(handle) => return handle,
            Existing::Rejected(err) => return rejected(err),
            Existing::Absent | Existing::Retire => {}
        }

        let (descriptor, dependencies) = match self.resolve(id) {
            Ok(resolved) => resolved,
            Err(err) => return self.reject(id, err),
        };
        if let Some(dep) = dependencies
            .iter()
            .find(|dep| *dep == id || path.contains(*dep))
        {
            return self.reject(id, TaskError::Cycle { id: dep.clone() });
        }
        let bucket = match self.registry.bucket_of(&descriptor) {
            Ok(bucket) => bucket,
            Err(err) => return self.reject(id, err),
        };

        let (tx, rx) = oneshot::channel::<Result<T, TaskError>>();
        let handle: TaskHandle<T> = rx
            .map(|settled| settled.unwrap_or(Err(TaskError::Abandoned)))
            .boxed()
            .shared();

        let (generation, retired) = {
            let mut graph = self.graph.lock();
            let retired = match graph.existing(id) {
                Existing::Handle(handle) => return handle,
                Existing::Rejected(err) => return rejected(err),
                Existing::Retire => graph.retire(id),
                Existing::Absent => None,
            };
            let generation = graph.register(
                id.clone(),
                descriptor,
                Arc::clone(&dependencies),
                bucket,
                handle.clone(),
            );
            (generation, retired)
        };
        self.bus
            .publish(Event::new(EventKind::TaskRegistered).with_task(id));

        path.push(id.clone());
        let mut waits = Vec::with_capacity(dependencies.len());
        for dep in dependencies.iter() {
            self.retain(dep);
            waits.push((dep.clone(), self.run(dep, path)));
        }
        path.pop();

        if let Some(retired) = retired {
            self.dispose_retired(retired);
        }

        let core = Arc::clone(self);
        let id = id.clone();
        tokio::spawn(async move {
            let waits = waits
                .into_iter()
                .map(|(dep, handle)| handle.map(move |res| res.map_err(|err| (dep, err))));
            match future::try_join_all(waits).await {
                Ok(deps) => core.enqueue(Entry {
                    id,
                    generation,
                    deps,
                    settle: tx,
                }),
                Err((dep, err)) => {
                    core.reject_unqueued(id, generation, TaskError::dependency(dep, err), tx)
                        .await
                }
            }
        });

        handle
    }

    fn resolve(&self, id: &TaskId) -> Result<(Arc<Descriptor>, Arc<[TaskId]>), TaskError> {
        let descriptor = self.registry.resolve(id)?;
        let dependencies = self.registry.dependencies_of(&descriptor)?;
        Ok((Arc::new(descriptor), dependencies.into()))
    }

    /// Rejects a `run` call that registered nothing.
    fn reject(&self, id: &TaskId, err: TaskError) -> TaskHandle<T> {
        self.bus.publish(
            Event::new(EventKind::TaskFailed)
                .with_task(id)
                .with_reason(err.to_string()),
        );
        rejected(err)
    }

    fn enqueue(self: &Arc<Self>, entry: Entry<T>) {
        let id = entry.id.clone();
        if self.graph.lock().enqueue(entry) {
            self.bus
                .publish(Event::new(EventKind::TaskEnqueued).with_task(&id));
        }
        self.schedule();
    }

    /// Fails a record whose dependency rejected before it could be queued.
    async fn reject_unqueued(
        self: &Arc<Self>,
        id: TaskId,
        generation: u64,
        err: TaskError,
        settle: oneshot::Sender<Result<T, TaskError>>,
    ) {
        {
            let mut graph = self.graph.lock();
            graph.fail(&id, Some(generation), err.clone(), false);
            graph.settle(&id, generation);
        }
        self.bus.publish(
            Event::new(EventKind::TaskFailed)
                .with_task(&id)
                .with_reason(err.to_string()),
        );
        let _ = settle.send(Err(err));
        self.cleanup(Some(vec![id])).await;
    }

    /// Runs one scheduling pass and acts on it.
    pub(crate) fn schedule(self: &Arc<Self>) {
        let plan = scheduler::plan(&mut self.graph.lock(), &self.registry);

        if !plan.unknown.is_empty() {
            let err = ConfigError::UnknownAdmission { ids: plan.unknown };
            self.bus.publish(
                Event::new(EventKind::AdmissionRejected).with_reason(err.to_string()),
            );
        }
        for entry in plan.admitted {
            tokio::spawn(TaskActor::new(Arc::clone(self), entry).run());
        }
        if let Some((err, entries)) = plan.rejected {
            self.bus.publish(
                Event::new(EventKind::AdmissionRejected).with_reason(err.to_string()),
            );
            let ids = self.reject_queued(entries, &err);
            self.spawn_cleanup(Some(ids));
        }
        if !plan.deadlocked.is_empty() {
            let ids = self.reject_queued(plan.deadlocked, &TaskError::Deadlock);
            self.bus.publish(
                Event::new(EventKind::DeadlockDetected)
                    .with_reason(format!("{} queued task(s) rejected", ids.len())),
            );
            self.spawn_cleanup(Some(ids));
        }
    }

    /// Fails queued entries that will never be admitted. Returns their ids.
    fn reject_queued(&self, entries: Vec<Entry<T>>, err: &TaskError) -> Vec<TaskId> {
        let mut ids = Vec::with_capacity(entries.len());

        for Entry {
            id,
            generation,
            settle,
            ..
        } in entries
        {
            let prospective = self.graph.lock().prospective(&id, Some(generation), err);
            let retry = prospective.is_some_and(|(descriptor, snapshot)| {
                self.registry.should_retry(&descriptor, &snapshot, err)
            });
            {
                let mut graph = self.graph.lock();
                graph.fail(&id, Some(generation), err.clone(), retry);
                graph.settle(&id, generation);
            }
            self.bus.publish(
                Event::new(EventKind::TaskFailed)
                    .with_task(&id)
                    .with_reason(err.to_string()),
            );
            let _ = settle.send(Err(err.clone()));
            ids.push(id);
        }
        ids
    }

    /// Stores clamped progress. `generation = None` targets whatever record is live.
    pub(crate) fn set_progress(
        &self,
        id: &TaskId,
        generation: Option<u64>,
        amount: f64,
    ) -> Result<(), RuntimeError> {
        let amount = if amount.is_nan() {
            0.0
        } else {
            amount.clamp(0.0, 1.0)
        };
        if !self.graph.lock().set_progress(id, generation, amount) {
            return Err(RuntimeError::UnknownTask { id: id.clone() });
        }
        self.bus.publish(
            Event::new(EventKind::TaskProgress)
                .with_task(id)
                .with_progress(amount),
        );
        Ok(())
    }

    /// Progress sink handed to work functions through their context.
    pub(crate) fn reporter(self: &Arc<Self>) -> Weak<dyn ReportProgress> {
        let weak: Weak<Core<T>> = Arc::downgrade(self);
        weak
    }
}

impl<T> ReportProgress for Core<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn report(&self, id: &TaskId, generation: u64, amount: f64) {
        let _ = self.set_progress(id, Some(generation), amount);
    }
}

fn rejected<T>(err: TaskError) -> TaskHandle<T>
where
    T: Clone + Send + Sync + 'static,
{
    future::ready(Err(err)).boxed().shared()
}
