//! # Reference counting and disposal.
//!
//! A record is disposed exactly once, when nothing references it and its handle has
//! settled. Disposal releases the record's own dependencies, which can make them disposable
//! in turn:
//!
//! ```text
//! cleanup(ids)
//! loop {
//!   ├─► take_disposable(scope)         refs == 0, settled, not disposing → mark disposing
//!   ├─► (none) → break
//!   ├─► for each, concurrently:
//!   │     ├─ await settled handle
//!   │     ├─ re-check refs (re-retained → abort, keep the record)
//!   │     ├─ publish TaskDisposed, dispose(descriptor, &outcome)   (failures → DisposeFailed)
//!   │     ├─ release each dependency
//!   │     └─ unregister (generation must still match) → TaskUnregistered
//!   ├─► nothing disposed → break
//!   └─► scope = every record (cascade)
//! }
//! schedule()
//! ```

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::join_all;

use super::engine::Core;
use super::graph::{Disposable, Retired};
use crate::error::{TaskError, panic_reason};
use crate::events::{Event, EventKind};
use crate::registry::Descriptor;
use crate::tasks::TaskId;

impl<T> Core<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn retain(&self, id: &TaskId) -> usize {
        self.graph.lock().retain(id)
    }

    pub(crate) fn release(&self, id: &TaskId) -> usize {
        self.graph.lock().release(id)
    }

    pub(crate) fn spawn_cleanup(self: &Arc<Self>, ids: Option<Vec<TaskId>>) {
        let core = Arc::clone(self);
        tokio::spawn(async move { core.cleanup(ids).await });
    }

    pub(crate) async fn cleanup(self: &Arc<Self>, ids: Option<Vec<TaskId>>) {
        let mut scope = ids;
        loop {
            let batch = self.graph.lock().take_disposable(scope.as_deref());
            if batch.is_empty() {
                break;
            }
            let disposed = join_all(batch.into_iter().map(|d| self.dispose_one(d))).await;
            if !disposed.into_iter().any(|d| d) {
                break;
            }
            scope = None;
        }
        self.schedule();
    }

    async fn dispose_one(self: &Arc<Self>, candidate: Disposable<T>) -> bool {
        let Disposable {
            id,
            generation,
            descriptor,
            dependencies,
            handle,
        } = candidate;
        let outcome = handle.await;

        {
            let mut graph = self.graph.lock();
            if graph.is_current(&id, generation) && graph.refs_of(&id) > 0 {
                graph.abort_disposal(&id, generation);
                return false;
            }
        }

        self.dispose_outcome(&id, &descriptor, &outcome).await;
        for dep in dependencies.iter() {
            self.release(dep);
        }
        if self.graph.lock().unregister(&id, generation) {
            self.bus
                .publish(Event::new(EventKind::TaskUnregistered).with_task(&id));
        }
        true
    }

    /// Disposes a record that was replaced by a new generation after a retry decision.
    pub(crate) fn dispose_retired(self: &Arc<Self>, retired: Retired<T>) {
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let Retired {
                id,
                descriptor,
                dependencies,
                handle,
            } = retired;
            let outcome = handle.await;
            core.dispose_outcome(&id, &descriptor, &outcome).await;

            let mut released = Vec::new();
            for dep in dependencies.iter() {
                if core.release(dep) == 0 {
                    released.push(dep.clone());
                }
            }
            if !released.is_empty() {
                core.cleanup(Some(released)).await;
            }
        });
    }

    /// Hands `outcome` to the dispose policy. Never fails: errors and panics are published.
    pub(crate) async fn dispose_outcome(
        &self,
        id: &TaskId,
        descriptor: &Descriptor,
        outcome: &Result<T, TaskError>,
    ) {
        self.bus
            .publish(Event::new(EventKind::TaskDisposed).with_task(id));

        let res = match self.registry.dispose_outcome(descriptor, outcome) {
            Ok(fut) => AssertUnwindSafe(fut)
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(TaskError::ContractViolation {
                        reason: panic_reason(&*payload).into(),
                    })
                }),
            Err(err) => Err(err),
        };
        if let Err(err) = res {
            self.bus.publish(
                Event::new(EventKind::DisposeFailed)
                    .with_task(id)
                    .with_reason(err.to_string()),
            );
        }
    }
}
