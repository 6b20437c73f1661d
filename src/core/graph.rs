//! # Task graph store.
//!
//! [`TaskGraph`] is the engine's single mutable state: task records, reference counts, the
//! pending queue and the running set. It lives behind one `parking_lot::Mutex` and every
//! change is one named transition applied under that lock:
//!
//! ```text
//! register ──► enqueue ──► (scheduler) ──► start ──┬─► complete ──► settle
//!                                                  └─► fail ───────► settle
//! take_disposable ──► (dispose outside the lock) ──► unregister | abort_disposal
//! ```
//!
//! ## Rules
//! - At most one live record per id.
//! - Executor transitions carry the record generation and are no-ops on mismatch, so a
//!   stale actor can never touch a newer record for the same id.
//! - Reference counts are keyed by id, not by record: a positive count survives
//!   unregistration, a count that drops to zero is removed.
//! - Running slots remember the generation that took them; only that generation frees them.
//! - Nothing here awaits or calls policies other than through arguments.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::SystemTime;

use futures::future::{BoxFuture, Shared};
use tokio::sync::oneshot;

use super::snapshot::{GraphSnapshot, TaskSnapshot, TaskStatus};
use crate::error::TaskError;
use crate::registry::{Bucket, Descriptor};
use crate::tasks::TaskId;

/// Shared future resolving to a task's outcome. Every consumer of one record gets a clone.
pub type TaskHandle<T> = Shared<BoxFuture<'static, Result<T, TaskError>>>;

/// One live task record.
pub(crate) struct Record<T> {
    generation: u64,
    descriptor: Arc<Descriptor>,
    dependencies: Arc<[TaskId]>,
    bucket: Option<Bucket>,
    handle: TaskHandle<T>,
    status: TaskStatus,
    result: Option<T>,
    error: Option<TaskError>,
    retry: bool,
    failures: u32,
    progress: f64,
    queued_at: Option<SystemTime>,
    started_at: Option<SystemTime>,
    ended_at: Option<SystemTime>,
    settled: bool,
    disposing: bool,
}

impl<T> Record<T> {
    fn snapshot(&self, id: &TaskId, refs: usize) -> TaskSnapshot {
        TaskSnapshot {
            id: id.clone(),
            status: self.status,
            generation: self.generation,
            failures: self.failures,
            progress: self.progress,
            error: self.error.clone(),
            retry: self.retry,
            dependencies: self.dependencies.to_vec(),
            bucket: self.bucket.clone(),
            refs,
            queued_at: self.queued_at,
            started_at: self.started_at,
            ended_at: self.ended_at,
            settled: self.settled,
        }
    }
}

/// A task whose dependencies all succeeded, waiting for admission.
pub(crate) struct Entry<T> {
    pub(crate) id: TaskId,
    pub(crate) generation: u64,
    pub(crate) deps: Vec<T>,
    pub(crate) settle: oneshot::Sender<Result<T, TaskError>>,
}

/// What `run(id)` finds for an id.
pub(crate) enum Existing<T> {
    /// No usable record; register a new one.
    Absent,
    /// In flight or completed: share the handle.
    Handle(TaskHandle<T>),
    /// Failed for good: reject with the stored error.
    Rejected(TaskError),
    /// Failed with a pending retry decision: retire it and start a new generation.
    Retire,
}

/// A record retired by a retry, to be disposed outside the lock.
pub(crate) struct Retired<T> {
    pub(crate) id: TaskId,
    pub(crate) descriptor: Arc<Descriptor>,
    pub(crate) dependencies: Arc<[TaskId]>,
    pub(crate) handle: TaskHandle<T>,
}

/// A settled, unreferenced record marked for disposal.
pub(crate) struct Disposable<T> {
    pub(crate) id: TaskId,
    pub(crate) generation: u64,
    pub(crate) descriptor: Arc<Descriptor>,
    pub(crate) dependencies: Arc<[TaskId]>,
    pub(crate) handle: TaskHandle<T>,
}

pub(crate) struct TaskGraph<T> {
    records: HashMap<TaskId, Record<T>>,
    refs: HashMap<TaskId, usize>,
    queue: VecDeque<Entry<T>>,
    running: HashMap<TaskId, Slot>,
    next_generation: u64,
}

/// A running slot: the admitted generation and the bucket it counts against.
struct Slot {
    generation: u64,
    bucket: Option<Bucket>,
}

impl<T> Default for TaskGraph<T> {
    fn default() -> Self {
        Self {
            records: HashMap::new(),
            refs: HashMap::new(),
            queue: VecDeque::new(),
            running: HashMap::new(),
            next_generation: 1,
        }
    }
}

impl<T: Clone> TaskGraph<T> {
    pub(crate) fn existing(&self, id: &TaskId) -> Existing<T> {
        let Some(record) = self.records.get(id) else {
            return Existing::Absent;
        };
        if record.disposing {
            return Existing::Absent;
        }
        if !record.settled || record.status == TaskStatus::Complete {
            return Existing::Handle(record.handle.clone());
        }
        if record.retry {
            Existing::Retire
        } else {
            Existing::Rejected(record.error.clone().unwrap_or(TaskError::Abandoned))
        }
    }

    /// Removes a record that failed with a pending retry so a new generation can take its place.
    pub(crate) fn retire(&mut self, id: &TaskId) -> Option<Retired<T>> {
        let record = self.records.remove(id)?;
        Some(Retired {
            id: id.clone(),
            descriptor: record.descriptor,
            dependencies: record.dependencies,
            handle: record.handle,
        })
    }

    /// Registers a new record (replacing a disposing one) and returns its generation.
    pub(crate) fn register(
        &mut self,
        id: TaskId,
        descriptor: Arc<Descriptor>,
        dependencies: Arc<[TaskId]>,
        bucket: Option<Bucket>,
        handle: TaskHandle<T>,
    ) -> u64 {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.records.insert(
            id,
            Record {
                generation,
                descriptor,
                dependencies,
                bucket,
                handle,
                status: TaskStatus::Registered,
                result: None,
                error: None,
                retry: false,
                failures: 0,
                progress: 0.0,
                queued_at: None,
                started_at: None,
                ended_at: None,
                settled: false,
                disposing: false,
            },
        );
        generation
    }

    fn current(&mut self, id: &TaskId, generation: u64) -> Option<&mut Record<T>> {
        self.records
            .get_mut(id)
            .filter(|r| r.generation == generation)
    }

    pub(crate) fn is_current(&self, id: &TaskId, generation: u64) -> bool {
        self.records
            .get(id)
            .is_some_and(|r| r.generation == generation)
    }

    pub(crate) fn descriptor(&self, id: &TaskId, generation: u64) -> Option<Arc<Descriptor>> {
        self.records
            .get(id)
            .filter(|r| r.generation == generation)
            .map(|r| Arc::clone(&r.descriptor))
    }

    pub(crate) fn enqueue(&mut self, entry: Entry<T>) -> bool {
        let Some(record) = self.current(&entry.id, entry.generation) else {
            return false;
        };
        record.status = TaskStatus::Enqueued;
        record.queued_at = Some(SystemTime::now());
        self.queue.push_back(entry);
        true
    }

    pub(crate) fn start(&mut self, id: &TaskId, generation: u64) -> bool {
        let Some(record) = self.current(id, generation) else {
            return false;
        };
        record.status = TaskStatus::Pending;
        record.started_at = Some(SystemTime::now());
        record.progress = 0.0;
        true
    }

    pub(crate) fn complete(&mut self, id: &TaskId, generation: u64, value: T) -> bool {
        let Some(record) = self.current(id, generation) else {
            return false;
        };
        record.status = TaskStatus::Complete;
        record.result = Some(value);
        record.error = None;
        record.retry = false;
        record.progress = 1.0;
        record.ended_at = Some(SystemTime::now());
        true
    }

    /// The snapshot the retry policy sees for `error`: failures already counted.
    pub(crate) fn prospective(
        &self,
        id: &TaskId,
        generation: Option<u64>,
        error: &TaskError,
    ) -> Option<(Arc<Descriptor>, TaskSnapshot)> {
        let record = self
            .records
            .get(id)
            .filter(|r| generation.is_none_or(|g| r.generation == g))?;
        let mut snapshot = record.snapshot(id, self.refs_of(id));
        snapshot.status = TaskStatus::Error;
        snapshot.failures = snapshot.failures.saturating_add(1);
        snapshot.error = Some(error.clone());
        Some((Arc::clone(&record.descriptor), snapshot))
    }

    /// Marks the record failed with the retry decision. Returns the new failure count.
    ///
    /// `generation = None` targets whatever record is live (manual invalidation).
    pub(crate) fn fail(
        &mut self,
        id: &TaskId,
        generation: Option<u64>,
        error: TaskError,
        retry: bool,
    ) -> Option<u32> {
        let record = self
            .records
            .get_mut(id)
            .filter(|r| generation.is_none_or(|g| r.generation == g))?;
        record.status = TaskStatus::Error;
        record.failures = record.failures.saturating_add(1);
        record.error = Some(error);
        record.retry = retry;
        record.result = None;
        record.ended_at = Some(SystemTime::now());
        Some(record.failures)
    }

    /// Marks the handle resolved and frees the running slot held by `generation`.
    ///
    /// The slot is freed even when the record was replaced meanwhile.
    pub(crate) fn settle(&mut self, id: &TaskId, generation: u64) {
        if let Some(record) = self.current(id, generation) {
            record.settled = true;
        }
        if self
            .running
            .get(id)
            .is_some_and(|slot| slot.generation == generation)
        {
            self.running.remove(id);
        }
    }

    /// Stores progress. `generation = None` targets whatever record is live.
    pub(crate) fn set_progress(
        &mut self,
        id: &TaskId,
        generation: Option<u64>,
        amount: f64,
    ) -> bool {
        match self
            .records
            .get_mut(id)
            .filter(|r| generation.is_none_or(|g| r.generation == g))
        {
            Some(record) => {
                record.progress = amount;
                true
            }
            None => false,
        }
    }

    pub(crate) fn retain(&mut self, id: &TaskId) -> usize {
        let refs = self.refs.entry(id.clone()).or_insert(0);
        *refs += 1;
        *refs
    }

    pub(crate) fn release(&mut self, id: &TaskId) -> usize {
        let Some(refs) = self.refs.get_mut(id) else {
            return 0;
        };
        *refs = refs.saturating_sub(1);
        let left = *refs;
        if left == 0 {
            self.refs.remove(id);
        }
        left
    }

    pub(crate) fn refs_of(&self, id: &TaskId) -> usize {
        self.refs.get(id).copied().unwrap_or(0)
    }

    /// Marks every settled, unreferenced, not yet disposing record in scope as disposing.
    ///
    /// `scope = None` scans every record.
    pub(crate) fn take_disposable(&mut self, scope: Option<&[TaskId]>) -> Vec<Disposable<T>> {
        let candidates: Vec<TaskId> = match scope {
            Some(ids) => ids.to_vec(),
            None => self.records.keys().cloned().collect(),
        };
        let mut batch = Vec::new();
        for id in candidates {
            if self.refs_of(&id) > 0 {
                continue;
            }
            let Some(record) = self.records.get_mut(&id) else {
                continue;
            };
            if !record.settled || record.disposing {
                continue;
            }
            record.disposing = true;
            batch.push(Disposable {
                id,
                generation: record.generation,
                descriptor: Arc::clone(&record.descriptor),
                dependencies: Arc::clone(&record.dependencies),
                handle: record.handle.clone(),
            });
        }
        batch
    }

    pub(crate) fn abort_disposal(&mut self, id: &TaskId, generation: u64) {
        if let Some(record) = self.current(id, generation) {
            record.disposing = false;
        }
    }

    pub(crate) fn unregister(&mut self, id: &TaskId, generation: u64) -> bool {
        if self.is_current(id, generation) {
            self.records.remove(id);
            if self.refs.get(id).is_some_and(|refs| *refs == 0) {
                self.refs.remove(id);
            }
            true
        } else {
            false
        }
    }

    pub(crate) fn result(&self, id: &TaskId) -> Option<T> {
        self.records.get(id).and_then(|r| r.result.clone())
    }

    // === Scheduler access ===

    pub(crate) fn queued_ids(&self) -> Vec<TaskId> {
        self.queue.iter().map(|e| e.id.clone()).collect()
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn running_len(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn running_in(&self, bucket: &Bucket) -> usize {
        self.running
            .values()
            .filter(|slot| slot.bucket.as_ref() == Some(bucket))
            .count()
    }

    pub(crate) fn bucket_of(&self, id: &TaskId) -> Option<Bucket> {
        self.records.get(id).and_then(|r| r.bucket.clone())
    }

    /// Moves the queued entry for `id` into the running set.
    pub(crate) fn admit(&mut self, id: &TaskId) -> Option<Entry<T>> {
        let pos = self.queue.iter().position(|e| &e.id == id)?;
        let entry = self.queue.remove(pos)?;
        let slot = Slot {
            generation: entry.generation,
            bucket: self.bucket_of(id),
        };
        self.running.insert(id.clone(), slot);
        Some(entry)
    }

    pub(crate) fn drain_queue(&mut self) -> Vec<Entry<T>> {
        self.queue.drain(..).collect()
    }

    // === Read access ===

    pub(crate) fn task(&self, id: &TaskId) -> Option<TaskSnapshot> {
        self.records
            .get(id)
            .map(|r| r.snapshot(id, self.refs_of(id)))
    }

    pub(crate) fn snapshot(&self) -> GraphSnapshot {
        let mut tasks: Vec<TaskSnapshot> = self
            .records
            .iter()
            .map(|(id, r)| r.snapshot(id, self.refs_of(id)))
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));

        let mut running: Vec<TaskId> = self.running.keys().cloned().collect();
        running.sort();

        GraphSnapshot {
            tasks,
            queued: self.queued_ids(),
            running,
        }
    }
}
