//! # Admission scheduler.
//!
//! One scheduling pass decides, under the graph lock, which queued entries start now:
//!
//! ```text
//! queued ids (FIFO) ──► schedule policy ──► dedupe, drop ids not queued (reported)
//!                                              │
//!                                              ▼
//!                            bucket caps: running(bucket) < limit(bucket)
//!                                              │
//!                 ┌────────────────────────────┴───────────────────────────┐
//!                 ▼                                                        ▼
//!       admitted: moved to running                 nothing admitted, nothing running,
//!       (the engine spawns a TaskActor each)       queue non-empty: flush as deadlocked
//! ```
//!
//! A panicking schedule policy flushes the whole queue; the engine rejects those entries with
//! the resulting contract violation.
//!
//! The pass itself is pure bookkeeping; publishing events, consulting the retry policy and
//! spawning actors happen in [`Core::schedule`](super::engine::Core) after the lock is
//! released.

use std::collections::HashSet;

use super::graph::{Entry, TaskGraph};
use crate::error::TaskError;
use crate::registry::Registry;
use crate::tasks::TaskId;

/// Outcome of one scheduling pass.
pub(crate) struct Plan<T> {
    /// Entries moved into the running set.
    pub(crate) admitted: Vec<Entry<T>>,
    /// Ids the admission policy returned that were not queued.
    pub(crate) unknown: Vec<TaskId>,
    /// Entries flushed because the queue can never drain.
    pub(crate) deadlocked: Vec<Entry<T>>,
    /// Entries flushed because the schedule policy itself failed.
    pub(crate) rejected: Option<(TaskError, Vec<Entry<T>>)>,
}

impl<T> Plan<T> {
    fn empty() -> Self {
        Self {
            admitted: Vec::new(),
            unknown: Vec::new(),
            deadlocked: Vec::new(),
            rejected: None,
        }
    }
}

/// Runs one admission pass over `graph`.
pub(crate) fn plan<T>(graph: &mut TaskGraph<T>, registry: &Registry<T>) -> Plan<T>
where
    T: Clone + Send + Sync + 'static,
{
    let mut plan = Plan::empty();
    if graph.queue_len() == 0 {
        return plan;
    }

    let queued = graph.queued_ids();
    let offered: HashSet<&TaskId> = queued.iter().collect();
    let mut seen: HashSet<TaskId> = HashSet::new();

    let chosen = match registry.admit(&queued) {
        Ok(chosen) => chosen,
        Err(err) => {
            plan.rejected = Some((err, graph.drain_queue()));
            return plan;
        }
    };
    for id in chosen {
        if !offered.contains(&id) {
            plan.unknown.push(id);
            continue;
        }
        if !seen.insert(id.clone()) {
            continue;
        }
        if let Some(bucket) = graph.bucket_of(&id) {
            let full = registry
                .limit(&bucket)
                .is_some_and(|limit| graph.running_in(&bucket) >= limit);
            if full {
                continue;
            }
        }
        if let Some(entry) = graph.admit(&id) {
            plan.admitted.push(entry);
        }
    }

    if plan.admitted.is_empty() && graph.running_len() == 0 && graph.queue_len() > 0 {
        plan.deadlocked = graph.drain_queue();
    }
    plan
}
