//! # Task catalog: define task types by name.
//!
//! A [`Catalog`] is a table of [`TaskDef`]s keyed by task type name. It turns into a
//! [`RegistryBuilder`] that resolves `name@context` ids against the table:
//!
//! ```text
//! "session@chrome"
//!     ├─► name    = "session"   → catalog lookup (unknown → TaskError::Unresolved)
//!     └─► context = "chrome"    → visible to context-aware dependency lists
//!
//! TaskDef("session")
//!     ├─ dependencies: ["server"] | Fn(&Descriptor) -> Vec<TaskId>
//!     ├─ run / dispose
//!     └─ timeout / bucket / retry  (copied into the descriptor or consulted per task)
//! ```
//!
//! The builder returned by [`Catalog::into_registry`] can still be customised (admission
//! policy, bucket limits, ...) before `build()`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::error::TaskError;
use crate::policies::RetryPolicy;
use crate::registry::{
    Bucket, Descriptor, DisposeFn, DisposeFuture, RegistryBuilder, RunFn, TaskFuture,
};
use crate::tasks::{TaskContext, TaskId};

type DependencyListFn = Arc<dyn Fn(&Descriptor) -> Vec<TaskId> + Send + Sync>;

#[derive(Clone)]
enum Dependencies {
    Static(Arc<[TaskId]>),
    Computed(DependencyListFn),
}

/// Definition of one task type.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use depvisor::{TaskDef, TaskId};
///
/// let coverage = TaskDef::<String>::new("coverage", |_, deps, _| async move {
///     Ok(format!("coverage of {}", deps[0]))
/// })
/// .depends_with(|d| vec![TaskId::with_context("session", d.context().unwrap_or("chrome"))])
/// .with_timeout(Duration::from_secs(30));
///
/// assert_eq!(coverage.name(), "coverage");
/// ```
pub struct TaskDef<T> {
    name: Arc<str>,
    dependencies: Dependencies,
    run: RunFn<T>,
    dispose: Option<DisposeFn<T>>,
    timeout: Option<Duration>,
    bucket: Option<Bucket>,
    retry: RetryPolicy,
}

impl<T> TaskDef<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Defines a task type with its work function and no dependencies.
    pub fn new<F, Fut>(name: &str, run: F) -> Self
    where
        F: Fn(&Descriptor, Vec<T>, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        let run: RunFn<T> = Arc::new(
            move |d: &Descriptor, deps: Vec<T>, ctx: TaskContext| -> TaskFuture<T> {
                run(d, deps, ctx).boxed()
            },
        );
        Self {
            name: name.into(),
            dependencies: Dependencies::Static(Arc::from(Vec::new())),
            run,
            dispose: None,
            timeout: None,
            bucket: None,
            retry: RetryPolicy::Never,
        }
    }

    /// Fixed dependency list, used as-is for every context.
    pub fn depends_on<I>(mut self, ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<TaskId>,
    {
        let ids: Vec<TaskId> = ids.into_iter().map(Into::into).collect();
        self.dependencies = Dependencies::Static(ids.into());
        self
    }

    /// Dependency list computed from the resolved descriptor (typically its context).
    pub fn depends_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&Descriptor) -> Vec<TaskId> + Send + Sync + 'static,
    {
        self.dependencies = Dependencies::Computed(Arc::new(f));
        self
    }

    /// Releases the task's output once nothing depends on it any more.
    pub fn with_dispose<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&Descriptor, &Result<T, TaskError>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), TaskError>> + Send + 'static,
    {
        self.dispose = Some(Arc::new(
            move |d: &Descriptor, outcome: &Result<T, TaskError>| -> DisposeFuture {
                f(d, outcome).boxed()
            },
        ));
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<Bucket>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    fn describe(&self, id: &TaskId) -> Descriptor {
        let mut descriptor = Descriptor::new(id.clone());
        if let Some(timeout) = self.timeout {
            descriptor = descriptor.with_timeout(timeout);
        }
        if let Some(bucket) = &self.bucket {
            descriptor = descriptor.with_bucket(Arc::clone(bucket));
        }
        descriptor
    }

    fn dependencies_of(&self, descriptor: &Descriptor) -> Vec<TaskId> {
        match &self.dependencies {
            Dependencies::Static(ids) => ids.to_vec(),
            Dependencies::Computed(f) => f(descriptor),
        }
    }
}

/// Table of task definitions keyed by type name.
pub struct Catalog<T> {
    defs: HashMap<Arc<str>, Arc<TaskDef<T>>>,
}

impl<T> Default for Catalog<T> {
    fn default() -> Self {
        Self {
            defs: HashMap::new(),
        }
    }
}

impl<T> Catalog<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a definition.
    pub fn define(mut self, def: TaskDef<T>) -> Self {
        self.defs.insert(Arc::clone(&def.name), Arc::new(def));
        self
    }

    /// Whether a task type with this name is defined.
    pub fn contains(&self, name: &str) -> bool {
        self.defs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.defs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.defs.is_empty()
    }

    /// Turns the catalog into a registry builder with every policy except admission and
    /// limits wired to the definitions.
    pub fn into_registry(self) -> RegistryBuilder<T> {
        let defs = Arc::new(self.defs);

        let lookup = {
            let defs = Arc::clone(&defs);
            move |id: &TaskId| -> Result<Arc<TaskDef<T>>, TaskError> {
                defs.get(id.name())
                    .cloned()
                    .ok_or_else(|| TaskError::Unresolved { id: id.clone() })
            }
        };
        let lookup = Arc::new(lookup);

        let resolve = Arc::clone(&lookup);
        let deps = Arc::clone(&lookup);
        let run = Arc::clone(&lookup);
        let dispose = Arc::clone(&lookup);
        let retry = Arc::clone(&lookup);

        RegistryBuilder::new()
            .task(move |id| Ok(resolve(id)?.describe(id)))
            .dependencies(move |d| Ok(deps(d.id())?.dependencies_of(d)))
            .run(move |d, values, ctx| match run(d.id()) {
                Ok(def) => (def.run)(d, values, ctx),
                Err(err) => futures::future::ready(Err(err)).boxed(),
            })
            .dispose(move |d, outcome| match dispose(d.id()) {
                Ok(def) => match &def.dispose {
                    Some(f) => f(d, outcome),
                    None => futures::future::ready(Ok(())).boxed(),
                },
                Err(err) => futures::future::ready(Err(err)).boxed(),
            })
            .retry(move |d, snapshot, error| {
                retry(d.id())
                    .map(|def| def.retry.should_retry(snapshot, error))
                    .unwrap_or(false)
            })
    }
}
