//! # Builder for [`Registry`].
//!
//! Collects policy closures, fills in defaults, and validates that the mandatory ones are
//! present.
//!
//! | Policy         | Default                                     |
//! |----------------|---------------------------------------------|
//! | `task`         | `Descriptor::new(id)`                       |
//! | `dependencies` | **required**                                |
//! | `run`          | **required**                                |
//! | `dispose`      | no-op                                       |
//! | `timeout`      | `descriptor.timeout()` (else engine config) |
//! | `retry`        | never                                       |
//! | `schedule`     | admit everything queued                     |
//! | `bucket`       | `descriptor.bucket()`                       |

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use super::{
    Bucket, BucketFn, DependenciesFn, Descriptor, DisposeFn, DisposeFuture, Registry, ResolveFn,
    RetryFn, RunFn, ScheduleFn, TaskFuture, TimeoutFn,
};
use crate::core::TaskSnapshot;
use crate::error::{ConfigError, TaskError};
use crate::policies::RetryPolicy;
use crate::tasks::{TaskContext, TaskId};

/// Builder for [`Registry`].
///
/// # Example
/// ```
/// use depvisor::{Registry, TaskError};
///
/// let registry = Registry::<u32>::builder()
///     .dependencies(|d| Ok(if d.name() == "sum" { vec!["one".into(), "two".into()] } else { vec![] }))
///     .run(|d, deps: Vec<u32>, _ctx| {
///         let name = d.name().to_string();
///         async move {
///             match name.as_str() {
///                 "one" => Ok(1),
///                 "two" => Ok(2),
///                 "sum" => Ok(deps.iter().sum()),
///                 _ => Err(TaskError::fail("unknown task")),
///             }
///         }
///     })
///     .limit("browsers", 2)
///     .build()
///     .expect("run and dependencies are set");
/// # let _ = registry;
/// ```
pub struct RegistryBuilder<T> {
    task: Option<ResolveFn>,
    dependencies: Option<DependenciesFn>,
    run: Option<RunFn<T>>,
    dispose: Option<DisposeFn<T>>,
    timeout: Option<TimeoutFn>,
    retry: Option<RetryFn>,
    schedule: Option<ScheduleFn>,
    bucket: Option<BucketFn>,
    limits: HashMap<Bucket, usize>,
}

impl<T> Default for RegistryBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RegistryBuilder<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            task: None,
            dependencies: None,
            run: None,
            dispose: None,
            timeout: None,
            retry: None,
            schedule: None,
            bucket: None,
            limits: HashMap::new(),
        }
    }

    /// Resolves an id into a descriptor. Errors reject the `run` call that asked for it.
    pub fn task<F>(mut self, f: F) -> Self
    where
        F: Fn(&TaskId) -> Result<Descriptor, TaskError> + Send + Sync + 'static,
    {
        self.task = Some(Arc::new(f));
        self
    }

    /// Lists the ids a task depends on.
    pub fn dependencies<F>(mut self, f: F) -> Self
    where
        F: Fn(&Descriptor) -> Result<Vec<TaskId>, TaskError> + Send + Sync + 'static,
    {
        self.dependencies = Some(Arc::new(f));
        self
    }

    /// The work function. Receives dependency results in declaration order.
    pub fn run<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(&Descriptor, Vec<T>, TaskContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, TaskError>> + Send + 'static,
    {
        self.run = Some(Arc::new(
            move |d: &Descriptor, deps: Vec<T>, ctx: TaskContext| -> TaskFuture<T> {
                f(d, deps, ctx).boxed()
            },
        ));
        self
    }

    /// Releases whatever a settled task produced. Called with the final outcome.
    pub fn dispose<F, Fut>(mut self, f: F) -> Self
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

    /// Per-attempt timeout. `None` falls back to the engine config, `Some(ZERO)` disables it.
    pub fn timeout<F>(mut self, f: F) -> Self
    where
        F: Fn(&Descriptor) -> Option<Duration> + Send + Sync + 'static,
    {
        self.timeout = Some(Arc::new(f));
        self
    }

    /// Decides whether a failure re-runs in place.
    pub fn retry<F>(mut self, f: F) -> Self
    where
        F: Fn(&Descriptor, &TaskSnapshot, &TaskError) -> bool + Send + Sync + 'static,
    {
        self.retry = Some(Arc::new(f));
        self
    }

    /// Uses a ready-made [`RetryPolicy`] for every task.
    pub fn retry_policy(self, policy: RetryPolicy) -> Self {
        self.retry(move |_, snapshot, error| policy.should_retry(snapshot, error))
    }

    /// Admission policy: picks which queued ids may start now.
    ///
    /// Runs under the engine's graph lock; it must not call back into the engine.
    pub fn schedule<F>(mut self, f: F) -> Self
    where
        F: Fn(&[TaskId]) -> Vec<TaskId> + Send + Sync + 'static,
    {
        self.schedule = Some(Arc::new(f));
        self
    }

    /// Maps a descriptor to its concurrency bucket.
    pub fn bucket<F>(mut self, f: F) -> Self
    where
        F: Fn(&Descriptor) -> Option<Bucket> + Send + Sync + 'static,
    {
        self.bucket = Some(Arc::new(f));
        self
    }

    /// Caps concurrently running tasks in `bucket`. `0` means unlimited.
    pub fn limit(mut self, bucket: impl Into<Bucket>, max: usize) -> Self {
        self.limits.insert(bucket.into(), max);
        self
    }

    /// Validates and freezes the registry.
    ///
    /// # Errors
    /// - [`ConfigError::MissingRun`] when no work function was given;
    /// - [`ConfigError::MissingDependencies`] when no dependency policy was given.
    pub fn build(self) -> Result<Registry<T>, ConfigError> {
        let run = self.run.ok_or(ConfigError::MissingRun)?;
        let dependencies = self.dependencies.ok_or(ConfigError::MissingDependencies)?;

        Ok(Registry {
            task: self
                .task
                .unwrap_or_else(|| {
                    Arc::new(|id: &TaskId| -> Result<Descriptor, TaskError> {
                        Ok(Descriptor::new(id.clone()))
                    })
                }),
            dependencies,
            run,
            dispose: self.dispose.unwrap_or_else(|| {
                Arc::new(|_: &Descriptor, _: &Result<T, TaskError>| -> DisposeFuture {
                    async { Ok(()) }.boxed()
                })
            }),
            timeout: self
                .timeout
                .unwrap_or_else(|| Arc::new(|d: &Descriptor| d.timeout())),
            retry: self
                .retry
                .unwrap_or_else(|| Arc::new(|_: &Descriptor, _: &TaskSnapshot, _: &TaskError| false)),
            schedule: self
                .schedule
                .unwrap_or_else(|| Arc::new(|queued: &[TaskId]| queued.to_vec())),
            bucket: self
                .bucket
                .unwrap_or_else(|| Arc::new(|d: &Descriptor| d.bucket().cloned())),
            limits: self.limits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> RegistryBuilder<u32> {
        Registry::builder()
            .dependencies(|_| Ok(vec![]))
            .run(|_, _, _| async { Ok(1) })
    }

    #[test]
    fn missing_run_is_rejected() {
        let err = Registry::<u32>::builder()
            .dependencies(|_| Ok(vec![]))
            .build()
            .err();
        assert_eq!(err, Some(ConfigError::MissingRun));
    }

    #[test]
    fn missing_dependencies_is_rejected() {
        let err = Registry::<u32>::builder()
            .run(|_, _, _| async { Ok(1) })
            .build()
            .err();
        assert_eq!(err, Some(ConfigError::MissingDependencies));
    }

    #[test]
    fn defaults_read_the_descriptor() {
        let registry = minimal().build().unwrap();
        let d = Descriptor::new("a")
            .with_bucket("b")
            .with_timeout(Duration::from_millis(10));

        assert_eq!(registry.resolve(&"a".into()).unwrap(), Descriptor::new("a"));
        assert_eq!(registry.bucket_of(&d).unwrap().as_deref(), Some("b"));
        assert_eq!(
            registry.timeout_for(&d, Some(Duration::from_secs(6))).unwrap(),
            Some(Duration::from_millis(10))
        );
        assert_eq!(
            registry
                .timeout_for(&Descriptor::new("a"), Some(Duration::from_secs(6)))
                .unwrap(),
            Some(Duration::from_secs(6))
        );
        assert_eq!(registry.timeout_for(&Descriptor::new("a"), None).unwrap(), None);
        let ids: Vec<TaskId> = vec!["x".into(), "y".into()];
        assert_eq!(registry.admit(&ids).unwrap(), ids);
    }

    #[test]
    fn zero_timeout_disables_the_timer() {
        let registry = minimal().build().unwrap();
        let d = Descriptor::new("a").with_timeout(Duration::ZERO);
        assert_eq!(
            registry.timeout_for(&d, Some(Duration::from_secs(6))).unwrap(),
            None
        );
    }

    #[test]
    fn zero_limit_means_unlimited() {
        let registry = minimal().limit("a", 0).limit("b", 2).build().unwrap();
        assert_eq!(registry.limit(&Bucket::from("a")), None);
        assert_eq!(registry.limit(&Bucket::from("b")), Some(2));
        assert_eq!(registry.limit(&Bucket::from("c")), None);
    }

    #[test]
    fn panicking_resolver_is_a_contract_violation() {
        let registry = minimal()
            .task(|_| panic!("resolver exploded"))
            .build()
            .unwrap();
        match registry.resolve(&"a".into()) {
            Err(TaskError::ContractViolation { reason }) => {
                assert!(reason.contains("resolver exploded"))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn panicking_placement_policies_are_contract_violations() {
        let registry = minimal()
            .timeout(|_| panic!("timeout exploded"))
            .bucket(|_| panic!("bucket exploded"))
            .schedule(|_| panic!("schedule exploded"))
            .build()
            .unwrap();
        let d = Descriptor::new("a");
        let queued: Vec<TaskId> = vec!["a".into()];

        assert!(matches!(
            registry.timeout_for(&d, None),
            Err(TaskError::ContractViolation { .. })
        ));
        assert!(matches!(
            registry.bucket_of(&d),
            Err(TaskError::ContractViolation { .. })
        ));
        assert!(matches!(
            registry.admit(&queued),
            Err(TaskError::ContractViolation { .. })
        ));
    }
}
