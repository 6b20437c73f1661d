//! # Resolved task description.
//!
//! A [`Descriptor`] is what the registry's `task` policy turns a [`TaskId`] into. It is
//! resolved once per record and shared (`Arc<Descriptor>`) by every attempt of that record.
//!
//! Optional fields are plain data; the registry's `timeout` and `bucket` policies read them
//! by default, so a resolver can set per-task overrides without touching the policies.

use std::time::Duration;

use crate::registry::Bucket;
use crate::tasks::TaskId;

/// Resolved, immutable task description.
///
/// # Example
/// ```
/// use std::time::Duration;
/// use depvisor::Descriptor;
///
/// let d = Descriptor::new("session@chrome")
///     .with_timeout(Duration::from_secs(30))
///     .with_bucket("browsers");
///
/// assert_eq!(d.name(), "session");
/// assert_eq!(d.context(), Some("chrome"));
/// assert_eq!(d.bucket().map(|b| &**b), Some("browsers"));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Descriptor {
    id: TaskId,
    timeout: Option<Duration>,
    bucket: Option<Bucket>,
}

impl Descriptor {
    /// Creates a descriptor with no timeout override and no bucket.
    pub fn new(id: impl Into<TaskId>) -> Self {
        Self {
            id: id.into(),
            timeout: None,
            bucket: None,
        }
    }

    /// Per-task timeout override (`Duration::ZERO` disables the timer for this task).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Concurrency bucket this task is counted against.
    pub fn with_bucket(mut self, bucket: impl Into<Bucket>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    #[inline]
    pub fn id(&self) -> &TaskId {
        &self.id
    }

    /// Task type name (see [`TaskId::name`]).
    #[inline]
    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Task context (see [`TaskId::context`]).
    #[inline]
    pub fn context(&self) -> Option<&str> {
        self.id.context()
    }

    #[inline]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    #[inline]
    pub fn bucket(&self) -> Option<&Bucket> {
        self.bucket.as_ref()
    }
}
