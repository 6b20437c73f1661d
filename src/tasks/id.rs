//! # Task identifiers.
//!
//! [`TaskId`] is an opaque, cheaply cloneable string key. Callers commonly use the
//! `name@context` convention to run several instances of one task type (for example
//! `session@chrome` and `session@firefox`). The engine never parses ids; the helpers here
//! exist for task-resolution policies such as [`Catalog`](crate::Catalog).

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

/// Separator between the task type name and its context.
pub const CONTEXT_SEPARATOR: char = '@';

/// Opaque task key.
///
/// # Example
/// ```
/// use depvisor::TaskId;
///
/// let id = TaskId::with_context("session", "chrome");
/// assert_eq!(id.as_str(), "session@chrome");
/// assert_eq!(id.name(), "session");
/// assert_eq!(id.context(), Some("chrome"));
///
/// let plain = TaskId::from("server");
/// assert_eq!(plain.name(), "server");
/// assert_eq!(plain.context(), None);
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(Arc<str>);

impl TaskId {
    /// Creates an id from any string-like value.
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// Builds a `name@context` id.
    pub fn with_context(name: &str, context: &str) -> Self {
        Self(format!("{name}{CONTEXT_SEPARATOR}{context}").into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part before the first `@` (the whole id when there is none).
    pub fn name(&self) -> &str {
        match self.0.split_once(CONTEXT_SEPARATOR) {
            Some((name, _)) => name,
            None => &self.0,
        }
    }

    /// The part after the first `@`, if any.
    pub fn context(&self) -> Option<&str> {
        self.0.split_once(CONTEXT_SEPARATOR).map(|(_, ctx)| ctx)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id.into())
    }
}

impl From<&TaskId> for TaskId {
    fn from(id: &TaskId) -> Self {
        id.clone()
    }
}

impl From<Arc<str>> for TaskId {
    fn from(id: Arc<str>) -> Self {
        Self(id)
    }
}

impl From<TaskId> for Arc<str> {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl From<&TaskId> for Arc<str> {
    fn from(id: &TaskId) -> Self {
        Arc::clone(&id.0)
    }
}

impl Borrow<str> for TaskId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for TaskId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
