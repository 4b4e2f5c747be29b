use crate::task::TaskId;
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Error stored on a task which did not complete successfully.
///
/// Every holder of a [Handle][crate::Handle] to the same task observes a clone
/// of the same error.
#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum TaskError {
    /// The accessor panicked while running on a worker.
    #[error("task {task} panicked: {message}")]
    Panicked {
        /// The task whose accessor panicked.
        task: TaskId,
        /// The panic message, if the payload was a string.
        message: Arc<str>,
    },
    /// A fallible accessor returned an error.
    ///
    /// See [ThreadSafe::try_spawn][crate::ThreadSafe::try_spawn].
    #[error("task {task} failed: {error}")]
    Accessor {
        /// The task whose accessor failed.
        task: TaskId,
        /// The error returned by the accessor.
        #[source]
        error: Arc<dyn Error + Send + Sync>,
    },
    /// A prerequisite failed, so the accessor was never run.
    #[error("task {task} was not run since prerequisite {prerequisite} failed")]
    Dependency {
        /// The task which was not run.
        task: TaskId,
        /// The prerequisite which failed.
        prerequisite: TaskId,
        /// The error which caused the prerequisite to fail. If the
        /// prerequisite itself failed because of one of its prerequisites,
        /// this is the error that started it.
        #[source]
        source: Arc<TaskError>,
    },
    /// The task was prepared but dropped before it was launched.
    #[error("task {task} was discarded before being launched")]
    Discarded {
        /// The discarded task.
        task: TaskId,
    },
}

impl TaskError {
    /// The task this error is stored on.
    pub fn task(&self) -> TaskId {
        match *self {
            TaskError::Panicked { task, .. } => task,
            TaskError::Accessor { task, .. } => task,
            TaskError::Dependency { task, .. } => task,
            TaskError::Discarded { task } => task,
        }
    }

    /// The error which started a chain of dependency failures, or this error
    /// if it isn't a dependency failure.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(0u32)?;
    ///
    /// let a = value.spawn(|_: &u32| -> u32 { panic!("boom") });
    /// let b = value.spawn_after(|v: &u32| *v, &a)?;
    /// let c = value.spawn_after(|v: &u32| *v, &b)?;
    ///
    /// let error = c.wait().unwrap_err();
    /// assert_eq!(error.root_cause().task(), a.id());
    /// # Ok(()) }
    /// ```
    pub fn root_cause(&self) -> &TaskError {
        let mut current = self;

        while let TaskError::Dependency { source, .. } = current {
            current = source;
        }

        current
    }
}

/// Error raised when launching a task would make it depend on itself.
#[derive(Debug, Clone, Error)]
#[error("task {task} would depend on itself through {}", DisplayPath(path))]
pub struct CycleError {
    pub(crate) task: TaskId,
    pub(crate) path: Vec<TaskId>,
}

impl CycleError {
    /// The task whose launch was rejected.
    pub fn task(&self) -> TaskId {
        self.task
    }

    /// The chain of prerequisites leading back to [task][CycleError::task],
    /// starting with the prerequisite it was launched with.
    pub fn path(&self) -> &[TaskId] {
        &self.path
    }
}

struct DisplayPath<'a>(&'a [TaskId]);

impl fmt::Display for DisplayPath<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut it = self.0.iter();

        if let Some(first) = it.next() {
            write!(f, "{}", first)?;
        }

        for id in it {
            write!(f, " -> {}", id)?;
        }

        Ok(())
    }
}

/// Error raised when we try to join a worker thread that has panicked.
#[derive(Debug, Error)]
#[error("worker thread panicked")]
pub struct Panicked(pub(crate) ());
