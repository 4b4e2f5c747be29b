use crate::access::Accessor;
use crate::error::TaskError;
use crate::shared::Shared;
use crate::task::{AnyHandle, Dependent, Handle, Header, Settled, Task, TaskId, TaskState};
use parking_lot::Mutex;
use std::any::Any;
use std::error::Error;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A job as seen by the coordinator and the workers.
pub(crate) trait Runnable: Send + Sync {
    fn header(&self) -> &Header;

    /// Run an admitted job to completion.
    fn run(self: Arc<Self>);

    /// Launch a prepared job, making it wait for the given prerequisites.
    fn launch(self: Arc<Self>, prerequisites: Vec<AnyHandle>);

    /// Fail a prepared job which will never be launched.
    fn discard(&self);
}

/// How the output of an accessor becomes the outcome of its task.
pub(crate) trait Finish<O> {
    /// The value of a successful task.
    type Value;

    fn finish(output: O, task: TaskId) -> Result<Self::Value, TaskError>;
}

/// Every output is the value of the task.
pub(crate) enum Infallible {}

/// An output of `Err(..)` fails the task.
pub(crate) enum Fallible {}

impl<O> Finish<O> for Infallible {
    type Value = O;

    #[inline]
    fn finish(output: O, _: TaskId) -> Result<O, TaskError> {
        Ok(output)
    }
}

impl<R, E> Finish<Result<R, E>> for Fallible
where
    E: 'static + Error + Send + Sync,
{
    type Value = R;

    #[inline]
    fn finish(output: Result<R, E>, task: TaskId) -> Result<R, TaskError> {
        output.map_err(|error| TaskError::Accessor {
            task,
            error: Arc::new(error),
        })
    }
}

/// An accessor bound to the resource it accesses.
pub(crate) struct Job<T, A, M, O>
where
    A: Accessor<T, M>,
    O: Finish<A::Output>,
{
    task: Arc<Task<O::Value>>,
    accessor: Mutex<Option<A>>,
    shared: Arc<Shared<T>>,
    /// Prerequisites which haven't settled, plus one held by the launcher
    /// until every prerequisite has been subscribed to.
    remaining: AtomicUsize,
    _marker: PhantomData<fn() -> (M, O)>,
}

impl<T, A, M, O> Job<T, A, M, O>
where
    T: 'static + Send + Sync,
    A: 'static + Send + Accessor<T, M>,
    M: 'static,
    O: 'static + Finish<A::Output>,
    O::Value: 'static + Send + Sync,
{
    pub(crate) fn new(shared: Arc<Shared<T>>, accessor: A) -> (Arc<Self>, Handle<O::Value>) {
        let task = Arc::new(Task::new(<A as Accessor<T, M>>::MODE));
        let handle = Handle::new(task.clone());

        let job = Arc::new(Job {
            task,
            accessor: Mutex::new(Some(accessor)),
            shared,
            remaining: AtomicUsize::new(1),
            _marker: PhantomData,
        });

        (job, handle)
    }

    fn countdown(self: Arc<Self>) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 && !self.task.is_settled() {
            let shared = self.shared.clone();
            shared.offer(self);
        }
    }

    /// Fail the job without running it because a prerequisite failed.
    ///
    /// The dependents of the job are left for the caller to notify, so that
    /// failures spread through long chains without recursing.
    fn fail(&self, prerequisite: TaskId, error: &TaskError) -> Option<Settled> {
        let id = self.task.header.id();

        // Point at the error which started the failure, so that errors don't
        // nest as deep as the chain they spread through.
        let source = match error {
            TaskError::Dependency { source, .. } => source.clone(),
            error => Arc::new(error.clone()),
        };

        let error = TaskError::Dependency {
            task: id,
            prerequisite,
            source,
        };

        let settled = self.task.settle(Err(error))?;
        tracing::warn!(task = %id, %prerequisite, "prerequisite failed, not running task");
        drop(self.accessor.lock().take());
        self.shared.pool.finished();
        Some(settled)
    }
}

impl<T, A, M, O> Runnable for Job<T, A, M, O>
where
    T: 'static + Send + Sync,
    A: 'static + Send + Accessor<T, M>,
    M: 'static,
    O: 'static + Finish<A::Output>,
    O::Value: 'static + Send + Sync,
{
    fn header(&self) -> &Header {
        &self.task.header
    }

    fn run(self: Arc<Self>) {
        let header = &self.task.header;
        let id = header.id();
        let mode = header.mode();

        header.transition(TaskState::Admitted, TaskState::Running);
        tracing::trace!(task = %id, %mode, "running");

        let accessor = self.accessor.lock().take();
        let cell = &self.shared.cell;

        let outcome = match accessor {
            // Safety: the job was admitted by the coordinator with the mode of
            // the accessor, and that admission is only released below.
            Some(accessor) => match panic::catch_unwind(AssertUnwindSafe(|| unsafe {
                <A as Accessor<T, M>>::access(accessor, cell)
            })) {
                Ok(output) => {
                    let outcome = <O as Finish<A::Output>>::finish(output, id);

                    if let Err(error) = &outcome {
                        tracing::warn!(task = %id, %error, "accessor failed");
                    }

                    outcome
                }
                Err(payload) => {
                    let message = panic_message(&*payload);
                    tracing::warn!(task = %id, %message, "accessor panicked");
                    Err(TaskError::Panicked { task: id, message })
                }
            },
            None => Err(TaskError::Discarded { task: id }),
        };

        let settled = self.task.settle(outcome);
        self.shared.release(mode);
        tracing::trace!(task = %id, "settled");

        if let Some(settled) = settled {
            settled.notify();
        }

        self.shared.pool.finished();
    }

    fn launch(self: Arc<Self>, prerequisites: Vec<AnyHandle>) {
        let id = self.task.header.id();

        self.task
            .header
            .transition(TaskState::Prepared, TaskState::Pending);
        self.shared.pool.started();

        tracing::trace!(
            task = %id,
            mode = %self.task.header.mode(),
            prerequisites = prerequisites.len(),
            "launched"
        );

        for prerequisite in prerequisites {
            self.remaining.fetch_add(1, Ordering::AcqRel);
            let header = prerequisite.node.header();

            if !header.subscribe(self.clone()) {
                let error = prerequisite.node.error();

                if let Some(settled) = self
                    .clone()
                    .prerequisite_settled(header.id(), error.as_ref())
                {
                    settled.notify();
                }
            }
        }

        self.countdown();
    }

    fn discard(&self) {
        let id = self.task.header.id();
        drop(self.accessor.lock().take());

        if let Some(settled) = self.task.settle(Err(TaskError::Discarded { task: id })) {
            tracing::debug!(task = %id, "discarded before launch");
            settled.notify();
        }
    }
}

impl<T, A, M, O> Dependent for Job<T, A, M, O>
where
    T: 'static + Send + Sync,
    A: 'static + Send + Accessor<T, M>,
    M: 'static,
    O: 'static + Finish<A::Output>,
    O::Value: 'static + Send + Sync,
{
    fn prerequisite_settled(
        self: Arc<Self>,
        prerequisite: TaskId,
        error: Option<&TaskError>,
    ) -> Option<Settled> {
        let settled = match error {
            Some(error) => self.fail(prerequisite, error),
            None => None,
        };

        self.countdown();
        settled
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> Arc<str> {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        Arc::from(*message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        Arc::from(message.as_str())
    } else {
        Arc::from("Box<dyn Any>")
    }
}
