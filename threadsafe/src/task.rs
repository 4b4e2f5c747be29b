use crate::access::Mode;
use crate::error::TaskError;
use crate::graph;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

/// The process-unique identifier of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw numerical value of the identifier.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Bound to an accessor but not launched. See
    /// [ThreadSafe::prepare][crate::ThreadSafe::prepare].
    Prepared,
    /// Launched and waiting for prerequisites or admission.
    Pending,
    /// Admitted and waiting for a worker to pick it up.
    Admitted,
    /// The accessor is running.
    Running,
    /// The accessor ran to completion.
    Completed,
    /// The accessor panicked, returned an error, or was never run.
    Failed,
}

impl TaskState {
    /// Test if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Failed)
    }
}

/// Notified when a prerequisite settles.
pub(crate) trait Dependent: Send + Sync {
    /// Called exactly once per registration, with the error of the
    /// prerequisite if it failed.
    ///
    /// Returns the dependent itself if this made it settle, so that the caller
    /// can notify its dependents in turn.
    fn prerequisite_settled(
        self: Arc<Self>,
        prerequisite: TaskId,
        error: Option<&TaskError>,
    ) -> Option<Settled>;
}

/// The untyped part of a task.
pub(crate) struct Header {
    id: TaskId,
    mode: Mode,
    /// Set if the task has edges in the prerequisite graph.
    linked: AtomicBool,
    slot: Mutex<Slot>,
    settled: Condvar,
}

struct Slot {
    state: TaskState,
    dependents: Vec<Arc<dyn Dependent>>,
}

impl Header {
    fn new(mode: Mode) -> Self {
        Self {
            id: TaskId::next(),
            mode,
            linked: AtomicBool::new(false),
            slot: Mutex::new(Slot {
                state: TaskState::Prepared,
                dependents: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn id(&self) -> TaskId {
        self.id
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn state(&self) -> TaskState {
        self.slot.lock().state
    }

    pub(crate) fn mark_linked(&self) {
        self.linked.store(true, Ordering::Release);
    }

    /// Move from one non-terminal state to another. Returns `false` if the
    /// task was not in the `from` state.
    pub(crate) fn transition(&self, from: TaskState, to: TaskState) -> bool {
        debug_assert!(!to.is_terminal());
        let mut slot = self.slot.lock();

        if slot.state != from {
            return false;
        }

        slot.state = to;
        true
    }

    /// Register a dependent to be notified once this task settles.
    ///
    /// Returns `false` without registering if the task has already settled.
    pub(crate) fn subscribe(&self, dependent: Arc<dyn Dependent>) -> bool {
        let mut slot = self.slot.lock();

        if slot.state.is_terminal() {
            return false;
        }

        slot.dependents.push(dependent);
        true
    }

    /// Block until the task has settled.
    fn wait_settled(&self) {
        let mut slot = self.slot.lock();

        while !slot.state.is_terminal() {
            self.settled.wait(&mut slot);
        }
    }

    /// Block until the task has settled or the deadline passes. Returns `true`
    /// if the task settled.
    fn wait_settled_until(&self, deadline: Instant) -> bool {
        let mut slot = self.slot.lock();

        while !slot.state.is_terminal() {
            if self.settled.wait_until(&mut slot, deadline).timed_out() {
                return slot.state.is_terminal();
            }
        }

        true
    }

    fn settle(&self, failed: bool) -> Vec<Arc<dyn Dependent>> {
        let dependents = {
            let mut slot = self.slot.lock();

            slot.state = if failed {
                TaskState::Failed
            } else {
                TaskState::Completed
            };

            mem::take(&mut slot.dependents)
        };

        self.settled.notify_all();

        if self.linked.load(Ordering::Acquire) {
            graph::forget(self.id);
        }

        dependents
    }
}

/// A task which has settled, but whose dependents haven't been told yet.
#[must_use = "dependents must be notified"]
pub(crate) struct Settled {
    id: TaskId,
    error: Option<TaskError>,
    dependents: Vec<Arc<dyn Dependent>>,
}

impl Settled {
    /// Notify every dependent that the task settled, and the dependents of
    /// every dependent which fails as a result.
    pub(crate) fn notify(self) {
        let mut queue = VecDeque::new();
        queue.push_back(self);

        while let Some(settled) = queue.pop_front() {
            for dependent in settled.dependents {
                if let Some(next) = dependent.prerequisite_settled(settled.id, settled.error.as_ref()) {
                    queue.push_back(next);
                }
            }
        }
    }
}

/// A task producing a value of type `R`.
pub(crate) struct Task<R> {
    pub(crate) header: Header,
    outcome: OnceLock<Result<R, TaskError>>,
}

impl<R> Task<R> {
    pub(crate) fn new(mode: Mode) -> Self {
        Self {
            header: Header::new(mode),
            outcome: OnceLock::new(),
        }
    }

    /// Test if the outcome of the task has been stored.
    pub(crate) fn is_settled(&self) -> bool {
        self.outcome.get().is_some()
    }

    /// Store the outcome of the task and move it into a terminal state.
    ///
    /// Only the first call settles the task, later ones return `None`.
    pub(crate) fn settle(&self, outcome: Result<R, TaskError>) -> Option<Settled> {
        let error = outcome.as_ref().err().cloned();

        if self.outcome.set(outcome).is_err() {
            return None;
        }

        let dependents = self.header.settle(error.is_some());

        Some(Settled {
            id: self.header.id,
            error,
            dependents,
        })
    }
}

/// Type-erased access to a task.
pub(crate) trait Node: Send + Sync {
    fn header(&self) -> &Header;

    /// The error of the task if it has failed.
    fn error(&self) -> Option<TaskError>;
}

impl<R> Node for Task<R>
where
    R: Send + Sync,
{
    fn header(&self) -> &Header {
        &self.header
    }

    fn error(&self) -> Option<TaskError> {
        match self.outcome.get() {
            Some(Err(error)) => Some(error.clone()),
            _ => None,
        }
    }
}

/// A handle to a task, used to wait for its result or to make it a
/// prerequisite of other tasks.
///
/// Handles can be freely cloned and all clones refer to the same task. The
/// result of the task stays alive for as long as any handle does.
///
/// Dropping a handle does **not** cancel the task.
pub struct Handle<R> {
    pub(crate) task: Arc<Task<R>>,
}

impl<R> Handle<R> {
    pub(crate) fn new(task: Arc<Task<R>>) -> Self {
        Self { task }
    }

    /// The identifier of the task.
    pub fn id(&self) -> TaskId {
        self.task.header.id
    }

    /// The mode the task was bound with.
    pub fn mode(&self) -> Mode {
        self.task.header.mode
    }

    /// The current state of the task.
    pub fn state(&self) -> TaskState {
        self.task.header.state()
    }

    /// Test if the task has settled, without blocking.
    pub fn is_ready(&self) -> bool {
        self.task.header.state().is_terminal()
    }

    /// Block until the task has settled and access its result.
    ///
    /// Only blocks on this one task, other tasks are not forced to finish.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(String::from("hello"))?;
    ///
    /// let len = value.spawn(|s: &String| s.len());
    /// assert_eq!(*len.wait()?, 5);
    /// # Ok(()) }
    /// ```
    pub fn wait(&self) -> Result<&R, TaskError> {
        loop {
            if let Some(outcome) = self.try_wait() {
                return outcome;
            }

            self.task.header.wait_settled();
        }
    }

    /// Access the result of the task if it has settled, without blocking.
    pub fn try_wait(&self) -> Option<Result<&R, TaskError>> {
        // The outcome is stored before the state turns terminal, so the state
        // is what decides if the task is observably settled.
        if !self.is_ready() {
            return None;
        }

        let outcome = self.task.outcome.get()?;
        Some(outcome.as_ref().map_err(Clone::clone))
    }

    /// Block until the task has settled or the timeout expires.
    ///
    /// Returns `None` if the timeout expired first.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<&R, TaskError>> {
        let deadline = Instant::now() + timeout;

        loop {
            if let Some(outcome) = self.try_wait() {
                return Some(outcome);
            }

            if !self.task.header.wait_settled_until(deadline) {
                return None;
            }
        }
    }

    /// Block until the task has settled and clone its result.
    pub fn cloned(&self) -> Result<R, TaskError>
    where
        R: Clone,
    {
        self.wait().map(R::clone)
    }

    /// Erase the result type of the handle.
    pub fn erase(&self) -> AnyHandle
    where
        R: 'static + Send + Sync,
    {
        AnyHandle {
            node: self.task.clone(),
        }
    }
}

impl<R> Clone for Handle<R> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
        }
    }
}

impl<R> fmt::Debug for Handle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("id", &self.id())
            .field("mode", &self.mode())
            .field("state", &self.state())
            .finish()
    }
}

/// A handle whose result type has been erased.
///
/// Useful to store prerequisites of different result types together. See
/// [Handle::erase].
#[derive(Clone)]
pub struct AnyHandle {
    pub(crate) node: Arc<dyn Node>,
}

impl AnyHandle {
    /// The identifier of the task.
    pub fn id(&self) -> TaskId {
        self.node.header().id
    }

    /// The current state of the task.
    pub fn state(&self) -> TaskState {
        self.node.header().state()
    }

    /// Test if the task has settled, without blocking.
    pub fn is_ready(&self) -> bool {
        self.state().is_terminal()
    }

    /// Block until the task has settled, returning its error if it failed.
    pub fn wait(&self) -> Result<(), TaskError> {
        self.node.header().wait_settled();

        match self.node.error() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for AnyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyHandle")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

/// A group of handles whose results can be retrieved together.
///
/// See [get_results].
pub trait Results {
    /// The values produced by the group.
    type Output;

    /// Block until every task in the group has settled.
    fn wait_all(self) -> Result<Self::Output, TaskError>;
}

impl<'a, R> Results for &'a [Handle<R>]
where
    R: Clone,
{
    type Output = Vec<R>;

    fn wait_all(self) -> Result<Self::Output, TaskError> {
        let outcomes = self.iter().map(Handle::wait).collect::<Vec<_>>();
        outcomes.into_iter().map(|o| o.cloned()).collect()
    }
}

impl<'a, R> Results for &'a Vec<Handle<R>>
where
    R: Clone,
{
    type Output = Vec<R>;

    fn wait_all(self) -> Result<Self::Output, TaskError> {
        self.as_slice().wait_all()
    }
}

macro_rules! impl_results {
    ($($ty:ident $var:ident),*) => {
        impl<'a, $($ty,)*> Results for ($(&'a Handle<$ty>,)*)
        where
            $($ty: Clone,)*
        {
            type Output = ($($ty,)*);

            fn wait_all(self) -> Result<Self::Output, TaskError> {
                let ($($var,)*) = self;
                $(let $var = $var.wait();)*
                Ok(($($var?.clone(),)*))
            }
        }
    };
}

impl_results!(A a);
impl_results!(A a, B b);
impl_results!(A a, B b, C c);
impl_results!(A a, B b, C c, D d);
impl_results!(A a, B b, C c, D d, E e);
impl_results!(A a, B b, C c, D d, E e, F f);

/// Block until every handle in a group has settled and clone out their
/// results.
///
/// Fails with the error of the first failed task in argument order.
///
/// # Examples
///
/// ```rust
/// # fn main() -> anyhow::Result<()> {
/// let value = threadsafe::ThreadSafe::new(0)?;
///
/// let read1 = value.spawn(|v: &i32| *v);
/// let read2 = value.spawn(|v: &i32| *v);
/// let write = value.spawn(|v: &mut i32| *v = 42);
///
/// let (a, b, ()) = threadsafe::get_results((&read1, &read2, &write))?;
/// assert_eq!((a, b), (0, 0));
/// # Ok(()) }
/// ```
pub fn get_results<H>(handles: H) -> Result<H::Output, TaskError>
where
    H: Results,
{
    handles.wait_all()
}
