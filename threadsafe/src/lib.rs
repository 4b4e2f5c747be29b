//! [![Documentation](https://docs.rs/threadsafe/badge.svg)](https://docs.rs/threadsafe)
//! [![Crates](https://img.shields.io/crates/v/threadsafe.svg)](https://crates.io/crates/threadsafe)
//! [![Actions Status](https://github.com/udoprog/audio/workflows/Rust/badge.svg)](https://github.com/udoprog/audio/actions)
//!
//! Multiple readers or a single writer over a resource, without ever touching
//! a lock.
//!
//! The resource is moved into a [ThreadSafe] and the only way to get at it is
//! through an *accessor*: a closure taking either `&T` or `&mut T`. Which one
//! it takes decides how it's run. Any number of read-only accessors may run at
//! the same time, but a read-write accessor always runs alone.
//!
//! The blocking way to run an accessor is [sync][ThreadSafe::sync], which runs
//! it on the current thread as soon as it's admitted. It behaves like a
//! reader-writer lock, except that it's impossible to forget to take the
//! lock.
//!
//! ```rust
//! # fn main() -> anyhow::Result<()> {
//! let value = threadsafe::ThreadSafe::new(10)?;
//!
//! value.sync(|n: &mut i32| *n += 10);
//! assert_eq!(20, value.sync(|n: &i32| *n));
//!
//! value.join()?;
//! # Ok(()) }
//! ```
//!
//! # Tasks
//!
//! Accessors can also be [spawned][ThreadSafe::spawn] as tasks onto a pool of
//! worker threads. This returns a [Handle] immediately which can be used to
//! [wait][Handle::wait] for the result, or be passed as a [prerequisite]
//! of other tasks through [spawn_after][ThreadSafe::spawn_after].
//!
//! ```rust
//! # fn main() -> anyhow::Result<()> {
//! let value = threadsafe::ThreadSafe::new(0)?;
//!
//! let read1 = value.spawn(|n: &i32| *n);
//! let read2 = value.spawn(|n: &i32| *n);
//! let write = value.spawn(|n: &mut i32| *n = 42);
//! let read3 = value.spawn_after(|n: &i32| *n, &write)?;
//!
//! assert_eq!(*read1.wait()?, 0);
//! assert_eq!(*read2.wait()?, 0);
//! assert_eq!(*read3.wait()?, 42);
//! # Ok(()) }
//! ```
//!
//! Tasks are admitted in the order in which they become eligible. Once a
//! read-write task is waiting, read-only tasks arriving after it wait behind
//! it, so writers can't be starved by a steady stream of readers.
//!
//! # Failures
//!
//! A task whose accessor panics fails with [TaskError::Panicked]. Accessors
//! returning a `Result` can be spawned with [try_spawn][ThreadSafe::try_spawn],
//! in which case an `Err(..)` fails the task with [TaskError::Accessor]. Every
//! task which depends on a failed task fails with [TaskError::Dependency]
//! without being run. Launching a task which would end up depending on itself is rejected
//! with a [CycleError], see [prepare][ThreadSafe::prepare].
//!
//! [prerequisite]: Prerequisites

use std::error::Error;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread;

#[cfg(test)]
mod tests;

mod access;
pub use self::access::{Accessor, Mode, Read, Write};

mod cell;

mod coordinator;

mod error;
pub use self::error::{CycleError, Panicked, TaskError};

mod graph;

mod job;
use self::job::{Fallible, Finish, Infallible, Job, Runnable};

mod pool;
use self::pool::Pool;

mod prerequisites;
pub use self::prerequisites::Prerequisites;

mod shared;
use self::shared::Shared;

mod task;
pub use self::task::{get_results, AnyHandle, Handle, Results, TaskId, TaskState};

mod worker;
use self::worker::Prelude;

/// A resource which can only be accessed through accessors.
///
/// See the [crate] documentation for more.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
///
/// # fn main() -> anyhow::Result<()> {
/// let value = Arc::new(threadsafe::ThreadSafe::new(0u32)?);
/// let mut threads = Vec::new();
///
/// for n in 0..10 {
///     let value = value.clone();
///
///     threads.push(std::thread::spawn(move || {
///         value.sync(move |v: &mut u32| *v += n)
///     }));
/// }
///
/// for t in threads {
///     t.join().unwrap();
/// }
///
/// assert_eq!(value.sync(|v: &u32| *v), (0..10).sum());
/// # Ok(()) }
/// ```
#[must_use = "The value should be joined with ThreadSafe::join once no longer used, \
    otherwise it will block while being dropped."]
pub struct ThreadSafe<T> {
    shared: Arc<Shared<T>>,
    /// The worker threads executing tasks.
    workers: Vec<thread::JoinHandle<()>>,
}

impl<T> ThreadSafe<T> {
    /// Wrap the given value using the default [Builder].
    pub fn new(value: T) -> io::Result<Self> {
        Builder::new().build(value)
    }

    /// Construct the wrapped value with `ctor` using the default [Builder].
    ///
    /// This is useful for resources which are only ever meant to live inside
    /// of a [ThreadSafe].
    pub fn with<F>(ctor: F) -> io::Result<Self>
    where
        F: FnOnce() -> T,
    {
        Builder::new().build_with(ctor)
    }

    /// The number of worker threads running tasks.
    pub fn worker_threads(&self) -> usize {
        self.workers.len()
    }

    /// Run the given accessor once it's safe to do so and return its result.
    ///
    /// The accessor runs on the current thread, which blocks until it's
    /// admitted. A panic in the accessor is propagated to the caller once the
    /// admission has been released.
    ///
    /// Calling this from inside of an accessor of the same value deadlocks.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(vec![1, 2, 3])?;
    ///
    /// value.sync(|v: &mut Vec<u32>| v.push(4));
    /// let sum = value.sync(|v: &Vec<u32>| v.iter().sum::<u32>());
    /// assert_eq!(sum, 10);
    /// # Ok(()) }
    /// ```
    pub fn sync<A, M>(&self, accessor: A) -> A::Output
    where
        A: Accessor<T, M>,
    {
        let _admission = self.shared.admit(<A as Accessor<T, M>>::MODE);
        // Safety: the admission is held for the mode of the accessor until it
        // is dropped, which also happens if the accessor panics.
        unsafe { <A as Accessor<T, M>>::access(accessor, &self.shared.cell) }
    }

    /// Run the given read-only accessor, see [sync][ThreadSafe::sync].
    ///
    /// Unlike `sync` the parameter of the closure doesn't need to be
    /// annotated.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(String::from("hello"))?;
    /// assert_eq!(value.read(|s| s.len()), 5);
    /// # Ok(()) }
    /// ```
    pub fn read<F, R>(&self, accessor: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.sync::<_, Read>(accessor)
    }

    /// Run the given read-write accessor, see [sync][ThreadSafe::sync].
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(String::from("hello"))?;
    /// value.write(|s| s.push_str(" world"));
    /// assert_eq!(value.read(|s| s.clone()), "hello world");
    /// # Ok(()) }
    /// ```
    pub fn write<F, R>(&self, accessor: F) -> R
    where
        F: FnOnce(&mut T) -> R,
    {
        self.sync::<_, Write>(accessor)
    }

    /// Join the worker threads.
    ///
    /// Will block until every task that has been spawned has settled. This
    /// includes tasks still waiting for prerequisites, so a task waiting on a
    /// prepared task of another [ThreadSafe] keeps this from returning until
    /// that task is launched or dropped.
    ///
    /// This is the clean way to shut down, the alternative is to let the
    /// [ThreadSafe] drop and this will be performed in the drop handler
    /// instead.
    pub fn join(mut self) -> Result<(), Panicked> {
        self.inner_join()
    }

    fn inner_join(&mut self) -> Result<(), Panicked> {
        if self.workers.is_empty() {
            return Ok(());
        }

        self.shared.pool.shutdown();
        tracing::debug!(workers = self.workers.len(), "joining workers");

        let mut result = Ok(());

        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                result = Err(Panicked(()));
            }
        }

        result
    }
}

impl<T> ThreadSafe<T>
where
    T: 'static + Send + Sync,
{
    /// Spawn the given accessor as a task and return a handle to it.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(1)?;
    ///
    /// let write = value.spawn(|n: &mut i32| {
    ///     *n *= 2;
    ///     *n
    /// });
    ///
    /// assert_eq!(*write.wait()?, 2);
    /// # Ok(()) }
    /// ```
    pub fn spawn<A, M>(&self, accessor: A) -> Handle<A::Output>
    where
        A: 'static + Send + Accessor<T, M>,
        A::Output: 'static + Send + Sync,
        M: 'static,
    {
        let (job, handle) = Job::<T, A, M, Infallible>::new(self.shared.clone(), accessor);
        job.launch(Vec::new());
        handle
    }

    /// Spawn a fallible accessor as a task.
    ///
    /// Unlike [spawn][ThreadSafe::spawn], an accessor returning `Err(..)`
    /// fails the task with [TaskError::Accessor], and with it every task
    /// depending on it. The value of a successful task is what's inside of
    /// `Ok(..)`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use threadsafe::{TaskError, TaskState};
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(String::from("forty-two"))?;
    ///
    /// let parsed = value.try_spawn(|s: &String| s.parse::<u32>());
    /// let doubled = value.spawn_after(|s: &String| s.len() * 2, &parsed)?;
    ///
    /// assert!(matches!(parsed.wait(), Err(TaskError::Accessor { .. })));
    /// assert!(matches!(doubled.wait(), Err(TaskError::Dependency { .. })));
    /// assert_eq!(doubled.state(), TaskState::Failed);
    /// # Ok(()) }
    /// ```
    pub fn try_spawn<A, M, R, E>(&self, accessor: A) -> Handle<R>
    where
        A: 'static + Send + Accessor<T, M, Output = Result<R, E>>,
        R: 'static + Send + Sync,
        E: 'static + Error + Send + Sync,
        M: 'static,
    {
        let (job, handle) = Job::<T, A, M, Fallible>::new(self.shared.clone(), accessor);
        job.launch(Vec::new());
        handle
    }

    /// Spawn the given accessor as a task which only becomes eligible to run
    /// once all of its `prerequisites` have settled.
    ///
    /// If any prerequisite fails, the task fails with
    /// [TaskError::Dependency] without running.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(0)?;
    ///
    /// let a = value.spawn(|n: &mut i32| *n += 1);
    /// let b = value.spawn(|n: &mut i32| *n += 2);
    /// let sum = value.spawn_after(|n: &i32| *n, [&a, &b])?;
    ///
    /// assert_eq!(*sum.wait()?, 3);
    /// # Ok(()) }
    /// ```
    pub fn spawn_after<A, M, P>(
        &self,
        accessor: A,
        prerequisites: P,
    ) -> Result<Handle<A::Output>, CycleError>
    where
        A: 'static + Send + Accessor<T, M>,
        A::Output: 'static + Send + Sync,
        M: 'static,
        P: Prerequisites,
    {
        match self.prepare(accessor).launch(prerequisites) {
            Ok(handle) => Ok(handle),
            Err(rejected) => Err(rejected.error),
        }
    }

    /// Spawn a fallible accessor as a task which only becomes eligible to run
    /// once all of its `prerequisites` have settled.
    ///
    /// See [try_spawn][ThreadSafe::try_spawn] and
    /// [spawn_after][ThreadSafe::spawn_after].
    pub fn try_spawn_after<A, M, R, E, P>(
        &self,
        accessor: A,
        prerequisites: P,
    ) -> Result<Handle<R>, CycleError>
    where
        A: 'static + Send + Accessor<T, M, Output = Result<R, E>>,
        R: 'static + Send + Sync,
        E: 'static + Error + Send + Sync,
        M: 'static,
        P: Prerequisites,
    {
        match self.try_prepare(accessor).launch(prerequisites) {
            Ok(handle) => Ok(handle),
            Err(rejected) => Err(rejected.error),
        }
    }

    /// Spawn a read-only accessor, see [spawn][ThreadSafe::spawn].
    pub fn spawn_read<F, R>(&self, accessor: F) -> Handle<R>
    where
        F: 'static + Send + FnOnce(&T) -> R,
        R: 'static + Send + Sync,
    {
        self.spawn::<_, Read>(accessor)
    }

    /// Spawn a read-write accessor, see [spawn][ThreadSafe::spawn].
    pub fn spawn_write<F, R>(&self, accessor: F) -> Handle<R>
    where
        F: 'static + Send + FnOnce(&mut T) -> R,
        R: 'static + Send + Sync,
    {
        self.spawn::<_, Write>(accessor)
    }

    /// Bind the given accessor to a task without launching it.
    ///
    /// The returned [Prepared] task hands out its [Handle] before it's
    /// launched, so it can be used as a prerequisite of tasks launched ahead
    /// of it. This is the only way a task can be made to depend on itself,
    /// which is rejected when it's launched.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::ThreadSafe::new(0)?;
    ///
    /// let first = value.prepare(|n: &mut i32| *n = 1);
    /// let second = value.spawn_after(|n: &mut i32| *n *= 10, first.handle())?;
    ///
    /// // `first` can't wait for `second`, since `second` waits for `first`.
    /// let first = match first.launch(&second) {
    ///     Ok(..) => panic!("expected a cycle"),
    ///     Err(rejected) => rejected.into_prepared(),
    /// };
    ///
    /// assert!(first.launch(()).is_ok());
    /// second.wait()?;
    /// assert_eq!(value.sync(|n: &i32| *n), 10);
    /// # Ok(()) }
    /// ```
    pub fn prepare<A, M>(&self, accessor: A) -> Prepared<'_, A::Output>
    where
        A: 'static + Send + Accessor<T, M>,
        A::Output: 'static + Send + Sync,
        M: 'static,
    {
        self.bind::<A, M, Infallible>(accessor)
    }

    /// Bind a fallible accessor to a task without launching it.
    ///
    /// See [try_spawn][ThreadSafe::try_spawn] and
    /// [prepare][ThreadSafe::prepare].
    pub fn try_prepare<A, M, R, E>(&self, accessor: A) -> Prepared<'_, R>
    where
        A: 'static + Send + Accessor<T, M, Output = Result<R, E>>,
        R: 'static + Send + Sync,
        E: 'static + Error + Send + Sync,
        M: 'static,
    {
        self.bind::<A, M, Fallible>(accessor)
    }

    fn bind<A, M, O>(&self, accessor: A) -> Prepared<'_, O::Value>
    where
        A: 'static + Send + Accessor<T, M>,
        M: 'static,
        O: 'static + Finish<A::Output>,
        O::Value: 'static + Send + Sync,
    {
        let (job, handle) = Job::<T, A, M, O>::new(self.shared.clone(), accessor);
        let job: Arc<dyn Runnable> = job;

        Prepared {
            job: Some(job),
            handle,
            _owner: PhantomData,
        }
    }
}

impl<T> Drop for ThreadSafe<T> {
    fn drop(&mut self) {
        // Note: we can safely ignore the result, because it will only error in
        // case a worker has panicked outside of an accessor.
        let _ = self.inner_join();
    }
}

impl<T> fmt::Debug for ThreadSafe<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadSafe")
            .field("worker_threads", &self.workers.len())
            .finish_non_exhaustive()
    }
}

/// A task which has been bound to an accessor but not launched.
///
/// Constructed through [ThreadSafe::prepare]. Dropping it without launching
/// fails the task with [TaskError::Discarded].
pub struct Prepared<'a, R> {
    job: Option<Arc<dyn Runnable>>,
    handle: Handle<R>,
    _owner: PhantomData<&'a ()>,
}

impl<'a, R> Prepared<'a, R>
where
    R: 'static + Send + Sync,
{
    /// The identifier of the task.
    pub fn id(&self) -> TaskId {
        self.handle.id()
    }

    /// Get a handle to the task, which can be used as a prerequisite before
    /// the task is launched.
    pub fn handle(&self) -> Handle<R> {
        self.handle.clone()
    }

    /// Launch the task once every one of the given prerequisites has settled.
    ///
    /// Fails if this task is itself among the prerequisites, directly or
    /// through other tasks. The task is handed back in that case so that it
    /// can be launched with something else.
    pub fn launch<P>(mut self, prerequisites: P) -> Result<Handle<R>, Rejected<'a, R>>
    where
        P: Prerequisites,
    {
        let mut gathered = Vec::new();
        prerequisites.gather(&mut gathered);

        if !gathered.is_empty() {
            let ids = gathered.iter().map(AnyHandle::id).collect::<Vec<_>>();

            if let Err(error) = graph::link(self.id(), &ids) {
                tracing::debug!(task = %self.id(), %error, "rejected launch");
                return Err(Rejected {
                    prepared: self,
                    error,
                });
            }

            self.handle.task.header.mark_linked();
        }

        if let Some(job) = self.job.take() {
            job.launch(gathered);
        }

        Ok(self.handle.clone())
    }
}

impl<R> Drop for Prepared<'_, R> {
    fn drop(&mut self) {
        if let Some(job) = self.job.take() {
            job.discard();
        }
    }
}

impl<R> fmt::Debug for Prepared<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Prepared")
            .field("id", &self.handle.id())
            .field("mode", &self.handle.mode())
            .finish()
    }
}

/// A launch which was rejected since it would have introduced a cycle.
pub struct Rejected<'a, R> {
    prepared: Prepared<'a, R>,
    error: CycleError,
}

impl<'a, R> Rejected<'a, R> {
    /// The reason the launch was rejected.
    pub fn error(&self) -> &CycleError {
        &self.error
    }

    /// Take back the task which was not launched.
    pub fn into_prepared(self) -> Prepared<'a, R> {
        self.prepared
    }
}

impl<R> fmt::Debug for Rejected<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rejected")
            .field("prepared", &self.prepared)
            .field("error", &self.error)
            .finish()
    }
}

impl<R> fmt::Display for Rejected<'_, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)
    }
}

impl<R> std::error::Error for Rejected<'_, R> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// The builder for a [ThreadSafe] which can be configured a bit more.
pub struct Builder {
    worker_threads: Option<usize>,
    thread_name: String,
    prelude: Option<Arc<Prelude>>,
}

impl Builder {
    /// Construct a new builder.
    pub fn new() -> Self {
        Self {
            worker_threads: None,
            thread_name: String::from("threadsafe-worker"),
            prelude: None,
        }
    }

    /// Set the number of worker threads running tasks. Defaults to the
    /// available parallelism of the system.
    ///
    /// Values less than one are raised to one.
    pub fn worker_threads(self, worker_threads: usize) -> Self {
        Self {
            worker_threads: Some(worker_threads.max(1)),
            ..self
        }
    }

    /// Set the name prefix of the worker threads. Each worker gets its index
    /// appended.
    pub fn thread_name<S>(self, thread_name: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            thread_name: thread_name.into(),
            ..self
        }
    }

    /// Configure a prelude to each worker thread. This is code that will run
    /// just as the thread is spinning up.
    ///
    /// # Examples
    ///
    /// ```rust
    /// fn say_hello(main_thread: std::thread::ThreadId) {
    ///     println!("Hello from the prelude!");
    ///     assert_ne!(main_thread, std::thread::current().id());
    /// }
    ///
    /// # fn main() -> anyhow::Result<()> {
    /// let main_thread = std::thread::current().id();
    ///
    /// let value = threadsafe::Builder::new()
    ///     .prelude(move || say_hello(main_thread))
    ///     .build(0)?;
    /// # Ok(()) }
    /// ```
    pub fn prelude<P>(self, prelude: P) -> Self
    where
        P: Fn() + Send + Sync + 'static,
    {
        Self {
            prelude: Some(Arc::new(prelude)),
            ..self
        }
    }

    /// Construct a [ThreadSafe] wrapping `value`.
    ///
    /// # Examples
    ///
    /// ```rust
    /// # fn main() -> anyhow::Result<()> {
    /// let value = threadsafe::Builder::new().worker_threads(2).build(0)?;
    /// assert_eq!(value.worker_threads(), 2);
    /// value.join()?;
    /// # Ok(()) }
    /// ```
    pub fn build<T>(self, value: T) -> io::Result<ThreadSafe<T>> {
        self.build_with(move || value)
    }

    /// Construct a [ThreadSafe] wrapping the value produced by `ctor`.
    pub fn build_with<T, F>(self, ctor: F) -> io::Result<ThreadSafe<T>>
    where
        F: FnOnce() -> T,
    {
        let worker_threads = match self.worker_threads {
            Some(worker_threads) => worker_threads,
            None => thread::available_parallelism().map_or(1, |n| n.get()),
        };

        let pool = Arc::new(Pool::new());
        let mut workers = Vec::with_capacity(worker_threads);

        for index in 0..worker_threads {
            let pool2 = pool.clone();
            let prelude = self.prelude.clone();

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", self.thread_name, index))
                .spawn(move || worker::run(index, prelude, pool2));

            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => {
                    pool.shutdown();

                    for worker in workers {
                        let _ = worker.join();
                    }

                    return Err(e);
                }
            }
        }

        tracing::debug!(worker_threads, "started workers");

        Ok(ThreadSafe {
            shared: Arc::new(Shared::new(ctor(), pool)),
            workers,
        })
    }
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}
