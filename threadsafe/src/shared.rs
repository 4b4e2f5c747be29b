use crate::access::Mode;
use crate::cell::ResourceCell;
use crate::coordinator::Coordinator;
use crate::job::Runnable;
use crate::pool::Pool;
use crate::task::TaskState;
use std::sync::Arc;

/// State shared between a [ThreadSafe][crate::ThreadSafe] and the jobs
/// launched through it.
pub(crate) struct Shared<T> {
    pub(crate) cell: ResourceCell<T>,
    pub(crate) coordinator: Coordinator<Arc<dyn Runnable>>,
    pub(crate) pool: Arc<Pool>,
}

impl<T> Shared<T> {
    pub(crate) fn new(value: T, pool: Arc<Pool>) -> Self {
        Self {
            cell: ResourceCell::new(value),
            coordinator: Coordinator::new(),
            pool,
        }
    }

    /// Block the current thread until admitted with the given mode.
    pub(crate) fn admit(&self, mode: Mode) -> Admission<'_, T> {
        self.coordinator.admit(mode);
        Admission { shared: self, mode }
    }

    /// Offer an eligible job for admission.
    pub(crate) fn offer(&self, job: Arc<dyn Runnable>) {
        let mode = job.header().mode();

        if let Some(job) = self.coordinator.offer(mode, job) {
            self.dispatch(job);
        }
    }

    /// Release an admission and dispatch whatever it let through.
    pub(crate) fn release(&self, mode: Mode) {
        for job in self.coordinator.release(mode) {
            self.dispatch(job);
        }
    }

    fn dispatch(&self, job: Arc<dyn Runnable>) {
        let header = job.header();
        header.transition(TaskState::Pending, TaskState::Admitted);
        tracing::trace!(task = %header.id(), mode = %header.mode(), "admitted");
        self.pool.push(job);
    }
}

/// An admission held by a blocking caller. Released on drop, including while
/// unwinding from a panicking accessor.
pub(crate) struct Admission<'a, T> {
    shared: &'a Shared<T>,
    mode: Mode,
}

impl<T> Drop for Admission<'_, T> {
    fn drop(&mut self) {
        self.shared.release(self.mode);
    }
}
