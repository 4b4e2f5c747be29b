use crate::job::Runnable;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Admitted jobs waiting for a worker, and the bookkeeping needed to know when
/// the workers may shut down.
pub(crate) struct Pool {
    state: Mutex<State>,
    available: Condvar,
}

struct State {
    jobs: VecDeque<Arc<dyn Runnable>>,
    /// Jobs which have been launched but haven't settled.
    outstanding: usize,
    shutdown: bool,
}

impl Pool {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                jobs: VecDeque::new(),
                outstanding: 0,
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Hand an admitted job to the workers.
    pub(crate) fn push(&self, job: Arc<dyn Runnable>) {
        self.state.lock().jobs.push_back(job);
        self.available.notify_one();
    }

    /// Account for a job which has been launched.
    pub(crate) fn started(&self) {
        self.state.lock().outstanding += 1;
    }

    /// Account for a job which has settled.
    pub(crate) fn finished(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.outstanding = state.outstanding.saturating_sub(1);
            state.shutdown && state.outstanding == 0
        };

        if drained {
            self.available.notify_all();
        }
    }

    /// Stop the workers once every outstanding job has settled.
    pub(crate) fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.available.notify_all();
    }

    /// Wait for the next job to run.
    ///
    /// Returns `None` once the pool is shut down and drained.
    pub(crate) fn next(&self) -> Option<Arc<dyn Runnable>> {
        let mut state = self.state.lock();

        loop {
            if let Some(job) = state.jobs.pop_front() {
                return Some(job);
            }

            if state.shutdown && state.outstanding == 0 {
                return None;
            }

            self.available.wait(&mut state);
        }
    }
}
