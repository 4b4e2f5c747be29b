//! Admission control implementing "multiple readers or a single writer".
//!
//! Requests are served strictly in arrival order. Any number of read-only
//! requests at the head of the queue are admitted together, but as soon as a
//! read-write request is queued every request behind it, readers included,
//! waits until it has been admitted and released. This keeps writers from
//! starving under a continuous stream of readers.

use crate::access::Mode;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;

/// Admission state as seen at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Occupancy {
    pub(crate) readers: usize,
    pub(crate) writer: bool,
    pub(crate) queued: usize,
}

/// Coordinates admissions for blocking callers and deferred jobs `J`.
///
/// Blocking callers park on a condition variable until admitted. Deferred jobs
/// are never waited for: they're handed back to the caller of
/// [offer][Coordinator::offer] or [release][Coordinator::release] once they
/// are admitted, and it's up to the caller to dispatch them.
pub(crate) struct Coordinator<J> {
    state: Mutex<State<J>>,
    granted: Condvar,
}

struct State<J> {
    readers: usize,
    writer: bool,
    queue: VecDeque<Request<J>>,
    next_ticket: u64,
    /// Tickets of blocking callers which have been admitted but not yet woken
    /// up.
    granted: Vec<u64>,
}

struct Request<J> {
    mode: Mode,
    waiter: Waiter<J>,
}

enum Waiter<J> {
    Blocking(u64),
    Deferred(J),
}

impl<J> State<J> {
    fn is_compatible(&self, mode: Mode) -> bool {
        match mode {
            Mode::ReadOnly => !self.writer,
            Mode::ReadWrite => !self.writer && self.readers == 0,
        }
    }

    fn grant(&mut self, mode: Mode) {
        match mode {
            Mode::ReadOnly => self.readers += 1,
            Mode::ReadWrite => self.writer = true,
        }
    }

    fn revoke(&mut self, mode: Mode) {
        match mode {
            Mode::ReadOnly => {
                debug_assert!(self.readers > 0, "released a reader which was never admitted");
                self.readers = self.readers.saturating_sub(1);
            }
            Mode::ReadWrite => {
                debug_assert!(self.writer, "released a writer which was never admitted");
                self.writer = false;
            }
        }
    }

    /// Admit requests from the head of the queue for as long as they're
    /// compatible. Returns `true` if a blocking caller was admitted.
    fn drain(&mut self, admitted: &mut Vec<J>) -> bool {
        let mut woke = false;

        loop {
            let mode = match self.queue.front() {
                Some(request) => request.mode,
                None => break,
            };

            if !self.is_compatible(mode) {
                break;
            }

            let request = match self.queue.pop_front() {
                Some(request) => request,
                None => break,
            };

            self.grant(mode);

            match request.waiter {
                Waiter::Blocking(ticket) => {
                    self.granted.push(ticket);
                    woke = true;
                }
                Waiter::Deferred(job) => {
                    admitted.push(job);
                }
            }
        }

        woke
    }
}

impl<J> Coordinator<J> {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                readers: 0,
                writer: false,
                queue: VecDeque::new(),
                next_ticket: 0,
                granted: Vec::new(),
            }),
            granted: Condvar::new(),
        }
    }

    /// Block the current thread until it's admitted with the given mode.
    ///
    /// Every call must be paired with a call to
    /// [release][Coordinator::release] using the same mode.
    pub(crate) fn admit(&self, mode: Mode) {
        let mut state = self.state.lock();

        if state.queue.is_empty() && state.is_compatible(mode) {
            state.grant(mode);
            return;
        }

        let ticket = state.next_ticket;
        state.next_ticket = state.next_ticket.wrapping_add(1);

        // NB: the head of the queue is never admissible while the lock is
        // released, so pushing to the back can't make anything new admissible.
        state.queue.push_back(Request {
            mode,
            waiter: Waiter::Blocking(ticket),
        });

        loop {
            if let Some(index) = state.granted.iter().position(|t| *t == ticket) {
                state.granted.swap_remove(index);
                return;
            }

            self.granted.wait(&mut state);
        }
    }

    /// Offer a deferred job for admission.
    ///
    /// If it can be admitted immediately it's handed back, otherwise it's
    /// queued and will eventually be returned from a call to
    /// [release][Coordinator::release].
    pub(crate) fn offer(&self, mode: Mode, job: J) -> Option<J> {
        let mut state = self.state.lock();

        if state.queue.is_empty() && state.is_compatible(mode) {
            state.grant(mode);
            return Some(job);
        }

        state.queue.push_back(Request {
            mode,
            waiter: Waiter::Deferred(job),
        });

        None
    }

    /// Release an admission previously granted with the given mode.
    ///
    /// Returns deferred jobs which were admitted as a result.
    pub(crate) fn release(&self, mode: Mode) -> Vec<J> {
        let mut admitted = Vec::new();

        let woke = {
            let mut state = self.state.lock();
            state.revoke(mode);
            state.drain(&mut admitted)
        };

        if woke {
            self.granted.notify_all();
        }

        admitted
    }

    /// Take a snapshot of the current admission state.
    pub(crate) fn occupancy(&self) -> Occupancy {
        let state = self.state.lock();

        Occupancy {
            readers: state.readers,
            writer: state.writer,
            queued: state.queue.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Coordinator, Occupancy};
    use crate::access::Mode::{ReadOnly, ReadWrite};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn readers_are_admitted_together() {
        let c = Coordinator::new();
        assert_eq!(c.offer(ReadOnly, 1), Some(1));
        assert_eq!(c.offer(ReadOnly, 2), Some(2));
        assert_eq!(
            c.occupancy(),
            Occupancy {
                readers: 2,
                writer: false,
                queued: 0
            }
        );
    }

    #[test]
    fn writer_waits_for_readers_and_blocks_new_readers() {
        let c = Coordinator::new();
        assert_eq!(c.offer(ReadOnly, 1), Some(1));
        assert_eq!(c.offer(ReadWrite, 2), None);
        // Arrives after the writer, so it has to queue behind it.
        assert_eq!(c.offer(ReadOnly, 3), None);

        assert_eq!(c.release(ReadOnly), vec![2]);
        assert!(c.occupancy().writer);
        assert_eq!(c.release(ReadWrite), vec![3]);
        assert_eq!(c.occupancy().readers, 1);
    }

    #[test]
    fn writers_are_admitted_in_order() {
        let c = Coordinator::new();
        assert_eq!(c.offer(ReadWrite, 1), Some(1));
        assert_eq!(c.offer(ReadWrite, 2), None);
        assert_eq!(c.offer(ReadWrite, 3), None);

        assert_eq!(c.release(ReadWrite), vec![2]);
        assert_eq!(c.release(ReadWrite), vec![3]);
        assert_eq!(c.release(ReadWrite), Vec::<u32>::new());
    }

    #[test]
    fn consecutive_readers_are_released_as_a_batch() {
        let c = Coordinator::new();
        assert_eq!(c.offer(ReadWrite, 1), Some(1));
        assert_eq!(c.offer(ReadOnly, 2), None);
        assert_eq!(c.offer(ReadOnly, 3), None);
        assert_eq!(c.offer(ReadWrite, 4), None);
        assert_eq!(c.offer(ReadOnly, 5), None);

        assert_eq!(c.release(ReadWrite), vec![2, 3]);
        assert!(c.release(ReadOnly).is_empty());
        assert_eq!(c.release(ReadOnly), vec![4]);
        assert_eq!(c.release(ReadWrite), vec![5]);
    }

    #[test]
    fn blocking_reader_waits_for_writer() {
        let c = Arc::new(Coordinator::<()>::new());
        c.admit(ReadWrite);

        let admitted = Arc::new(AtomicBool::new(false));

        let t = {
            let c = c.clone();
            let admitted = admitted.clone();

            thread::spawn(move || {
                c.admit(ReadOnly);
                admitted.store(true, Ordering::SeqCst);
                c.release(ReadOnly);
            })
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!admitted.load(Ordering::SeqCst));
        assert_eq!(c.occupancy().queued, 1);

        c.release(ReadWrite);
        t.join().unwrap();

        assert!(admitted.load(Ordering::SeqCst));
        assert_eq!(
            c.occupancy(),
            Occupancy {
                readers: 0,
                writer: false,
                queued: 0
            }
        );
    }

    #[test]
    fn blocking_and_deferred_share_one_queue() {
        let c = Arc::new(Coordinator::new());
        assert_eq!(c.offer(ReadOnly, 1), Some(1));

        let t = {
            let c = c.clone();
            thread::spawn(move || {
                c.admit(ReadWrite);
                c.release(ReadWrite)
            })
        };

        while c.occupancy().queued == 0 {
            thread::yield_now();
        }

        // Queued behind the blocking writer.
        assert_eq!(c.offer(ReadOnly, 2), None);
        assert!(c.release(ReadOnly).is_empty());

        // The blocking writer hands the queued reader back on release.
        assert_eq!(t.join().unwrap(), vec![2]);
    }
}
