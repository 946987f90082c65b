// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Counting Semaphore
//!
//! A semaphore built from a [`WaitQueue`] of thread handles and the
//! scheduler's block/unblock primitives.
//!
//! # Design
//!
//! - **Never negative**: a `down` that would take the count below zero
//!   blocks the caller first and decrements only once a unit is available
//! - **FIFO wake**: each `up` wakes at most one waiter, the oldest
//! - **Gated**: the check-and-mutate sequences run with preemption
//!   delivery disabled
//!
//! Waiters re-check the count after waking, so a unit taken by someone
//! else in between sends the waiter back to the tail of the queue. A
//! handle appears in the wait queue at most once.
//!
//! # Usage
//!
//! ```ignore
//! let sem = Rc::new(Semaphore::new(0));
//! let peer = sem.clone();
//! uthread::spawn(move || peer.up().unwrap())?;
//! sem.down()?;
//! ```

use core::cell::{Cell, RefCell};
use core::fmt;

use crate::err::{Error, Result};
use crate::preempt;
use crate::sched;
use crate::sync::WaitQueue;
use crate::thread::ThreadId;

/// ============================================================================
/// Semaphore
/// ============================================================================

/// Counting semaphore for green threads
///
/// Share it between threads with `Rc`.
pub struct Semaphore {
    /// Available units
    count: Cell<usize>,

    /// Threads blocked in `down`, oldest first
    waiters: RefCell<WaitQueue<ThreadId>>,
}

impl Semaphore {
    /// Create a semaphore holding `count` units
    ///
    /// Negative counts are clamped to zero.
    pub fn new(count: isize) -> Self {
        Self {
            count: Cell::new(count.max(0) as usize),
            waiters: RefCell::new(WaitQueue::new()),
        }
    }

    /// Destroy the semaphore
    ///
    /// # Returns
    ///
    /// `Err((self, Error::SemaphoreBusy))` while threads are still waiting;
    /// the semaphore is handed back untouched.
    pub fn destroy(self) -> core::result::Result<(), (Self, Error)> {
        let waiters = self.waiters();
        if waiters > 0 {
            return Err((self, Error::SemaphoreBusy { waiters }));
        }
        Ok(())
    }

    /// Take one unit, blocking while none is available
    ///
    /// # Returns
    ///
    /// `Error::NoRuntime` if the caller would have to block outside a green
    /// thread.
    pub fn down(&self) -> Result<()> {
        {
            let _gate = preempt::disable();

            while self.count.get() == 0 {
                let me = sched::current()?;
                self.waiters.borrow_mut().enqueue(me);

                let blocked = sched::block();

                // Still queued if someone other than `up` woke us
                let _ = self.waiters.borrow_mut().delete(&me);
                blocked?;
            }

            self.count.set(self.count.get() - 1);
        }

        sched::preempt_point();
        Ok(())
    }

    /// Take one unit if one is available, without blocking
    pub fn try_down(&self) -> bool {
        let _gate = preempt::disable();

        match self.count.get() {
            0 => false,
            n => {
                self.count.set(n - 1);
                true
            }
        }
    }

    /// Release one unit and wake the oldest waiter, if any
    ///
    /// Waiters that cannot be woken, such as threads abandoned by an
    /// earlier run, are dropped from the queue and the next one is tried.
    pub fn up(&self) -> Result<()> {
        {
            let _gate = preempt::disable();
            let mut waiters = self.waiters.borrow_mut();

            while let Ok(id) = waiters.dequeue() {
                match sched::unblock(id) {
                    Ok(()) | Err(Error::AlreadyQueued(_)) => {
                        log::debug!("Semaphore wake: tid={} count={}", id, self.count.get() + 1);
                        break;
                    }
                    Err(err) => log::warn!("Semaphore dropped stale waiter: tid={} ({})", id, err),
                }
            }

            self.count.set(self.count.get() + 1);
        }

        sched::preempt_point();
        Ok(())
    }

    /// Units currently available
    pub fn value(&self) -> usize {
        self.count.get()
    }

    /// Threads currently blocked in `down`
    pub fn waiters(&self) -> usize {
        self.waiters.borrow().len()
    }
}

impl Default for Semaphore {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        let waiters = self.waiters.get_mut().len();
        if waiters > 0 {
            log::warn!("Semaphore dropped with {} waiter(s)", waiters);
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("count", &self.count.get())
            .field("waiters", &*self.waiters.borrow())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RuntimeConfig;
    use std::rc::Rc;

    fn small() -> RuntimeConfig {
        RuntimeConfig::default().with_stack_size(64 * 1024)
    }

    #[test]
    fn test_negative_count_clamped() {
        assert_eq!(Semaphore::new(-5).value(), 0);
        assert_eq!(Semaphore::new(3).value(), 3);
    }

    #[test]
    fn test_available_units_need_no_runtime() {
        let sem = Semaphore::new(2);
        sem.down().unwrap();
        sem.down().unwrap();
        assert_eq!(sem.value(), 0);
        assert!(!sem.try_down());

        sem.up().unwrap();
        assert!(sem.try_down());
    }

    #[test]
    fn test_down_outside_runtime_fails_cleanly() {
        let sem = Semaphore::new(0);
        assert!(matches!(sem.down(), Err(Error::NoRuntime)));
        assert_eq!(sem.waiters(), 0);
        assert!(sem.destroy().is_ok());
    }

    #[test]
    fn test_n_downs_then_block() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sem = Rc::new(Semaphore::new(2));

        let (l, s) = (log.clone(), sem.clone());
        let stats = sched::run_with(small(), false, move || {
            let (l2, s2) = (l.clone(), s.clone());
            sched::spawn(move || {
                for i in 0..3 {
                    s2.down().unwrap();
                    l2.borrow_mut().push(format!("got {}", i));
                }
            })
            .unwrap();

            sched::yield_now().unwrap();
            l.borrow_mut().push("up".to_string());
            s.up().unwrap();
        })
        .unwrap();

        assert_eq!(*log.borrow(), vec!["got 0", "got 1", "up", "got 2"]);
        assert_eq!(stats.abandoned, 0);
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn test_up_wakes_one_waiter_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sem = Rc::new(Semaphore::new(0));

        let (l, s) = (log.clone(), sem.clone());
        sched::run_with(small(), false, move || {
            for name in ["a", "b", "c"] {
                let (l2, s2) = (l.clone(), s.clone());
                sched::spawn(move || {
                    s2.down().unwrap();
                    l2.borrow_mut().push(name);
                })
                .unwrap();
            }

            // Let all three block
            sched::yield_now().unwrap();
            assert_eq!(s.waiters(), 3);

            s.up().unwrap();
            sched::yield_now().unwrap();
            assert_eq!(*l.borrow(), vec!["a"]);

            s.up().unwrap();
            s.up().unwrap();
        })
        .unwrap();

        assert_eq!(*log.borrow(), vec!["a", "b", "c"]);
        assert_eq!(sem.waiters(), 0);
    }

    #[test]
    fn test_woken_outside_up_requeues_once() {
        let sem = Rc::new(Semaphore::new(0));
        let log = Rc::new(RefCell::new(Vec::new()));

        let (s, l) = (sem.clone(), log.clone());
        sched::run_with(small(), false, move || {
            let (s2, l2) = (s.clone(), l.clone());
            let waiter = sched::spawn(move || {
                s2.down().unwrap();
                l2.borrow_mut().push("got");
            })
            .unwrap();
            sched::yield_now().unwrap();

            // A bare unblock is not a unit; the waiter goes back to the queue
            sched::unblock(waiter).unwrap();
            sched::yield_now().unwrap();
            assert_eq!(s.waiters(), 1);
            assert!(l.borrow().is_empty());

            s.up().unwrap();
        })
        .unwrap();

        assert_eq!(*log.borrow(), vec!["got"]);
        assert_eq!(sem.waiters(), 0);
        assert_eq!(sem.value(), 0);
    }

    #[test]
    fn test_stale_waiters_skipped_outside_runtime() {
        let sem = Semaphore::new(0);
        let ids = Rc::new(RefCell::new(Vec::new()));

        let i = ids.clone();
        sched::run_with(small(), false, move || {
            i.borrow_mut().push(sched::current().unwrap());
        })
        .unwrap();

        sem.waiters.borrow_mut().enqueue(ids.borrow()[0]);
        sem.up().unwrap();

        assert_eq!(sem.waiters(), 0);
        assert_eq!(sem.value(), 1);
    }

    #[test]
    fn test_destroy_with_waiters_fails() {
        let sem = Rc::new(Semaphore::new(0));
        let outcome = Rc::new(Cell::new(false));

        let (s, o) = (sem.clone(), outcome.clone());
        let stats = sched::run_with(small(), false, move || {
            let s2 = s.clone();
            sched::spawn(move || {
                let _ = s2.down();
            })
            .unwrap();
            sched::yield_now().unwrap();

            // A second semaphore with a waiter queued by hand
            let busy = Semaphore::new(0);
            busy.waiters.borrow_mut().enqueue(sched::current().unwrap());
            let (busy, err) = busy.destroy().unwrap_err();
            assert!(matches!(err, Error::SemaphoreBusy { waiters: 1 }));
            busy.waiters.borrow_mut().dequeue().unwrap();
            assert!(busy.destroy().is_ok());

            o.set(s.waiters() == 1);
        })
        .unwrap();

        assert!(outcome.get());
        assert_eq!(stats.abandoned, 1);
    }
}
