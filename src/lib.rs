// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! uthread - User-Level Green Threads
//!
//! A single-OS-thread runtime that multiplexes any number of green threads,
//! each with its own stack, onto the thread that calls [`run`].
//!
//! # Layout
//!
//! - [`arch`]: stacks, saved contexts and the context switch
//! - [`thread`]: thread handles, states and the thread table
//! - [`sched`]: the FIFO round-robin scheduler and run loop
//! - [`preempt`]: timer-driven preemption and its delivery gate
//! - [`sync`]: wait queue and counting semaphore
//!
//! # Usage
//!
//! ```no_run
//! use std::rc::Rc;
//! use uthread::Semaphore;
//!
//! let stats = uthread::run(false, || {
//!     let sem = Rc::new(Semaphore::new(0));
//!     let peer = sem.clone();
//!     uthread::spawn(move || peer.up().unwrap()).unwrap();
//!     sem.down().unwrap();
//! })
//! .unwrap();
//!
//! assert_eq!(stats.created, 2);
//! ```
//!
//! The `thread_*` and `sem_*` functions below are a status-code interface
//! over the same runtime.

#[cfg(not(all(
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
)))]
compile_error!("uthread supports Linux on x86_64 and aarch64 only");

pub mod arch;
pub mod config;
pub mod err;
pub mod preempt;
pub mod sched;
pub mod sync;
pub mod thread;

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

// Re-exports
pub use config::RuntimeConfig;
pub use err::{status_t, Error, Result};
pub use preempt::{PreemptGuard, Preemption};
pub use sched::{
    block, current, exit, preempt_point, run, run_with, spawn, unblock, yield_now, RunStats,
};
pub use sync::{Semaphore, Visit, WaitQueue};
pub use thread::{ThreadId, ThreadState};

use err::{to_status, UT_ERR_CANCELED, UT_ERR_INVALID_ARGS, UT_OK};

/// Shared semaphore handle used by the `sem_*` functions
pub type SemHandle = Rc<Semaphore>;

/// ============================================================================
/// Status-Code Interface
/// ============================================================================

/// Create a green thread running `func(arg)`
///
/// Returns `UT_OK`, or a negative status if no runtime is active or the
/// thread cannot be allocated.
pub fn thread_create(func: fn(usize), arg: usize) -> status_t {
    to_status(spawn(move || func(arg)))
}

/// Run `func(arg)` as the first green thread until nothing is runnable
///
/// Returns `UT_OK` once the ready queue drains, `UT_ERR_TIMER` if
/// preemption cannot be set up, and `UT_ERR_CANCELED` if a green thread
/// panicked.
pub fn thread_run(preempt: bool, func: fn(usize), arg: usize) -> status_t {
    match panic::catch_unwind(AssertUnwindSafe(|| run(preempt, move || func(arg)))) {
        Ok(result) => to_status(result),
        Err(_) => UT_ERR_CANCELED,
    }
}

/// Yield to the next ready thread
///
/// Does nothing outside a runtime.
pub fn thread_yield() {
    if let Err(err) = yield_now() {
        log::trace!("thread_yield: {}", err);
    }
}

/// End the calling green thread
pub fn thread_exit() -> ! {
    exit()
}

/// Create a semaphore holding `count` units (negative counts become 0)
pub fn sem_create(count: isize) -> SemHandle {
    Rc::new(Semaphore::new(count))
}

/// Destroy the semaphore held in `slot`
///
/// Fails with `UT_ERR_INVALID_ARGS` on an empty slot and `UT_ERR_BUSY`
/// while threads wait on it; the slot is left untouched on failure. Other
/// clones of the handle stay valid.
pub fn sem_destroy(slot: &mut Option<SemHandle>) -> status_t {
    let Some(sem) = slot.as_ref() else {
        return UT_ERR_INVALID_ARGS;
    };

    let waiters = sem.waiters();
    if waiters > 0 {
        return Error::SemaphoreBusy { waiters }.status();
    }

    *slot = None;
    UT_OK
}

/// Take one unit from `sem`, blocking while none is available
pub fn sem_down(sem: Option<&Semaphore>) -> status_t {
    match sem {
        Some(sem) => to_status(sem.down()),
        None => UT_ERR_INVALID_ARGS,
    }
}

/// Release one unit to `sem`, waking its oldest waiter
pub fn sem_up(sem: Option<&Semaphore>) -> status_t {
    match sem {
        Some(sem) => to_status(sem.up()),
        None => UT_ERR_INVALID_ARGS,
    }
}

// ============================================================================
// Tests
// ============================================================================
