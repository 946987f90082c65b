// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Preemption Controller
//!
//! This module drives involuntary yields from a periodic `SIGALRM`.
//!
//! # Design
//!
//! The signal handler never touches scheduler state. It only raises a
//! process-wide "tick pending" flag; the flag is consumed at safe points
//! (`preempt_point`, the tail of semaphore operations, `yield_now`), where
//! the scheduler turns it into an ordinary yield.
//!
//! Delivery can be gated per OS thread with [`disable`], which returns a
//! [`PreemptGuard`]. Gates nest; a tick is only consumed while the depth
//! is zero. The scheduler resets the depth around every context switch so
//! each green thread resumes with the gate it had when it was suspended.
//!
//! Only one controller per process may own the timer at a time; the
//! handler and timer it replaced are restored by [`Preemption::stop`].

use core::cell::Cell;
use core::mem;
use core::ptr;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::err::{Error, Result};

/// Set by the signal handler, cleared by whoever consumes the tick
static TICK_PENDING: AtomicBool = AtomicBool::new(false);

/// Handler and timer in place before the current owner installed ours
static SAVED: Mutex<Option<Saved>> = Mutex::new(None);

thread_local! {
    /// Gate depth of the green thread running on this OS thread
    static GATE_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct Saved {
    action: libc::sigaction,
    timer: libc::itimerval,
}

extern "C" fn on_tick(_sig: libc::c_int) {
    TICK_PENDING.store(true, Ordering::Release);
}

/// ============================================================================
/// Preemption
/// ============================================================================

/// Owner of the process interval timer
#[derive(Debug, Default)]
pub struct Preemption {
    hz: Option<u32>,
}

impl Preemption {
    /// Create a disabled controller
    pub const fn new() -> Self {
        Self { hz: None }
    }

    /// Start delivering ticks at `hz` per second
    ///
    /// # Returns
    ///
    /// - `Error::RuntimeActive` if another controller owns the timer
    /// - `Error::Timer` if the handler or the timer cannot be installed;
    ///   nothing is left installed in that case
    pub fn enable(&mut self, hz: u32) -> Result<()> {
        if self.hz.is_some() {
            return Ok(());
        }

        let mut saved = SAVED.lock();
        if saved.is_some() {
            return Err(Error::RuntimeActive);
        }

        let hz = hz.clamp(1, crate::config::MAX_PREEMPT_HZ);
        let period_us = 1_000_000 / i64::from(hz);
        let period = libc::timeval {
            tv_sec: (period_us / 1_000_000) as libc::time_t,
            tv_usec: (period_us % 1_000_000) as libc::suseconds_t,
        };

        TICK_PENDING.store(false, Ordering::Release);

        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = on_tick as usize;
            action.sa_flags = libc::SA_RESTART;
            libc::sigemptyset(&mut action.sa_mask);

            let mut old_action: libc::sigaction = mem::zeroed();
            if libc::sigaction(libc::SIGALRM, &action, &mut old_action) != 0 {
                let err = std::io::Error::last_os_error();
                log::error!("preempt: sigaction(SIGALRM) failed: {}", err);
                return Err(Error::Timer(err));
            }

            let timer = libc::itimerval {
                it_interval: period,
                it_value: period,
            };
            let mut old_timer: libc::itimerval = mem::zeroed();
            if libc::setitimer(libc::ITIMER_REAL, &timer, &mut old_timer) != 0 {
                let err = std::io::Error::last_os_error();
                log::error!("preempt: setitimer(ITIMER_REAL) failed: {}", err);
                libc::sigaction(libc::SIGALRM, &old_action, ptr::null_mut());
                return Err(Error::Timer(err));
            }

            *saved = Some(Saved {
                action: old_action,
                timer: old_timer,
            });
        }

        self.hz = Some(hz);
        log::info!("preempt: timer installed at {} Hz", hz);
        Ok(())
    }

    /// Stop the timer and restore what it replaced
    ///
    /// Does nothing if this controller is not enabled.
    pub fn stop(&mut self) {
        if self.hz.take().is_none() {
            return;
        }

        let mut saved = SAVED.lock();
        if let Some(prev) = saved.take() {
            // Disarm first so no tick lands on the restored handler
            unsafe {
                if libc::setitimer(libc::ITIMER_REAL, &prev.timer, ptr::null_mut()) != 0 {
                    log::error!(
                        "preempt: restoring timer failed: {}",
                        std::io::Error::last_os_error()
                    );
                }
                if libc::sigaction(libc::SIGALRM, &prev.action, ptr::null_mut()) != 0 {
                    log::error!(
                        "preempt: restoring SIGALRM handler failed: {}",
                        std::io::Error::last_os_error()
                    );
                }
            }
        }

        TICK_PENDING.store(false, Ordering::Release);
        log::info!("preempt: timer restored");
    }

    /// Check if this controller owns the timer
    pub fn is_enabled(&self) -> bool {
        self.hz.is_some()
    }

    /// Tick frequency while enabled
    pub fn hz(&self) -> Option<u32> {
        self.hz
    }

    /// Consume a pending tick
    ///
    /// Returns true only if this controller owns the timer, a tick arrived
    /// since the last poll, and the calling thread's gate is open.
    pub fn poll(&self) -> bool {
        self.is_enabled() && take_tick()
    }
}

impl Drop for Preemption {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Check whether a tick is waiting to be consumed
pub fn tick_pending() -> bool {
    TICK_PENDING.load(Ordering::Acquire)
}

/// Consume the pending tick if the gate is open
pub(crate) fn take_tick() -> bool {
    depth() == 0 && TICK_PENDING.swap(false, Ordering::AcqRel)
}

/// ============================================================================
/// Delivery Gate
/// ============================================================================

/// Closed delivery gate; reopens when dropped
#[must_use = "the gate reopens as soon as the guard is dropped"]
#[derive(Debug)]
pub struct PreemptGuard {
    _not_send: core::marker::PhantomData<*const ()>,
}

impl PreemptGuard {
    /// Reopen the gate
    pub fn allow(self) {
        drop(self);
    }
}

impl Drop for PreemptGuard {
    fn drop(&mut self) {
        GATE_DEPTH.with(|depth| {
            let old = depth.get();
            debug_assert!(old > 0, "preemption gate underflow");
            depth.set(old.saturating_sub(1));
            if old == 1 {
                mask_tick(false);
            }
        });
    }
}

/// Block tick delivery on this OS thread until the guard is dropped
pub fn disable() -> PreemptGuard {
    GATE_DEPTH.with(|depth| {
        let old = depth.get();
        if old == 0 {
            mask_tick(true);
        }
        depth.set(old + 1);
    });

    PreemptGuard {
        _not_send: core::marker::PhantomData,
    }
}

/// Current gate depth of this OS thread
pub fn depth() -> u32 {
    GATE_DEPTH.with(Cell::get)
}

/// Replace the gate depth, returning the previous one
///
/// Used around context switches; the signal mask follows the new depth.
pub(crate) fn set_depth(new: u32) -> u32 {
    GATE_DEPTH.with(|depth| {
        let old = depth.replace(new);
        if (old == 0) != (new == 0) {
            mask_tick(new > 0);
        }
        old
    })
}

fn mask_tick(block: bool) {
    let how = if block {
        libc::SIG_BLOCK
    } else {
        libc::SIG_UNBLOCK
    };

    unsafe {
        let mut set: libc::sigset_t = mem::zeroed();
        libc::sigemptyset(&mut set);
        libc::sigaddset(&mut set, libc::SIGALRM);
        let rc = libc::pthread_sigmask(how, &set, ptr::null_mut());
        if rc != 0 {
            log::error!(
                "preempt: pthread_sigmask failed: {}",
                std::io::Error::from_raw_os_error(rc)
            );
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
