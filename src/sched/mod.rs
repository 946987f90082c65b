// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Scheduler
//!
//! This module implements the green-thread scheduler: thread creation, the
//! FIFO round-robin dispatcher, block/unblock, exit and the run loop that
//! bootstraps and tears the runtime down.
//!
//! # Design
//!
//! - **Round-robin**: one FIFO ready queue, no priorities
//! - **Explicit state**: all scheduler state lives in a `Scheduler` owned
//!   by the `run` call; it is published to the OS thread for the duration
//!   of the run so the free functions below can reach it
//! - **Idle context**: the caller of `run` is the idle context; it is
//!   resumed whenever the ready queue runs dry
//! - **Safe-point preemption**: timer ticks are turned into yields only at
//!   `preempt_point`, `yield_now` and semaphore operations
//!
//! # Dispatch
//!
//! ```text
//! leave(how)                    // yield, block, preempt or exit
//!   gate closed:
//!     requeue / mark blocked / park in zombie slot
//!     next = first READY handle in the ready queue, else idle
//!   gate reopened
//!   switch(current, next)
//!   reap zombie                 // runs on the new thread's stack
//! ```
//!
//! No `RefCell` borrow is ever held across a switch.

use core::any::Any;
use core::cell::{Cell, RefCell};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::{AtomicU32, Ordering};
use std::panic::{self, AssertUnwindSafe};

use crate::arch::{self, Context, Stack};
use crate::config::RuntimeConfig;
use crate::err::{Error, Result};
use crate::preempt::{self, Preemption};
use crate::sync::WaitQueue;
use crate::thread::{Tcb, ThreadFn, ThreadId, ThreadState, ThreadTable};

/// Epoch handed to the next runtime; 0 is never issued
static NEXT_RUNTIME: AtomicU32 = AtomicU32::new(1);

thread_local! {
    /// Scheduler of the `run` call active on this OS thread
    static ACTIVE: Cell<*const Scheduler> = const { Cell::new(ptr::null()) };
}

/// ============================================================================
/// Statistics
/// ============================================================================

/// Counters collected over one `run`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Threads created
    pub created: u64,

    /// Threads whose entry function finished or that called `exit`
    pub exited: u64,

    /// Threads still blocked when the ready queue drained
    pub abandoned: u64,

    /// Context switches performed
    pub switches: u64,

    /// Voluntary yields
    pub yields: u64,

    /// Yields forced by a preemption tick
    pub preemptions: u64,
}

/// ============================================================================
/// Scheduler
/// ============================================================================

/// Why the running thread gives up the CPU
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Leave {
    Yield,
    Preempt,
    Block,
    Exit,
}

struct Inner {
    config: RuntimeConfig,
    threads: ThreadTable,
    ready: WaitQueue<ThreadId>,
    current: Option<ThreadId>,
    idle: Box<Context>,
    zombie: Option<Tcb>,
    preempt: Preemption,
    stats: RunStats,
    panic: Option<Box<dyn Any + Send + 'static>>,
}

/// Scheduler state of one run
pub struct Scheduler {
    inner: RefCell<Inner>,
}

impl Scheduler {
    fn new(config: RuntimeConfig) -> Self {
        let runtime = NEXT_RUNTIME.fetch_add(1, Ordering::Relaxed);
        Self {
            inner: RefCell::new(Inner {
                config,
                threads: ThreadTable::for_runtime(runtime),
                ready: WaitQueue::new(),
                current: None,
                idle: Box::new(Context::empty()),
                zombie: None,
                preempt: Preemption::new(),
                stats: RunStats::default(),
                panic: None,
            }),
        }
    }

    /// Create a thread and append it to the ready queue
    fn spawn(&self, entry: ThreadFn) -> Result<ThreadId> {
        let _gate = preempt::disable();
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let stack_size = inner.config.stack_size;
        let arg = self as *const Scheduler as usize;

        let id = inner.threads.insert_with(|id| {
            let mut stack = Stack::new(stack_size)?;
            let context = Box::new(Context::new(&mut stack, thread_entry, arg));
            Ok::<_, Error>(Tcb {
                id,
                state: ThreadState::Ready,
                context,
                stack: Some(stack),
                entry: Some(entry),
            })
        })?;

        inner.ready.enqueue(id);
        inner.stats.created += 1;

        log::debug!("Thread created: tid={} ready={}", id, inner.ready.len());
        Ok(id)
    }

    fn current(&self) -> Option<ThreadId> {
        self.inner.borrow().current
    }

    /// Make a blocked thread READY and append it to the ready queue
    ///
    /// Handles issued by another run fail with `Error::InvalidThread`.
    fn unblock(&self, id: ThreadId) -> Result<()> {
        let _gate = preempt::disable();
        let mut guard = self.inner.borrow_mut();
        let inner = &mut *guard;

        let tcb = inner.threads.get_mut(id).ok_or(Error::InvalidThread(id))?;
        match tcb.state {
            ThreadState::Blocked => {}
            ThreadState::Ready => return Err(Error::AlreadyQueued(id)),
            ThreadState::Running | ThreadState::Exited => return Err(Error::NotBlocked(id)),
        }

        tcb.state = ThreadState::Ready;
        inner.ready.enqueue(id);

        log::debug!("Thread unblocked: tid={}", id);
        Ok(())
    }

    /// Turn a pending tick into a yield
    fn preempt_point(&self) -> Result<bool> {
        let due = {
            let inner = self.inner.borrow();
            inner.current.is_some() && inner.preempt.poll()
        };

        if due {
            self.leave(Leave::Preempt)?;
        }
        Ok(due)
    }

    /// Give up the CPU and dispatch the next READY thread
    ///
    /// Returns once the calling context is resumed. For `Leave::Exit` the
    /// call never returns.
    fn leave(&self, how: Leave) -> Result<()> {
        let (from, to) = {
            let _gate = preempt::disable();
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;

            let from: *mut Context = match inner.current {
                None => &mut *inner.idle,
                Some(id) => {
                    let tcb = inner.threads.get_mut(id).ok_or(Error::InvalidThread(id))?;
                    match how {
                        Leave::Yield | Leave::Preempt => {
                            tcb.state = ThreadState::Ready;
                            inner.ready.enqueue(id);
                            if how == Leave::Yield {
                                inner.stats.yields += 1;
                            } else {
                                inner.stats.preemptions += 1;
                            }
                            log::trace!(
                                "Thread yielded: tid={} preempted={}",
                                id,
                                how == Leave::Preempt
                            );
                            &mut *tcb.context
                        }
                        Leave::Block => {
                            tcb.state = ThreadState::Blocked;
                            log::debug!("Thread blocked: tid={}", id);
                            &mut *tcb.context
                        }
                        Leave::Exit => {
                            let mut tcb =
                                inner.threads.remove(id).ok_or(Error::InvalidThread(id))?;
                            tcb.state = ThreadState::Exited;
                            inner.stats.exited += 1;
                            log::debug!("Thread exited: tid={}", id);

                            // Its stack is still in use until the switch below
                            let zombie = inner.zombie.insert(tcb);
                            &mut *zombie.context
                        }
                    }
                }
            };

            let to: *const Context = match inner.pick_next() {
                Some(next) => {
                    let tcb = inner.threads.get_mut(next).ok_or(Error::InvalidThread(next))?;
                    tcb.state = ThreadState::Running;
                    inner.current = Some(next);
                    log::trace!("Scheduled thread: tid={}", next);
                    &*tcb.context
                }
                None => {
                    inner.current = None;
                    log::trace!("Scheduled idle");
                    &*inner.idle
                }
            };

            if !ptr::eq(from, to) {
                inner.stats.switches += 1;
            }
            (from, to)
        };

        if ptr::eq(from, to) {
            return Ok(());
        }

        let depth = preempt::set_depth(0);
        // Contexts are boxed and outlive the switch; no borrow is held
        unsafe { arch::switch(from, to) };
        preempt::set_depth(depth);

        self.reap();
        Ok(())
    }

    /// Release the stack of the thread that exited last
    fn reap(&self) {
        let zombie = self.inner.borrow_mut().zombie.take();
        drop(zombie);
    }

    fn record_panic(&self, id: ThreadId, payload: Box<dyn Any + Send + 'static>) {
        log::warn!("Thread panicked: tid={}", id);
        let mut inner = self.inner.borrow_mut();
        if inner.panic.is_none() {
            inner.panic = Some(payload);
        }
    }

    /// Dispatch from the idle context until nothing is runnable
    fn run_loop(&self) -> Result<()> {
        loop {
            if self.inner.borrow().ready.is_empty() {
                return Ok(());
            }

            let switches = self.inner.borrow().stats.switches;
            self.leave(Leave::Yield)?;

            // Only non-READY leftovers were queued
            if self.inner.borrow().stats.switches == switches {
                return Ok(());
            }
        }
    }

    /// Stop preemption and release every remaining thread
    fn teardown(&self) -> (RunStats, Option<Box<dyn Any + Send + 'static>>) {
        let (leftover, zombie, stats, panic) = {
            let mut guard = self.inner.borrow_mut();
            let inner = &mut *guard;

            inner.preempt.stop();

            for id in inner.threads.in_state(ThreadState::Blocked) {
                log::warn!("Thread still blocked at shutdown: tid={}", id);
            }
            inner.stats.abandoned = inner.threads.len() as u64;

            let ready = core::mem::take(&mut inner.ready);
            if let Err((ready, err)) = ready.destroy() {
                log::warn!("sched: ready queue not drained: {} {:?}", err, ready);
            }

            (
                inner.threads.drain(),
                inner.zombie.take(),
                inner.stats,
                inner.panic.take(),
            )
        };

        drop(leftover);
        drop(zombie);
        (stats, panic)
    }
}

impl Inner {
    /// Dequeue the next READY handle
    ///
    /// Entries in any other state should never be queued; they are requeued
    /// and skipped, at most one pass over the queue.
    fn pick_next(&mut self) -> Option<ThreadId> {
        for _ in 0..self.ready.len() {
            let id = self.ready.dequeue().ok()?;
            match self.threads.get(id).map(|tcb| tcb.state) {
                Some(ThreadState::Ready) => return Some(id),
                Some(state) => {
                    log::warn!("sched: skipping tid={} in ready queue (state {:?})", id, state);
                    self.ready.enqueue(id);
                }
                None => {
                    log::warn!("sched: dropping stale tid={} from ready queue", id);
                }
            }
        }
        None
    }
}

/// First code run by every green thread
extern "C" fn thread_entry(arg: usize) -> ! {
    // The run loop outlives every thread it dispatches
    let sched = unsafe { &*(arg as *const Scheduler) };
    sched.reap();

    let started = {
        let mut inner = sched.inner.borrow_mut();
        match inner.current {
            Some(id) => inner
                .threads
                .get_mut(id)
                .and_then(|tcb| tcb.entry.take())
                .map(|entry| (id, entry)),
            None => None,
        }
    };

    if let Some((id, entry)) = started {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
            sched.record_panic(id, payload);
        }
    }

    exit_with(sched)
}

fn exit_with(sched: &Scheduler) -> ! {
    let id = sched.current();
    if let Err(err) = sched.leave(Leave::Exit) {
        log::error!("sched: exit failed: {}", err);
    }
    panic!("exited thread {:?} was resumed", id);
}

/// ============================================================================
/// Active Runtime
/// ============================================================================

/// Publishes a scheduler to the OS thread while alive
struct Publish<'a> {
    _sched: PhantomData<&'a Scheduler>,
}

impl<'a> Publish<'a> {
    fn new(sched: &'a Scheduler) -> Result<Self> {
        ACTIVE.with(|active| {
            if !active.get().is_null() {
                return Err(Error::RuntimeActive);
            }
            active.set(sched);
            Ok(Self {
                _sched: PhantomData,
            })
        })
    }
}

impl Drop for Publish<'_> {
    fn drop(&mut self) {
        ACTIVE.with(|active| active.set(ptr::null()));
    }
}

fn with_active<R>(f: impl FnOnce(&Scheduler) -> Result<R>) -> Result<R> {
    let sched = ACTIVE.with(Cell::get);
    if sched.is_null() {
        return Err(Error::NoRuntime);
    }
    // Published only while the owning `run` frame is live
    f(unsafe { &*sched })
}

/// Check whether a runtime is active on this OS thread
pub fn is_active() -> bool {
    !ACTIVE.with(Cell::get).is_null()
}

/// Run `f` as the first green thread with the default configuration
///
/// See [`run_with`].
pub fn run<F>(preempt: bool, f: F) -> Result<RunStats>
where
    F: FnOnce() + 'static,
{
    run_with(RuntimeConfig::default(), preempt, f)
}

/// Run `f` as the first green thread and return once nothing is runnable
///
/// With `preempt` set the process interval timer drives involuntary yields
/// at `config.preempt_hz`. Threads still blocked when the ready queue
/// drains are released without being resumed and counted in
/// `RunStats::abandoned`.
///
/// # Returns
///
/// - `Error::RuntimeActive` if this OS thread is already inside `run`, or
///   another runtime owns the preemption timer
/// - `Error::Timer` if the timer cannot be installed
/// - `Error::OutOfMemory` if the first thread cannot be created
///
/// # Panics
///
/// If a green thread panicked, the first panic is resumed here after the
/// runtime has been torn down.
pub fn run_with<F>(config: RuntimeConfig, preempt: bool, f: F) -> Result<RunStats>
where
    F: FnOnce() + 'static,
{
    let config = config.validated();
    let sched = Scheduler::new(config);
    let _published = Publish::new(&sched)?;

    if preempt {
        sched.inner.borrow_mut().preempt.enable(config.preempt_hz)?;
    }

    sched.spawn(Box::new(f))?;
    log::info!(
        "Runtime started: stack_size={} preempt={}",
        config.stack_size,
        preempt
    );

    let result = sched.run_loop();
    let (stats, panicked) = sched.teardown();
    log::info!("Runtime stopped: {:?}", stats);

    if let Some(payload) = panicked {
        panic::resume_unwind(payload);
    }

    result.map(|()| stats)
}

/// Create a green thread running `f`
///
/// The thread is appended to the ready queue and does not run before the
/// caller yields or blocks.
pub fn spawn<F>(f: F) -> Result<ThreadId>
where
    F: FnOnce() + 'static,
{
    with_active(|sched| sched.spawn(Box::new(f)))
}

/// Handle of the running green thread
pub fn current() -> Result<ThreadId> {
    with_active(|sched| sched.current().ok_or(Error::NoRuntime))
}

/// Requeue the running thread at the tail and run the next one
pub fn yield_now() -> Result<()> {
    with_active(|sched| {
        if sched.current().is_none() {
            return Err(Error::NoRuntime);
        }
        // The yield satisfies any pending tick
        let _ = sched.inner.borrow().preempt.poll();
        sched.leave(Leave::Yield)
    })
}

/// Block the running thread until another thread calls [`unblock`]
///
/// The caller must have recorded its handle somewhere an unblocker will
/// find it; a blocked thread is in no scheduler queue.
pub fn block() -> Result<()> {
    with_active(|sched| {
        if sched.current().is_none() {
            return Err(Error::NoRuntime);
        }
        sched.leave(Leave::Block)
    })
}

/// Make a blocked thread runnable again
///
/// The thread is marked READY and appended to the ready queue.
pub fn unblock(id: ThreadId) -> Result<()> {
    with_active(|sched| sched.unblock(id))
}

/// Yield if a preemption tick is pending
///
/// Returns true if the thread was preempted. Outside a runtime, or with
/// the delivery gate closed, this does nothing.
pub fn preempt_point() -> bool {
    with_active(Scheduler::preempt_point).unwrap_or(false)
}

/// End the running thread
///
/// Values on the thread's stack are not dropped.
///
/// # Panics
///
/// If called outside a green thread.
pub fn exit() -> ! {
    let sched = ACTIVE.with(Cell::get);
    if sched.is_null() {
        panic!("uthread::exit called outside of a runtime");
    }
    let sched = unsafe { &*sched };
    if sched.current().is_none() {
        panic!("uthread::exit called from the idle context");
    }
    exit_with(sched)
}

// ============================================================================
// Tests
// ============================================================================
