// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime Error Codes
//!
//! This module provides the error type used throughout the runtime and
//! the numeric status codes returned by the C-style `thread_*` / `sem_*`
//! entry points.

use crate::thread::ThreadId;

/// Status code type returned by the C-style entry points
#[allow(non_camel_case_types)]
pub type status_t = i32;

/// Success status code
pub const UT_OK: status_t = 0;

/// Not found error
pub const UT_ERR_NOT_FOUND: status_t = -3;

/// Invalid arguments error
pub const UT_ERR_INVALID_ARGS: status_t = -10;

/// No memory error
pub const UT_ERR_NO_MEMORY: status_t = -12;

/// Bad state error (queue empty, thread not blocked, no runtime)
pub const UT_ERR_BAD_STATE: status_t = -20;

/// Busy error (waiters pending, runtime already active)
pub const UT_ERR_BUSY: status_t = -16;

/// Timer or signal setup failure
pub const UT_ERR_TIMER: status_t = -62;

/// A green thread panicked; returned by `thread_run`
pub const UT_ERR_CANCELED: status_t = -125;

/// Runtime error
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stack or thread control block could not be allocated
    #[error("out of memory")]
    OutOfMemory,

    /// Dequeue from an empty queue
    #[error("queue is empty")]
    QueueEmpty,

    /// Element not present in the queue
    #[error("element not found in queue")]
    NotFound,

    /// Queue destroyed while it still holds elements
    #[error("queue still holds {0} element(s)")]
    NotEmpty(usize),

    /// Thread already sits in the ready queue
    #[error("thread {0} is already queued")]
    AlreadyQueued(ThreadId),

    /// Scheduler operation outside of `run`
    #[error("no runtime is active on this thread")]
    NoRuntime,

    /// Stale or unknown thread handle
    #[error("invalid thread handle {0}")]
    InvalidThread(ThreadId),

    /// Unblock of a thread that is not blocked
    #[error("thread {0} is not blocked")]
    NotBlocked(ThreadId),

    /// Semaphore destroyed while threads wait on it
    #[error("semaphore still has {waiters} waiter(s)")]
    SemaphoreBusy {
        /// Threads still queued on the semaphore
        waiters: usize,
    },

    /// Nested run, or preemption owned by another runtime
    #[error("runtime already active")]
    RuntimeActive,

    /// Interval timer or signal handler installation failed
    #[error("preemption timer setup failed: {0}")]
    Timer(#[source] std::io::Error),
}

impl Error {
    /// Numeric status for the C-style entry points
    pub fn status(&self) -> status_t {
        match self {
            Error::OutOfMemory => UT_ERR_NO_MEMORY,
            Error::QueueEmpty | Error::NoRuntime | Error::NotBlocked(_) => UT_ERR_BAD_STATE,
            Error::NotFound => UT_ERR_NOT_FOUND,
            Error::InvalidThread(_) => UT_ERR_INVALID_ARGS,
            Error::NotEmpty(_)
            | Error::AlreadyQueued(_)
            | Error::SemaphoreBusy { .. }
            | Error::RuntimeActive => UT_ERR_BUSY,
            Error::Timer(_) => UT_ERR_TIMER,
        }
    }
}

/// Runtime result type
pub type Result<T> = core::result::Result<T, Error>;

/// Collapse a result into a status code
pub fn to_status<T>(result: Result<T>) -> status_t {
    match result {
        Ok(_) => UT_OK,
        Err(err) => err.status(),
    }
}
