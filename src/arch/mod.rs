// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Execution Context Primitive
//!
//! This module owns the only register-level code in the crate: thread
//! stacks, saved contexts and the switch between two contexts. Everything
//! above it handles thread handles and never touches a stack pointer.
//!
//! # Design
//!
//! - **Stack**: anonymous mapping with a guard page at the low end,
//!   released exactly once when dropped
//! - **Context**: a single saved stack pointer; callee-saved registers live
//!   in a frame on the suspended stack (see `switch.S`)
//! - **Trampoline**: a fresh context starts in assembly which calls the
//!   entry function with its argument; the entry function never returns
//!
//! # Usage
//!
//! ```ignore
//! let mut stack = Stack::new(64 * 1024)?;
//! let mut here = Context::empty();
//! let there = Context::new(&mut stack, entry, arg);
//! unsafe { switch(&mut here, &there) };
//! ```

use core::cell::Cell;

use memmap2::{MmapMut, MmapOptions};

use crate::err::{Error, Result};

#[cfg(target_arch = "x86_64")]
mod amd64;
#[cfg(target_arch = "x86_64")]
use amd64 as cpu;

#[cfg(target_arch = "aarch64")]
mod arm64;
#[cfg(target_arch = "aarch64")]
use arm64 as cpu;

extern "C" {
    /// Save callee-saved state on the current stack, store the stack
    /// pointer in `from` and resume the stack saved in `to`
    fn uthread_context_switch(from: *mut Context, to: *const Context);

    /// First instruction executed by a fresh context
    fn uthread_context_trampoline();
}

/// Entry point of a fresh context
pub type EntryPoint = extern "C" fn(usize) -> !;

/// Fallback when sysconf cannot report a page size
const DEFAULT_PAGE_SIZE: usize = 4096;

thread_local! {
    /// Stacks currently mapped by this OS thread
    static LIVE_STACKS: Cell<usize> = const { Cell::new(0) };
}

/// ============================================================================
/// Stack
/// ============================================================================

/// Stack memory for one green thread
///
/// The lowest page is a guard page so an overflow faults instead of
/// silently running into a neighbouring mapping.
pub struct Stack {
    map: MmapMut,
    guard: usize,
}

impl Stack {
    /// Map a stack with `size` usable bytes (rounded up to whole pages)
    ///
    /// # Returns
    ///
    /// `Error::OutOfMemory` when the mapping or the guard page cannot be
    /// set up.
    pub fn new(size: usize) -> Result<Self> {
        let page = page_size();
        let total = round_to_pages(size.max(page))
            .and_then(|usable| usable.checked_add(page))
            .ok_or_else(|| {
                log::error!("stack: size {} overflows", size);
                Error::OutOfMemory
            })?;

        let mut map = MmapOptions::new()
            .len(total)
            .stack()
            .map_anon()
            .map_err(|err| {
                log::error!("stack: mmap of {} bytes failed: {}", total, err);
                Error::OutOfMemory
            })?;

        // Stacks grow down, so the guard goes at the lowest address
        let rc = unsafe { libc::mprotect(map.as_mut_ptr().cast(), page, libc::PROT_NONE) };
        if rc != 0 {
            log::error!(
                "stack: guard page setup failed: {}",
                std::io::Error::last_os_error()
            );
            return Err(Error::OutOfMemory);
        }

        LIVE_STACKS.with(|live| live.set(live.get() + 1));

        Ok(Self { map, guard: page })
    }

    /// One-past-the-end address of the stack
    fn top(&mut self) -> usize {
        self.map.as_mut_ptr() as usize + self.map.len()
    }

    /// Usable size in bytes (guard page excluded)
    pub fn size(&self) -> usize {
        self.map.len() - self.guard
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        LIVE_STACKS.with(|live| live.set(live.get().saturating_sub(1)));
    }
}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("base", &self.map.as_ptr())
            .field("size", &self.size())
            .finish()
    }
}

/// Number of stacks currently mapped by the calling OS thread
///
/// Every green thread of a runtime allocates and releases its stack on
/// the OS thread that called `run`, so after `run` returns this is back to
/// its value before the call.
pub fn live_stacks() -> usize {
    LIVE_STACKS.with(Cell::get)
}

/// System page size
pub fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        DEFAULT_PAGE_SIZE
    }
}

/// Round `size` up to a whole number of pages, `None` on overflow
pub fn round_to_pages(size: usize) -> Option<usize> {
    let page = page_size();
    size.div_ceil(page).checked_mul(page)
}

/// ============================================================================
/// Context
/// ============================================================================

/// Saved execution context
///
/// Only the stack pointer is stored here; the rest of the register state
/// is in the frame it points at. A context must stay at a fixed address
/// while suspended, so the scheduler keeps contexts boxed.
#[repr(C)]
#[derive(Debug)]
pub struct Context {
    sp: usize,
}

impl Context {
    /// A context that has not been saved yet
    ///
    /// Used for the caller of `run`, whose state is captured by the first
    /// switch away from it.
    pub const fn empty() -> Self {
        Self { sp: 0 }
    }

    /// A context that starts running `entry(arg)` on `stack`
    pub fn new(stack: &mut Stack, entry: EntryPoint, arg: usize) -> Self {
        let trampoline = uthread_context_trampoline as usize;

        // The stack is writable and far larger than one frame
        let sp = unsafe { cpu::init_frame(stack.top(), entry as usize, arg, trampoline) };

        Self { sp }
    }

    /// Whether the context holds a resumable state
    pub fn is_saved(&self) -> bool {
        self.sp != 0
    }
}

/// Switch from the running context to `to`
///
/// Returns when some other context switches back into `from`.
///
/// # Safety
///
/// - `from` must be valid for writes and stay at the same address until
///   it is resumed
/// - `to` must have been produced by `Context::new` or by a previous
///   switch away from it, and its stack must still be mapped
/// - nothing on the current stack may be borrowed by code that runs on
///   `to` in a way that outlives this switch
pub unsafe fn switch(from: *mut Context, to: *const Context) {
    uthread_context_switch(from, to);
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_stack_rounding() {
        let page = page_size();
        let stack = Stack::new(page + 1).unwrap();
        assert_eq!(stack.size(), 2 * page);
    }

    #[test]
    fn test_oversized_stack_fails() {
        let before = live_stacks();
        assert!(round_to_pages(usize::MAX).is_none());
        assert!(matches!(Stack::new(usize::MAX), Err(Error::OutOfMemory)));
        assert!(matches!(Stack::new(usize::MAX - page_size()), Err(Error::OutOfMemory)));
        assert_eq!(live_stacks(), before);
    }

    #[test]
    fn test_live_stacks_tracking() {
        let before = live_stacks();
        let a = Stack::new(16 * 1024).unwrap();
        let b = Stack::new(16 * 1024).unwrap();
        assert_eq!(live_stacks(), before + 2);
        drop(a);
        assert_eq!(live_stacks(), before + 1);
        drop(b);
        assert_eq!(live_stacks(), before);
    }

    #[test]
    fn test_empty_context() {
        assert!(!Context::empty().is_saved());
    }

    static mut MAIN: Context = Context::empty();
    static mut SIDE: Context = Context::empty();
    static SEEN: AtomicUsize = AtomicUsize::new(0);

    extern "C" fn side_entry(arg: usize) -> ! {
        SEEN.store(arg, Ordering::SeqCst);
        unsafe {
            switch(
                core::ptr::addr_of_mut!(SIDE),
                core::ptr::addr_of!(MAIN),
            );
        }
        unreachable!("side context resumed after finishing");
    }

    #[test]
    fn test_switch_round_trip() {
        let mut stack = Stack::new(64 * 1024).unwrap();

        unsafe {
            SIDE = Context::new(&mut stack, side_entry, 7);
            switch(
                core::ptr::addr_of_mut!(MAIN),
                core::ptr::addr_of!(SIDE),
            );
        }

        assert_eq!(SEEN.load(Ordering::SeqCst), 7);
    }
}
