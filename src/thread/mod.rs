// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Thread Control Blocks
//!
//! This module provides the per-thread bookkeeping of the runtime and the
//! arena that owns it.
//!
//! # Design
//!
//! - Each thread is identified by a `ThreadId`: the runtime that issued it,
//!   a slot index and a generation, so a handle to an exited thread never
//!   aliases a newer one, in the same run or a later one
//! - The TCB exclusively owns its stack and its saved context
//! - The scheduler is the only writer of `state`
//!
//! # Thread States
//!
//! ```text
//!            create            dispatch
//!   (new) ----------> Ready ------------> Running ----> Exited
//!                       ^                  |   |
//!                       |     yield        |   | block
//!                       +------------------+   v
//!                       |                   Blocked
//!                       +----- unblock --------+
//! ```

use core::fmt;

use crate::arch::{Context, Stack};

/// ============================================================================
/// Thread ID
/// ============================================================================

/// Stable handle of a green thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ThreadId {
    runtime: u32,
    index: u32,
    generation: u32,
}

impl ThreadId {
    /// Epoch of the runtime that issued this handle
    pub const fn runtime(self) -> u32 {
        self.runtime
    }

    /// Slot index inside the owning runtime's thread table
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Reuse count of the slot when this handle was issued
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.index, self.generation)
    }
}

/// ============================================================================
/// Thread State
/// ============================================================================

/// Thread state
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Thread is in the ready queue
    Ready = 0,

    /// Thread is the one executing
    Running = 1,

    /// Thread waits on a blocking primitive and is in no ready queue
    Blocked = 2,

    /// Thread finished; its stack is released by the next thread to run
    Exited = 3,
}

impl ThreadState {
    /// Check if thread can be dispatched
    pub const fn is_schedulable(self) -> bool {
        matches!(self, Self::Ready)
    }

    /// Check if thread has not exited yet
    pub const fn is_alive(self) -> bool {
        !matches!(self, Self::Exited)
    }
}

/// Body of a green thread
pub type ThreadFn = Box<dyn FnOnce() + 'static>;

/// ============================================================================
/// Thread Control Block
/// ============================================================================

/// Thread control block
pub struct Tcb {
    /// Handle of this thread
    pub id: ThreadId,

    /// Scheduling state
    pub state: ThreadState,

    /// Saved context; boxed so its address survives table growth
    pub context: Box<Context>,

    /// Stack the context runs on
    pub stack: Option<Stack>,

    /// Body, taken when the thread first runs
    pub entry: Option<ThreadFn>,
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("stack", &self.stack)
            .field("started", &self.entry.is_none())
            .finish()
    }
}

/// ============================================================================
/// Thread Table
/// ============================================================================

/// Slot of the thread table
struct Slot {
    generation: u32,
    tcb: Option<Tcb>,
}

/// Arena owning every TCB of a runtime
///
/// Slots are reused after a thread is removed; the generation counter
/// makes handles to the old occupant fail lookups. Handles issued by a
/// table with another runtime epoch never match.
#[derive(Default)]
pub struct ThreadTable {
    runtime: u32,
    slots: Vec<Slot>,
    free: Vec<u32>,
    count: usize,
}

impl ThreadTable {
    /// Create an empty table with runtime epoch 0
    pub const fn new() -> Self {
        Self::for_runtime(0)
    }

    /// Create an empty table issuing handles tagged with `runtime`
    pub const fn for_runtime(runtime: u32) -> Self {
        Self {
            runtime,
            slots: Vec::new(),
            free: Vec::new(),
            count: 0,
        }
    }

    /// Epoch stamped into every handle of this table
    pub const fn runtime(&self) -> u32 {
        self.runtime
    }

    fn slot(&self, id: ThreadId) -> Option<&Slot> {
        if id.runtime != self.runtime {
            return None;
        }
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    fn slot_mut(&mut self, id: ThreadId) -> Option<&mut Slot> {
        if id.runtime != self.runtime {
            return None;
        }
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
    }

    /// Insert a TCB built from its handle
    ///
    /// The handle is chosen first so `build` can bake it into the TCB
    /// (and into the context's entry argument). If `build` fails the slot
    /// is returned to the free list.
    pub fn insert_with<F, E>(&mut self, build: F) -> Result<ThreadId, E>
    where
        F: FnOnce(ThreadId) -> Result<Tcb, E>,
    {
        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    tcb: None,
                });
                (self.slots.len() - 1) as u32
            }
        };

        let id = ThreadId {
            runtime: self.runtime,
            index,
            generation: self.slots[index as usize].generation,
        };

        match build(id) {
            Ok(tcb) => {
                self.slots[index as usize].tcb = Some(tcb);
                self.count += 1;
                Ok(id)
            }
            Err(err) => {
                self.free.push(index);
                Err(err)
            }
        }
    }

    /// Look up a thread
    pub fn get(&self, id: ThreadId) -> Option<&Tcb> {
        self.slot(id).and_then(|slot| slot.tcb.as_ref())
    }

    /// Look up a thread mutably
    pub fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        self.slot_mut(id).and_then(|slot| slot.tcb.as_mut())
    }

    /// Remove a thread, invalidating its handle
    pub fn remove(&mut self, id: ThreadId) -> Option<Tcb> {
        let slot = self.slot_mut(id)?;
        let tcb = slot.tcb.take()?;

        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.count -= 1;

        Some(tcb)
    }

    /// Remove every thread
    pub fn drain(&mut self) -> Vec<Tcb> {
        let ids: Vec<ThreadId> = self.iter().map(|tcb| tcb.id).collect();
        ids.into_iter().filter_map(|id| self.remove(id)).collect()
    }

    /// Iterate over live threads in slot order
    pub fn iter(&self) -> impl Iterator<Item = &Tcb> + '_ {
        self.slots.iter().filter_map(|slot| slot.tcb.as_ref())
    }

    /// Handles of threads in `state`
    pub fn in_state(&self, state: ThreadState) -> Vec<ThreadId> {
        self.iter()
            .filter(|tcb| tcb.state == state)
            .map(|tcb| tcb.id)
            .collect()
    }

    /// Number of threads in the table
    pub fn len(&self) -> usize {
        self.count
    }

    /// Check if the table is empty
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

// ============================================================================
// Tests
// ============================================================================
