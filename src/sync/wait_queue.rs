// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Wait Queue
//!
//! This module provides the FIFO queue of opaque handles used both as the
//! scheduler's ready queue and as each semaphore's list of blocked
//! threads.
//!
//! # Design
//!
//! - **FIFO**: insertion order is dispatch/wake order
//! - **Identity**: `delete` and `contains` compare handles, never what
//!   they refer to
//! - **Checked**: failures are reported as errors and leave the queue
//!   untouched
//!
//! # Usage
//!
//! ```rust
//! use uthread::sync::{Visit, WaitQueue};
//!
//! let mut wq = WaitQueue::new();
//! wq.enqueue(1u32);
//! wq.enqueue(2);
//! wq.enqueue(3);
//!
//! // Remove every even handle while walking the queue
//! wq.iterate(|h| if h % 2 == 0 { Visit::Remove } else { Visit::Continue });
//!
//! assert_eq!(wq.dequeue().unwrap(), 1);
//! assert_eq!(wq.len(), 1);
//! ```

use core::fmt;
use std::collections::VecDeque;

use crate::err::{Error, Result};

/// What `iterate` does after visiting an element
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Keep the element and move on
    Continue,
    /// Remove the element and move on
    Remove,
    /// Keep the element and end the traversal
    Stop,
}

/// ============================================================================
/// Wait Queue
/// ============================================================================

/// FIFO queue of handles
pub struct WaitQueue<T> {
    entries: VecDeque<T>,
}

impl<T: Copy + Eq> WaitQueue<T> {
    /// Create a new empty queue
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Destroy the queue
    ///
    /// # Returns
    ///
    /// - `Ok(())` if the queue was empty
    /// - `Err((queue, Error::NotEmpty))` otherwise, with the queue handed
    ///   back unchanged
    pub fn destroy(self) -> core::result::Result<(), (Self, Error)> {
        if self.entries.is_empty() {
            Ok(())
        } else {
            let len = self.entries.len();
            Err((self, Error::NotEmpty(len)))
        }
    }

    /// Append a handle at the tail
    pub fn enqueue(&mut self, item: T) {
        self.entries.push_back(item);
    }

    /// Remove and return the head
    ///
    /// Fails with `Error::QueueEmpty` without touching the queue.
    pub fn dequeue(&mut self) -> Result<T> {
        self.entries.pop_front().ok_or(Error::QueueEmpty)
    }

    /// Remove the first occurrence of `item`
    ///
    /// The relative order of the remaining handles is preserved.
    ///
    /// # Returns
    ///
    /// - `Error::QueueEmpty` if the queue holds nothing
    /// - `Error::NotFound` if `item` is not queued
    pub fn delete(&mut self, item: &T) -> Result<()> {
        if self.entries.is_empty() {
            return Err(Error::QueueEmpty);
        }

        // Head removal needs no predecessor fix-up
        if self.entries.front() == Some(item) {
            self.entries.pop_front();
            return Ok(());
        }

        let pos = self
            .entries
            .iter()
            .position(|entry| entry == item)
            .ok_or(Error::NotFound)?;
        self.entries.remove(pos);
        Ok(())
    }

    /// Visit every handle in order
    ///
    /// The visitor decides per element whether to keep it, remove it or
    /// stop; removing the element being visited is always safe.
    ///
    /// # Returns
    ///
    /// Number of handles removed
    pub fn iterate<F>(&mut self, mut visit: F) -> usize
    where
        F: FnMut(&T) -> Visit,
    {
        let mut idx = 0;
        let mut removed = 0;

        while idx < self.entries.len() {
            match visit(&self.entries[idx]) {
                Visit::Continue => idx += 1,
                Visit::Remove => {
                    self.entries.remove(idx);
                    removed += 1;
                }
                Visit::Stop => break,
            }
        }

        removed
    }

    /// Head of the queue, if any
    pub fn peek(&self) -> Option<T> {
        self.entries.front().copied()
    }

    /// Check whether `item` is queued
    pub fn contains(&self, item: &T) -> bool {
        self.entries.contains(item)
    }

    /// Iterate over the queued handles, head first
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.entries.iter()
    }

    /// Number of queued handles
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Copy + Eq> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for WaitQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries.iter()).finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn queue_of(items: &[u32]) -> WaitQueue<u32> {
        let mut wq = WaitQueue::new();
        for &item in items {
            wq.enqueue(item);
        }
        wq
    }

    fn contents(wq: &WaitQueue<u32>) -> Vec<u32> {
        wq.iter().copied().collect()
    }

    #[test]
    fn test_wait_queue_empty() {
        let wq: WaitQueue<u32> = WaitQueue::new();
        assert!(wq.is_empty());
        assert_eq!(wq.len(), 0);
        assert_eq!(wq.peek(), None);
    }

    #[test]
    fn test_fifo_order() {
        let mut wq = queue_of(&[3, 1, 4, 1, 5]);
        assert_eq!(wq.len(), 5);

        let mut out = Vec::new();
        while let Ok(item) = wq.dequeue() {
            out.push(item);
        }

        assert_eq!(out, vec![3, 1, 4, 1, 5]);
        assert!(wq.is_empty());
    }

    #[test]
    fn test_length_tracks_interleaving() {
        let mut wq = WaitQueue::new();
        wq.enqueue(1u32);
        wq.enqueue(2);
        assert_eq!(wq.dequeue().unwrap(), 1);
        wq.enqueue(3);
        assert_eq!(wq.len(), 2);
        assert_eq!(wq.dequeue().unwrap(), 2);
        assert_eq!(wq.dequeue().unwrap(), 3);
        assert_eq!(wq.len(), 0);
    }

    #[test]
    fn test_dequeue_empty_fails() {
        let mut wq: WaitQueue<u32> = WaitQueue::new();
        assert!(matches!(wq.dequeue(), Err(Error::QueueEmpty)));
        assert_eq!(wq.len(), 0);

        // Still usable afterwards
        wq.enqueue(9);
        assert_eq!(wq.dequeue().unwrap(), 9);
    }

    #[test]
    fn test_destroy() {
        let wq: WaitQueue<u32> = WaitQueue::new();
        assert!(wq.destroy().is_ok());

        let wq = queue_of(&[1, 2]);
        let (wq, err) = wq.destroy().unwrap_err();
        assert!(matches!(err, Error::NotEmpty(2)));
        assert_eq!(contents(&wq), vec![1, 2]);
    }

    #[test]
    fn test_delete_first_occurrence() {
        let mut wq = queue_of(&[1, 2, 3, 2, 4]);
        wq.delete(&2).unwrap();
        assert_eq!(contents(&wq), vec![1, 3, 2, 4]);
    }

    #[test]
    fn test_delete_head_and_tail() {
        let mut wq = queue_of(&[1, 2, 3]);

        wq.delete(&1).unwrap();
        assert_eq!(contents(&wq), vec![2, 3]);

        wq.delete(&3).unwrap();
        assert_eq!(contents(&wq), vec![2]);

        // The tail must still be correct for appends
        wq.enqueue(7);
        assert_eq!(contents(&wq), vec![2, 7]);

        wq.delete(&2).unwrap();
        wq.delete(&7).unwrap();
        assert!(wq.is_empty());
    }

    #[test]
    fn test_delete_missing() {
        let mut wq = queue_of(&[1, 2]);
        assert!(matches!(wq.delete(&9), Err(Error::NotFound)));
        assert_eq!(contents(&wq), vec![1, 2]);

        let mut empty: WaitQueue<u32> = WaitQueue::new();
        assert!(matches!(empty.delete(&1), Err(Error::QueueEmpty)));
    }

    #[test]
    fn test_iterate_visits_in_order() {
        let mut wq = queue_of(&[5, 6, 7]);
        let mut seen = Vec::new();

        let removed = wq.iterate(|&item| {
            seen.push(item);
            Visit::Continue
        });

        assert_eq!(removed, 0);
        assert_eq!(seen, vec![5, 6, 7]);
    }

    #[test]
    fn test_iterate_removes_current() {
        let mut wq = queue_of(&[1, 2, 3, 4, 5, 6]);
        let mut seen = Vec::new();

        let removed = wq.iterate(|&item| {
            seen.push(item);
            if item % 2 == 0 {
                Visit::Remove
            } else {
                Visit::Continue
            }
        });

        assert_eq!(removed, 3);
        assert_eq!(seen, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(contents(&wq), vec![1, 3, 5]);
    }

    #[test]
    fn test_iterate_stop() {
        let mut wq = queue_of(&[1, 2, 3]);
        let mut seen = Vec::new();

        wq.iterate(|&item| {
            seen.push(item);
            if item == 2 {
                Visit::Stop
            } else {
                Visit::Continue
            }
        });

        assert_eq!(seen, vec![1, 2]);
        assert_eq!(wq.len(), 3);
    }

    #[test]
    fn test_contains() {
        let wq = queue_of(&[10, 20]);
        assert!(wq.contains(&20));
        assert!(!wq.contains(&30));
    }
}
