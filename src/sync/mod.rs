// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Synchronization Primitives
//!
//! # Primitives
//!
//! - **Wait Queue**: FIFO of thread handles, also used as the ready queue
//! - **Semaphore**: counting semaphore with FIFO wake order
//!
//! Both are meant for green threads of a single runtime and are neither
//! `Send` nor `Sync`.

pub mod semaphore;
pub mod wait_queue;

// Re-exports
pub use semaphore::Semaphore;
pub use wait_queue::{Visit, WaitQueue};
