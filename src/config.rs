// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! Runtime Configuration
//!
//! Tunables for a run of the scheduler. Values come from
//! `RuntimeConfig::default()` and may be overridden from the environment:
//!
//! - `UTHREAD_STACK_SIZE` - bytes per thread stack, `k`/`m` suffixes accepted
//! - `UTHREAD_PREEMPT_HZ` - preemption tick frequency
//!
//! # Usage
//!
//! ```ignore
//! let config = RuntimeConfig::from_env().with_stack_size(128 * 1024);
//! uthread::run_with(config, true, || { /* ... */ })?;
//! ```

use crate::arch;

/// Default stack size per thread
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Smallest stack the runtime will hand out
pub const MIN_STACK_SIZE: usize = 16 * 1024;

/// Largest stack size accepted (256 TiB); requests above are clamped
///
/// Exceeds the user address space of the supported targets, so a stack
/// this large fails to map with `Error::OutOfMemory` instead of
/// overflowing the size arithmetic.
pub const MAX_STACK_SIZE: usize = 1 << 48;

/// Default preemption frequency (100 ticks per second)
pub const DEFAULT_PREEMPT_HZ: u32 = 100;

/// Highest accepted preemption frequency
pub const MAX_PREEMPT_HZ: u32 = 1000;

/// Environment variable overriding the stack size
pub const ENV_STACK_SIZE: &str = "UTHREAD_STACK_SIZE";

/// Environment variable overriding the preemption frequency
pub const ENV_PREEMPT_HZ: &str = "UTHREAD_PREEMPT_HZ";

/// Scheduler configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Usable stack bytes per green thread
    pub stack_size: usize,
    /// Preemption ticks per second when preemption is requested
    pub preempt_hz: u32,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            preempt_hz: DEFAULT_PREEMPT_HZ,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overridden by `UTHREAD_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden through an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(raw) = lookup(ENV_STACK_SIZE) {
            match parse_size(&raw) {
                Some(size) if size <= MAX_STACK_SIZE => config.stack_size = size,
                _ => log::warn!("config: ignoring {}={:?}", ENV_STACK_SIZE, raw),
            }
        }

        if let Some(raw) = lookup(ENV_PREEMPT_HZ) {
            match raw.trim().parse::<u32>() {
                Ok(hz) => config.preempt_hz = hz,
                Err(_) => log::warn!("config: ignoring {}={:?}", ENV_PREEMPT_HZ, raw),
            }
        }

        config.validated()
    }

    /// Set the stack size
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self.validated()
    }

    /// Set the preemption frequency
    pub fn with_preempt_hz(mut self, preempt_hz: u32) -> Self {
        self.preempt_hz = preempt_hz;
        self.validated()
    }

    /// Clamp values into the ranges the runtime supports
    ///
    /// Stacks are clamped to `MIN_STACK_SIZE..=MAX_STACK_SIZE` and rounded
    /// up to whole pages; the frequency is clamped to `1..=MAX_PREEMPT_HZ`.
    pub fn validated(self) -> Self {
        let stack_size = self.stack_size.clamp(MIN_STACK_SIZE, MAX_STACK_SIZE);
        let stack_size = arch::round_to_pages(stack_size).unwrap_or(MAX_STACK_SIZE);

        Self {
            stack_size,
            preempt_hz: self.preempt_hz.clamp(1, MAX_PREEMPT_HZ),
        }
    }

    /// Tick period in microseconds
    pub fn preempt_interval_us(&self) -> u64 {
        1_000_000 / u64::from(self.preempt_hz.clamp(1, MAX_PREEMPT_HZ))
    }
}

/// Parse a byte count such as `65536`, `64k` or `1M`
fn parse_size(raw: &str) -> Option<usize> {
    let raw = raw.trim();
    let (digits, shift) = match raw.char_indices().last()? {
        (idx, 'k' | 'K') => (&raw[..idx], 10),
        (idx, 'm' | 'M') => (&raw[..idx], 20),
        _ => (raw, 0),
    };

    let value: usize = digits.trim().parse().ok()?;
    value.checked_mul(1usize << shift)
}
