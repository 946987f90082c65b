// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! x86_64 context frame layout

/// MXCSR for a fresh thread: all exceptions masked, round to nearest
const MXCSR_DEFAULT: u64 = 0x1F80;

/// x87 control word for a fresh thread
const FPUCW_DEFAULT: u64 = 0x037F;

/// Frame popped by `uthread_context_switch`
///
/// This must match the push order in switch.S
#[repr(C)]
pub(crate) struct SwitchFrame {
    csr: u64,
    r15: u64,
    r14: u64,
    r13: u64,
    r12: u64,
    rbx: u64,
    rbp: u64,
    ret: u64,
}

/// Build the initial frame for a fresh stack
///
/// The frame makes the first switch into the stack "return" into the
/// trampoline with `entry` in r12 and `arg` in r13. The trampoline's
/// `ret` target sits so that rsp is 16-byte aligned after the pop, which
/// gives `entry` the ABI-mandated alignment once the trampoline calls it.
///
/// Returns the stack pointer to save in the context.
///
/// # Safety
///
/// `top` must be the one-past-the-end address of a writable region with
/// room for at least 96 bytes below it.
pub(crate) unsafe fn init_frame(top: usize, entry: usize, arg: usize, trampoline: usize) -> usize {
    let aligned = (top & !0xF) - 16;
    let sp = aligned - core::mem::size_of::<SwitchFrame>();

    (sp as *mut SwitchFrame).write(SwitchFrame {
        csr: MXCSR_DEFAULT | (FPUCW_DEFAULT << 32),
        r15: 0,
        r14: 0,
        r13: arg as u64,
        r12: entry as u64,
        rbx: 0,
        rbp: 0,
        ret: trampoline as u64,
    });

    sp
}
