// Copyright 2025 The Rustux Authors
//
// Use of this source code is governed by a MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT

//! aarch64 context frame layout

/// Frame restored by `uthread_context_switch`
///
/// This must match the offsets in switch.S
#[repr(C)]
pub(crate) struct SwitchFrame {
    /// x19..x28
    callee_saved: [u64; 10],
    fp: u64,
    lr: u64,
    /// d8..d15
    fp_regs: [u64; 8],
    fpcr: u64,
    _pad: u64,
}

/// Build the initial frame for a fresh stack
///
/// The first switch into the stack returns through `lr` into the
/// trampoline with `entry` in x19 and `arg` in x20.
///
/// Returns the stack pointer to save in the context.
///
/// # Safety
///
/// `top` must be the one-past-the-end address of a writable region with
/// room for at least 192 bytes below it.
pub(crate) unsafe fn init_frame(top: usize, entry: usize, arg: usize, trampoline: usize) -> usize {
    let sp = (top & !0xF) - core::mem::size_of::<SwitchFrame>();

    let mut callee_saved = [0u64; 10];
    callee_saved[0] = entry as u64;
    callee_saved[1] = arg as u64;

    (sp as *mut SwitchFrame).write(SwitchFrame {
        callee_saved,
        fp: 0,
        lr: trampoline as u64,
        fp_regs: [0; 8],
        fpcr: 0,
        _pad: 0,
    });

    sp
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_size() {
        assert_eq!(core::mem::size_of::<SwitchFrame>(), 176);
    }

    #[test]
    fn test_init_frame_alignment() {
        let mut region = [0u64; 64];
        let top = region.as_mut_ptr() as usize + core::mem::size_of_val(&region);

        let sp = unsafe { init_frame(top, 0x1000, 42, 0x2000) };
        assert_eq!(sp % 16, 0);

        let frame = unsafe { &*(sp as *const SwitchFrame) };
        assert_eq!(frame.callee_saved[0], 0x1000);
        assert_eq!(frame.callee_saved[1], 42);
        assert_eq!(frame.lr, 0x2000);
    }
}
