//! aarch64 context switching (AAPCS64)
//!
//! Callee-saved state is x19-x28, the frame pointer, the link register,
//! sp and the low halves of v8-v15.

use std::arch::naked_asm;

use super::EntryFn;

/// Saved register state of a suspended fiber
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    pub x19_x28: [u64; 10], // 0x00
    pub fp: u64,            // 0x50
    pub lr: u64,            // 0x58
    pub sp: u64,            // 0x60
    pub d8_d15: [u64; 8],   // 0x68
}

/// Prepare `ctx` so that the first switch into it calls `entry(arg)` on
/// the given stack.
///
/// # Safety
///
/// `stack_top` must be the high end of a mapped, writable stack that
/// outlives every switch into `ctx`. `entry` must never return.
#[inline]
pub unsafe fn init_context(ctx: &mut Context, stack_top: *mut u8, entry: EntryFn, arg: usize) {
    let mut regs = [0u64; 10];
    regs[0] = entry as usize as u64; // x19
    regs[1] = arg as u64; // x20

    *ctx = Context {
        x19_x28: regs,
        fp: 0,
        lr: fiber_trampoline as usize as u64,
        sp: ((stack_top as usize) & !0xF) as u64,
        d8_d15: [0; 8],
    };
}

/// First code a fresh fiber runs: `x19(x20)`
#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov x0, x20",
        "blr x19",
        // entry functions never return
        "brk #0",
    );
}

/// Save the running context into `old` and resume `new`.
///
/// # Safety
///
/// Both pointers must be valid; `new` must hold a context produced by
/// `init_context` or by a previous `switch_context`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // save into old (x0)
        "stp x19, x20, [x0, #0x00]",
        "stp x21, x22, [x0, #0x10]",
        "stp x23, x24, [x0, #0x20]",
        "stp x25, x26, [x0, #0x30]",
        "stp x27, x28, [x0, #0x40]",
        "stp x29, x30, [x0, #0x50]",
        "mov x9, sp",
        "str x9, [x0, #0x60]",
        "stp d8, d9, [x0, #0x68]",
        "stp d10, d11, [x0, #0x78]",
        "stp d12, d13, [x0, #0x88]",
        "stp d14, d15, [x0, #0x98]",
        // load from new (x1)
        "ldp x19, x20, [x1, #0x00]",
        "ldp x21, x22, [x1, #0x10]",
        "ldp x23, x24, [x1, #0x20]",
        "ldp x25, x26, [x1, #0x30]",
        "ldp x27, x28, [x1, #0x40]",
        "ldp x29, x30, [x1, #0x50]",
        "ldr x9, [x1, #0x60]",
        "mov sp, x9",
        "ldp d8, d9, [x1, #0x68]",
        "ldp d10, d11, [x1, #0x78]",
        "ldp d12, d13, [x1, #0x88]",
        "ldp d14, d15, [x1, #0x98]",
        "ret",
    );
}
