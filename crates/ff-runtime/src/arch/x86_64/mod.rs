//! x86_64 context switching (System V)
//!
//! Saves only what the ABI makes callee-saved: rsp, rbx, rbp, r12-r15,
//! the MXCSR control bits and the x87 control word. Everything else is
//! clobbered by the call into `switch_context` anyway.

use std::arch::naked_asm;

use super::EntryFn;

const MXCSR_DEFAULT: u32 = 0x1F80;
const FPUCW_DEFAULT: u16 = 0x037F;

/// Saved register state of a suspended fiber
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
pub struct Context {
    pub rsp: u64, // 0x00
    pub rip: u64, // 0x08
    pub rbx: u64, // 0x10
    pub rbp: u64, // 0x18
    pub r12: u64, // 0x20
    pub r13: u64, // 0x28
    pub r14: u64, // 0x30
    pub r15: u64, // 0x38
    pub mxcsr: u32, // 0x40
    pub fpucw: u16, // 0x44
    _pad: u16,
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
    // 16-byte aligned at the trampoline; its `call` leaves the entry
    // function at rsp % 16 == 8 as the ABI expects.
    let sp = (stack_top as usize) & !0xF;

    *ctx = Context {
        rsp: sp as u64,
        rip: fiber_trampoline as usize as u64,
        r12: entry as usize as u64,
        r13: arg as u64,
        mxcsr: MXCSR_DEFAULT,
        fpucw: FPUCW_DEFAULT,
        ..Context::default()
    };
}

/// First code a fresh fiber runs: `r12(r13)`
#[unsafe(naked)]
unsafe extern "C" fn fiber_trampoline() {
    naked_asm!(
        "mov rdi, r13",
        "call r12",
        // entry functions never return
        "ud2",
    );
}

/// Save the running context into `old` and resume `new`.
///
/// Returns when something switches back into `old`.
///
/// # Safety
///
/// Both pointers must be valid; `new` must hold a context produced by
/// `init_context` or by a previous `switch_context`.
#[unsafe(naked)]
pub unsafe extern "C" fn switch_context(_old: *mut Context, _new: *const Context) {
    naked_asm!(
        // save into old (rdi)
        "mov [rdi + 0x00], rsp",
        "lea rax, [rip + 1f]",
        "mov [rdi + 0x08], rax",
        "mov [rdi + 0x10], rbx",
        "mov [rdi + 0x18], rbp",
        "mov [rdi + 0x20], r12",
        "mov [rdi + 0x28], r13",
        "mov [rdi + 0x30], r14",
        "mov [rdi + 0x38], r15",
        "stmxcsr [rdi + 0x40]",
        "fnstcw [rdi + 0x44]",
        // load from new (rsi)
        "mov rsp, [rsi + 0x00]",
        "mov rax, [rsi + 0x08]",
        "mov rbx, [rsi + 0x10]",
        "mov rbp, [rsi + 0x18]",
        "mov r12, [rsi + 0x20]",
        "mov r13, [rsi + 0x28]",
        "mov r14, [rsi + 0x30]",
        "mov r15, [rsi + 0x38]",
        "ldmxcsr [rsi + 0x40]",
        "fldcw [rsi + 0x44]",
        "jmp rax",
        // resumed: rsp points at our caller's return address
        "1:",
        "ret",
    );
}
