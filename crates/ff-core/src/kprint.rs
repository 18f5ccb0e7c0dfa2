//! Kernel-style logging macros for the ff runtime
//!
//! The leveled macros (`kerror!` .. `ktrace!`) go through the `log` facade
//! under the `ff` target, prefixed with the id of the fiber that emitted
//! them. Whoever owns `main` decides where the records end up (the demo
//! binaries install `flexi_logger`); a library never installs a logger.
//!
//! `kprintln!` bypasses the facade and writes straight to stderr, and
//! `kfatal!` logs, prints and aborts the process.
//!
//! # Environment Variables
//!
//! - `FF_FLUSH_EPRINT=1` - Flush stderr after each `kprintln!`
//!
//! # Usage
//!
//! ```ignore
//! use ff_core::{kdebug, kwarn};
//!
//! kdebug!("switching to {}", next);
//! kwarn!("stale token {:?}", token);
//! ```

use std::cell::Cell;
use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

#[doc(hidden)]
pub use log as __log;

/// Target used for every record emitted by the runtime
pub const TARGET: &str = "ff";

static FLUSH_ENABLED: AtomicBool = AtomicBool::new(false);
static INITIALIZED: AtomicBool = AtomicBool::new(false);

thread_local! {
    /// Raw id of the fiber currently running on this thread
    static FIBER_ID: Cell<u64> = const { Cell::new(u64::MAX) };
}

/// Read `FF_FLUSH_EPRINT` once
pub fn init() {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return;
    }
    if let Ok(val) = std::env::var("FF_FLUSH_EPRINT") {
        let flush = matches!(val.as_str(), "1" | "true" | "yes" | "on");
        FLUSH_ENABLED.store(flush, Ordering::Relaxed);
    }
}

#[inline]
pub fn flush_enabled() -> bool {
    if !INITIALIZED.load(Ordering::Relaxed) {
        init();
    }
    FLUSH_ENABLED.load(Ordering::Relaxed)
}

pub fn set_flush_enabled(enabled: bool) {
    INITIALIZED.store(true, Ordering::SeqCst);
    FLUSH_ENABLED.store(enabled, Ordering::Relaxed);
}

/// Record which fiber is running (called by the scheduler on every switch)
#[inline]
pub fn set_fiber_id(raw: u64) {
    FIBER_ID.with(|c| c.set(raw));
}

#[inline]
pub fn clear_fiber_id() {
    FIBER_ID.with(|c| c.set(u64::MAX));
}

/// Prefix rendered in front of every leveled record
#[doc(hidden)]
pub struct FiberContext;

impl fmt::Display for FiberContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raw = FIBER_ID.with(|c| c.get());
        if raw == u64::MAX {
            Ok(())
        } else {
            write!(f, "[fiber {}] ", crate::id::FiberId::from_raw(raw))
        }
    }
}

#[doc(hidden)]
pub fn _kprintln_impl(args: fmt::Arguments<'_>) {
    let stderr = std::io::stderr();
    let mut handle = stderr.lock();
    let _ = handle.write_fmt(args);
    let _ = handle.write_all(b"\n");
    if flush_enabled() {
        let _ = handle.flush();
    }
}

#[doc(hidden)]
pub fn _fatal_impl(args: fmt::Arguments<'_>) -> ! {
    log::error!(target: TARGET, "{}FATAL: {}", FiberContext, args);
    {
        let stderr = std::io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(handle, "ff: fatal: {}{}", FiberContext, args);
        let _ = handle.flush();
    }
    std::process::abort()
}

/// Print to stderr with newline, bypassing the log facade
#[macro_export]
macro_rules! kprintln {
    () => {{
        $crate::kprint::_kprintln_impl(format_args!(""));
    }};
    ($($arg:tt)*) => {{
        $crate::kprint::_kprintln_impl(format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::kprint::__log::error!(
            target: $crate::kprint::TARGET,
            "{}{}",
            $crate::kprint::FiberContext,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::kprint::__log::warn!(
            target: $crate::kprint::TARGET,
            "{}{}",
            $crate::kprint::FiberContext,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::kprint::__log::info!(
            target: $crate::kprint::TARGET,
            "{}{}",
            $crate::kprint::FiberContext,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::kprint::__log::debug!(
            target: $crate::kprint::TARGET,
            "{}{}",
            $crate::kprint::FiberContext,
            format_args!($($arg)*)
        );
    }};
}

#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        $crate::kprint::__log::trace!(
            target: $crate::kprint::TARGET,
            "{}{}",
            $crate::kprint::FiberContext,
            format_args!($($arg)*)
        );
    }};
}

/// Log at error level and abort: the runtime's state can no longer be trusted
#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {
        $crate::kprint::_fatal_impl(format_args!($($arg)*))
    };
}
