//! Fiber stack memory
//!
//! Each fiber owns one private mapping: a guard page at the low end
//! followed by the usable stack. Overflowing the stack faults on the guard
//! instead of silently corrupting a neighbour.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::*;
    } else {
        compile_error!("ff-runtime supports unix targets only");
    }
}

use ff_core::constants::{DEFAULT_STACK_SIZE, GUARD_SIZE, MIN_STACK_SIZE};

/// Usable size for a request: 0 means `default`, tiny requests are raised
/// to the minimum, everything is rounded up to whole pages.
pub fn effective_stack_size(requested: usize, default: usize) -> usize {
    let wanted = match requested {
        0 if default == 0 => DEFAULT_STACK_SIZE,
        0 => default,
        n => n,
    };
    round_to_page(wanted.max(MIN_STACK_SIZE))
}

#[inline]
pub(crate) fn round_to_page(n: usize) -> usize {
    let page = page_size();
    n.div_ceil(page).saturating_mul(page)
}

/// Guard region size (at least one page)
#[inline]
pub fn guard_size() -> usize {
    GUARD_SIZE.max(page_size())
}
