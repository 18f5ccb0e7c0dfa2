//! Thread-local handle to the scheduler owning this OS thread
//!
//! Set by `Scheduler::initialize`, cleared by `Scheduler::shutdown`. The
//! free functions of the `ff` facade and the fiber entry wrapper go through
//! here; everything else takes an explicit `Scheduler`.

use std::cell::RefCell;

use crate::scheduler::Scheduler;

thread_local! {
    static CURRENT: RefCell<Option<Scheduler>> = const { RefCell::new(None) };
}

#[inline]
pub(crate) fn set_current(sched: Scheduler) {
    CURRENT.with(|c| *c.borrow_mut() = Some(sched));
}

/// Remove and return the handle (its drop happens outside the borrow)
#[inline]
pub(crate) fn take_current() -> Option<Scheduler> {
    CURRENT.with(|c| c.borrow_mut().take())
}

/// Scheduler of the calling thread, if any
#[inline]
pub fn current() -> Option<Scheduler> {
    CURRENT
        .try_with(|c| c.borrow().clone())
        .ok()
        .flatten()
}

#[inline]
pub fn is_initialized() -> bool {
    CURRENT
        .try_with(|c| c.borrow().is_some())
        .unwrap_or(false)
}
