//! Fiber mutex with direct hand-off
//!
//! Unlocking with waiters present does not release the lock: ownership
//! passes straight to the oldest waiter, so a fiber that keeps re-locking
//! cannot starve the others.

use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::time::Duration;

use super::{park, park_with_timeout, WaitQueue};
use crate::scheduler::Scheduler;

pub struct Mutex<T> {
    sched: Scheduler,
    locked: Cell<bool>,
    waiters: Rc<RefCell<WaitQueue>>,
    value: UnsafeCell<T>,
}

impl<T> Mutex<T> {
    pub fn new(sched: &Scheduler, value: T) -> Self {
        Self {
            sched: sched.clone(),
            locked: Cell::new(false),
            waiters: Rc::new(RefCell::new(WaitQueue::new())),
            value: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        if let Some(guard) = self.try_lock() {
            return guard;
        }
        // returns once unlock has handed the lock to us
        park(&self.sched, &self.waiters);
        MutexGuard { mutex: self }
    }

    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        if self.locked.get() {
            return None;
        }
        self.locked.set(true);
        Some(MutexGuard { mutex: self })
    }

    /// `None` when the lock was not handed over within `timeout`
    pub fn lock_with_timeout(&self, timeout: Duration) -> Option<MutexGuard<'_, T>> {
        if let Some(guard) = self.try_lock() {
            return Some(guard);
        }
        if timeout.is_zero() {
            return None;
        }
        park_with_timeout(&self.sched, &self.waiters, timeout).then(|| MutexGuard { mutex: self })
    }

    pub fn is_locked(&self) -> bool {
        self.locked.get()
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.value.get_mut()
    }

    pub fn into_inner(self) -> T {
        self.value.into_inner()
    }

    fn unlock(&self) {
        let next = self.waiters.borrow_mut().pop_front();
        match next {
            Some(id) => self.sched.schedule_fiber(id),
            None => self.locked.set(false),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.locked.get())
            .field("waiters", &self.waiters.borrow().len())
            .finish_non_exhaustive()
    }
}

pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard is the lock owner; fibers never run in parallel
        unsafe { &*self.mutex.value.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // Safety: as above, and the guard is unique
        unsafe { &mut *self.mutex.value.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        self.mutex.unlock();
    }
}
