//! Manual- and auto-reset events

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use super::{park, park_with_timeout, WaitQueue};
use crate::scheduler::Scheduler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventMode {
    /// `set` releases every waiter and stays set until `reset`
    Manual,
    /// `set` releases at most one waiter; it only stays set when nobody
    /// was waiting, and the next successful wait clears it
    Auto,
}

struct Inner {
    sched: Scheduler,
    mode: EventMode,
    set: Cell<bool>,
    waiters: Rc<RefCell<WaitQueue>>,
}

impl Inner {
    /// Take the signal if present (auto events clear it)
    fn try_consume(&self) -> bool {
        if !self.set.get() {
            return false;
        }
        if self.mode == EventMode::Auto {
            self.set.set(false);
        }
        true
    }
}

/// Event shared between fibers (clones share state)
#[derive(Clone)]
pub struct Event {
    inner: Rc<Inner>,
}

impl Event {
    pub fn new(sched: &Scheduler, mode: EventMode, initially_set: bool) -> Self {
        Self {
            inner: Rc::new(Inner {
                sched: sched.clone(),
                mode,
                set: Cell::new(initially_set),
                waiters: Rc::new(RefCell::new(WaitQueue::new())),
            }),
        }
    }

    pub fn manual(sched: &Scheduler) -> Self {
        Self::new(sched, EventMode::Manual, false)
    }

    pub fn auto(sched: &Scheduler) -> Self {
        Self::new(sched, EventMode::Auto, false)
    }

    pub fn set(&self) {
        let inner = &self.inner;
        match inner.mode {
            EventMode::Manual => {
                inner.set.set(true);
                let woken: Vec<_> = inner.waiters.borrow_mut().drain().collect();
                for id in woken {
                    inner.sched.schedule_fiber(id);
                }
            }
            EventMode::Auto => {
                let next = inner.waiters.borrow_mut().pop_front();
                match next {
                    Some(id) => inner.sched.schedule_fiber(id),
                    None => inner.set.set(true),
                }
            }
        }
    }

    pub fn reset(&self) {
        self.inner.set.set(false);
    }

    pub fn is_set(&self) -> bool {
        self.inner.set.get()
    }

    pub fn mode(&self) -> EventMode {
        self.inner.mode
    }

    /// Number of fibers parked on the event
    pub fn waiters(&self) -> usize {
        self.inner.waiters.borrow().len()
    }

    /// Block the current fiber until the event is set
    pub fn wait(&self) {
        let inner = &self.inner;
        if inner.try_consume() {
            return;
        }
        park(&inner.sched, &inner.waiters);
    }

    /// Like `wait` but gives up after `timeout`. False on timeout; a zero
    /// timeout only polls.
    pub fn wait_with_timeout(&self, timeout: Duration) -> bool {
        let inner = &self.inner;
        if inner.try_consume() {
            return true;
        }
        if timeout.is_zero() {
            return false;
        }
        park_with_timeout(&inner.sched, &inner.waiters, timeout)
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("mode", &self.inner.mode)
            .field("set", &self.inner.set.get())
            .field("waiters", &self.waiters())
            .finish()
    }
}
