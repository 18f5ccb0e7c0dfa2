//! Counting semaphore built on an auto-reset event

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use super::{Event, EventMode};
use crate::scheduler::Scheduler;

struct Inner {
    count: Cell<usize>,
    event: Event,
}

/// Semaphore shared between fibers (clones share state)
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<Inner>,
}

impl Semaphore {
    pub fn new(sched: &Scheduler, initial: usize) -> Self {
        Self {
            inner: Rc::new(Inner {
                count: Cell::new(initial),
                event: Event::new(sched, EventMode::Auto, initial > 0),
            }),
        }
    }

    pub fn count(&self) -> usize {
        self.inner.count.get()
    }

    /// Take one unit without blocking
    pub fn try_down(&self) -> bool {
        let count = self.inner.count.get();
        if count == 0 {
            return false;
        }
        self.inner.count.set(count - 1);
        if count > 1 {
            // still positive: pass the wakeup on to the next waiter
            self.inner.event.set();
        }
        true
    }

    pub fn down(&self) {
        while !self.try_down() {
            self.inner.event.wait();
        }
    }

    /// False when no unit became available within `timeout`
    pub fn down_with_timeout(&self, timeout: Duration) -> bool {
        let Some(deadline) = Instant::now().checked_add(timeout) else {
            self.down();
            return true;
        };
        loop {
            if self.try_down() {
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.inner.event.wait_with_timeout(remaining) {
                return self.try_down();
            }
        }
    }

    pub fn up(&self) {
        let count = self.inner.count.get() + 1;
        self.inner.count.set(count);
        if count == 1 {
            self.inner.event.set();
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("count", &self.count())
            .finish()
    }
}
