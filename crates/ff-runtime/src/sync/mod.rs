//! Fiber synchronization primitives
//!
//! Everything here reduces to two scheduler operations: park the current
//! fiber on a private wait-list and `yield_fiber`, or pop a waiter and
//! `schedule_fiber` it. Timed variants add a timeout whose callback pulls
//! the fiber off the wait-list; whoever removes the fiber from the list
//! first is the one that resumes it.
//!
//! A parked fiber only trusts its [`Grant`]. `schedule_fiber` is public and
//! the port may deliver leftover tokens, so a resume without the grant (and
//! without the timeout having fired) just parks the fiber again.
//!
//! These types are `!Send`: they belong to the scheduler thread.

mod blocking;
mod event;
mod mutex;
mod pool;
mod semaphore;

pub use blocking::{Blocking, BlockingQueue, BlockingStack, Container};
pub use event::{Event, EventMode};
pub use mutex::{Mutex, MutexGuard};
pub use pool::{Pool, PoolGuard};
pub use semaphore::Semaphore;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ff_core::FiberId;

use crate::scheduler::Scheduler;

/// Set by the hand-off path when it picks a parked fiber
#[derive(Debug, Clone, Default)]
pub(crate) struct Grant(Rc<Cell<bool>>);

impl Grant {
    #[inline]
    pub(crate) fn is_set(&self) -> bool {
        self.0.get()
    }

    #[inline]
    fn set(&self) {
        self.0.set(true);
    }
}

/// FIFO list of parked fibers
#[derive(Debug, Default)]
pub(crate) struct WaitQueue {
    fibers: VecDeque<(FiberId, Grant)>,
}

impl WaitQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Park `id`; the returned grant is set when a waker picks it
    pub(crate) fn push(&mut self, id: FiberId) -> Grant {
        let grant = Grant::default();
        self.fibers.push_back((id, grant.clone()));
        grant
    }

    /// Oldest waiter, granted
    pub(crate) fn pop_front(&mut self) -> Option<FiberId> {
        self.fibers.pop_front().map(|(id, grant)| {
            grant.set();
            id
        })
    }

    /// Remove `id` without granting it (timeout path); true when present
    pub(crate) fn remove(&mut self, id: FiberId) -> bool {
        match self.fibers.iter().position(|(f, _)| *f == id) {
            Some(pos) => {
                self.fibers.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Grant and remove every waiter
    pub(crate) fn drain(&mut self) -> impl Iterator<Item = FiberId> + '_ {
        self.fibers.drain(..).map(|(id, grant)| {
            grant.set();
            id
        })
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.fibers.len()
    }

    #[inline]
    pub(crate) fn is_empty(&self) -> bool {
        self.fibers.is_empty()
    }
}

/// Park the current fiber on `waiters` until a waker grants it
pub(crate) fn park(sched: &Scheduler, waiters: &RefCell<WaitQueue>) {
    let grant = waiters.borrow_mut().push(sched.current_id());
    while !grant.is_set() {
        sched.yield_fiber();
    }
}

/// `park` bounded by `timeout`. False when the timeout pulled the fiber
/// off the list first. A timeout too large to express as a deadline
/// parks without one.
pub(crate) fn park_with_timeout(
    sched: &Scheduler,
    waiters: &Rc<RefCell<WaitQueue>>,
    timeout: Duration,
) -> bool {
    let Some(deadline) = Instant::now().checked_add(timeout) else {
        park(sched, waiters);
        return true;
    };

    let grant = waiters.borrow_mut().push(sched.current_id());
    let list = Rc::clone(waiters);
    let owner = sched.clone();
    let handle = sched.register_timeout_at(Some(deadline), move |fiber| {
        let parked = list.borrow_mut().remove(fiber);
        if parked {
            owner.schedule_fiber(fiber);
        }
        parked
    });
    while !grant.is_set() && !sched.is_timeout_expired(&handle) {
        sched.yield_fiber();
    }
    sched.deregister_timeout_operation(handle)
}
