//! Bounded pool of lazily constructed, reusable entries

use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops::Deref;
use std::rc::Rc;
use std::time::Duration;

use super::Semaphore;
use crate::scheduler::Scheduler;

struct Entry<T> {
    value: Rc<T>,
    acquired: bool,
}

struct Inner<T> {
    entries: RefCell<Vec<Entry<T>>>,
    free: RefCell<Vec<usize>>,
    available: Semaphore,
    make: Box<dyn Fn() -> T>,
    max_size: usize,
    constructed: Cell<usize>,
}

impl<T> Inner<T> {
    /// Called with one semaphore unit held
    fn checkout(self: &Rc<Self>) -> PoolGuard<T> {
        let reuse = self.free.borrow_mut().pop();
        let index = match reuse {
            Some(index) => index,
            None => {
                // a panicking constructor must not leak the unit
                let unit = UnitGuard(&self.available);
                // constructor runs with no borrow held: it may block
                let value = Rc::new((self.make)());
                std::mem::forget(unit);
                self.constructed.set(self.constructed.get() + 1);
                let mut entries = self.entries.borrow_mut();
                entries.push(Entry {
                    value,
                    acquired: false,
                });
                entries.len() - 1
            }
        };
        let value = {
            let mut entries = self.entries.borrow_mut();
            let entry = &mut entries[index];
            entry.acquired = true;
            Rc::clone(&entry.value)
        };
        PoolGuard {
            pool: Rc::clone(self),
            index,
            value,
        }
    }

    fn release(&self, index: usize) {
        if let Some(entry) = self.entries.borrow_mut().get_mut(index) {
            entry.acquired = false;
        }
        self.free.borrow_mut().push(index);
        self.available.up();
    }
}

/// Returns one semaphore unit when dropped
struct UnitGuard<'a>(&'a Semaphore);

impl Drop for UnitGuard<'_> {
    fn drop(&mut self) {
        self.0.up();
    }
}

/// Pool shared between fibers (clones share state)
pub struct Pool<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: 'static> Pool<T> {
    /// At most `max_size` entries, each built by `make` on first demand
    pub fn new(sched: &Scheduler, max_size: usize, make: impl Fn() -> T + 'static) -> Self {
        Self {
            inner: Rc::new(Inner {
                entries: RefCell::new(Vec::with_capacity(max_size)),
                free: RefCell::new(Vec::with_capacity(max_size)),
                available: Semaphore::new(sched, max_size),
                make: Box::new(make),
                max_size,
                constructed: Cell::new(0),
            }),
        }
    }
}

impl<T> Pool<T> {
    /// Wait for an entry; it returns to the pool when the guard drops
    pub fn acquire(&self) -> PoolGuard<T> {
        self.inner.available.down();
        self.inner.checkout()
    }

    pub fn acquire_with_timeout(&self, timeout: Duration) -> Option<PoolGuard<T>> {
        if self.inner.available.down_with_timeout(timeout) {
            Some(self.inner.checkout())
        } else {
            None
        }
    }

    /// Visit every constructed entry with its acquired flag
    pub fn for_each_entry(&self, mut f: impl FnMut(&T, bool)) {
        let snapshot: Vec<(Rc<T>, bool)> = self
            .inner
            .entries
            .borrow()
            .iter()
            .map(|e| (Rc::clone(&e.value), e.acquired))
            .collect();
        for (value, acquired) in snapshot {
            f(&value, acquired);
        }
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    /// Entries constructed so far
    pub fn size(&self) -> usize {
        self.inner.constructed.get()
    }

    pub fn available(&self) -> usize {
        self.inner.available.count()
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("max_size", &self.inner.max_size)
            .field("size", &self.size())
            .field("available", &self.available())
            .finish()
    }
}

pub struct PoolGuard<T> {
    pool: Rc<Inner<T>>,
    index: usize,
    value: Rc<T>,
}

impl<T> Deref for PoolGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Drop for PoolGuard<T> {
    fn drop(&mut self) {
        self.pool.release(self.index);
    }
}
