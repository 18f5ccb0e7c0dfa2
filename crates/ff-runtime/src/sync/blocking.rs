//! Bounded producer/consumer containers
//!
//! `free` counts empty slots and `filled` counts items; `put` takes a free
//! slot and gives a filled one, `get` does the reverse. The container type
//! only decides which item comes out first.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;
use std::time::Duration;

use ff_core::kfatal;

use super::Semaphore;
use crate::scheduler::Scheduler;

/// Storage order of a blocking container
pub trait Container<T>: Default {
    fn push(&mut self, item: T);
    fn pop(&mut self) -> Option<T>;
    fn len(&self) -> usize;
}

impl<T> Container<T> for VecDeque<T> {
    fn push(&mut self, item: T) {
        self.push_back(item);
    }

    fn pop(&mut self) -> Option<T> {
        self.pop_front()
    }

    fn len(&self) -> usize {
        VecDeque::len(self)
    }
}

impl<T> Container<T> for Vec<T> {
    fn push(&mut self, item: T) {
        Vec::push(self, item);
    }

    fn pop(&mut self) -> Option<T> {
        Vec::pop(self)
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

struct Inner<T, C> {
    items: RefCell<C>,
    free: Semaphore,
    filled: Semaphore,
    capacity: usize,
    _item: PhantomData<T>,
}

/// Bounded container shared between fibers (clones share state)
pub struct Blocking<T, C: Container<T>> {
    inner: Rc<Inner<T, C>>,
}

/// FIFO
pub type BlockingQueue<T> = Blocking<T, VecDeque<T>>;

/// LIFO
pub type BlockingStack<T> = Blocking<T, Vec<T>>;

impl<T, C: Container<T>> Clone for Blocking<T, C> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T, C: Container<T>> Blocking<T, C> {
    pub fn new(sched: &Scheduler, capacity: usize) -> Self {
        Self {
            inner: Rc::new(Inner {
                items: RefCell::new(C::default()),
                free: Semaphore::new(sched, capacity),
                filled: Semaphore::new(sched, 0),
                capacity,
                _item: PhantomData,
            }),
        }
    }

    /// Block while full
    pub fn put(&self, item: T) {
        self.inner.free.down();
        self.push_filled(item);
    }

    /// Hands the item back when no slot freed up within `timeout`
    pub fn put_with_timeout(&self, item: T, timeout: Duration) -> Result<(), T> {
        if self.inner.free.down_with_timeout(timeout) {
            self.push_filled(item);
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Hands the item back when full. Never blocks.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        if self.inner.free.try_down() {
            self.push_filled(item);
            Ok(())
        } else {
            Err(item)
        }
    }

    /// Block while empty
    pub fn get(&self) -> T {
        self.inner.filled.down();
        self.pop_free()
    }

    pub fn get_with_timeout(&self, timeout: Duration) -> Option<T> {
        self.inner
            .filled
            .down_with_timeout(timeout)
            .then(|| self.pop_free())
    }

    pub fn try_get(&self) -> Option<T> {
        self.inner.filled.try_down().then(|| self.pop_free())
    }

    pub fn len(&self) -> usize {
        self.inner.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    fn push_filled(&self, item: T) {
        self.inner.items.borrow_mut().push(item);
        self.inner.filled.up();
    }

    fn pop_free(&self) -> T {
        let item = self.inner.items.borrow_mut().pop();
        match item {
            Some(item) => {
                self.inner.free.up();
                item
            }
            None => kfatal!("blocking container: filled count without an item"),
        }
    }
}

impl<T, C: Container<T>> fmt::Debug for Blocking<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blocking")
            .field("len", &self.len())
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}
