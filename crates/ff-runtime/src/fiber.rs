//! Fibers: a stack, a saved register context and an entry closure
//!
//! # Lifecycle
//!
//! ```text
//! create ──> Created ──start──> Ready <──> Running <──> Blocked
//!                                             │
//!                                   entry returns / panics
//!                                             ▼
//!                                          Finished ──delete / drop──> freed
//! ```
//!
//! A `Fiber` handle is the owner. Dropping it on a fiber that has not
//! started or has finished frees the stack right away; dropping it on a
//! live fiber detaches it and the scheduler frees the stack once the
//! entry returns.

use std::any::Any;
use std::cell::{Cell, RefCell, UnsafeCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use ff_core::{kerror, kfatal, FfError, FfResult, FiberId, FiberState};

use crate::arch::{self, Context};
use crate::memory::FiberStack;
use crate::scheduler::Scheduler;
use crate::sync::Event;
use crate::tls;

pub(crate) type Entry = Box<dyn FnOnce()>;

pub(crate) struct FiberInner {
    id: Cell<FiberId>,
    context: UnsafeCell<Context>,
    state: Cell<FiberState>,
    entry: RefCell<Option<Entry>>,
    /// `None` for the root fiber, which runs on the thread's own stack
    stack: Option<FiberStack>,
    /// Manual-reset, set when the entry returns or panics
    finished: Event,
    panicked: Cell<bool>,
    detached: Cell<bool>,
}

impl FiberInner {
    /// The fiber that adopts the calling OS thread's stack
    pub(crate) fn root(sched: &Scheduler) -> Self {
        Self {
            id: Cell::new(FiberId::NONE),
            context: UnsafeCell::new(Context::default()),
            state: Cell::new(FiberState::Running),
            entry: RefCell::new(None),
            stack: None,
            finished: Event::manual(sched),
            panicked: Cell::new(false),
            detached: Cell::new(false),
        }
    }

    /// A fresh fiber whose first switch-in runs `entry` on `stack`.
    /// The context is bound later by `bind`, once the inner has a stable
    /// address.
    pub(crate) fn new(sched: &Scheduler, stack: FiberStack, entry: Entry) -> Self {
        Self {
            id: Cell::new(FiberId::NONE),
            context: UnsafeCell::new(Context::default()),
            state: Cell::new(FiberState::Created),
            entry: RefCell::new(Some(entry)),
            stack: Some(stack),
            finished: Event::manual(sched),
            panicked: Cell::new(false),
            detached: Cell::new(false),
        }
    }

    /// Point the context at `fiber_entry` with this inner as argument
    pub(crate) fn bind(self: &Rc<Self>) {
        if let Some(stack) = &self.stack {
            let arg = Rc::as_ptr(self) as usize;
            // Safety: the stack lives as long as the inner, and the inner
            // outlives every switch into it (the scheduler table keeps it)
            unsafe { arch::init_context(&mut *self.context.get(), stack.top(), fiber_entry, arg) };
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> FiberId {
        self.id.get()
    }

    #[inline]
    pub(crate) fn set_id(&self, id: FiberId) {
        self.id.set(id);
    }

    #[inline]
    pub(crate) fn state(&self) -> FiberState {
        self.state.get()
    }

    #[inline]
    pub(crate) fn set_state(&self, state: FiberState) {
        self.state.set(state);
    }

    #[inline]
    pub(crate) fn context_ptr(&self) -> *mut Context {
        self.context.get()
    }

    #[inline]
    pub(crate) fn is_detached(&self) -> bool {
        self.detached.get()
    }

    pub(crate) fn finished_event(&self) -> &Event {
        &self.finished
    }
}

/// Runs on the fiber's own stack; never returns
unsafe extern "C" fn fiber_entry(arg: usize) -> ! {
    let Some(sched) = tls::current() else {
        kfatal!("fiber started on a thread without a scheduler");
    };
    sched.reap_zombies();

    {
        // Safety: `arg` is the inner bound in `bind`, kept alive by the
        // scheduler's table while this fiber can run
        let fiber = unsafe { &*(arg as *const FiberInner) };
        let entry = fiber.entry.borrow_mut().take();
        if let Some(entry) = entry {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(entry)) {
                fiber.panicked.set(true);
                kerror!("fiber {} panicked: {}", fiber.id(), panic_message(&*payload));
            }
        }
    }

    sched.exit_current()
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic payload>"
    }
}

/// Owning handle to a fiber
pub struct Fiber {
    inner: Rc<FiberInner>,
    sched: Scheduler,
}

impl Fiber {
    pub(crate) fn from_inner(inner: Rc<FiberInner>, sched: Scheduler) -> Self {
        Self { inner, sched }
    }

    #[inline]
    pub fn id(&self) -> FiberId {
        self.inner.id()
    }

    #[inline]
    pub fn state(&self) -> FiberState {
        self.inner.state()
    }

    #[inline]
    pub fn is_finished(&self) -> bool {
        self.inner.state().is_finished()
    }

    /// True when the entry function panicked
    pub fn panicked(&self) -> bool {
        self.inner.panicked.get()
    }

    /// Make the fiber runnable. Fails on a fiber that was already started.
    pub fn start(&self) -> FfResult<()> {
        if self.inner.state() != FiberState::Created {
            return Err(FfError::InvalidState("fiber already started"));
        }
        self.sched.make_ready(&self.inner);
        Ok(())
    }

    /// Block the current fiber until this one finishes.
    ///
    /// Returns at once for a fiber that never started or already finished.
    /// A panic in the entry is reported as `FiberPanicked`.
    pub fn join(&self) -> FfResult<()> {
        match self.inner.state() {
            FiberState::Created => return Ok(()),
            FiberState::Finished => {}
            _ => {
                if self.sched.current_id() == self.id() {
                    return Err(FfError::InvalidState("fiber cannot join itself"));
                }
                self.inner.finished.wait();
            }
        }
        if self.inner.panicked.get() {
            Err(FfError::FiberPanicked(self.id()))
        } else {
            Ok(())
        }
    }

    /// Free the fiber now. Deleting the running fiber, or one that started
    /// but has not finished, is a fatal error.
    pub fn delete(self) {
        if self.sched.current_id() == self.id() {
            kfatal!("fiber {} deleted while running", self.id());
        }
        if self.inner.state().is_alive() {
            kfatal!("fiber {} deleted before finishing", self.id());
        }
        drop(self);
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        match self.inner.state() {
            FiberState::Created | FiberState::Finished => self.sched.remove_fiber(self.id()),
            _ => self.inner.detached.set(true),
        }
    }
}

impl fmt::Debug for Fiber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fiber")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_scheduler;
    use std::time::Duration;

    #[test]
    fn test_join_before_start_and_after_finish() {
        with_scheduler(|sched| {
            let ran = Rc::new(Cell::new(false));
            let r = Rc::clone(&ran);
            let fiber = sched.create(move || r.set(true), 0);
            assert_eq!(fiber.state(), FiberState::Created);
            fiber.join().unwrap();
            assert!(!ran.get());

            fiber.start().unwrap();
            assert_eq!(
                fiber.start(),
                Err(FfError::InvalidState("fiber already started"))
            );
            fiber.join().unwrap();
            assert!(ran.get());
            assert!(fiber.is_finished());
            fiber.join().unwrap();
            fiber.delete();
        });
    }

    #[test]
    fn test_many_fibers_increment_counter() {
        with_scheduler(|sched| {
            let counter = Rc::new(Cell::new(0));
            let fibers: Vec<_> = (0..100)
                .map(|_| {
                    let c = Rc::clone(&counter);
                    let s = sched.clone();
                    sched.spawn(move || {
                        s.yield_now();
                        c.set(c.get() + 1);
                    })
                })
                .collect();
            for f in &fibers {
                f.join().unwrap();
            }
            assert_eq!(counter.get(), 100);
        });
    }

    #[test]
    fn test_panic_reported_by_join() {
        with_scheduler(|sched| {
            let fiber = sched.spawn(|| panic!("boom"));
            let id = fiber.id();
            assert_eq!(fiber.join(), Err(FfError::FiberPanicked(id)));
            assert!(fiber.panicked());

            // the scheduler keeps going
            let ok = sched.spawn(|| {});
            ok.join().unwrap();
        });
    }

    #[test]
    fn test_detached_fiber_is_reclaimed() {
        with_scheduler(|sched| {
            let done = Rc::new(Cell::new(false));
            let d = Rc::clone(&done);
            let s = sched.clone();
            drop(sched.spawn(move || {
                s.sleep(Duration::from_millis(5));
                d.set(true);
            }));
            let before = sched.fiber_count();
            sched.sleep(Duration::from_millis(50));
            assert!(done.get());
            assert_eq!(sched.fiber_count(), before - 1);
        });
    }

    #[test]
    fn test_join_ignores_stray_schedule() {
        with_scheduler(|sched| {
            let s = sched.clone();
            let target = Rc::new(sched.spawn(move || s.sleep(Duration::from_millis(40))));
            let seen = Rc::new(Cell::new(None));
            let joiner = {
                let (t, seen) = (Rc::clone(&target), Rc::clone(&seen));
                sched.spawn(move || {
                    let joined = t.join();
                    seen.set(Some((joined.is_ok(), t.is_finished())));
                })
            };
            sched.yield_now();

            sched.schedule_fiber(joiner.id());
            sched.yield_now();
            assert_eq!(seen.get(), None);
            assert_eq!(joiner.state(), FiberState::Blocked);

            joiner.join().unwrap();
            assert_eq!(seen.get(), Some((true, true)));
        });
    }
}
