//! The per-thread scheduler
//!
//! Owns the fiber table, the run-queue, the completion port, the timeout
//! registry with its checker fiber, the thread pool and the fiber pool.
//!
//! `yield_fiber` is the only suspension point: it takes the next fiber
//! from the run-queue, or blocks in `port.get()` when the run-queue is
//! empty, and switches to it. Everything that wakes a fiber either pushes
//! it on the run-queue (`schedule_fiber`) or posts its id to the port.
//!
//! Never hold a `RefCell` borrow of scheduler state across a switch: the
//! next fiber will want the same cells.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ff_core::{kdebug, kfatal, kinfo, kprint, ktrace, kwarn};
use ff_core::{FfError, FfResult, FiberId, FiberState};
use slab::Slab;

use crate::arch::{self, Context};
use crate::config::SchedulerConfig;
use crate::fiber::{Fiber, FiberInner};
use crate::memory::{effective_stack_size, FiberStack};
use crate::port::CompletionPort;
use crate::run_queue::RunQueue;
use crate::timeout::{Checker, TimeoutHandle, TimeoutRegistry};
use crate::tls;
use crate::workers::{FiberPool, Job, ThreadPool};

pub(crate) struct SchedulerInner {
    config: SchedulerConfig,
    fibers: RefCell<Slab<Rc<FiberInner>>>,
    next_generation: Cell<u32>,
    run_queue: RefCell<RunQueue>,
    port: Arc<CompletionPort>,
    current: RefCell<Option<Rc<FiberInner>>>,
    root: Cell<FiberId>,
    /// Finished detached fibers whose stacks are freed after the next switch
    zombies: RefCell<Vec<Rc<FiberInner>>>,
    timeouts: TimeoutRegistry,
    checker: RefCell<Option<Checker>>,
    threadpool: ThreadPool,
    fiberpool: RefCell<Option<FiberPool>>,
    shut_down: Cell<bool>,
}

/// Handle to the scheduler owning the calling thread. Cheap to clone;
/// every primitive keeps one.
#[derive(Clone)]
pub struct Scheduler {
    inner: Rc<SchedulerInner>,
}

impl Scheduler {
    /// Turn the calling thread into the root fiber of a new scheduler.
    ///
    /// Fails with `AlreadyInitialized` if this thread already has one.
    pub fn initialize(config: SchedulerConfig) -> FfResult<Scheduler> {
        if tls::is_initialized() {
            return Err(FfError::AlreadyInitialized);
        }
        config.validate()?;

        let port = Arc::new(CompletionPort::new(config.port_concurrency)?);
        let threadpool = ThreadPool::new(
            Arc::clone(&port),
            config.threadpool_max_threads,
            config.threadpool_park_timeout,
        );
        let sched = Scheduler {
            inner: Rc::new(SchedulerInner {
                fibers: RefCell::new(Slab::with_capacity(64)),
                next_generation: Cell::new(1),
                run_queue: RefCell::new(RunQueue::new(config.run_queue_order)),
                port,
                current: RefCell::new(None),
                root: Cell::new(FiberId::NONE),
                zombies: RefCell::new(Vec::new()),
                timeouts: TimeoutRegistry::new(),
                checker: RefCell::new(None),
                threadpool,
                fiberpool: RefCell::new(None),
                shut_down: Cell::new(false),
                config,
            }),
        };

        let root = Rc::new(FiberInner::root(&sched));
        let root_id = sched.insert_fiber(&root);
        sched.inner.root.set(root_id);
        *sched.inner.current.borrow_mut() = Some(root);
        kprint::set_fiber_id(root_id.as_raw());
        tls::set_current(sched.clone());

        match Checker::start(&sched, sched.inner.config.timeout_scan_interval) {
            Ok(checker) => *sched.inner.checker.borrow_mut() = Some(checker),
            Err(e) => {
                sched.inner.threadpool.shutdown();
                sched.release();
                return Err(e);
            }
        }

        kinfo!("scheduler initialized (root {})", root_id);
        if sched.inner.config.debug_logging {
            kdebug!("{}", sched.inner.config);
        }
        Ok(sched)
    }

    /// Scheduler of the calling thread
    pub fn current() -> FfResult<Scheduler> {
        tls::current().ok_or(FfError::NotInitialized)
    }

    /// Stop the checker, the fiber pool and the thread pool, then free
    /// every fiber. Must run on the root fiber.
    pub fn shutdown(&self) -> FfResult<()> {
        if self.inner.shut_down.get() {
            return Ok(());
        }
        if self.current_id() != self.root_id() {
            return Err(FfError::InvalidState("shutdown must run on the root fiber"));
        }

        let fiberpool = self.inner.fiberpool.borrow_mut().take();
        if let Some(pool) = fiberpool {
            pool.shutdown();
        }
        let checker = self.inner.checker.borrow_mut().take();
        if let Some(checker) = checker {
            checker.stop(self);
        }
        self.inner.threadpool.shutdown();

        self.release();
        kinfo!("scheduler shut down");
        Ok(())
    }

    /// Drop every table entry (breaking fiber <-> scheduler cycles) and
    /// detach the scheduler from the thread
    fn release(&self) {
        let live = self
            .inner
            .fibers
            .borrow()
            .iter()
            .filter(|(_, f)| f.id() != self.root_id() && f.state().is_alive())
            .count();
        if live > 0 {
            kwarn!("{} fiber(s) still blocked at shutdown; their stacks are freed", live);
        }

        self.inner.timeouts.clear();
        self.inner.run_queue.borrow_mut().clear();
        let fibers = std::mem::take(&mut *self.inner.fibers.borrow_mut());
        let zombies = std::mem::take(&mut *self.inner.zombies.borrow_mut());
        let current = self.inner.current.borrow_mut().take();
        drop(fibers);
        drop(zombies);
        drop(current);

        self.inner.shut_down.set(true);
        drop(tls::take_current());
        kprint::clear_fiber_id();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.get()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn port(&self) -> &Arc<CompletionPort> {
        &self.inner.port
    }

    pub(crate) fn timeouts(&self) -> &TimeoutRegistry {
        &self.inner.timeouts
    }

    pub fn root_id(&self) -> FiberId {
        self.inner.root.get()
    }

    /// Id of the fiber running right now
    pub fn current_id(&self) -> FiberId {
        self.inner
            .current
            .borrow()
            .as_ref()
            .map_or(FiberId::NONE, |f| f.id())
    }

    /// Fibers in the table, root and checker included
    pub fn fiber_count(&self) -> usize {
        self.inner.fibers.borrow().len()
    }

    /// State of `id`, `None` once it has been freed
    pub fn fiber_state(&self, id: FiberId) -> Option<FiberState> {
        self.lookup(id).map(|f| f.state())
    }

    // ---------------------------------------------------------------------
    // fiber table
    // ---------------------------------------------------------------------

    fn insert_fiber(&self, fiber: &Rc<FiberInner>) -> FiberId {
        let generation = self.inner.next_generation.get();
        self.inner.next_generation.set(generation.wrapping_add(1));

        let mut fibers = self.inner.fibers.borrow_mut();
        let entry = fibers.vacant_entry();
        let id = FiberId::new(entry.key() as u32, generation);
        fiber.set_id(id);
        entry.insert(Rc::clone(fiber));
        id
    }

    fn lookup(&self, id: FiberId) -> Option<Rc<FiberInner>> {
        if id.is_none() {
            return None;
        }
        self.inner
            .fibers
            .borrow()
            .get(id.slot())
            .filter(|f| f.id() == id)
            .cloned()
    }

    fn take_fiber(&self, id: FiberId) -> Option<Rc<FiberInner>> {
        let mut fibers = self.inner.fibers.borrow_mut();
        let owned = fibers.get(id.slot()).is_some_and(|f| f.id() == id);
        owned.then(|| fibers.remove(id.slot()))
    }

    /// Free a fiber that is not running (handle dropped or deleted)
    pub(crate) fn remove_fiber(&self, id: FiberId) {
        let removed = self.take_fiber(id);
        // stack unmapped here, outside the table borrow
        drop(removed);
    }

    fn current_fiber(&self) -> Rc<FiberInner> {
        let current = self.inner.current.borrow().clone();
        match current {
            Some(f) => f,
            None => kfatal!("scheduler used after shutdown"),
        }
    }

    // ---------------------------------------------------------------------
    // fiber creation
    // ---------------------------------------------------------------------

    /// Create a fiber without starting it. `stack_size` 0 uses the
    /// configured default. Stack allocation failure is fatal.
    pub fn create<F>(&self, f: F, stack_size: usize) -> Fiber
    where
        F: FnOnce() + 'static,
    {
        let size = effective_stack_size(stack_size, self.inner.config.stack_size);
        let stack = match FiberStack::new(size) {
            Ok(stack) => stack,
            Err(e) => kfatal!("fiber stack allocation ({} bytes) failed: {}", size, e),
        };
        let inner = Rc::new(FiberInner::new(self, stack, Box::new(f)));
        inner.bind();
        let id = self.insert_fiber(&inner);
        ktrace!("created fiber {}", id);
        Fiber::from_inner(inner, self.clone())
    }

    /// Create and start a fiber with the default stack
    pub fn spawn<F>(&self, f: F) -> Fiber
    where
        F: FnOnce() + 'static,
    {
        let fiber = self.create(f, 0);
        if let Some(inner) = self.lookup(fiber.id()) {
            self.make_ready(&inner);
        }
        fiber
    }

    pub(crate) fn make_ready(&self, fiber: &Rc<FiberInner>) {
        fiber.set_state(FiberState::Ready);
        self.inner.run_queue.borrow_mut().push(fiber.id());
    }

    // ---------------------------------------------------------------------
    // scheduling
    // ---------------------------------------------------------------------

    /// Make `id` runnable. Never blocks; a fiber that is already Ready,
    /// finished or unknown is left alone.
    pub fn schedule_fiber(&self, id: FiberId) {
        let Some(fiber) = self.lookup(id) else {
            ktrace!("schedule of unknown fiber {}", id);
            return;
        };
        match fiber.state() {
            FiberState::Running | FiberState::Blocked => self.make_ready(&fiber),
            FiberState::Ready | FiberState::Finished => {}
            FiberState::Created => kdebug!("schedule of unstarted fiber {} ignored", id),
        }
    }

    /// Suspend the current fiber until something schedules it (or posts
    /// its id to the port), running other fibers meanwhile
    pub fn yield_fiber(&self) {
        let current = self.current_fiber();
        if current.state() == FiberState::Running {
            current.set_state(FiberState::Blocked);
        }
        let next = self.next_runnable();
        if Rc::ptr_eq(&next, &current) {
            return;
        }
        self.switch_to(current, next);
    }

    /// Let every other runnable fiber run once, then continue
    pub fn yield_now(&self) {
        self.schedule_fiber(self.current_id());
        self.yield_fiber();
    }

    /// Next fiber to run, marked Running. Blocks on the port when the
    /// run-queue is empty.
    fn next_runnable(&self) -> Rc<FiberInner> {
        loop {
            let queued = self.inner.run_queue.borrow_mut().pop();
            let (id, expected) = match queued {
                Some(id) => (id, FiberState::Ready),
                None => (self.inner.port.get(), FiberState::Blocked),
            };
            match self.lookup(id) {
                Some(fiber) if fiber.state() == expected => {
                    fiber.set_state(FiberState::Running);
                    return fiber;
                }
                Some(fiber) => ktrace!("skip {} in state {:?}", id, fiber.state()),
                None => ktrace!("skip stale token {}", id),
            }
        }
    }

    fn switch_to(&self, prev: Rc<FiberInner>, next: Rc<FiberInner>) {
        let prev_ctx = prev.context_ptr();
        let next_ctx = next.context_ptr() as *const Context;
        kprint::set_fiber_id(next.id().as_raw());
        *self.inner.current.borrow_mut() = Some(next);
        // the table keeps prev alive while it is suspended
        drop(prev);

        // Safety: both contexts belong to fibers held by the table
        unsafe { arch::switch_context(prev_ctx, next_ctx) };

        self.reap_zombies();
    }

    /// Leave the current fiber for good (entry returned). Runs on the
    /// finishing fiber's stack.
    pub(crate) fn exit_current(self) -> ! {
        let current = self.current_fiber();
        current.set_state(FiberState::Finished);
        current.finished_event().set();
        if current.is_detached() {
            if let Some(fiber) = self.take_fiber(current.id()) {
                self.inner.zombies.borrow_mut().push(fiber);
            }
        }
        ktrace!("fiber {} finished", current.id());

        let next = self.next_runnable();
        let prev_ctx = current.context_ptr();
        let next_ctx = next.context_ptr() as *const Context;
        kprint::set_fiber_id(next.id().as_raw());
        *self.inner.current.borrow_mut() = Some(next);

        // nothing on this stack may hold a reference count past here
        drop(current);
        drop(self);

        // Safety: prev is kept alive by the table or the zombie list until
        // the next fiber reaps it
        unsafe { arch::switch_context(prev_ctx, next_ctx) };
        kfatal!("finished fiber was resumed")
    }

    pub(crate) fn reap_zombies(&self) {
        let zombies = std::mem::take(&mut *self.inner.zombies.borrow_mut());
        drop(zombies);
    }

    /// Suspend the current fiber for at least `interval`. Zero yields once.
    /// An interval too large for a deadline sleeps until shutdown.
    pub fn sleep(&self, interval: Duration) {
        if interval.is_zero() {
            self.yield_now();
            return;
        }
        let sched = self.clone();
        let handle = self.register_timeout_operation(interval, move |fiber| {
            sched.schedule_fiber(fiber);
            true
        });
        while !self.is_timeout_expired(&handle) {
            self.yield_fiber();
        }
        self.deregister_timeout_operation(handle);
    }

    // ---------------------------------------------------------------------
    // timeouts
    // ---------------------------------------------------------------------

    /// Arm `cancel` to run once `timeout` elapses, on behalf of the current
    /// fiber. The callback must not yield and returns whether it actually
    /// unblocked the fiber. A timeout past the range of `Instant` never
    /// fires.
    pub fn register_timeout_operation<F>(&self, timeout: Duration, cancel: F) -> TimeoutHandle
    where
        F: FnOnce(FiberId) -> bool + 'static,
    {
        self.register_timeout_at(Instant::now().checked_add(timeout), cancel)
    }

    /// `register_timeout_operation` with an absolute deadline; `None` never
    /// fires
    pub(crate) fn register_timeout_at<F>(
        &self,
        deadline: Option<Instant>,
        cancel: F,
    ) -> TimeoutHandle
    where
        F: FnOnce(FiberId) -> bool + 'static,
    {
        let handle = self
            .inner
            .timeouts
            .register(deadline, self.current_id(), Box::new(cancel));
        if deadline.is_some() {
            self.notify_checker();
        }
        handle
    }

    /// Fire-and-forget timeout; nobody deregisters it
    pub(crate) fn register_detached_timeout<F>(&self, delay: Duration, callback: F)
    where
        F: FnOnce(FiberId) -> bool + 'static,
    {
        let Some(deadline) = Instant::now().checked_add(delay) else {
            kwarn!("detached timeout of {:?} can never fire; dropped", delay);
            return;
        };
        self.inner.timeouts.register_detached(
            Some(deadline),
            self.current_id(),
            Box::new(callback),
        );
        self.notify_checker();
    }

    /// True when the operation completed normally, false when the timeout
    /// unblocked it
    pub fn deregister_timeout_operation(&self, handle: TimeoutHandle) -> bool {
        self.inner.timeouts.deregister(handle)
    }

    pub fn is_timeout_expired(&self, handle: &TimeoutHandle) -> bool {
        self.inner.timeouts.is_expired(handle)
    }

    fn notify_checker(&self) {
        if let Some(checker) = self.inner.checker.borrow().as_ref() {
            checker.notify();
        }
    }

    // ---------------------------------------------------------------------
    // pools
    // ---------------------------------------------------------------------

    /// Run `f` on a thread pool OS thread. The current fiber is parked
    /// until `f` returns; a panic in `f` resumes here.
    pub fn threadpool_execute<F, R>(&self, f: F) -> R
    where
        F: FnOnce() -> R + Send,
        R: Send,
    {
        let mut slot: Option<thread::Result<R>> = None;
        let done = AtomicBool::new(false);
        let out = ResultSlot {
            value: &mut slot as *mut Option<thread::Result<R>>,
            done: &done as *const AtomicBool,
        };
        let job: Box<dyn FnOnce() + Send + '_> = Box::new(move || {
            let result = panic::catch_unwind(AssertUnwindSafe(f));
            // Safety: the owning fiber stays in this frame until `done`
            // is set, which is the job's last access to it
            unsafe { out.write(result) };
        });
        // Safety: the borrowed captures outlive the job for the same reason
        let job: Job = unsafe {
            std::mem::transmute::<Box<dyn FnOnce() + Send + '_>, Job>(job)
        };

        if let Err(e) = self.inner.threadpool.submit(self.current_id(), job) {
            kfatal!("thread pool submit failed: {}", e);
        }
        // the completion token may be preceded by unrelated wakes
        while !done.load(Ordering::Acquire) {
            self.yield_fiber();
        }

        match slot.take() {
            Some(Ok(value)) => value,
            Some(Err(payload)) => panic::resume_unwind(payload),
            None => kfatal!("thread pool job finished without a result"),
        }
    }

    fn fiberpool(&self) -> FiberPool {
        let mut slot = self.inner.fiberpool.borrow_mut();
        slot.get_or_insert_with(|| {
            FiberPool::new(
                self,
                self.inner.config.fiberpool_max_fibers,
                self.inner.config.fiberpool_queue_capacity,
            )
        })
        .clone()
    }

    /// Queue `f` on the fiber pool; blocks while the pool queue is full
    pub fn fiberpool_execute_async<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.fiberpool().execute_async(f);
    }

    /// Queue `f` on the fiber pool once `delay` has elapsed
    pub fn fiberpool_execute_deferred<F>(&self, f: F, delay: Duration)
    where
        F: FnOnce() + 'static,
    {
        self.fiberpool().execute_deferred(f, delay);
    }

    /// Threads currently owned by the thread pool
    pub fn threadpool_threads(&self) -> usize {
        self.inner.threadpool.threads()
    }
}

/// Where a thread pool job writes its result: the parked fiber's stack
struct ResultSlot<T> {
    value: *mut Option<T>,
    done: *const AtomicBool,
}

// Safety: written exactly once by the worker while the owner is parked
unsafe impl<T: Send> Send for ResultSlot<T> {}

impl<T> ResultSlot<T> {
    /// Store the result, then publish it. Neither pointer may be touched
    /// once `done` is set.
    unsafe fn write(self, value: T) {
        unsafe {
            *self.value = Some(value);
            (*self.done).store(true, Ordering::Release);
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("current", &self.current_id())
            .field("fibers", &self.fiber_count())
            .field("run_queue", &self.inner.run_queue.borrow().len())
            .field("timeouts", &self.inner.timeouts.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{test_config, with_scheduler};
    use std::cell::Cell;

    #[test]
    fn test_initialize_twice_fails() {
        let sched = Scheduler::initialize(test_config()).unwrap();
        assert!(matches!(
            Scheduler::initialize(test_config()),
            Err(FfError::AlreadyInitialized)
        ));
        sched.shutdown().unwrap();
        assert!(sched.is_shut_down());
        assert!(matches!(Scheduler::current(), Err(FfError::NotInitialized)));

        // repeatable after shutdown
        let again = Scheduler::initialize(test_config()).unwrap();
        again.shutdown().unwrap();
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Scheduler::initialize(test_config().threadpool_max_threads(0)).unwrap_err();
        assert!(matches!(err, FfError::Config(_)));
        assert!(!tls::is_initialized());
    }

    #[test]
    fn test_shutdown_off_root_fails() {
        with_scheduler(|sched| {
            let s = sched.clone();
            let result = Rc::new(Cell::new(None));
            let r = Rc::clone(&result);
            sched
                .spawn(move || r.set(Some(s.shutdown().is_err())))
                .join()
                .unwrap();
            assert_eq!(result.get(), Some(true));
        });
    }

    #[test]
    fn test_schedule_is_idempotent() {
        with_scheduler(|sched| {
            let runs = Rc::new(Cell::new(0));
            let r = Rc::clone(&runs);
            let s = sched.clone();
            let fiber = sched.spawn(move || {
                r.set(r.get() + 1);
                s.yield_fiber();
                r.set(r.get() + 1);
            });
            sched.yield_now();
            assert_eq!(runs.get(), 1);
            assert_eq!(fiber.state(), FiberState::Blocked);

            sched.schedule_fiber(fiber.id());
            sched.schedule_fiber(fiber.id());
            assert_eq!(fiber.state(), FiberState::Ready);
            fiber.join().unwrap();
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn test_lifo_run_queue_order() {
        let config = test_config().run_queue_order(crate::config::RunQueueOrder::Lifo);
        let sched = Scheduler::initialize(config).unwrap();
        let order = Rc::new(RefCell::new(Vec::new()));
        let fibers: Vec<_> = (0..3)
            .map(|n| {
                let order = Rc::clone(&order);
                sched.create(move || order.borrow_mut().push(n), 0)
            })
            .collect();
        for f in &fibers {
            f.start().unwrap();
        }
        fibers[0].join().unwrap();
        for f in &fibers {
            f.join().unwrap();
        }
        assert_eq!(*order.borrow(), vec![2, 1, 0]);
        drop(fibers);
        sched.shutdown().unwrap();
    }

    #[test]
    fn test_sleep_duration() {
        with_scheduler(|sched| {
            let start = Instant::now();
            sched.sleep(Duration::from_millis(30));
            assert!(start.elapsed() >= Duration::from_millis(30));

            // zero sleep yields once
            let ran = Rc::new(Cell::new(false));
            let r = Rc::clone(&ran);
            let _f = sched.spawn(move || r.set(true));
            sched.sleep(Duration::ZERO);
            assert!(ran.get());
        });
    }

    #[test]
    fn test_timeout_race() {
        with_scheduler(|sched| {
            let waiting = Rc::new(Cell::new(true));
            let calls = Rc::new(Cell::new(0));
            let arm = |timeout: Duration| {
                let (w, c, s) = (Rc::clone(&waiting), Rc::clone(&calls), sched.clone());
                sched.register_timeout_operation(timeout, move |fiber| {
                    c.set(c.get() + 1);
                    if !w.replace(false) {
                        return false;
                    }
                    s.schedule_fiber(fiber);
                    true
                })
            };

            // completes long before the deadline
            let handle = arm(Duration::from_millis(200));
            let (w, s, root) = (Rc::clone(&waiting), sched.clone(), sched.root_id());
            let helper = sched.spawn(move || {
                s.sleep(Duration::from_millis(5));
                if w.replace(false) {
                    s.schedule_fiber(root);
                }
            });
            sched.yield_fiber();
            assert!(sched.deregister_timeout_operation(handle));
            helper.join().unwrap();

            // never completes
            waiting.set(true);
            let start = Instant::now();
            let handle = arm(Duration::from_millis(50));
            sched.yield_fiber();
            let waited = start.elapsed();
            assert!(sched.is_timeout_expired(&handle));
            assert!(!sched.deregister_timeout_operation(handle));
            assert!(waited >= Duration::from_millis(50));
            assert!(waited < Duration::from_millis(500));
            assert_eq!(calls.get(), 1);
        });
    }

    #[test]
    fn test_threadpool_execute() {
        with_scheduler(|sched| {
            let input = 41;
            let borrowed = vec![1, 2, 3];
            let out = sched.threadpool_execute(|| {
                std::thread::sleep(Duration::from_millis(5));
                input + borrowed.len() as i32 - 2
            });
            assert_eq!(out, input + 1);
            assert!(sched.threadpool_threads() >= 1);
        });
    }

    #[test]
    fn test_threadpool_runs_concurrently_with_fibers() {
        with_scheduler(|sched| {
            let ticks = Rc::new(Cell::new(0));
            let t = Rc::clone(&ticks);
            let s = sched.clone();
            let ticker = sched.spawn(move || {
                for _ in 0..5 {
                    t.set(t.get() + 1);
                    s.sleep(Duration::from_millis(2));
                }
            });
            let worker_thread = sched.threadpool_execute(|| {
                std::thread::sleep(Duration::from_millis(200));
                std::thread::current().name().map(str::to_owned)
            });
            assert!(worker_thread.unwrap_or_default().starts_with("ff-worker-"));
            assert_eq!(ticks.get(), 5);
            ticker.join().unwrap();
        });
    }

    #[test]
    fn test_threadpool_panic_resumes_in_caller() {
        with_scheduler(|sched| {
            let s = sched.clone();
            let fiber = sched.spawn(move || {
                s.threadpool_execute(|| panic!("worker boom"));
            });
            assert!(matches!(fiber.join(), Err(FfError::FiberPanicked(_))));
        });
    }

    #[test]
    fn test_sleep_ignores_stray_schedule() {
        with_scheduler(|sched| {
            let woke_at = Rc::new(Cell::new(None));
            let w = Rc::clone(&woke_at);
            let s = sched.clone();
            let start = Instant::now();
            let sleeper = sched.spawn(move || {
                s.sleep(Duration::from_millis(40));
                w.set(Some(Instant::now()));
            });
            sched.yield_now();

            sched.schedule_fiber(sleeper.id());
            sched.yield_now();
            assert_eq!(sleeper.state(), FiberState::Blocked);
            assert!(woke_at.get().is_none());

            sleeper.join().unwrap();
            let woke = woke_at.get().unwrap();
            assert!(woke.duration_since(start) >= Duration::from_millis(40));
        });
    }

    #[test]
    fn test_unbounded_sleep_and_timeout() {
        with_scheduler(|sched| {
            let handle = sched.register_timeout_operation(Duration::MAX, |_| true);
            assert!(!sched.is_timeout_expired(&handle));
            assert!(sched.deregister_timeout_operation(handle));

            let s = sched.clone();
            let sleeper = sched.spawn(move || s.sleep(Duration::MAX));
            sched.sleep(Duration::from_millis(30));
            assert_eq!(sleeper.state(), FiberState::Blocked);
            assert_eq!(sched.timeouts().next_deadline(), None);
            // left blocked: shutdown frees it
        });
    }

    #[test]
    fn test_threadpool_execute_ignores_stray_schedule() {
        with_scheduler(|sched| {
            let result = Rc::new(Cell::new(None));
            let r = Rc::clone(&result);
            let s = sched.clone();
            let caller = sched.spawn(move || {
                let out = s.threadpool_execute(|| {
                    std::thread::sleep(Duration::from_millis(50));
                    5
                });
                r.set(Some(out));
            });
            sched.yield_now();

            sched.schedule_fiber(caller.id());
            sched.yield_now();
            assert_eq!(result.get(), None);
            assert_eq!(caller.state(), FiberState::Blocked);

            caller.join().unwrap();
            assert_eq!(result.get(), Some(5));
        });
    }

    #[test]
    fn test_shutdown_with_blocked_fibers() {
        let sched = Scheduler::initialize(test_config()).unwrap();
        let never = crate::sync::Event::manual(&sched);
        let blocked: Vec<_> = (0..3)
            .map(|_| {
                let never = never.clone();
                sched.spawn(move || never.wait())
            })
            .collect();
        let s = sched.clone();
        let sleeper = sched.spawn(move || s.sleep(Duration::from_secs(3600)));
        sched.yield_now();
        assert!(blocked.iter().all(|f| f.state() == FiberState::Blocked));
        assert_eq!(sleeper.state(), FiberState::Blocked);
        assert_eq!(never.waiters(), 3);

        sched.shutdown().unwrap();
        assert!(sched.is_shut_down());
        assert_eq!(sched.fiber_count(), 0);
        assert!(sched.timeouts().is_empty());
        assert!(matches!(Scheduler::current(), Err(FfError::NotInitialized)));
        // a second call is a no-op
        sched.shutdown().unwrap();
        drop(blocked);
        drop(sleeper);

        let again = Scheduler::initialize(test_config()).unwrap();
        again.shutdown().unwrap();
    }
}
