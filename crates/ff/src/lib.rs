//! # ff - cooperative fibers for Linux
//!
//! Stackful fibers multiplexed on one scheduler thread, a pool of OS
//! threads for blocking calls, descriptor I/O through an epoll completion
//! port, and timeouts that cancel a blocked operation exactly once.
//!
//! ## Quick Start
//!
//! ```ignore
//! use ff::{Runtime, SchedulerConfig, spawn, sleep, threadpool_execute};
//! use std::time::Duration;
//!
//! fn main() -> ff::FfResult<()> {
//!     let mut runtime = Runtime::new(SchedulerConfig::from_env())?;
//!     let total = runtime.block_on(|| {
//!         let worker = spawn(|| sleep(Duration::from_millis(10)));
//!         let n = threadpool_execute(|| std::fs::read_dir(".").map(|d| d.count()).unwrap_or(0));
//!         worker.join().ok();
//!         n
//!     })?;
//!     println!("{} entries", total);
//!     runtime.shutdown()
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Fiber code                             │
//! │   spawn, sleep, Event, Mutex, BlockingQueue, AsyncFd ...    │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ yield / schedule
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Scheduler                              │
//! │   run-queue, fiber table, timeout registry + checker fiber  │
//! └─────────────────────────────────────────────────────────────┘
//!            │ get()                         ▲ put(token)
//!            ▼                               │
//!    ┌─────────────────┐            ┌─────────────────┐
//!    │ Completion port │◀── epoll ──│  Thread pool    │
//!    │ eventfd waker   │            │  (OS threads)   │
//!    └─────────────────┘            └─────────────────┘
//! ```

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

// Re-export core types
pub use ff_core::{FfError, FfResult, FiberId, FiberState, StackError, WorkerError};

// Re-export logging macros
pub use ff_core::{kdebug, kerror, kfatal, kinfo, kprintln, ktrace, kwarn};
pub use ff_core::kprint;

// Re-export env utilities
pub use ff_core::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_str, env_is_set};

// Re-export runtime types
pub use ff_runtime::{
    AsyncFd, Blocking, BlockingQueue, BlockingStack, CompletionPort, ConfigError, Event,
    EventMode, Fiber, Mutex, MutexGuard, OpType, Pool, PoolGuard, RunQueueOrder, Scheduler,
    SchedulerConfig, Semaphore, TimeoutHandle, TimeoutState,
};

/// Owns the scheduler of the calling thread
///
/// Created on the thread that will run fibers; that thread becomes the
/// root fiber. Dropping the runtime shuts the scheduler down.
pub struct Runtime {
    sched: Option<Scheduler>,
}

impl Runtime {
    /// Initialize a scheduler on the calling thread
    pub fn new(config: SchedulerConfig) -> FfResult<Self> {
        let sched = Scheduler::initialize(config)?;
        Ok(Self { sched: Some(sched) })
    }

    pub fn scheduler(&self) -> FfResult<&Scheduler> {
        self.sched.as_ref().ok_or(FfError::NotInitialized)
    }

    /// Run `f` in a fresh fiber and wait for it on the root fiber.
    ///
    /// A panic inside `f` is contained and reported as `FiberPanicked`.
    pub fn block_on<F, T>(&mut self, f: F) -> FfResult<T>
    where
        F: FnOnce() -> T + 'static,
        T: 'static,
    {
        let sched = self.scheduler()?;
        let slot = Rc::new(RefCell::new(None));
        let out = Rc::clone(&slot);
        let fiber = sched.spawn(move || {
            let value = f();
            *out.borrow_mut() = Some(value);
        });
        fiber.join()?;
        let value = slot.borrow_mut().take();
        value.ok_or(FfError::InvalidState("block_on fiber produced no value"))
    }

    /// Stop the pools and the checker and free every fiber
    pub fn shutdown(&mut self) -> FfResult<()> {
        match self.sched.take() {
            Some(sched) => sched.shutdown(),
            None => Ok(()),
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            kerror!("runtime shutdown failed: {}", e);
        }
    }
}

/// Scheduler of the calling thread. Using the free functions without a
/// runtime on this thread is fatal.
fn current() -> Scheduler {
    match Scheduler::current() {
        Ok(sched) => sched,
        Err(e) => kfatal!("{}", e),
    }
}

/// Create and start a fiber on the current scheduler
pub fn spawn<F>(f: F) -> Fiber
where
    F: FnOnce() + 'static,
{
    current().spawn(f)
}

/// Create a fiber with an explicit stack size without starting it
pub fn create<F>(f: F, stack_size: usize) -> Fiber
where
    F: FnOnce() + 'static,
{
    current().create(f, stack_size)
}

/// Let every other runnable fiber run once
pub fn yield_now() {
    current().yield_now();
}

/// Suspend the calling fiber for at least `interval`
pub fn sleep(interval: Duration) {
    current().sleep(interval);
}

/// Run a blocking closure on the thread pool; the calling fiber is parked
/// until it returns
pub fn threadpool_execute<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    current().threadpool_execute(f)
}

/// Queue `f` on the fiber pool
pub fn fiberpool_execute_async<F>(f: F)
where
    F: FnOnce() + 'static,
{
    current().fiberpool_execute_async(f);
}

/// Queue `f` on the fiber pool after `delay`
pub fn fiberpool_execute_deferred<F>(f: F, delay: Duration)
where
    F: FnOnce() + 'static,
{
    current().fiberpool_execute_deferred(f, delay);
}

/// Id of the running fiber, `FiberId::NONE` without a runtime
pub fn current_fiber_id() -> FiberId {
    Scheduler::current().map_or(FiberId::NONE, |s| s.current_id())
}

/// True when this thread has a running scheduler
pub fn is_initialized() -> bool {
    ff_runtime::tls::is_initialized()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn config() -> SchedulerConfig {
        SchedulerConfig::new().timeout_scan_interval(Duration::from_millis(10))
    }

    #[test]
    fn test_block_on_returns_value() {
        let mut rt = Runtime::new(config()).unwrap();
        assert!(is_initialized());
        let root = current_fiber_id();
        let (value, inner) = rt
            .block_on(|| {
                sleep(Duration::from_millis(5));
                (threadpool_execute(|| 20 + 1) * 2, current_fiber_id())
            })
            .unwrap();
        assert_eq!(value, 42);
        assert_ne!(inner, root);
        rt.shutdown().unwrap();
        assert!(!is_initialized());
        assert_eq!(current_fiber_id(), FiberId::NONE);
    }

    #[test]
    fn test_block_on_reports_panic() {
        let mut rt = Runtime::new(config()).unwrap();
        let result: FfResult<()> = rt.block_on(|| panic!("inside block_on"));
        assert!(matches!(result, Err(FfError::FiberPanicked(_))));
        // the runtime is still usable
        assert_eq!(rt.block_on(|| 7).unwrap(), 7);
    }

    #[test]
    fn test_second_runtime_on_thread_fails() {
        let _rt = Runtime::new(config()).unwrap();
        assert!(matches!(Runtime::new(config()), Err(FfError::AlreadyInitialized)));
    }

    #[test]
    fn test_drop_shuts_down() {
        {
            let _rt = Runtime::new(config()).unwrap();
        }
        let mut rt = Runtime::new(config()).unwrap();
        rt.shutdown().unwrap();
        rt.shutdown().unwrap();
        assert!(matches!(rt.block_on(|| ()), Err(FfError::NotInitialized)));
    }

    #[test]
    fn test_fiberpool_free_functions() {
        let mut rt = Runtime::new(config()).unwrap();
        let hits = rt
            .block_on(|| {
                let hits = Rc::new(Cell::new(0));
                for _ in 0..5 {
                    let h = Rc::clone(&hits);
                    fiberpool_execute_async(move || h.set(h.get() + 1));
                }
                let h = Rc::clone(&hits);
                fiberpool_execute_deferred(move || h.set(h.get() + 10), Duration::from_millis(20));
                let yielder = spawn(yield_now);
                yielder.join().unwrap();
                while hits.get() < 15 {
                    sleep(Duration::from_millis(5));
                }
                hits.get()
            })
            .unwrap();
        assert_eq!(hits, 15);
    }
}
