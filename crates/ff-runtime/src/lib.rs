//! # ff-runtime
//!
//! Linux runtime for the ff cooperative fiber scheduler.
//!
//! This crate provides:
//! - Context switching (architecture-specific assembly)
//! - Guarded fiber stacks (mmap)
//! - The completion port (epoll + eventfd)
//! - The scheduler: run-queue, fiber table, yield/schedule
//! - Timeout registry and its checker fiber (timerfd tick)
//! - Synchronization primitives built on yield/schedule
//! - Thread pool and fiber pool
//! - `AsyncFd`, a descriptor adapter for fiber code

pub mod arch;
pub mod config;
pub mod memory;
pub mod parking;
pub mod port;
pub mod sync;
pub mod timeout;
pub mod tls;

mod fiber;
mod io;
mod run_queue;
mod scheduler;
mod workers;

// Re-exports
pub use config::{ConfigError, RunQueueOrder, SchedulerConfig};
pub use fiber::Fiber;
pub use io::AsyncFd;
pub use port::{CompletionPort, OpType};
pub use scheduler::Scheduler;
pub use sync::{
    Blocking, BlockingQueue, BlockingStack, Event, EventMode, Mutex, MutexGuard, Pool,
    PoolGuard, Semaphore,
};
pub use timeout::{TimeoutHandle, TimeoutState};

cfg_if::cfg_if! {
    if #[cfg(not(target_os = "linux"))] {
        compile_error!("ff-runtime supports Linux only (epoll, eventfd, timerfd)");
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use std::time::Duration;

    use crate::{Scheduler, SchedulerConfig};

    /// Defaults with a fast checker tick so timeout tests stay short
    pub(crate) fn test_config() -> SchedulerConfig {
        SchedulerConfig::new().timeout_scan_interval(Duration::from_millis(10))
    }

    /// Run `f` on the root fiber of a fresh scheduler, then shut it down
    pub(crate) fn with_scheduler<F: FnOnce(&Scheduler)>(f: F) {
        let sched = Scheduler::initialize(test_config()).unwrap();
        f(&sched);
        sched.shutdown().unwrap();
    }
}
