//! # ff-core
//!
//! Platform-agnostic building blocks shared by the ff fiber runtime.
//!
//! Nothing in here touches the OS: the scheduler, stacks, the completion
//! port and the synchronization primitives live in `ff-runtime`.
//!
//! ## Modules
//!
//! - `id` - fiber identifier (slot + generation)
//! - `state` - fiber lifecycle state
//! - `error` - error types shared by every crate
//! - `spinlock` - short-held lock for structures touched by worker threads
//! - `kprint` - leveled logging macros routed through `log`
//! - `env` - environment variable helpers used by the config layer

pub mod id;
pub mod state;
pub mod error;
pub mod spinlock;
pub mod kprint;
pub mod env;

pub use id::FiberId;
pub use state::FiberState;
pub use error::{FfError, FfResult, StackError, WorkerError};
pub use spinlock::SpinLock;
pub use env::{env_get, env_get_bool, env_get_ms, env_get_opt, env_get_str, env_is_set};

/// Layout constants
pub mod constants {
    /// Default usable stack per fiber when the caller passes 0
    pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

    /// Smallest stack the runtime will hand out
    pub const MIN_STACK_SIZE: usize = 16 * 1024;

    /// Guard page placed below every fiber stack
    pub const GUARD_SIZE: usize = 4096;

    /// Maximum epoll events pulled per blocking wait
    pub const MAX_EVENTS_PER_WAIT: usize = 64;
}
