//! Error types for the ff runtime
//!
//! Expected failures (timeouts, I/O errors, misuse of a fiber handle) are
//! surfaced as `FfError`. Failures that leave the scheduler in an unknown
//! state are not errors at all: the runtime logs them and aborts.

use crate::id::FiberId;
use thiserror::Error;

/// Result type for runtime operations
pub type FfResult<T> = Result<T, FfError>;

/// Errors surfaced to fiber code
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FfError {
    /// A blocking operation hit its deadline
    #[error("operation timed out")]
    Timeout,

    /// No scheduler owns the calling thread
    #[error("scheduler not initialized on this thread")]
    NotInitialized,

    /// Configuration rejected by validation
    #[error("invalid config: {0}")]
    Config(&'static str),

    /// The calling thread already owns a scheduler
    #[error("scheduler already initialized on this thread")]
    AlreadyInitialized,

    /// Operation not valid for the fiber's current lifecycle state
    #[error("invalid fiber state: {0}")]
    InvalidState(&'static str),

    /// The fiber's entry function panicked
    #[error("fiber {0} panicked")]
    FiberPanicked(FiberId),

    /// The descriptor was disconnected (explicitly or by a timeout)
    #[error("resource disconnected")]
    Disconnected,

    /// An OS call failed
    #[error("{op} failed: {}", os_message(.code))]
    Os {
        op: &'static str,
        code: i32,
    },

    /// Stack allocation or protection failed
    #[error("stack error: {0}")]
    Stack(#[from] StackError),

    /// Worker thread failure
    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),
}

impl FfError {
    /// Wrap an errno value from a failed OS call
    #[inline]
    pub fn os(op: &'static str, code: i32) -> Self {
        FfError::Os { op, code }
    }

    /// True for the timeout variant
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, FfError::Timeout)
    }
}

fn os_message(code: &i32) -> std::io::Error {
    std::io::Error::from_raw_os_error(*code)
}

/// Stack memory errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StackError {
    /// mmap failed
    #[error("stack mapping failed")]
    MapFailed,

    /// mprotect on the guard page failed
    #[error("guard page protection failed")]
    GuardFailed,

    /// Requested size overflows the address space
    #[error("stack size too large")]
    TooLarge,
}

/// Worker thread errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkerError {
    /// Failed to spawn a worker OS thread
    #[error("failed to spawn worker thread")]
    SpawnFailed,

    /// A pool was used after shutdown
    #[error("pool is shut down")]
    ShutDown,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(FfError::Timeout.to_string(), "operation timed out");
        assert_eq!(
            FfError::Stack(StackError::MapFailed).to_string(),
            "stack error: stack mapping failed"
        );
        assert_eq!(
            FfError::FiberPanicked(FiberId::new(2, 1)).to_string(),
            "fiber 2.1 panicked"
        );
    }

    #[test]
    fn test_os_error_carries_errno_text() {
        let e = FfError::os("epoll_ctl", 9);
        let text = e.to_string();
        assert!(text.starts_with("epoll_ctl failed: "));
        assert!(matches!(e, FfError::Os { code: 9, .. }));
    }

    #[test]
    fn test_error_conversion() {
        let e: FfError = WorkerError::SpawnFailed.into();
        assert!(matches!(e, FfError::Worker(WorkerError::SpawnFailed)));
        assert!(!e.is_timeout());
        assert!(FfError::Timeout.is_timeout());
    }
}
