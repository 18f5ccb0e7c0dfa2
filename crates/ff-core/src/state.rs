//! Fiber lifecycle state

/// State of a fiber
///
/// ```text
/// Created --start--> Ready --switch--> Running --yield--> Blocked
///                      ^                  |                  |
///                      +----schedule------+------schedule----+
///                                         |
///                                         +--entry returns--> Finished
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Stack allocated, entry bound, never scheduled
    Created,

    /// Sitting in the run-queue
    Ready,

    /// Currently owns the scheduler thread
    Running,

    /// Parked in a wait-list, the completion port or the thread pool
    Blocked,

    /// Entry function returned (or panicked); the stack is garbage
    Finished,
}

impl FiberState {
    /// Has `start` been called on this fiber
    #[inline]
    pub const fn is_started(&self) -> bool {
        !matches!(self, FiberState::Created)
    }

    #[inline]
    pub const fn is_finished(&self) -> bool {
        matches!(self, FiberState::Finished)
    }

    /// Started but not yet finished
    #[inline]
    pub const fn is_alive(&self) -> bool {
        matches!(self, FiberState::Ready | FiberState::Running | FiberState::Blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_predicates() {
        assert!(!FiberState::Created.is_started());
        assert!(FiberState::Ready.is_alive());
        assert!(FiberState::Blocked.is_alive());
        assert!(!FiberState::Finished.is_alive());
        assert!(FiberState::Finished.is_finished());
    }
}
