//! Timeout registry: entries with absolute deadlines and cancel callbacks

use std::fmt;
use std::time::Instant;

use ff_core::{ktrace, FiberId, SpinLock};
use slab::Slab;

/// Cancel callback. Receives the owning fiber and returns whether it
/// actually unblocked it. Must not yield.
pub type CancelFn = Box<dyn FnOnce(FiberId) -> bool>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutState {
    Registered,
    /// The callback unblocked the fiber
    Expired,
    /// The callback found the operation already complete
    Missed,
}

struct TimeoutEntry {
    /// `None` never fires
    expiration: Option<Instant>,
    fiber: FiberId,
    cancel: Option<CancelFn>,
    state: TimeoutState,
    generation: u64,
    /// Nobody will deregister; removed right after firing
    detached: bool,
}

/// Proof of registration. Not `Clone`: deregistering consumes it.
#[must_use = "a registered timeout must be deregistered"]
#[derive(Debug, PartialEq, Eq)]
pub struct TimeoutHandle {
    key: usize,
    generation: u64,
}

struct Inner {
    entries: Slab<TimeoutEntry>,
    next_generation: u64,
}

pub struct TimeoutRegistry {
    inner: SpinLock<Inner>,
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner {
                entries: Slab::new(),
                next_generation: 1,
            }),
        }
    }

    /// `expiration` of `None` registers an entry that never fires
    pub fn register(
        &self,
        expiration: Option<Instant>,
        fiber: FiberId,
        cancel: CancelFn,
    ) -> TimeoutHandle {
        let (key, generation) = self.insert(expiration, fiber, cancel, false);
        TimeoutHandle { key, generation }
    }

    /// Register an entry nobody waits on; it disappears once fired
    pub fn register_detached(&self, expiration: Option<Instant>, fiber: FiberId, cancel: CancelFn) {
        self.insert(expiration, fiber, cancel, true);
    }

    fn insert(
        &self,
        expiration: Option<Instant>,
        fiber: FiberId,
        cancel: CancelFn,
        detached: bool,
    ) -> (usize, u64) {
        let mut inner = self.inner.lock();
        let generation = inner.next_generation;
        inner.next_generation += 1;
        let key = inner.entries.insert(TimeoutEntry {
            expiration,
            fiber,
            cancel: Some(cancel),
            state: TimeoutState::Registered,
            generation,
            detached,
        });
        (key, generation)
    }

    /// Remove the entry. True when the operation completed normally
    /// (the entry never fired, or fired as `Missed`).
    pub fn deregister(&self, handle: TimeoutHandle) -> bool {
        let removed = {
            let mut inner = self.inner.lock();
            let live = inner
                .entries
                .get(handle.key)
                .is_some_and(|e| e.generation == handle.generation);
            live.then(|| inner.entries.remove(handle.key))
        };
        // the callback (and whatever it captured) drops outside the lock
        match removed {
            Some(entry) => entry.state != TimeoutState::Expired,
            None => true,
        }
    }

    pub fn state(&self, handle: &TimeoutHandle) -> Option<TimeoutState> {
        let inner = self.inner.lock();
        inner
            .entries
            .get(handle.key)
            .filter(|e| e.generation == handle.generation)
            .map(|e| e.state)
    }

    pub fn is_expired(&self, handle: &TimeoutHandle) -> bool {
        self.state(handle) == Some(TimeoutState::Expired)
    }

    /// Fire every registered entry whose deadline is at or before `now`.
    ///
    /// Callbacks run without the lock held, so they may register or
    /// deregister other entries. Returns how many callbacks ran.
    pub fn fire_expired(&self, now: Instant) -> usize {
        let due: Vec<(usize, u64, FiberId, CancelFn)> = {
            let mut inner = self.inner.lock();
            inner
                .entries
                .iter_mut()
                .filter(|(_, e)| {
                    e.state == TimeoutState::Registered && e.expiration.is_some_and(|t| t <= now)
                })
                .filter_map(|(key, e)| {
                    e.cancel
                        .take()
                        .map(|cancel| (key, e.generation, e.fiber, cancel))
                })
                .collect()
        };

        let fired = due.len();
        for (key, generation, fiber, cancel) in due {
            let unblocked = cancel(fiber);
            ktrace!("timeout for {} fired (unblocked: {})", fiber, unblocked);

            let mut inner = self.inner.lock();
            let detached = match inner.entries.get_mut(key) {
                Some(e) if e.generation == generation => {
                    e.state = if unblocked {
                        TimeoutState::Expired
                    } else {
                        TimeoutState::Missed
                    };
                    e.detached
                }
                _ => false,
            };
            if detached {
                inner.entries.remove(key);
            }
        }
        fired
    }

    /// Earliest deadline among entries that have not fired
    pub fn next_deadline(&self) -> Option<Instant> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .filter(|(_, e)| e.state == TimeoutState::Registered)
            .filter_map(|(_, e)| e.expiration)
            .min()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry (shutdown)
    pub fn clear(&self) {
        let entries = std::mem::take(&mut self.inner.lock().entries);
        drop(entries);
    }
}

impl Default for TimeoutRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimeoutRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutRegistry")
            .field("len", &self.len())
            .finish()
    }
}
