//! Condvar parking for targets without futex

use super::WorkerParking;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

pub struct FallbackParking {
    seq: Mutex<u32>,
    condvar: Condvar,
    parked: AtomicUsize,
}

impl FallbackParking {
    pub fn new() -> Self {
        Self {
            seq: Mutex::new(0),
            condvar: Condvar::new(),
            parked: AtomicUsize::new(0),
        }
    }
}

impl Default for FallbackParking {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerParking for FallbackParking {
    fn prepare(&self) -> u32 {
        *self.seq.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn park(&self, seq: u32, timeout: Option<Duration>) -> bool {
        self.parked.fetch_add(1, Ordering::SeqCst);
        let guard = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        let woken = if *guard != seq {
            true
        } else {
            match timeout {
                Some(t) => {
                    let (g, res) = self
                        .condvar
                        .wait_timeout(guard, t)
                        .unwrap_or_else(PoisonError::into_inner);
                    !res.timed_out() || *g != seq
                }
                None => {
                    let g = self.condvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
                    *g != seq
                }
            }
        };
        self.parked.fetch_sub(1, Ordering::SeqCst);
        woken
    }

    fn wake_one(&self) {
        let mut guard = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = guard.wrapping_add(1);
        self.condvar.notify_one();
    }

    fn wake_all(&self) {
        let mut guard = self.seq.lock().unwrap_or_else(PoisonError::into_inner);
        *guard = guard.wrapping_add(1);
        self.condvar.notify_all();
    }

    fn parked_count(&self) -> usize {
        self.parked.load(Ordering::Relaxed)
    }
}
