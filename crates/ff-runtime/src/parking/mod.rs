//! Thread pool parking
//!
//! Idle pool threads sleep on a sequence word instead of a flag. A worker
//! reads the sequence with `prepare()` *before* it checks the job queue and
//! hands that value to `park()`. Any `wake_*` in between bumps the
//! sequence, so the park returns immediately and the job is not missed.

use std::time::Duration;

pub trait WorkerParking: Send + Sync {
    /// Snapshot taken before checking for work
    fn prepare(&self) -> u32;

    /// Sleep unless a wake happened since `seq` was taken.
    ///
    /// Returns `true` when woken, `false` on timeout or spurious return.
    /// Callers re-check for work either way.
    fn park(&self, seq: u32, timeout: Option<Duration>) -> bool;

    fn wake_one(&self);

    fn wake_all(&self);

    /// Number of currently parked workers (hint, may be stale)
    fn parked_count(&self) -> usize;
}

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        mod futex_linux;
        pub use futex_linux::FutexParking as PlatformParking;
    } else {
        mod fallback;
        pub use fallback::FallbackParking as PlatformParking;
    }
}

pub fn new_parking() -> Box<dyn WorkerParking> {
    Box::new(PlatformParking::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_park_timeout() {
        let parking = new_parking();
        let seq = parking.prepare();
        let start = Instant::now();
        let woken = parking.park(seq, Some(Duration::from_millis(50)));
        assert!(!woken);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn test_wake_before_park_is_not_lost() {
        let parking = new_parking();
        let seq = parking.prepare();
        parking.wake_one();
        let start = Instant::now();
        parking.park(seq, Some(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_wake_one_parked_thread() {
        let parking = Arc::new(PlatformParking::new());
        let p2 = Arc::clone(&parking);
        let handle = thread::spawn(move || {
            let seq = p2.prepare();
            p2.park(seq, Some(Duration::from_secs(10)))
        });
        while parking.parked_count() == 0 {
            thread::sleep(Duration::from_millis(1));
        }
        let start = Instant::now();
        parking.wake_all();
        handle.join().unwrap();
        assert!(start.elapsed() < Duration::from_secs(5));
    }
}
