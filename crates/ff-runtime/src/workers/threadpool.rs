//! OS thread pool for blocking work
//!
//! Jobs come in tagged with the submitting fiber's id. When a job returns
//! the worker posts that id to the completion port, which is what wakes
//! the fiber. Threads are spawned on demand (one more whenever every
//! existing thread is busy) up to `max_threads`, and park on a futex
//! sequence word when idle.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_queue::SegQueue;
use ff_core::{kdebug, kerror, kfatal, ktrace, kwarn, FfResult, FiberId, SpinLock, WorkerError};

use crate::parking::{new_parking, WorkerParking};
use crate::port::CompletionPort;

/// Work shipped to a pool thread
pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolJob {
    token: FiberId,
    run: Job,
}

struct Shared {
    jobs: SegQueue<PoolJob>,
    port: Arc<CompletionPort>,
    parking: Box<dyn WorkerParking>,
    /// Submitted but not yet completed
    busy: AtomicUsize,
    shutdown: AtomicBool,
    park_timeout: Duration,
}

pub(crate) struct ThreadPool {
    shared: Arc<Shared>,
    threads: SpinLock<Vec<JoinHandle<()>>>,
    max_threads: usize,
}

impl ThreadPool {
    pub(crate) fn new(port: Arc<CompletionPort>, max_threads: usize, park_timeout: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                jobs: SegQueue::new(),
                port,
                parking: new_parking(),
                busy: AtomicUsize::new(0),
                shutdown: AtomicBool::new(false),
                park_timeout,
            }),
            threads: SpinLock::new(Vec::new()),
            max_threads: max_threads.max(1),
        }
    }

    /// Queue `run`; `token` is posted to the port once it returns
    pub(crate) fn submit(&self, token: FiberId, run: Job) -> FfResult<()> {
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(WorkerError::ShutDown.into());
        }
        let busy = self.shared.busy.fetch_add(1, Ordering::SeqCst) + 1;
        self.shared.jobs.push(PoolJob { token, run });

        {
            let mut threads = self.threads.lock();
            if busy > threads.len() && threads.len() < self.max_threads {
                let index = threads.len();
                let shared = Arc::clone(&self.shared);
                match thread::Builder::new()
                    .name(format!("ff-worker-{}", index))
                    .spawn(move || worker_loop(index, shared))
                {
                    Ok(handle) => {
                        threads.push(handle);
                        kdebug!("thread pool grew to {} thread(s)", threads.len());
                    }
                    Err(e) if threads.is_empty() => {
                        kfatal!("thread pool cannot spawn its first thread: {}", e)
                    }
                    Err(e) => kwarn!("thread pool spawn failed, staying at {}: {}", threads.len(), e),
                }
            }
        }

        self.shared.parking.wake_one();
        Ok(())
    }

    /// Threads spawned so far
    pub(crate) fn threads(&self) -> usize {
        self.threads.lock().len()
    }

    /// Jobs submitted and not yet finished
    #[cfg(test)]
    fn busy(&self) -> usize {
        self.shared.busy.load(Ordering::Acquire)
    }

    /// Finish queued jobs, then stop and join every thread
    pub(crate) fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.parking.wake_all();
        let handles = std::mem::take(&mut *self.threads.lock());
        let count = handles.len();
        for handle in handles {
            if handle.join().is_err() {
                kerror!("thread pool thread panicked outside a job");
            }
        }
        kdebug!("thread pool stopped ({} thread(s))", count);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(index: usize, shared: Arc<Shared>) {
    ktrace!("pool thread {} started", index);
    loop {
        let seq = shared.parking.prepare();

        if let Some(job) = shared.jobs.pop() {
            if panic::catch_unwind(AssertUnwindSafe(job.run)).is_err() {
                kerror!("thread pool job for {} panicked", job.token);
            }
            shared.busy.fetch_sub(1, Ordering::SeqCst);
            shared.port.put(job.token);
            continue;
        }

        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        shared.parking.park(seq, Some(shared.park_timeout));
    }
    ktrace!("pool thread {} exiting", index);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn pool(max: usize) -> (Arc<CompletionPort>, ThreadPool) {
        let port = Arc::new(CompletionPort::new(1).unwrap());
        let pool = ThreadPool::new(Arc::clone(&port), max, Duration::from_millis(50));
        (port, pool)
    }

    #[test]
    fn test_completion_posts_token() {
        let (port, pool) = pool(2);
        let hits = Arc::new(AtomicU32::new(0));
        let h = Arc::clone(&hits);
        pool.submit(FiberId::new(9, 1), Box::new(move || {
            h.fetch_add(1, Ordering::SeqCst);
        }))
        .unwrap();
        assert_eq!(port.get(), FiberId::new(9, 1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(pool.threads(), 1);
        pool.shutdown();
    }

    #[test]
    fn test_grows_to_max_under_load() {
        let (port, pool) = pool(3);
        for n in 0..6 {
            pool.submit(FiberId::new(n, 1), Box::new(|| {
                thread::sleep(Duration::from_millis(30));
            }))
            .unwrap();
        }
        assert_eq!(pool.threads(), 3);
        let mut seen: Vec<u32> = (0..6).map(|_| port.get().slot() as u32).collect();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2, 3, 4, 5]);
        assert_eq!(pool.busy(), 0);
        pool.shutdown();
    }

    #[test]
    fn test_panicking_job_still_completes() {
        let (port, pool) = pool(1);
        pool.submit(FiberId::new(1, 1), Box::new(|| panic!("job failed"))).unwrap();
        assert_eq!(port.get(), FiberId::new(1, 1));
        pool.submit(FiberId::new(2, 1), Box::new(|| {})).unwrap();
        assert_eq!(port.get(), FiberId::new(2, 1));
        pool.shutdown();
    }

    #[test]
    fn test_submit_after_shutdown_fails() {
        let (_port, pool) = pool(1);
        pool.shutdown();
        assert!(pool.submit(FiberId::new(1, 1), Box::new(|| {})).is_err());
    }
}
