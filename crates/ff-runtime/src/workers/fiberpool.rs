//! Pool of worker fibers fed from a bounded blocking queue
//!
//! A worker fiber is added whenever every existing worker has a task
//! outstanding, up to `max_fibers`. Workers live until shutdown.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use ff_core::{kdebug, kerror, kwarn};

use crate::fiber::Fiber;
use crate::scheduler::Scheduler;
use crate::sync::BlockingQueue;

enum Task {
    Run(Box<dyn FnOnce()>),
    Stop,
}

struct Inner {
    sched: Scheduler,
    queue: BlockingQueue<Task>,
    workers: RefCell<Vec<Fiber>>,
    /// Tasks queued or running
    outstanding: Rc<Cell<usize>>,
    max_fibers: usize,
    stopped: Cell<bool>,
}

#[derive(Clone)]
pub(crate) struct FiberPool {
    inner: Rc<Inner>,
}

impl FiberPool {
    pub(crate) fn new(sched: &Scheduler, max_fibers: usize, queue_capacity: usize) -> Self {
        Self {
            inner: Rc::new(Inner {
                sched: sched.clone(),
                queue: BlockingQueue::new(sched, queue_capacity),
                workers: RefCell::new(Vec::new()),
                outstanding: Rc::new(Cell::new(0)),
                max_fibers: max_fibers.max(1),
                stopped: Cell::new(false),
            }),
        }
    }

    /// Queue `f`, blocking the caller while the queue is full
    pub(crate) fn execute_async<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        if self.refuse() {
            return;
        }
        self.reserve();
        self.inner.queue.put(Task::Run(Box::new(f)));
    }

    /// Queue `f` once `delay` has elapsed. Never blocks the caller.
    pub(crate) fn execute_deferred<F>(&self, f: F, delay: Duration)
    where
        F: FnOnce() + 'static,
    {
        let pool = self.clone();
        self.inner.sched.register_detached_timeout(delay, move |_| {
            pool.submit_from_callback(Box::new(f));
            true
        });
    }

    /// Runs inside a timeout callback, which must not block: a full queue
    /// hands the task to a helper fiber that may
    fn submit_from_callback(&self, f: Box<dyn FnOnce()>) {
        if self.refuse() {
            return;
        }
        self.reserve();
        if let Err(Task::Run(f)) = self.inner.queue.try_put(Task::Run(f)) {
            self.inner.outstanding.set(self.inner.outstanding.get() - 1);
            let pool = self.clone();
            drop(self.inner.sched.spawn(move || pool.execute_async(f)));
        }
    }

    fn refuse(&self) -> bool {
        if self.inner.stopped.get() {
            kwarn!("fiber pool is shut down; task dropped");
        }
        self.inner.stopped.get()
    }

    /// Count a new task and add a worker if every worker is occupied
    fn reserve(&self) {
        let outstanding = self.inner.outstanding.get() + 1;
        self.inner.outstanding.set(outstanding);

        let running = self.inner.workers.borrow().len();
        if outstanding > running && running < self.inner.max_fibers {
            let worker = {
                let queue = self.inner.queue.clone();
                let outstanding = Rc::clone(&self.inner.outstanding);
                self.inner.sched.spawn(move || worker_loop(queue, outstanding))
            };
            kdebug!("fiber pool worker {} added ({} total)", worker.id(), running + 1);
            self.inner.workers.borrow_mut().push(worker);
        }
    }

    #[cfg(test)]
    fn workers(&self) -> usize {
        self.inner.workers.borrow().len()
    }

    #[cfg(test)]
    fn outstanding(&self) -> usize {
        self.inner.outstanding.get()
    }

    /// Let queued tasks finish, then stop and join every worker
    pub(crate) fn shutdown(&self) {
        if self.inner.stopped.replace(true) {
            return;
        }
        let workers = std::mem::take(&mut *self.inner.workers.borrow_mut());
        for _ in &workers {
            self.inner.queue.put(Task::Stop);
        }
        for worker in &workers {
            if let Err(e) = worker.join() {
                kerror!("fiber pool worker ended badly: {}", e);
            }
        }
        kdebug!("fiber pool stopped ({} worker(s))", workers.len());
    }
}

fn worker_loop(queue: BlockingQueue<Task>, outstanding: Rc<Cell<usize>>) {
    loop {
        match queue.get() {
            Task::Run(f) => {
                if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
                    kerror!("fiber pool task panicked");
                }
                outstanding.set(outstanding.get() - 1);
            }
            Task::Stop => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::Event;
    use crate::test_util::with_scheduler;
    use std::time::Instant;

    #[test]
    fn test_tasks_run_and_pool_grows() {
        with_scheduler(|sched| {
            let pool = FiberPool::new(sched, 4, 16);
            let done = Rc::new(Cell::new(0));
            for _ in 0..10 {
                let d = Rc::clone(&done);
                let s = sched.clone();
                pool.execute_async(move || {
                    s.sleep(Duration::from_millis(5));
                    d.set(d.get() + 1);
                });
            }
            assert_eq!(pool.workers(), 4);
            while done.get() < 10 {
                sched.sleep(Duration::from_millis(5));
            }
            assert_eq!(pool.outstanding(), 0);
            pool.shutdown();
        });
    }

    #[test]
    fn test_full_queue_blocks_submitter() {
        with_scheduler(|sched| {
            let pool = FiberPool::new(sched, 1, 1);
            let order = Rc::new(RefCell::new(Vec::new()));
            for n in 0..4 {
                let o = Rc::clone(&order);
                pool.execute_async(move || o.borrow_mut().push(n));
            }
            pool.shutdown();
            assert_eq!(*order.borrow(), vec![0, 1, 2, 3]);
        });
    }

    #[test]
    fn test_deferred_runs_after_delay() {
        with_scheduler(|sched| {
            let pool = FiberPool::new(sched, 2, 8);
            let ran_at = Rc::new(Cell::new(None));
            let r = Rc::clone(&ran_at);
            let start = Instant::now();
            pool.execute_deferred(move || r.set(Some(Instant::now())), Duration::from_millis(30));
            assert!(ran_at.get().is_none());
            while ran_at.get().is_none() {
                sched.sleep(Duration::from_millis(10));
            }
            let at = ran_at.get().unwrap_or(start);
            assert!(at.duration_since(start) >= Duration::from_millis(30));
            pool.shutdown();
        });
    }

    #[test]
    fn test_panicking_task_keeps_worker() {
        with_scheduler(|sched| {
            let pool = FiberPool::new(sched, 1, 4);
            let ok = Rc::new(Cell::new(false));
            let o = Rc::clone(&ok);
            pool.execute_async(|| panic!("task failed"));
            pool.execute_async(move || o.set(true));
            pool.shutdown();
            assert!(ok.get());
            assert_eq!(pool.outstanding(), 0);
        });
    }

    #[test]
    fn test_deferred_into_full_queue_uses_helper_fiber() {
        with_scheduler(|sched| {
            let pool = FiberPool::new(sched, 1, 1);
            let gate = Event::manual(sched);
            let order = Rc::new(RefCell::new(Vec::new()));

            // the only worker blocks on the gate and the filler fills the queue
            let (g, o) = (gate.clone(), Rc::clone(&order));
            pool.execute_async(move || {
                g.wait();
                o.borrow_mut().push("blocker");
            });
            let o = Rc::clone(&order);
            pool.execute_async(move || o.borrow_mut().push("filler"));
            assert_eq!(pool.inner.queue.len(), 1);

            let fibers_before = sched.fiber_count();
            let o = Rc::clone(&order);
            pool.execute_deferred(
                move || o.borrow_mut().push("deferred"),
                Duration::from_millis(10),
            );
            sched.sleep(Duration::from_millis(60));

            // the timeout callback could not block, so a helper fiber waits
            // for room on its behalf
            assert_eq!(sched.fiber_count(), fibers_before + 1);
            assert_eq!(pool.outstanding(), 3);
            assert!(order.borrow().is_empty());

            gate.set();
            while order.borrow().len() < 3 {
                sched.sleep(Duration::from_millis(5));
            }
            assert_eq!(*order.borrow(), vec!["blocker", "filler", "deferred"]);
            assert_eq!(pool.outstanding(), 0);
            assert_eq!(pool.workers(), 1);
            pool.shutdown();
        });
    }
}
