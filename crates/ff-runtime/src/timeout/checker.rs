//! The timeout checker fiber

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ff_core::{kdebug, ktrace, FfResult};

use super::Ticker;
use crate::fiber::Fiber;
use crate::scheduler::Scheduler;
use crate::sync::{Event, EventMode};

/// Handle the scheduler keeps on its checker fiber
pub(crate) struct Checker {
    fiber: Fiber,
    /// Set whenever a timeout is registered; wakes an idle checker
    work: Event,
    stop: Rc<Cell<bool>>,
    ticker: Rc<Ticker>,
}

impl Checker {
    pub(crate) fn start(sched: &Scheduler, interval: Duration) -> FfResult<Self> {
        let work = Event::new(sched, EventMode::Auto, false);
        let stop = Rc::new(Cell::new(false));
        let ticker = Rc::new(Ticker::new(sched, interval)?);

        let fiber = {
            let owner = sched.clone();
            let work = work.clone();
            let stop = Rc::clone(&stop);
            let ticker = Rc::clone(&ticker);
            sched.spawn(move || run(owner, work, stop, ticker))
        };
        kdebug!("timeout checker {} started ({:?} tick)", fiber.id(), interval);
        Ok(Self {
            fiber,
            work,
            stop,
            ticker,
        })
    }

    #[inline]
    pub(crate) fn notify(&self) {
        self.work.set();
    }

    /// Ask the fiber to finish and wait for it. Root fiber only.
    pub(crate) fn stop(self, sched: &Scheduler) {
        self.stop.set(true);
        self.work.set();
        self.ticker.interrupt(sched);
        if let Err(e) = self.fiber.join() {
            ff_core::kerror!("timeout checker ended badly: {}", e);
        }
        self.ticker.deregister(sched);
    }
}

fn run(sched: Scheduler, work: Event, stop: Rc<Cell<bool>>, ticker: Rc<Ticker>) {
    loop {
        if stop.get() {
            break;
        }
        if sched.timeouts().next_deadline().is_none() {
            work.wait();
            continue;
        }
        ticker.wait(&sched);
        if stop.get() {
            break;
        }
        let fired = sched.timeouts().fire_expired(Instant::now());
        if fired > 0 {
            ktrace!("checker fired {} timeout(s), {} left", fired, sched.timeouts().len());
        }
    }
    kdebug!("timeout checker exiting (tick {:?})", ticker.interval());
}
