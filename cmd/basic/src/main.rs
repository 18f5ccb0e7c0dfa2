//! Basic ff example
//!
//! Walks through the main pieces: fibers, events, a mutex held across a
//! sleep, a producer/consumer queue, the thread pool, deferred fiber pool
//! work and descriptor I/O with a timeout.
//!
//! # Environment Variables
//!
//! - `FF_LOG_LEVEL=debug` - filter string for flexi_logger (falls back to `RUST_LOG`, then `info`)
//! - `FF_FLUSH_EPRINT=1` - flush raw `kprintln!` output immediately
//! - `FF_*` scheduler overrides, see `SchedulerConfig::from_env`

use std::cell::Cell;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ff::{
    fiberpool_execute_deferred, kdebug, kinfo, sleep, spawn, threadpool_execute, yield_now,
    AsyncFd, BlockingQueue, Event, FfError, Mutex, Runtime, Scheduler, SchedulerConfig,
};
use flexi_logger::Logger;

// FF_LOG_LEVEL=debug cargo run -p ff-basic
fn main() -> Result<(), Box<dyn std::error::Error>> {
    let logger = match ff::env_get_opt::<String>("FF_LOG_LEVEL") {
        Some(spec) => Logger::try_with_str(spec)?,
        None => Logger::try_with_env_or_str("info")?,
    };
    let _logger = logger.start()?;

    println!("=== ff basic example ===\n");

    let config = SchedulerConfig::from_env().debug_logging(true);
    let mut runtime = Runtime::new(config)?;

    let summary = runtime.block_on(|| -> Result<String, FfError> {
        let sched = Scheduler::current()?;
        fibers_and_events(&sched);
        mutex_across_sleep(&sched);
        producer_consumer(&sched);
        offload();
        descriptor_io(&sched)?;
        Ok(format!("{} fiber(s) left in the table", sched.fiber_count()))
    })??;

    runtime.shutdown()?;
    println!("\n{}", summary);
    println!("=== example complete ===");
    Ok(())
}

fn fibers_and_events(sched: &Scheduler) {
    let go = Event::manual(sched);
    let done = Rc::new(Cell::new(0));
    let fibers: Vec<_> = (1..=3)
        .map(|i| {
            let (go, done) = (go.clone(), Rc::clone(&done));
            spawn(move || {
                kdebug!("fiber {} waiting for the start signal", i);
                go.wait();
                for round in 0..3 {
                    kdebug!("fiber {} round {}", i, round);
                    yield_now();
                }
                done.set(done.get() + 1);
            })
        })
        .collect();

    yield_now();
    println!("{} fiber(s) parked on the event", go.waiters());
    go.set();
    for f in &fibers {
        f.join().ok();
    }
    println!("{} fiber(s) finished", done.get());
}

fn mutex_across_sleep(sched: &Scheduler) {
    let counter = Rc::new(Mutex::new(sched, 0u32));
    let fibers: Vec<_> = (0..4)
        .map(|_| {
            let counter = Rc::clone(&counter);
            spawn(move || {
                let mut guard = counter.lock();
                let seen = *guard;
                sleep(Duration::from_millis(2));
                *guard = seen + 1;
            })
        })
        .collect();
    for f in &fibers {
        f.join().ok();
    }
    println!("mutex-protected counter: {}", *counter.lock());
}

fn producer_consumer(sched: &Scheduler) {
    let queue: BlockingQueue<u32> = BlockingQueue::new(sched, 2);
    let producer = {
        let queue = queue.clone();
        spawn(move || {
            for n in 0..6 {
                queue.put(n);
            }
        })
    };
    let received: Vec<u32> = (0..6).map(|_| queue.get()).collect();
    producer.join().ok();
    println!("consumed {:?} through a queue of capacity {}", received, queue.capacity());
}

fn offload() {
    let started = Instant::now();
    let digest = threadpool_execute(|| {
        std::thread::sleep(Duration::from_millis(20));
        (1..=10u64).product::<u64>()
    });
    println!("thread pool returned {} after {:?}", digest, started.elapsed());

    let fired = Rc::new(Cell::new(false));
    let f = Rc::clone(&fired);
    fiberpool_execute_deferred(move || f.set(true), Duration::from_millis(30));
    while !fired.get() {
        sleep(Duration::from_millis(10));
    }
    println!("deferred task ran after {:?}", started.elapsed());
}

fn descriptor_io(sched: &Scheduler) -> Result<(), FfError> {
    let (a, b) = UnixStream::pair().map_err(|e| FfError::os("socketpair", e.raw_os_error().unwrap_or(0)))?;
    let reader = AsyncFd::new(sched, OwnedFd::from(a))?;
    let writer = AsyncFd::new(sched, OwnedFd::from(b))?;

    let echo = spawn(move || {
        sleep(Duration::from_millis(10));
        if let Err(e) = writer.write_all(b"ping", Some(Duration::from_secs(1))) {
            kinfo!("write failed: {}", e);
        }
    });

    let mut buf = [0u8; 16];
    let n = reader.read(&mut buf, Some(Duration::from_secs(1)))?;
    println!("read {:?}", String::from_utf8_lossy(&buf[..n]));
    echo.join()?;

    match reader.read(&mut buf, Some(Duration::from_millis(50))) {
        Err(FfError::Timeout) => println!("idle read timed out, descriptor disconnected"),
        other => println!("unexpected idle read result: {:?}", other),
    }
    Ok(())
}
