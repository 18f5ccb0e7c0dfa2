//! Stress test - many fibers
//!
//! Spawns N fibers (default 10000) that each yield a few times, sleep once
//! on the timeout registry and bump a semaphore-guarded counter, then a
//! burst of thread pool calls.
//!
//! Usage: `stress [fibers] [threadpool_calls]`

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use ff::{
    kinfo, sleep, spawn, threadpool_execute, yield_now, FfError, Runtime, Scheduler,
    SchedulerConfig, Semaphore,
};
use flexi_logger::Logger;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _logger = Logger::try_with_env_or_str(ff::env_get_str("FF_LOG_LEVEL", "warn"))?.start()?;

    println!("=== ff stress test ===\n");

    let mut args = std::env::args().skip(1);
    let num_fibers: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(10_000);
    let num_calls: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(1_000);

    // small stacks: every fiber is alive at once
    let config = SchedulerConfig::from_env().stack_size(32 * 1024);
    let mut runtime = Runtime::new(config)?;

    runtime.block_on(move || -> Result<(), FfError> {
        let sched = Scheduler::current()?;
        run_fibers(&sched, num_fibers);
        run_threadpool(&sched, num_calls);
        Ok(())
    })??;

    runtime.shutdown()?;
    println!("\n=== stress test complete ===");
    Ok(())
}

fn run_fibers(sched: &Scheduler, n: usize) {
    println!("Spawning {} fibers...", n);
    let completed = Rc::new(Cell::new(0usize));
    // at most 64 fibers inside the "critical section" at a time
    let gate = Semaphore::new(sched, 64);

    let start = Instant::now();
    let fibers: Vec<_> = (0..n)
        .map(|i| {
            let (completed, gate) = (Rc::clone(&completed), gate.clone());
            let fiber = spawn(move || {
                for _ in 0..10 {
                    yield_now();
                }
                sleep(Duration::from_millis(1 + (i % 5) as u64));
                gate.down();
                completed.set(completed.get() + 1);
                yield_now();
                gate.up();
            });
            if (i + 1) % 1000 == 0 {
                print!("\rSpawned: {}/{}", i + 1, n);
            }
            fiber
        })
        .collect();
    let spawn_time = start.elapsed();
    println!("\n\nSpawn time: {:?}", spawn_time);
    println!("Spawn rate: {:.0} fibers/sec", n as f64 / spawn_time.as_secs_f64());

    let run_start = Instant::now();
    let mut panicked = 0;
    for f in &fibers {
        if f.join().is_err() {
            panicked += 1;
        }
    }
    drop(fibers);
    let run_time = run_start.elapsed();

    println!("Completed: {} (panicked: {})", completed.get(), panicked);
    println!("Run time: {:?}", run_time);
    println!(
        "Throughput: {:.0} yields/sec",
        (n * 11) as f64 / run_time.as_secs_f64()
    );
    kinfo!("{} fibers left in the table", sched.fiber_count());
}

fn run_threadpool(sched: &Scheduler, calls: usize) {
    println!("\nRunning {} thread pool round trips...", calls);
    let start = Instant::now();
    let mut sum = 0u64;
    for i in 0..calls as u64 {
        sum += threadpool_execute(move || i * 2);
    }
    let elapsed = start.elapsed();
    println!("Sum: {} ({} thread(s) used)", sum, sched.threadpool_threads());
    println!(
        "Round trip: {:?} avg",
        elapsed / (calls.max(1) as u32)
    );
}
