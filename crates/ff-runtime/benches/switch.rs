//! Scheduler hot-path benchmarks
//!
//! - `yield_now` with one peer fiber (two context switches per iteration)
//! - spawn + join of an empty fiber (stack mmap, switch in, exit, unmap)
//! - thread pool round trip (submit, worker run, port wakeup)
//!
//! Run: `cargo bench -p ff-runtime --bench switch`

use std::cell::Cell;
use std::hint::black_box;
use std::rc::Rc;

use criterion::{criterion_group, criterion_main, Criterion};
use ff_runtime::{Scheduler, SchedulerConfig};

fn bench_yield(c: &mut Criterion) {
    let sched = Scheduler::initialize(SchedulerConfig::new()).unwrap();
    let stop = Rc::new(Cell::new(false));
    let peer = {
        let (s, stop) = (sched.clone(), Rc::clone(&stop));
        sched.spawn(move || {
            while !stop.get() {
                s.yield_now();
            }
        })
    };

    c.bench_function("yield_now/one_peer", |b| b.iter(|| sched.yield_now()));

    stop.set(true);
    peer.join().unwrap();
    drop(peer);
    sched.shutdown().unwrap();
}

fn bench_spawn_join(c: &mut Criterion) {
    let sched = Scheduler::initialize(SchedulerConfig::new().stack_size(64 * 1024)).unwrap();
    c.bench_function("fiber/spawn_join", |b| {
        b.iter(|| {
            let fiber = sched.spawn(|| {
                black_box(0u64);
            });
            fiber.join().unwrap();
        })
    });
    sched.shutdown().unwrap();
}

fn bench_threadpool(c: &mut Criterion) {
    let sched = Scheduler::initialize(SchedulerConfig::new()).unwrap();
    c.bench_function("threadpool/round_trip", |b| {
        b.iter(|| sched.threadpool_execute(|| black_box(41u64) + 1))
    });
    sched.shutdown().unwrap();
}

criterion_group!(benches, bench_yield, bench_spawn_join, bench_threadpool);
criterion_main!(benches);
