//! Periodic timerfd tick delivered through the completion port

use std::cell::Cell;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use std::time::Duration;

use ff_core::{kfatal, kwarn, FfError, FfResult, FiberId};
use nix::errno::Errno;

use crate::port::OpType;
use crate::scheduler::Scheduler;

pub(crate) struct Ticker {
    fd: OwnedFd,
    interval: Duration,
    /// Fiber currently parked on the tick
    waiter: Cell<FiberId>,
}

impl Ticker {
    /// Create a CLOCK_MONOTONIC timerfd firing every `interval` and
    /// register it with `sched`'s port
    pub(crate) fn new(sched: &Scheduler, interval: Duration) -> FfResult<Self> {
        // Safety: plain syscall, result checked
        let raw = unsafe {
            libc::timerfd_create(
                libc::CLOCK_MONOTONIC,
                libc::TFD_NONBLOCK | libc::TFD_CLOEXEC,
            )
        };
        if raw < 0 {
            return Err(FfError::os("timerfd_create", Errno::last_raw()));
        }
        // Safety: fresh descriptor we own
        let fd = unsafe { OwnedFd::from_raw_fd(raw) };

        let period = libc::timespec {
            tv_sec: interval.as_secs() as libc::time_t,
            tv_nsec: interval.subsec_nanos() as libc::c_long,
        };
        let spec = libc::itimerspec {
            it_interval: period,
            it_value: period,
        };
        // Safety: valid timerfd and itimerspec
        let ret = unsafe { libc::timerfd_settime(fd.as_raw_fd(), 0, &spec, std::ptr::null_mut()) };
        if ret < 0 {
            return Err(FfError::os("timerfd_settime", Errno::last_raw()));
        }

        sched.port().register_handle(fd.as_raw_fd())?;
        Ok(Self {
            fd,
            interval,
            waiter: Cell::new(FiberId::NONE),
        })
    }

    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Park the current fiber until the next tick
    pub(crate) fn wait(&self, sched: &Scheduler) {
        let me = sched.current_id();
        if let Err(e) = sched
            .port()
            .register_operation(self.fd.as_raw_fd(), OpType::Read, me)
        {
            kfatal!("timeout ticker arm failed: {}", e);
        }
        self.waiter.set(me);
        sched.yield_fiber();
        self.waiter.set(FiberId::NONE);
        self.drain();
    }

    /// Resume a fiber parked in `wait` without waiting for the tick
    pub(crate) fn interrupt(&self, sched: &Scheduler) {
        let waiter = self.waiter.get();
        if waiter.is_some() {
            sched.port().cancel_operation(self.fd.as_raw_fd(), waiter);
        }
    }

    /// Release the port registration (shutdown)
    pub(crate) fn deregister(&self, sched: &Scheduler) {
        if let Err(e) = sched.port().deregister_handle(self.fd.as_raw_fd()) {
            kwarn!("timeout ticker deregister: {}", e);
        }
    }

    fn drain(&self) {
        let mut expirations: u64 = 0;
        // Safety: 8-byte read into a local; EAGAIN when interrupted early
        unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                &mut expirations as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }
}
