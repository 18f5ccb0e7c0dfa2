//! Completion port
//!
//! The single place the scheduler thread blocks on the OS. Ready tokens
//! (fiber ids) arrive two ways:
//!
//! - OS readiness: a descriptor armed with `register_operation` fires once
//!   and its epoll user data is the waiting fiber's id
//! - explicit posts: `put` from any thread (thread pool completions, the
//!   scheduler itself) queue a token and poke an eventfd so a blocked
//!   `get` wakes up
//!
//! ```text
//!   worker thread ──put──┐
//!                        ├──> ready (SpinLock<VecDeque>) ──get──> scheduler
//!   epoll_wait ──────────┘
//! ```

use std::collections::VecDeque;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use ff_core::constants::MAX_EVENTS_PER_WAIT;
use ff_core::{kdebug, kfatal, ktrace, FfError, FfResult, FiberId, SpinLock};
use nix::errno::Errno;

/// epoll user data of the port's own eventfd
const WAKER_KEY: u64 = u64::MAX;

/// epoll user data of a registered but disarmed descriptor
const DISARMED_KEY: u64 = u64::MAX - 1;

/// Kind of readiness an operation waits for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpType {
    Read,
    Write,
}

impl OpType {
    fn epoll_events(self) -> u32 {
        let base = match self {
            OpType::Read => libc::EPOLLIN | libc::EPOLLRDHUP,
            OpType::Write => libc::EPOLLOUT,
        };
        (base | libc::EPOLLONESHOT) as u32
    }
}

pub struct CompletionPort {
    epoll: OwnedFd,
    waker: OwnedFd,
    ready: SpinLock<VecDeque<FiberId>>,
    concurrency: usize,
}

impl CompletionPort {
    /// Create the epoll set and its eventfd waker
    pub fn new(concurrency: usize) -> FfResult<Self> {
        // Safety: plain syscalls, results checked
        let epfd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if epfd < 0 {
            return Err(FfError::os("epoll_create1", Errno::last_raw()));
        }
        // Safety: fresh descriptor we own
        let epoll = unsafe { OwnedFd::from_raw_fd(epfd) };

        let evfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if evfd < 0 {
            return Err(FfError::os("eventfd", Errno::last_raw()));
        }
        let waker = unsafe { OwnedFd::from_raw_fd(evfd) };

        let port = CompletionPort {
            epoll,
            waker,
            ready: SpinLock::new(VecDeque::new()),
            concurrency: concurrency.max(1),
        };
        port.ctl(libc::EPOLL_CTL_ADD, port.waker.as_raw_fd(), libc::EPOLLIN as u32, WAKER_KEY)
            .map_err(|code| FfError::os("epoll_ctl(waker)", code))?;

        kdebug!(
            "completion port ready (epoll {}, waker {})",
            port.epoll.as_raw_fd(),
            port.waker.as_raw_fd()
        );
        Ok(port)
    }

    #[inline]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Next ready token, blocking the OS thread until one exists
    pub fn get(&self) -> FiberId {
        loop {
            if let Some(token) = self.poll(None) {
                return token;
            }
        }
    }

    /// Next ready token, waiting at most `timeout` (`None` waits forever,
    /// though a waker or disarmed event may still return `None` early)
    pub fn poll(&self, timeout: Option<Duration>) -> Option<FiberId> {
        let queued = self.ready.lock().pop_front();
        if queued.is_some() {
            return queued;
        }
        let timeout_ms = match timeout {
            None => -1,
            Some(d) => d.as_millis().min(i32::MAX as u128) as i32,
        };
        self.wait_events(timeout_ms);
        self.ready.lock().pop_front()
    }

    /// Queue a token; never blocks, callable from any thread
    pub fn put(&self, token: FiberId) {
        self.ready.lock().push_back(token);
        self.wake();
    }

    /// Number of tokens waiting to be handed out
    pub fn pending(&self) -> usize {
        self.ready.lock().len()
    }

    /// Add `fd` to the epoll set, disarmed. Call once per descriptor.
    pub fn register_handle(&self, fd: RawFd) -> FfResult<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, libc::EPOLLONESHOT as u32, DISARMED_KEY)
            .map_err(|code| FfError::os("epoll_ctl(add)", code))
    }

    /// Arm `fd` so its next `op` readiness delivers `token`
    pub fn register_operation(&self, fd: RawFd, op: OpType, token: FiberId) -> FfResult<()> {
        ktrace!("arm fd {} for {:?} -> {}", fd, op, token);
        self.ctl(libc::EPOLL_CTL_MOD, fd, op.epoll_events(), token.as_raw())
            .map_err(|code| FfError::os("epoll_ctl(mod)", code))
    }

    /// Remove `fd` from the epoll set. Errors (e.g. already closed) are
    /// reported but leave the port usable.
    pub fn deregister_handle(&self, fd: RawFd) -> FfResult<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, 0, 0)
            .map_err(|code| FfError::os("epoll_ctl(del)", code))
    }

    /// Abort a pending operation for `token`.
    ///
    /// Returns false when the readiness already reached the ready queue:
    /// the operation completed and the fiber will resume normally. Otherwise
    /// disarms `fd`, posts `token` itself and returns true.
    ///
    /// Scheduler thread only: readiness is harvested on that thread too, so
    /// nothing can move between the check and the disarm.
    pub fn cancel_operation(&self, fd: RawFd, token: FiberId) -> bool {
        if self.ready.lock().contains(&token) {
            return false;
        }
        if let Err(code) = self.ctl(libc::EPOLL_CTL_MOD, fd, libc::EPOLLONESHOT as u32, DISARMED_KEY) {
            kdebug!("cancel on fd {}: disarm failed ({})", fd, Errno::from_raw(code));
        }
        self.put(token);
        true
    }

    fn wake(&self) {
        let val: u64 = 1;
        // Safety: writing 8 bytes from a local to our eventfd
        let ret = unsafe {
            libc::write(
                self.waker.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                std::mem::size_of::<u64>(),
            )
        };
        // EAGAIN: counter saturated, a wake is pending anyway
        if ret < 0 && Errno::last() != Errno::EAGAIN {
            kfatal!("completion port waker write failed: {}", Errno::last());
        }
    }

    fn drain_waker(&self) {
        let mut val: u64 = 0;
        // Safety: reading 8 bytes into a local; non-blocking descriptor
        unsafe {
            libc::read(
                self.waker.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                std::mem::size_of::<u64>(),
            );
        }
    }

    /// One epoll_wait; harvested tokens go to the back of the ready queue
    fn wait_events(&self, timeout_ms: i32) {
        let mut events = [libc::epoll_event { events: 0, u64: 0 }; MAX_EVENTS_PER_WAIT];
        let n = loop {
            // Safety: buffer length matches maxevents
            let n = unsafe {
                libc::epoll_wait(
                    self.epoll.as_raw_fd(),
                    events.as_mut_ptr(),
                    MAX_EVENTS_PER_WAIT as i32,
                    timeout_ms,
                )
            };
            if n >= 0 {
                break n as usize;
            }
            match Errno::last() {
                Errno::EINTR => continue,
                err => kfatal!("epoll_wait failed: {}", err),
            }
        };

        let mut ready = self.ready.lock();
        for ev in &events[..n] {
            let key = ev.u64;
            match key {
                WAKER_KEY => self.drain_waker(),
                DISARMED_KEY => {}
                raw => ready.push_back(FiberId::from_raw(raw)),
            }
        }
    }

    fn ctl(&self, op: i32, fd: RawFd, events: u32, key: u64) -> Result<(), i32> {
        let mut ev = libc::epoll_event { events, u64: key };
        // Safety: valid epoll descriptor and event struct
        let ret = unsafe { libc::epoll_ctl(self.epoll.as_raw_fd(), op, fd, &mut ev) };
        if ret < 0 {
            Err(Errno::last_raw())
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for CompletionPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionPort")
            .field("epoll", &self.epoll.as_raw_fd())
            .field("pending", &self.pending())
            .finish()
    }
}
