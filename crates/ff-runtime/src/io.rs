//! Descriptor adapter for fiber code
//!
//! `AsyncFd` puts a descriptor in non-blocking mode and registers it with
//! the scheduler's completion port once. Each `read`/`write` tries the
//! syscall first; on EAGAIN it arms the descriptor for the current fiber
//! and yields until readiness arrives.
//!
//! With a timeout, a timeout entry is registered around the wait. If it
//! fires before readiness, the callback cancels the pending operation, marks
//! the descriptor disconnected (sockets are also shut down) and the call
//! returns `FfError::Timeout`. Every later call returns `Disconnected`.

use std::cell::Cell;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::rc::Rc;
use std::time::{Duration, Instant};

use ff_core::{kdebug, ktrace, FfError, FfResult, FiberId};
use nix::errno::Errno;

use crate::port::OpType;
use crate::scheduler::Scheduler;

pub struct AsyncFd {
    sched: Scheduler,
    fd: OwnedFd,
    is_socket: bool,
    disconnected: Rc<Cell<bool>>,
    /// Fiber parked on this descriptor, if any
    waiter: Cell<FiberId>,
}

impl AsyncFd {
    /// Take ownership of `fd`, switch it to non-blocking mode and register
    /// it with `sched`'s port
    pub fn new(sched: &Scheduler, fd: OwnedFd) -> FfResult<Self> {
        let raw = fd.as_raw_fd();
        // Safety: fcntl/fstat on a descriptor we own
        unsafe {
            let flags = libc::fcntl(raw, libc::F_GETFL);
            if flags < 0 {
                return Err(FfError::os("fcntl(F_GETFL)", Errno::last_raw()));
            }
            if libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
                return Err(FfError::os("fcntl(F_SETFL)", Errno::last_raw()));
            }
        }
        let is_socket = unsafe {
            let mut st: libc::stat = std::mem::zeroed();
            libc::fstat(raw, &mut st) == 0 && (st.st_mode & libc::S_IFMT) == libc::S_IFSOCK
        };

        sched.port().register_handle(raw)?;
        kdebug!("fd {} registered (socket: {})", raw, is_socket);
        Ok(Self {
            sched: sched.clone(),
            fd,
            is_socket,
            disconnected: Rc::new(Cell::new(false)),
            waiter: Cell::new(FiberId::NONE),
        })
    }

    pub fn is_disconnected(&self) -> bool {
        self.disconnected.get()
    }

    /// Read into `buf`. `Ok(0)` is end of stream.
    pub fn read(&self, buf: &mut [u8], timeout: Option<Duration>) -> FfResult<usize> {
        let deadline = deadline_after(timeout);
        loop {
            self.check_connected()?;
            // Safety: buf is valid for buf.len() bytes
            let n = unsafe {
                libc::read(self.fd.as_raw_fd(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => self.wait_ready(OpType::Read, deadline)?,
                err => return Err(FfError::os("read", err as i32)),
            }
        }
    }

    /// Write some of `buf`, waiting until at least one byte is accepted
    pub fn write(&self, buf: &[u8], timeout: Option<Duration>) -> FfResult<usize> {
        let deadline = deadline_after(timeout);
        self.write_until(buf, deadline)
    }

    /// Write all of `buf`; the timeout covers the whole transfer
    pub fn write_all(&self, mut buf: &[u8], timeout: Option<Duration>) -> FfResult<()> {
        let deadline = deadline_after(timeout);
        while !buf.is_empty() {
            let n = self.write_until(buf, deadline)?;
            buf = &buf[n..];
        }
        Ok(())
    }

    fn write_until(&self, buf: &[u8], deadline: Option<Instant>) -> FfResult<usize> {
        loop {
            self.check_connected()?;
            // Safety: buf is valid for buf.len() bytes
            let n = unsafe {
                libc::write(self.fd.as_raw_fd(), buf.as_ptr() as *const libc::c_void, buf.len())
            };
            if n >= 0 {
                return Ok(n as usize);
            }
            match Errno::last() {
                Errno::EINTR => continue,
                Errno::EAGAIN => self.wait_ready(OpType::Write, deadline)?,
                err => return Err(FfError::os("write", err as i32)),
            }
        }
    }

    /// Mark the descriptor unusable and resume a fiber blocked on it.
    /// Sockets are shut down in both directions.
    pub fn disconnect(&self) {
        if self.disconnected.replace(true) {
            return;
        }
        if self.is_socket {
            shutdown_socket(self.fd.as_raw_fd());
        }
        let waiter = self.waiter.get();
        if waiter.is_some() {
            self.sched.port().cancel_operation(self.fd.as_raw_fd(), waiter);
        }
    }

    fn check_connected(&self) -> FfResult<()> {
        if self.disconnected.get() {
            Err(FfError::Disconnected)
        } else {
            Ok(())
        }
    }

    /// Park the current fiber until `fd` is ready for `op` or `deadline`
    /// passes
    fn wait_ready(&self, op: OpType, deadline: Option<Instant>) -> FfResult<()> {
        let remaining = match deadline {
            Some(d) => {
                let left = d.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    return Err(FfError::Timeout);
                }
                Some(left)
            }
            None => None,
        };

        let raw = self.fd.as_raw_fd();
        let me = self.sched.current_id();
        self.sched.port().register_operation(raw, op, me)?;
        self.waiter.set(me);

        let handle = remaining.map(|left| {
            let port = std::sync::Arc::clone(self.sched.port());
            let disconnected = Rc::clone(&self.disconnected);
            let is_socket = self.is_socket;
            self.sched.register_timeout_operation(left, move |fiber| {
                if !port.cancel_operation(raw, fiber) {
                    return false;
                }
                disconnected.set(true);
                if is_socket {
                    shutdown_socket(raw);
                }
                true
            })
        });

        // any resume, stray or not, ends in a retry of the syscall
        self.sched.yield_fiber();
        self.waiter.set(FiberId::NONE);

        if let Some(handle) = handle {
            if !self.sched.deregister_timeout_operation(handle) {
                ktrace!("fd {} {:?} timed out", raw, op);
                return Err(FfError::Timeout);
            }
        }
        self.check_connected()
    }
}

/// `None` for no timeout or one too large to express as a deadline
fn deadline_after(timeout: Option<Duration>) -> Option<Instant> {
    timeout.and_then(|t| Instant::now().checked_add(t))
}

fn shutdown_socket(fd: RawFd) {
    // Safety: shutdown on a descriptor that is still open; errors such as
    // ENOTCONN are irrelevant here
    unsafe {
        libc::shutdown(fd, libc::SHUT_RDWR);
    }
}

impl AsRawFd for AsyncFd {
    fn as_raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Drop for AsyncFd {
    fn drop(&mut self) {
        if self.sched.is_shut_down() {
            return;
        }
        if let Err(e) = self.sched.port().deregister_handle(self.fd.as_raw_fd()) {
            kdebug!("fd {} deregister: {}", self.fd.as_raw_fd(), e);
        }
    }
}

impl std::fmt::Debug for AsyncFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AsyncFd")
            .field("fd", &self.fd.as_raw_fd())
            .field("disconnected", &self.disconnected.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::with_scheduler;
    use std::os::unix::net::UnixStream;

    fn pair(sched: &Scheduler) -> (AsyncFd, AsyncFd) {
        let (a, b) = UnixStream::pair().unwrap();
        (
            AsyncFd::new(sched, OwnedFd::from(a)).unwrap(),
            AsyncFd::new(sched, OwnedFd::from(b)).unwrap(),
        )
    }

    #[test]
    fn test_read_waits_for_writer_fiber() {
        with_scheduler(|sched| {
            let (a, b) = pair(sched);
            let s = sched.clone();
            let writer = sched.spawn(move || {
                s.sleep(Duration::from_millis(20));
                b.write_all(b"hello", None).unwrap();
            });
            let mut buf = [0u8; 16];
            let n = a.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
            assert_eq!(&buf[..n], b"hello");
            writer.join().unwrap();
        });
    }

    #[test]
    fn test_read_timeout_disconnects() {
        with_scheduler(|sched| {
            let (a, _b) = pair(sched);
            let start = Instant::now();
            let mut buf = [0u8; 4];
            let err = a.read(&mut buf, Some(Duration::from_millis(30))).unwrap_err();
            assert_eq!(err, FfError::Timeout);
            assert!(start.elapsed() >= Duration::from_millis(30));
            assert!(a.is_disconnected());
            assert_eq!(a.read(&mut buf, None), Err(FfError::Disconnected));
        });
    }

    #[test]
    fn test_write_all_larger_than_socket_buffer() {
        with_scheduler(|sched| {
            let (a, b) = pair(sched);
            let total = 4 * 1024 * 1024;
            let reader = {
                let received = Rc::new(Cell::new(0usize));
                let r = Rc::clone(&received);
                let fiber = sched.spawn(move || {
                    let mut buf = vec![0u8; 64 * 1024];
                    loop {
                        let n = b.read(&mut buf, Some(Duration::from_secs(5))).unwrap();
                        if n == 0 {
                            break;
                        }
                        r.set(r.get() + n);
                    }
                });
                (fiber, received)
            };
            let data = vec![7u8; total];
            a.write_all(&data, Some(Duration::from_secs(5))).unwrap();
            a.disconnect();
            reader.0.join().unwrap();
            assert_eq!(reader.1.get(), total);
        });
    }

    #[test]
    fn test_disconnect_wakes_blocked_reader() {
        with_scheduler(|sched| {
            let (a, _b) = pair(sched);
            let a = Rc::new(a);
            let result = Rc::new(Cell::new(None));
            let reader = {
                let a = Rc::clone(&a);
                let result = Rc::clone(&result);
                sched.spawn(move || {
                    let mut buf = [0u8; 4];
                    result.set(Some(a.read(&mut buf, None)));
                })
            };
            sched.yield_now();
            assert!(result.take().is_none());
            a.disconnect();
            reader.join().unwrap();
            assert_eq!(result.take(), Some(Err(FfError::Disconnected)));
        });
    }

    #[test]
    fn test_unbounded_timeout_means_no_deadline() {
        with_scheduler(|sched| {
            let (a, b) = pair(sched);
            b.write_all(b"hi", Some(Duration::MAX)).unwrap();
            let mut buf = [0u8; 8];
            let n = a.read(&mut buf, Some(Duration::MAX)).unwrap();
            assert_eq!(&buf[..n], b"hi");

            let s = sched.clone();
            let writer = sched.spawn(move || {
                s.sleep(Duration::from_millis(10));
                assert_eq!(b.write(b"late", Some(Duration::MAX)).unwrap(), 4);
            });
            let n = a.read(&mut buf, Some(Duration::MAX)).unwrap();
            assert_eq!(&buf[..n], b"late");
            assert!(!a.is_disconnected());
            assert!(sched.timeouts().is_empty());
            writer.join().unwrap();
        });
    }
}
