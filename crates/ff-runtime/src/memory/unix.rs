//! Unix stack mappings using mmap

use std::ptr::NonNull;

use ff_core::error::StackError;
use ff_core::kdebug;

/// OS page size
pub fn page_size() -> usize {
    // Safety: sysconf has no preconditions
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as usize
    } else {
        4096
    }
}

/// A guarded fiber stack, unmapped on drop
pub struct FiberStack {
    base: NonNull<u8>,
    total: usize,
    guard: usize,
}

impl FiberStack {
    /// Map `usable` bytes of stack (already page rounded) plus a guard page.
    pub fn new(usable: usize) -> Result<Self, StackError> {
        let guard = super::guard_size();
        let total = usable.checked_add(guard).ok_or(StackError::TooLarge)?;

        #[cfg(target_os = "linux")]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_STACK;
        #[cfg(not(target_os = "linux"))]
        let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

        // Safety: anonymous mapping, no address hint
        let base = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                total,
                libc::PROT_READ | libc::PROT_WRITE,
                flags,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(StackError::MapFailed);
        }

        // Stacks grow down: the guard sits at the lowest address
        // Safety: `base` is a fresh mapping of `total >= guard` bytes
        let ret = unsafe { libc::mprotect(base, guard, libc::PROT_NONE) };
        if ret != 0 {
            // Safety: unmapping what we just mapped
            unsafe { libc::munmap(base, total) };
            return Err(StackError::GuardFailed);
        }

        let base = NonNull::new(base as *mut u8).ok_or(StackError::MapFailed)?;
        kdebug!("mapped fiber stack {:p} ({} usable)", base, usable);
        Ok(FiberStack { base, total, guard })
    }

    /// Highest address of the stack (initial stack pointer)
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // Safety: one-past-the-end of our own mapping
        unsafe { self.base.as_ptr().add(self.total) }
    }

    /// Lowest usable address (just above the guard)
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        // Safety: guard < total
        unsafe { self.base.as_ptr().add(self.guard) }
    }

    #[inline]
    pub fn usable_size(&self) -> usize {
        self.total - self.guard
    }
}

impl Drop for FiberStack {
    fn drop(&mut self) {
        // Safety: we own the mapping
        unsafe {
            libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.total);
        }
    }
}

impl std::fmt::Debug for FiberStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FiberStack")
            .field("bottom", &self.bottom())
            .field("top", &self.top())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_layout() {
        let size = super::super::effective_stack_size(64 * 1024, 0);
        let stack = FiberStack::new(size).unwrap();
        assert_eq!(stack.usable_size(), size);
        assert_eq!(stack.top() as usize - stack.bottom() as usize, size);
        assert_eq!(stack.top() as usize % 16, 0);

        // usable range is writable end to end
        unsafe {
            stack.bottom().write(0xAB);
            stack.top().sub(1).write(0xCD);
            assert_eq!(stack.bottom().read(), 0xAB);
        }
    }

    #[test]
    fn test_oversized_request_fails() {
        assert_eq!(FiberStack::new(usize::MAX).unwrap_err(), StackError::TooLarge);
    }
}
