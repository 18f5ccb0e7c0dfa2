//! Fiber identifier type

use core::fmt;

/// Identity of a fiber inside one scheduler.
///
/// Packs the fiber-table slot in the low 32 bits and a generation counter
/// in the high 32 bits. The generation makes a stale token (a fiber that
/// was deleted and whose slot got reused) detectable when it comes back
/// through the completion port.
///
/// The raw value doubles as the epoll user data, so `u64::MAX` is kept as
/// the "no fiber" sentinel and the port's own waker key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct FiberId(u64);

impl FiberId {
    /// Sentinel value meaning "no fiber"
    pub const NONE: FiberId = FiberId(u64::MAX);

    /// Build an id from a slot index and its generation
    #[inline]
    pub const fn new(slot: u32, generation: u32) -> Self {
        FiberId(((generation as u64) << 32) | slot as u64)
    }

    /// Rebuild an id from its raw encoding (epoll data, port tokens)
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        FiberId(raw)
    }

    #[inline]
    pub const fn as_raw(self) -> u64 {
        self.0
    }

    /// Slot in the owning scheduler's fiber table
    #[inline]
    pub const fn slot(self) -> usize {
        (self.0 & 0xFFFF_FFFF) as usize
    }

    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }

    #[inline]
    pub const fn is_none(self) -> bool {
        self.0 == u64::MAX
    }

    #[inline]
    pub const fn is_some(self) -> bool {
        self.0 != u64::MAX
    }

    /// Convert to Option
    #[inline]
    pub const fn to_option(self) -> Option<FiberId> {
        if self.is_none() {
            None
        } else {
            Some(self)
        }
    }
}

impl fmt::Debug for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "FiberId(NONE)")
        } else {
            write!(f, "FiberId({}g{})", self.slot(), self.generation())
        }
    }
}

impl fmt::Display for FiberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            write!(f, "none")
        } else {
            write!(f, "{}.{}", self.slot(), self.generation())
        }
    }
}

impl Default for FiberId {
    fn default() -> Self {
        FiberId::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_and_generation_packing() {
        let id = FiberId::new(42, 7);
        assert_eq!(id.slot(), 42);
        assert_eq!(id.generation(), 7);
        assert!(id.is_some());
        assert_eq!(FiberId::from_raw(id.as_raw()), id);
    }

    #[test]
    fn test_none_sentinel() {
        let none = FiberId::NONE;
        assert!(none.is_none());
        assert_eq!(none.to_option(), None);
        assert_eq!(FiberId::default(), FiberId::NONE);
        assert_eq!(format!("{}", none), "none");
    }

    #[test]
    fn test_generation_distinguishes_reused_slot() {
        let old = FiberId::new(3, 1);
        let new = FiberId::new(3, 2);
        assert_eq!(old.slot(), new.slot());
        assert_ne!(old, new);
        assert_eq!(format!("{}", new), "3.2");
    }
}
