//! Timeout and cancellation
//!
//! A blocking operation that wants a deadline registers a cancel callback
//! against the current fiber, blocks, and deregisters once it resumes.
//! Exactly one of the two wake paths wins:
//!
//! ```text
//!   register ──> Registered ──checker: callback() == true──> Expired
//!                    │    └────checker: callback() == false─> Missed
//!                    └──deregister (operation completed first)
//! ```
//!
//! `Missed` means the checker reached the entry after the operation had
//! already completed through its normal path; deregistration reports it as
//! success just like an entry that never fired.
//!
//! A timeout too large to add to `Instant::now()` registers an entry with
//! no deadline, which never fires.
//!
//! The checker is a fiber owned by the scheduler. It idles on an event
//! while no entry has a pending deadline and otherwise wakes on a periodic
//! timerfd tick delivered through the completion port.

mod checker;
mod registry;
mod ticker;

pub(crate) use checker::Checker;
pub use registry::{CancelFn, TimeoutHandle, TimeoutRegistry, TimeoutState};
pub(crate) use ticker::Ticker;
