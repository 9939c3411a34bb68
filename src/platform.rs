//! # Platform Contract
//!
//! What the scheduler needs from the board it runs on: a wrapping 32-bit
//! tick counter, a way to idle until the next interrupt, and a fatal error
//! hook. `arch::cortex_m4` provides the reference implementation; tests
//! use a simulated clock.

use core::fmt;

use crate::lifecycle::Lifecycle;
use crate::status::TaskStatus;
use crate::task::TaskId;

/// Fatal scheduler contract violations.
///
/// None of these are recoverable: continuing would risk permanently missed
/// wake-ups or a device that can never sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// `stay_awake` called with the counter already at its maximum.
    StayAwakeOverflow,
    /// `can_sleep` called with no outstanding `stay_awake` request.
    StayAwakeUnderflow,
    /// A step function returned a delay outside `1..=MAX_DELAY`.
    MalformedStatus(TaskStatus),
    /// A queued task has no step function attached.
    DetachedTask(TaskId),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::StayAwakeOverflow => write!(f, "scheduler wake counter overflow detected"),
            Fault::StayAwakeUnderflow => write!(f, "scheduler wake counter underflow detected"),
            Fault::MalformedStatus(status) => write!(f, "malformed task status {:?}", status),
            Fault::DetachedTask(id) => write!(f, "task {} has no step function", id),
        }
    }
}

/// Board services used by the scheduler.
pub trait Platform {
    /// Current value of the monotonic tick counter. Wraps silently.
    fn now(&self) -> u32;

    /// Idle for at most `ticks`, returning early on any interrupt.
    ///
    /// The implementation chooses the sleep depth and is responsible for
    /// the power-save / deep-sleep notifications on `lifecycle`.
    fn idle(&mut self, ticks: u32, lifecycle: &Lifecycle<'_>);

    /// Fatal error hook. Must not return; halting or resetting is up to
    /// the platform.
    fn assert_fail(&self, fault: Fault) -> ! {
        log::error!("fatal: {}", fault);
        panic!("{}", fault)
    }
}
