//! # Task Status
//!
//! The value a step function returns to tell the scheduler when it wants
//! to run again. It is consumed immediately by the engine and never stored.
//!
//! ## Queue Classes
//!
//! | Variant | Queue | Wakes the device? |
//! |---------|-------|-------------------|
//! | `Immediate` | ready (tail) | n/a |
//! | `Delayed(n)` | scheduled | yes |
//! | `Background(n)` | background | no |
//! | `Suspend` | none | n/a |
//!
//! ## Raw Encoding
//!
//! For binary compatibility the status also has a 32-bit form: `0` is
//! `Immediate`, `0x8000_0000` is `Suspend`, a clear high bit with a
//! non-zero payload is `Delayed`, and a set high bit with a non-zero
//! payload is `Background`.

use crate::config::{BACKGROUND_TASK_INTERVAL, MAX_DELAY};

const BACKGROUND_BIT: u32 = 0x8000_0000;

/// Rescheduling request returned by a task's step function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Append to the tail of the ready list and run again as soon as the
    /// tasks ahead of it have had their turn.
    Immediate,
    /// Run no sooner than `n` ticks from now. The platform may leave
    /// low-power mode specifically to honor this deadline.
    Delayed(u32),
    /// Run no sooner than `n` ticks from now, but only if the device is
    /// awake for some other reason at or after that time.
    Background(u32),
    /// Leave all queues until something resumes the task.
    Suspend,
}

/// Clamps a requested delay to `1..=MAX_DELAY`.
#[inline]
const fn clamp_delay(ticks: u32) -> u32 {
    if ticks < 1 {
        1
    } else if ticks > MAX_DELAY {
        MAX_DELAY
    } else {
        ticks
    }
}

impl TaskStatus {
    /// Request a wake-capable re-run after `ticks`. A zero delay means
    /// "now" and yields `Immediate`; anything above `MAX_DELAY` saturates.
    #[inline]
    pub const fn run_later(ticks: u32) -> Self {
        if ticks == 0 {
            TaskStatus::Immediate
        } else {
            TaskStatus::Delayed(clamp_delay(ticks))
        }
    }

    /// Request an opportunistic re-run after at least `ticks`. The delay is
    /// clamped to `1..=MAX_DELAY`; a background request is never immediate.
    #[inline]
    pub const fn run_after(ticks: u32) -> Self {
        TaskStatus::Background(clamp_delay(ticks))
    }

    /// The default background status, re-running every
    /// `BACKGROUND_TASK_INTERVAL` ticks while the device is awake.
    #[inline]
    pub const fn background() -> Self {
        TaskStatus::Background(BACKGROUND_TASK_INTERVAL)
    }

    /// Returns `true` if delayed payloads are inside `1..=MAX_DELAY`.
    /// The engine treats anything else as a fatal contract violation.
    pub const fn is_well_formed(&self) -> bool {
        match *self {
            TaskStatus::Delayed(n) | TaskStatus::Background(n) => n >= 1 && n <= MAX_DELAY,
            TaskStatus::Immediate | TaskStatus::Suspend => true,
        }
    }

    /// Encode as the 32-bit status word.
    pub const fn into_raw(self) -> u32 {
        match self {
            TaskStatus::Immediate => 0,
            TaskStatus::Delayed(n) => n & MAX_DELAY,
            TaskStatus::Background(n) => BACKGROUND_BIT | (n & MAX_DELAY),
            TaskStatus::Suspend => BACKGROUND_BIT,
        }
    }

    /// Decode a 32-bit status word. Every word maps to exactly one status.
    pub const fn from_raw(raw: u32) -> Self {
        let delay = raw & MAX_DELAY;
        match (raw & BACKGROUND_BIT != 0, delay) {
            (false, 0) => TaskStatus::Immediate,
            (true, 0) => TaskStatus::Suspend,
            (false, n) => TaskStatus::Delayed(n),
            (true, n) => TaskStatus::Background(n),
        }
    }

    /// Combine two statuses produced for the same task by independent
    /// concerns, keeping whichever is most urgent.
    ///
    /// `Suspend` always yields to the other value. A delayed and a
    /// background request are compared on their tick counts alone; the
    /// winner keeps its own queue class. Two requests of the same class
    /// compare directly, so `Immediate` beats any delay.
    pub const fn prioritise(self, other: Self) -> Self {
        if let TaskStatus::Suspend = self {
            return other;
        }
        if let TaskStatus::Suspend = other {
            return self;
        }

        let mut a = self.into_raw();
        let mut b = other.into_raw();
        let (raw_a, raw_b) = (a, b);
        if (a & BACKGROUND_BIT) != (b & BACKGROUND_BIT) {
            a &= MAX_DELAY;
            b &= MAX_DELAY;
        }

        if a < b {
            TaskStatus::from_raw(raw_a)
        } else if b < a {
            TaskStatus::from_raw(raw_b)
        } else if raw_a <= raw_b {
            // Equal deadlines across classes keep the wake-capable one.
            TaskStatus::from_raw(raw_a)
        } else {
            TaskStatus::from_raw(raw_b)
        }
    }
}
