//! # Sleep Depth Selection
//!
//! Chooses how deeply a port may idle for a given budget and emits the
//! matching lifecycle notifications. Ports only execute the chosen mode.
//!
//! ```text
//!  budget < POWER_SAVE_THRESHOLD ─────────────────────────────► Wait
//!  budget >= DEEP_SLEEP_THRESHOLD && wake timer ─ EnterDeepSleep ─┬─ ok ──► DeepSleep
//!                                                                └─ veto ─ ExitDeepSleep ─┐
//!  otherwise ──────────────────────────────────── EnterPowerSave ◄─────────────────────────┘
//!                                                   ├─ ok ──► PowerSave
//!                                                   └─ veto ─ ExitPowerSave ──► Awake
//! ```
//!
//! Every accepted `Enter*` is paired with its `Exit*` by `exit`. A vetoed
//! `Enter*` gets its `Exit*` immediately, so monitors that accepted always
//! see the matching exit.

use crate::config::{DEEP_SLEEP_THRESHOLD, POWER_SAVE_THRESHOLD};
use crate::lifecycle::{Lifecycle, LifecycleStatus};

/// How the port should idle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepDepth {
    /// Power save was vetoed. Return without sleeping.
    Awake,
    /// Budget too short for a low-power mode. Plain `WFI`, no notifications.
    Wait,
    /// Core clock gated; the tick timer keeps running.
    PowerSave,
    /// Tick timer stopped; only a `WakeTimer` brings the core back on time.
    DeepSleep,
}

/// A low-power timer that keeps counting in deep sleep.
pub trait WakeTimer {
    /// Raise a wake-up interrupt `ticks` from now, or earlier if the
    /// hardware range is shorter.
    fn arm(&mut self, ticks: u32);

    /// Cancel the wake-up. Returns the ticks that elapsed since `arm`.
    fn disarm(&mut self) -> u32;
}

/// Pick the sleep depth for an idle budget of `ticks`.
///
/// Deep sleep is only considered when `deep_capable` is set, i.e. the port
/// has a `WakeTimer` that can end it.
pub fn enter(ticks: u32, deep_capable: bool, lifecycle: &Lifecycle<'_>) -> SleepDepth {
    if ticks < POWER_SAVE_THRESHOLD {
        return SleepDepth::Wait;
    }

    if deep_capable && ticks >= DEEP_SLEEP_THRESHOLD {
        if lifecycle.notify(LifecycleStatus::EnterDeepSleep) {
            return SleepDepth::DeepSleep;
        }
        lifecycle.notify(LifecycleStatus::ExitDeepSleep);
    }

    if lifecycle.notify(LifecycleStatus::EnterPowerSave) {
        return SleepDepth::PowerSave;
    }
    lifecycle.notify(LifecycleStatus::ExitPowerSave);
    SleepDepth::Awake
}

/// Send the exit notification for a depth returned by `enter`.
pub fn exit(depth: SleepDepth, lifecycle: &Lifecycle<'_>) {
    match depth {
        SleepDepth::PowerSave => {
            lifecycle.notify(LifecycleStatus::ExitPowerSave);
        }
        SleepDepth::DeepSleep => {
            lifecycle.notify(LifecycleStatus::ExitDeepSleep);
        }
        SleepDepth::Awake | SleepDepth::Wait => {}
    }
}
