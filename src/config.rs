//! # CoopOS Configuration
//!
//! Compile-time constants governing the scheduler and platform behavior.
//! All limits are fixed at compile time; there is no dynamic allocation.

/// Maximum number of task descriptors the scheduler can hold.
/// This bounds the static descriptor arena inside `Scheduler`.
pub const MAX_TASKS: usize = 16;

// `TaskId` stores the slot index in a `u8`.
const _: () = assert!(MAX_TASKS <= u8::MAX as usize + 1);

/// System timer frequency in Hz. One scheduler tick is `1 / SYSTEM_TIMER_FREQUENCY`
/// seconds. A power of two keeps tick/millisecond conversion cheap.
pub const SYSTEM_TIMER_FREQUENCY: u32 = 1024;

/// Interval in ticks used by `TaskStatus::background()` for tasks that
/// only want to run opportunistically while the device is awake.
pub const BACKGROUND_TASK_INTERVAL: u32 = 10;

/// Largest delay a task status can carry. Wake times are compared as
/// signed differences, so delays are limited to half the timer range.
pub const MAX_DELAY: u32 = 0x7FFF_FFFF;

/// Idle budget reported by `Scheduler::step()` when nothing is waiting in
/// the scheduled list. Background deadlines never shorten this value.
pub const IDLE_UNBOUNDED: u32 = 0x7FFF_FFFF;

/// Idle budgets of at least this many ticks put the Cortex-M platform into
/// power-save mode (with lifecycle notifications). Shorter budgets just
/// wait for the next interrupt.
pub const POWER_SAVE_THRESHOLD: u32 = 2;

/// Idle budgets of at least this many ticks request deep sleep, on
/// platforms with a wake timer that runs in deep sleep, subject to every
/// lifecycle monitor accepting the transition.
pub const DEEP_SLEEP_THRESHOLD: u32 = SYSTEM_TIMER_FREQUENCY;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Converts milliseconds to system timer ticks, rounding down.
#[inline]
pub const fn ms_to_ticks(ms: u32) -> u32 {
    ((ms as u64 * SYSTEM_TIMER_FREQUENCY as u64) / 1000) as u32
}

/// Converts system timer ticks to milliseconds, rounding down.
#[inline]
pub const fn ticks_to_ms(ticks: u32) -> u32 {
    ((ticks as u64 * 1000) / SYSTEM_TIMER_FREQUENCY as u64) as u32
}
