//! # CoopOS: Cooperative Scheduler Core
//!
//! A single-threaded, run-to-completion task scheduler with event flags,
//! sleep inhibition and lifecycle notification, for ARM Cortex-M
//! microcontrollers (and anything else that provides a tick counter).
//!
//! ## Overview
//!
//! Tasks are plain step functions. The scheduler calls one, the task does
//! a bounded amount of work, and returns a `TaskStatus` saying when it
//! wants to run next:
//!
//! - **`Immediate`**: back of the ready queue
//! - **`Delayed(n)`**: in `n` ticks; may wake the device from sleep
//! - **`Background(n)`**: no earlier than `n` ticks, but only once the
//!   device is awake anyway
//! - **`Suspend`**: until resumed or notified by an event
//!
//! Interrupt handlers never touch the queues. They mutate `EventFlags`,
//! which places the flags on a pending list; the scheduler drains it at
//! the top of every step and readies each consumer task.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │           Application Tasks (impl Task / closures)     │
//! ├────────────────────────────────────────────────────────┤
//! │                Scheduler (scheduler.rs)                │
//! │   spawn() · task_resume() · step() · run_until_idle()  │
//! ├──────────────┬──────────────────┬──────────────────────┤
//! │ Task Queues  │  Event Flags     │  Lifecycle           │
//! │ queue.rs     │  events.rs       │  lifecycle.rs        │
//! │ ─ ready      │  ─ set/clear     │  ─ add_monitor()     │
//! │ ─ scheduled  │  ─ reset         │  ─ notify()          │
//! │ ─ background │  ─ next_consumer │                      │
//! ├──────────────┴──────────────────┴──────────────────────┤
//! │  Task Model (task.rs, status.rs) · Sync (sync.rs)      │
//! ├────────────────────────────────────────────────────────┤
//! │        Platform trait (platform.rs) · Config           │
//! ├────────────────────────────────────────────────────────┤
//! │    Arch Port (arch/cortex_m4.rs): SysTick · WFI        │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Time
//!
//! Time is a wrapping 32-bit tick counter running at
//! `SYSTEM_TIMER_FREQUENCY`. Wake times are compared by signed
//! difference, so ordering stays correct across the wrap as long as no
//! delay exceeds `MAX_DELAY`.
//!
//! ## Memory Model
//!
//! - **No heap**: all state lives in the `Scheduler` or in statics
//! - **No `alloc`**: pure `core`
//! - **Fixed-size descriptor arena**: `[TaskEntry; MAX_TASKS]`
//! - **Critical sections**: via the `critical-section` crate, only around
//!   event flag state

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod platform;
mod queue;
pub mod scheduler;
pub mod status;
pub mod sync;
pub mod task;

pub use events::{EventFlags, EventQueue};
pub use lifecycle::{Lifecycle, LifecycleMonitor, LifecycleStatus};
pub use platform::{Fault, Platform};
pub use scheduler::{Context, Scheduler, SpawnError};
pub use status::TaskStatus;
pub use task::{Task, TaskId, TaskState};
