//! # Task Descriptor
//!
//! Defines the task model for CoopOS. A task is a unit of cooperative work
//! whose step function runs to completion each time it is selected, then
//! tells the scheduler when it wants to run again via a `TaskStatus`.
//!
//! The scheduler keeps one `TaskEntry` per task in a fixed arena. Queue
//! membership is tracked by the intrusive `next` link in that entry, and
//! `TaskId` is the stable handle everything else uses to refer to a task.

use core::fmt;

use crate::scheduler::Context;
use crate::status::TaskStatus;

// ---------------------------------------------------------------------------
// Step-function contract
// ---------------------------------------------------------------------------

/// A schedulable unit of cooperative work.
///
/// `step` is called once per scheduling opportunity. It must not block: all
/// long-running work is split into steps, with progress kept in `self`
/// between calls. The returned status decides which queue the task joins
/// next.
pub trait Task {
    fn step(&mut self, cx: &mut Context<'_>) -> TaskStatus;
}

impl<F> Task for F
where
    F: FnMut(&mut Context<'_>) -> TaskStatus,
{
    #[inline]
    fn step(&mut self, cx: &mut Context<'_>) -> TaskStatus {
        self(cx)
    }
}

// ---------------------------------------------------------------------------
// Handles and states
// ---------------------------------------------------------------------------

/// Stable handle to a task descriptor (its index in the scheduler arena).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(pub(crate) u8);

impl TaskId {
    #[inline]
    pub(crate) const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Lifecycle state of a task descriptor.
///
/// ```text
///                task_start()
///  Initializing ─────────────► Ready ◄──────────── event / resume / due
///                                │                        ▲
///                     popped by  │                        │
///                       step()   ▼                        │
///                             Active ── Delayed(n) ──► Scheduled
///                                │  ── Background(n) ► Background
///                                │  ── Immediate ───► Ready
///                                └──── Suspend ─────► Suspended
/// ```
///
/// Each of `Ready`, `Scheduled` and `Background` corresponds to exactly one
/// queue. `Active` is the single running task, referenced directly by the
/// scheduler; `Suspended` and `Initializing` tasks are in no queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Created but not yet started.
    Initializing,
    /// Waiting in the wake-capable, timestamp-ordered queue.
    Scheduled,
    /// Waiting in the opportunistic, timestamp-ordered queue.
    Background,
    /// Waiting in the FIFO ready queue.
    Ready,
    /// Currently executing its step function.
    Active,
    /// In no queue; only an explicit resume or an event brings it back.
    Suspended,
}

// ---------------------------------------------------------------------------
// Descriptor record
// ---------------------------------------------------------------------------

/// Scheduler-side bookkeeping for one task.
///
/// The step function itself is stored separately so it can be borrowed
/// mutably while the queues are updated from inside its own step.
#[derive(Debug, Clone, Copy)]
pub(crate) struct TaskEntry {
    /// Diagnostic label; no runtime semantics.
    pub name: Option<&'static str>,

    /// Intrusive link to the next task in whichever queue owns this one.
    pub next: Option<TaskId>,

    /// Tick at which the task becomes due. Only meaningful in the
    /// scheduled and background queues; compared as a signed difference.
    pub wake_time: i32,

    pub state: TaskState,

    /// Whether this arena slot holds a task.
    pub allocated: bool,
}

impl TaskEntry {
    pub const EMPTY: TaskEntry = TaskEntry {
        name: None,
        next: None,
        wake_time: 0,
        state: TaskState::Suspended,
        allocated: false,
    };

    /// Claim a free slot for a newly created task.
    pub fn init(&mut self, name: Option<&'static str>) {
        *self = TaskEntry {
            name,
            next: None,
            wake_time: 0,
            state: TaskState::Initializing,
            allocated: true,
        };
    }

    /// Label used in log records.
    #[inline]
    pub fn label(&self) -> &'static str {
        self.name.unwrap_or("<unnamed>")
    }

    /// Returns `true` if the task is due at or before `now`.
    #[inline]
    pub fn is_due(&self, now: i32) -> bool {
        self.wake_time.wrapping_sub(now) <= 0
    }
}
