//! # Task Queues
//!
//! The three intrusive task lists owned by the scheduler, plus the
//! descriptor arena they thread through.
//!
//! - **Ready**: FIFO, append at tail, pop at head. Arrival order is
//!   fairness order.
//! - **Scheduled**: sorted by wake time; its head bounds how long the
//!   platform may sleep.
//! - **Background**: sorted by wake time; never constrains sleep.
//!
//! A task is in at most one list at a time. Its `TaskState` names the list
//! (or none), and every move detaches from the old list before appending
//! to the new one. These lists are only touched from scheduler and step
//! function context, never from interrupts, so they need no locking.

use crate::config::MAX_TASKS;
use crate::platform::Fault;
use crate::status::TaskStatus;
use crate::task::{TaskEntry, TaskId, TaskState};

/// Selects one of the two timestamp-ordered lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimedList {
    Scheduled,
    Background,
}

impl TimedList {
    #[inline]
    const fn state(self) -> TaskState {
        match self {
            TimedList::Scheduled => TaskState::Scheduled,
            TimedList::Background => TaskState::Background,
        }
    }
}

pub(crate) struct TaskQueues {
    entries: [TaskEntry; MAX_TASKS],
    ready_head: Option<TaskId>,
    ready_tail: Option<TaskId>,
    scheduled: Option<TaskId>,
    background: Option<TaskId>,
    /// Task currently inside its step function.
    pub active: Option<TaskId>,
    /// Outstanding `stay_awake` requests.
    pub stay_awake: u32,
}

impl TaskQueues {
    pub const fn new() -> Self {
        Self {
            entries: [TaskEntry::EMPTY; MAX_TASKS],
            ready_head: None,
            ready_tail: None,
            scheduled: None,
            background: None,
            active: None,
            stay_awake: 0,
        }
    }

    /// Claim a free descriptor slot. Returns `None` if the arena is full.
    pub fn allocate(&mut self, name: Option<&'static str>) -> Option<TaskId> {
        let index = self.entries.iter().position(|e| !e.allocated)?;
        self.entries[index].init(name);
        Some(TaskId(index as u8))
    }

    /// Number of occupied descriptor slots.
    pub fn allocated(&self) -> usize {
        self.entries.iter().filter(|e| e.allocated).count()
    }

    #[inline]
    pub fn entry(&self, id: TaskId) -> &TaskEntry {
        &self.entries[id.index()]
    }

    #[inline]
    fn entry_mut(&mut self, id: TaskId) -> &mut TaskEntry {
        &mut self.entries[id.index()]
    }

    #[inline]
    pub fn ready_is_empty(&self) -> bool {
        self.ready_head.is_none()
    }

    #[inline]
    fn head(&self, list: TimedList) -> Option<TaskId> {
        match list {
            TimedList::Scheduled => self.scheduled,
            TimedList::Background => self.background,
        }
    }

    #[inline]
    fn set_head(&mut self, list: TimedList, id: Option<TaskId>) {
        match list {
            TimedList::Scheduled => self.scheduled = id,
            TimedList::Background => self.background = id,
        }
    }

    // -----------------------------------------------------------------------
    // Ready list
    // -----------------------------------------------------------------------

    /// Append a task to the tail of the ready list.
    ///
    /// The task must not be a member of any list.
    pub fn make_ready(&mut self, id: TaskId) {
        debug_assert!(
            !matches!(
                self.entry(id).state,
                TaskState::Ready | TaskState::Scheduled | TaskState::Background
            ),
            "task {} is already queued",
            id
        );

        let entry = self.entry_mut(id);
        entry.state = TaskState::Ready;
        entry.next = None;

        match self.ready_tail {
            Some(tail) => self.entry_mut(tail).next = Some(id),
            None => self.ready_head = Some(id),
        }
        self.ready_tail = Some(id);
    }

    /// Pop the head of the ready list and mark it active.
    pub fn pop_ready(&mut self) -> Option<TaskId> {
        let id = self.ready_head?;
        let entry = self.entry_mut(id);
        let next = entry.next.take();
        entry.state = TaskState::Active;
        self.ready_head = next;
        if next.is_none() {
            self.ready_tail = None;
        }
        self.active = Some(id);
        Some(id)
    }

    // -----------------------------------------------------------------------
    // Timed lists
    // -----------------------------------------------------------------------

    /// Place a task that has just finished a step according to its status.
    /// Delays are measured from `now`.
    pub fn insert(&mut self, id: TaskId, status: TaskStatus, now: u32) {
        let (list, delay) = match status {
            TaskStatus::Immediate => {
                self.make_ready(id);
                return;
            }
            TaskStatus::Suspend => {
                let entry = self.entry_mut(id);
                entry.state = TaskState::Suspended;
                entry.next = None;
                return;
            }
            TaskStatus::Delayed(n) => (TimedList::Scheduled, n),
            TaskStatus::Background(n) => (TimedList::Background, n),
        };

        let wake_time = (now as i32).wrapping_add(delay as i32);
        {
            let entry = self.entry_mut(id);
            entry.state = list.state();
            entry.wake_time = wake_time;
        }

        // Insert before the first entry that is strictly later, so equal
        // wake times keep their insertion order.
        let mut prev: Option<TaskId> = None;
        let mut cursor = self.head(list);
        while let Some(current) = cursor {
            if self.entry(current).wake_time.wrapping_sub(wake_time) > 0 {
                break;
            }
            prev = Some(current);
            cursor = self.entry(current).next;
        }

        self.entry_mut(id).next = cursor;
        match prev {
            Some(p) => self.entry_mut(p).next = Some(id),
            None => self.set_head(list, Some(id)),
        }
    }

    /// Detach a task from the scheduled or background list, leaving it
    /// suspended. Tasks in any other state are left untouched.
    pub fn remove(&mut self, id: TaskId) {
        let list = match self.entry(id).state {
            TaskState::Scheduled => TimedList::Scheduled,
            TaskState::Background => TimedList::Background,
            _ => return,
        };

        let mut prev: Option<TaskId> = None;
        let mut cursor = self.head(list);
        while let Some(current) = cursor {
            if current == id {
                let next = self.entry_mut(id).next.take();
                match prev {
                    Some(p) => self.entry_mut(p).next = next,
                    None => self.set_head(list, next),
                }
                self.entry_mut(id).state = TaskState::Suspended;
                return;
            }
            prev = Some(current);
            cursor = self.entry(current).next;
        }
    }

    /// Make a task ready unless it is already ready or running. A task
    /// waiting on a timed list skips the rest of its delay.
    ///
    /// Returns `true` if the task was moved to the ready list.
    pub fn resume(&mut self, id: TaskId) -> bool {
        match self.entry(id).state {
            TaskState::Ready | TaskState::Active => false,
            _ => {
                self.remove(id);
                self.make_ready(id);
                true
            }
        }
    }

    /// Pop the head of a timed list if it is due at `now`.
    pub fn pop_due(&mut self, list: TimedList, now: u32) -> Option<TaskId> {
        let id = self.head(list)?;
        if !self.entry(id).is_due(now as i32) {
            return None;
        }
        let next = self.entry_mut(id).next.take();
        self.set_head(list, next);
        self.entry_mut(id).state = TaskState::Suspended;
        Some(id)
    }

    /// Ticks until the head of the scheduled list is due. Negative values
    /// mean it is overdue; `None` means the list is empty.
    pub fn next_wake_delay(&self, now: u32) -> Option<i32> {
        self.scheduled
            .map(|id| self.entry(id).wake_time.wrapping_sub(now as i32))
    }

    // -----------------------------------------------------------------------
    // Sleep inhibit
    // -----------------------------------------------------------------------

    pub fn stay_awake(&mut self) -> Result<(), Fault> {
        self.stay_awake = self
            .stay_awake
            .checked_add(1)
            .ok_or(Fault::StayAwakeOverflow)?;
        Ok(())
    }

    pub fn can_sleep(&mut self) -> Result<(), Fault> {
        self.stay_awake = self
            .stay_awake
            .checked_sub(1)
            .ok_or(Fault::StayAwakeUnderflow)?;
        Ok(())
    }

    /// Walk one list from its head.
    #[cfg(test)]
    pub fn iter(&self, state: TaskState) -> QueueIter<'_> {
        let head = match state {
            TaskState::Ready => self.ready_head,
            TaskState::Scheduled => self.scheduled,
            TaskState::Background => self.background,
            _ => None,
        };
        QueueIter { queues: self, cursor: head }
    }
}

#[cfg(test)]
pub(crate) struct QueueIter<'q> {
    queues: &'q TaskQueues,
    cursor: Option<TaskId>,
}

#[cfg(test)]
impl Iterator for QueueIter<'_> {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        let id = self.cursor?;
        self.cursor = self.queues.entry(id).next;
        Some(id)
    }
}
