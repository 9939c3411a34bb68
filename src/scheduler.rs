//! # Scheduler
//!
//! The single-threaded, run-to-completion engine at the heart of CoopOS.
//!
//! ## Scheduling Algorithm
//!
//! Each call to `step()`:
//! 1. **Drain events**: every consumer task named by the pending event list
//!    is detached from whatever queue holds it and made ready
//! 2. **Promote scheduled**: due tasks move from the scheduled list to ready
//! 3. **Promote background**: same for the background list
//! 4. **Run one task**: pop the ready head, call its step function, and
//!    re-queue it according to the returned `TaskStatus`
//! 5. **Idle budget**: if nothing was ready and no stay-awake request is
//!    outstanding, report how long the caller may idle; otherwise `0`
//!
//! Event wake-ups are processed before timer promotions, so a task whose
//! event and timer fire in the same iteration runs exactly once.
//!
//! ## Idle Budget
//!
//! Only the scheduled list bounds the budget. Background deadlines never
//! wake the device; an empty scheduled list reports `IDLE_UNBOUNDED`.
//!
//! ## Re-entrancy
//!
//! A step function receives a `Context` that can resume other tasks (or
//! itself, which is a no-op while it is active) and manage stay-awake
//! requests. The step function object is taken out of its slot for the
//! duration of the call, so the queues can be updated safely underneath it.

use core::fmt;

use crate::config::{IDLE_UNBOUNDED, MAX_TASKS};
use crate::events::EventQueue;
use crate::lifecycle::{Lifecycle, LifecycleMonitor, LifecycleStatus};
use crate::platform::{Fault, Platform};
use crate::queue::{TaskQueues, TimedList};
use crate::task::{Task, TaskId, TaskState};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Task registration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// All `MAX_TASKS` descriptor slots are in use.
    NoFreeSlots,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::NoFreeSlots => write!(f, "no free task slots (max {})", MAX_TASKS),
        }
    }
}

// ---------------------------------------------------------------------------
// Step context
// ---------------------------------------------------------------------------

/// Scheduler access granted to a running step function.
pub struct Context<'q> {
    id: TaskId,
    now: u32,
    queues: &'q mut TaskQueues,
    platform: &'q dyn Platform,
}

impl Context<'_> {
    /// Handle of the task being stepped.
    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Name the task was registered with.
    pub fn name(&self) -> Option<&'static str> {
        self.queues.entry(self.id).name
    }

    /// Tick count sampled just before this step started.
    #[inline]
    pub fn now(&self) -> u32 {
        self.now
    }

    /// Make `task` ready, skipping any remaining delay. No effect if it is
    /// already ready or is the task currently running.
    pub fn resume(&mut self, task: TaskId) -> bool {
        self.queues.resume(task)
    }

    /// Inhibit sleep until the matching `can_sleep`.
    pub fn stay_awake(&mut self) {
        if let Err(fault) = self.queues.stay_awake() {
            self.platform.assert_fail(fault);
        }
    }

    /// Release one `stay_awake` request.
    pub fn can_sleep(&mut self) {
        if let Err(fault) = self.queues.can_sleep() {
            self.platform.assert_fail(fault);
        }
    }
}

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The scheduler context: task queues, step functions, the pending event
/// list it drains, lifecycle monitors, and the platform it runs on.
///
/// ## Design Notes
///
/// - Descriptors live in a fixed arena of `MAX_TASKS` slots (no heap)
/// - Step functions are borrowed from the subsystems that own them
/// - Not shared with interrupts; only `EventFlags` cross that boundary
pub struct Scheduler<'a, P> {
    platform: P,
    events: &'a EventQueue<'a>,
    lifecycle: Lifecycle<'a>,
    queues: TaskQueues,
    tasks: [Option<&'a mut (dyn Task + 'a)>; MAX_TASKS],
}

impl<'a, P: Platform> Scheduler<'a, P> {
    /// Create an empty scheduler that drains `events`.
    pub fn new(platform: P, events: &'a EventQueue<'a>) -> Self {
        Self {
            platform,
            events,
            lifecycle: Lifecycle::new(),
            queues: TaskQueues::new(),
            tasks: core::array::from_fn(|_| None),
        }
    }

    // -- Registration --------------------------------------------------------

    /// Register a task without queueing it. The task stays `Initializing`
    /// until `task_start`, so event flags can be bound to its id first.
    pub fn task_create(
        &mut self,
        task: &'a mut (dyn Task + 'a),
        name: Option<&'static str>,
    ) -> Result<TaskId, SpawnError> {
        let id = self.queues.allocate(name).ok_or(SpawnError::NoFreeSlots)?;
        self.tasks[id.index()] = Some(task);
        log::debug!("task {} ({}) created", id, self.queues.entry(id).label());
        Ok(id)
    }

    /// Initial enqueue of a created task. Call exactly once per task.
    pub fn task_start(&mut self, id: TaskId) {
        debug_assert_eq!(
            self.queues.entry(id).state,
            TaskState::Initializing,
            "task {} started twice",
            id
        );
        self.queues.resume(id);
        log::debug!("task {} ({}) started", id, self.queues.entry(id).label());
    }

    /// Register and start a task in one call.
    pub fn spawn(
        &mut self,
        task: &'a mut (dyn Task + 'a),
        name: Option<&'static str>,
    ) -> Result<TaskId, SpawnError> {
        let id = self.task_create(task, name)?;
        self.task_start(id);
        Ok(id)
    }

    /// Make a suspended or waiting task ready immediately. No effect on a
    /// task that is already ready. Returns `true` if the task was moved.
    pub fn task_resume(&mut self, id: TaskId) -> bool {
        self.queues.resume(id)
    }

    // -- Sleep inhibit -------------------------------------------------------

    /// Request that the device does not sleep. Each call must be paired
    /// with a later `can_sleep`.
    pub fn stay_awake(&mut self) {
        if let Err(fault) = self.queues.stay_awake() {
            self.platform.assert_fail(fault);
        }
    }

    /// Release one `stay_awake` request.
    pub fn can_sleep(&mut self) {
        if let Err(fault) = self.queues.can_sleep() {
            self.platform.assert_fail(fault);
        }
    }

    pub fn stay_awake_count(&self) -> u32 {
        self.queues.stay_awake
    }

    // -- Lifecycle -----------------------------------------------------------

    /// Register a permanent lifecycle monitor.
    pub fn add_monitor(&self, monitor: &'a LifecycleMonitor<'a>) {
        self.lifecycle.add_monitor(monitor);
    }

    pub fn lifecycle(&self) -> &Lifecycle<'a> {
        &self.lifecycle
    }

    // -- Introspection -------------------------------------------------------

    /// The task whose step function is running, if any.
    pub fn current_task(&self) -> Option<TaskId> {
        self.queues.active
    }

    /// Returns `true` if no task is ready and no event is waiting to be
    /// drained. Timed tasks may still be pending.
    pub fn is_idle(&self) -> bool {
        self.queues.ready_is_empty() && !self.events.is_pending()
    }

    pub fn task_state(&self, id: TaskId) -> TaskState {
        self.queues.entry(id).state
    }

    pub fn task_name(&self, id: TaskId) -> Option<&'static str> {
        self.queues.entry(id).name
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    // -- Engine --------------------------------------------------------------

    /// Run one scheduler iteration.
    ///
    /// # Returns
    /// The number of ticks that may pass before `step` must be called
    /// again: `0` to call again immediately, `IDLE_UNBOUNDED` if nothing is
    /// scheduled.
    pub fn step(&mut self) -> u32 {
        while let Some(id) = self.events.next_consumer() {
            if self.queues.resume(id) {
                log::trace!("task {} ({}) woken by event", id, self.queues.entry(id).label());
            }
        }

        let now = self.platform.now();
        self.promote_due(TimedList::Scheduled, now);
        self.promote_due(TimedList::Background, now);

        if let Some(id) = self.queues.pop_ready() {
            self.run_task(id);
            return 0;
        }

        if self.queues.stay_awake > 0 {
            return 0;
        }

        match self.queues.next_wake_delay(self.platform.now()) {
            Some(delay) => delay.max(0) as u32,
            None => IDLE_UNBOUNDED,
        }
    }

    /// Step until the scheduler reports a non-zero idle budget, then hand
    /// that budget to the platform's idle primitive.
    ///
    /// # Returns
    /// The idle budget that was passed to the platform.
    pub fn run_until_idle(&mut self) -> u32 {
        loop {
            let budget = self.step();
            // An event raised after the drain must not wait out the budget.
            if budget != 0 && !self.events.is_pending() {
                self.platform.idle(budget, &self.lifecycle);
                return budget;
            }
        }
    }

    /// Announce `Startup` to the lifecycle monitors. Tasks are not run.
    ///
    /// # Returns
    /// `true` if every monitor accepted.
    pub fn start(&mut self) -> bool {
        let accepted = self.lifecycle.notify(LifecycleStatus::Startup);
        log::info!("scheduler started, {} task slots in use", self.queues.allocated());
        accepted
    }

    /// Start the scheduler. **Does not return.**
    ///
    /// Calls `start` once, then alternates between running ready tasks and
    /// idling on the platform.
    pub fn run(&mut self) -> ! {
        self.start();
        loop {
            self.run_until_idle();
        }
    }

    fn promote_due(&mut self, list: TimedList, now: u32) {
        while let Some(id) = self.queues.pop_due(list, now) {
            log::trace!("task {} ({}) due", id, self.queues.entry(id).label());
            self.queues.make_ready(id);
        }
    }

    /// Step an already-popped task and re-queue it.
    fn run_task(&mut self, id: TaskId) {
        let Some(task) = self.tasks[id.index()].take() else {
            self.platform.assert_fail(Fault::DetachedTask(id));
        };

        log::trace!("task {} ({}) running", id, self.queues.entry(id).label());
        let status = {
            let mut cx = Context {
                id,
                now: self.platform.now(),
                queues: &mut self.queues,
                platform: &self.platform,
            };
            task.step(&mut cx)
        };
        self.tasks[id.index()] = Some(task);

        if !status.is_well_formed() {
            self.platform.assert_fail(Fault::MalformedStatus(status));
        }
        self.queues.insert(id, status, self.platform.now());
        self.queues.active = None;
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventFlags;
    use crate::platform::mock::MockPlatform;
    use crate::status::TaskStatus;
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::vec::Vec;

    type Log = RefCell<Vec<&'static str>>;

    /// Logs its name on every step and returns scripted statuses, then
    /// `fallback` once the script runs out.
    struct Script<'l> {
        name: &'static str,
        log: &'l Log,
        script: VecDeque<TaskStatus>,
        fallback: TaskStatus,
    }

    impl<'l> Script<'l> {
        fn new(name: &'static str, log: &'l Log, script: &[TaskStatus]) -> Self {
            Self {
                name,
                log,
                script: script.iter().copied().collect(),
                fallback: TaskStatus::Suspend,
            }
        }

        fn forever(name: &'static str, log: &'l Log, status: TaskStatus) -> Self {
            Self {
                name,
                log,
                script: VecDeque::new(),
                fallback: status,
            }
        }
    }

    impl Task for Script<'_> {
        fn step(&mut self, _cx: &mut Context<'_>) -> TaskStatus {
            self.log.borrow_mut().push(self.name);
            self.script.pop_front().unwrap_or(self.fallback)
        }
    }

    /// Drains its event flags on every step and logs the bits it saw.
    struct Consumer<'f> {
        flags: &'f EventFlags<'f>,
        seen: &'f RefCell<Vec<u32>>,
        status: TaskStatus,
        notify_self: bool,
    }

    impl Task for Consumer<'_> {
        fn step(&mut self, _cx: &mut Context<'_>) -> TaskStatus {
            self.seen.borrow_mut().push(self.flags.reset());
            if self.notify_self {
                self.notify_self = false;
                self.flags.set(0x100);
            }
            self.status
        }
    }

    fn scheduler<'a>(events: &'a EventQueue<'a>) -> Scheduler<'a, MockPlatform> {
        Scheduler::new(MockPlatform::default(), events)
    }

    /// How many of the three queues contain `id`.
    fn memberships(sched: &Scheduler<'_, MockPlatform>, id: TaskId) -> usize {
        [TaskState::Ready, TaskState::Scheduled, TaskState::Background]
            .iter()
            .map(|&s| sched.queues.iter(s).filter(|&t| t == id).count())
            .sum()
    }

    /// Every task is in at most one queue, in exactly the queue its state
    /// names, and both timed lists are in wake-time order.
    fn assert_queues_consistent(sched: &Scheduler<'_, MockPlatform>, ids: &[TaskId]) {
        for &id in ids {
            let count = memberships(sched, id);
            let queued = matches!(
                sched.task_state(id),
                TaskState::Ready | TaskState::Scheduled | TaskState::Background
            );
            assert!(count <= 1, "task {} is in {} queues", id, count);
            assert_eq!(count == 1, queued, "task {} is {:?}", id, sched.task_state(id));
        }
        for state in [TaskState::Scheduled, TaskState::Background] {
            let wakes: Vec<i32> = sched
                .queues
                .iter(state)
                .map(|id| sched.queues.entry(id).wake_time)
                .collect();
            for pair in wakes.windows(2) {
                assert!(
                    pair[1].wrapping_sub(pair[0]) >= 0,
                    "{:?} list out of order: {:?}",
                    state,
                    wakes
                );
            }
        }
    }

    #[test]
    fn test_ready_queue_is_fifo() {
        let log = Log::default();
        let mut a = Script::new("a", &log, &[]);
        let mut b = Script::new("b", &log, &[]);
        let mut c = Script::new("c", &log, &[]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.spawn(&mut a, Some("a")).unwrap();
        sched.spawn(&mut b, Some("b")).unwrap();
        sched.spawn(&mut c, Some("c")).unwrap();

        assert_eq!(sched.step(), 0);
        assert_eq!(sched.step(), 0);
        assert_eq!(sched.step(), 0);
        assert_eq!(*log.borrow(), ["a", "b", "c"]);
        assert_eq!(sched.step(), IDLE_UNBOUNDED);
    }

    #[test]
    fn test_immediate_rejoins_at_tail() {
        let log = Log::default();
        let mut a = Script::forever("a", &log, TaskStatus::Immediate);
        let mut b = Script::new("b", &log, &[]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.spawn(&mut a, None).unwrap();
        sched.spawn(&mut b, None).unwrap();

        for _ in 0..4 {
            assert_eq!(sched.step(), 0);
        }
        assert_eq!(*log.borrow(), ["a", "b", "a", "a"]);
    }

    #[test]
    fn test_delayed_tasks_wake_in_timestamp_order() {
        let log = Log::default();
        let mut a = Script::new("a", &log, &[TaskStatus::run_later(5)]);
        let mut b = Script::new("b", &log, &[TaskStatus::run_later(1)]);
        let mut c = Script::new("c", &log, &[TaskStatus::run_later(3)]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.spawn(&mut a, None).unwrap();
        sched.spawn(&mut b, None).unwrap();
        sched.spawn(&mut c, None).unwrap();

        for _ in 0..3 {
            sched.step();
        }
        log.borrow_mut().clear();

        // The nearest deadline bounds the idle budget
        assert_eq!(sched.step(), 1);

        let mut woke_at = Vec::new();
        for tick in 1..=6 {
            sched.platform_mut().now = tick;
            while sched.step() == 0 {}
            if let Some(&name) = log.borrow().last() {
                if woke_at.last().map(|&(n, _)| n) != Some(name) {
                    woke_at.push((name, tick));
                }
            }
        }
        assert_eq!(woke_at, [("b", 1), ("c", 3), ("a", 5)]);
    }

    #[test]
    fn test_background_does_not_bound_idle() {
        let log = Log::default();
        let mut task = Script::new("bg", &log, &[TaskStatus::run_after(10)]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        let id = sched.spawn(&mut task, None).unwrap();

        assert_eq!(sched.step(), 0);
        assert_eq!(sched.task_state(id), TaskState::Background);
        assert_eq!(sched.step(), IDLE_UNBOUNDED);

        // Runs once the device is awake at or after its wake time
        sched.platform_mut().now = 10;
        assert_eq!(sched.step(), 0);
        assert_eq!(*log.borrow(), ["bg", "bg"]);
        assert_eq!(sched.task_state(id), TaskState::Suspended);
    }

    #[test]
    fn test_background_ignored_when_scheduled_present() {
        let log = Log::default();
        let mut bg = Script::new("bg", &log, &[TaskStatus::run_after(2)]);
        let mut fg = Script::new("fg", &log, &[TaskStatus::run_later(50)]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.spawn(&mut bg, None).unwrap();
        sched.spawn(&mut fg, None).unwrap();
        sched.step();
        sched.step();

        assert_eq!(sched.step(), 50);
    }

    #[test]
    fn test_overdue_task_reports_zero_budget_then_runs() {
        let log = Log::default();
        let mut task = Script::new("late", &log, &[TaskStatus::run_later(4)]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.spawn(&mut task, None).unwrap();
        sched.step();

        sched.platform_mut().now = 100;
        assert_eq!(sched.step(), 0);
        assert_eq!(*log.borrow(), ["late", "late"]);
    }

    #[test]
    fn test_wake_time_across_timer_wrap() {
        let log = Log::default();
        let mut task = Script::new("wrap", &log, &[TaskStatus::run_later(5)]);
        let events = EventQueue::new();
        let mut sched = Scheduler::new(MockPlatform::at(u32::MAX - 2), &events);
        sched.spawn(&mut task, None).unwrap();
        sched.step();

        assert_eq!(sched.step(), 5);
        sched.platform_mut().advance(4);
        assert_eq!(sched.step(), 1);
        sched.platform_mut().advance(1);
        assert_eq!(sched.platform().now, 2);
        assert_eq!(sched.step(), 0);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn test_stay_awake_forces_busy_poll() {
        let log = Log::default();
        let mut task = Script::new("t", &log, &[TaskStatus::run_later(20)]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.spawn(&mut task, None).unwrap();
        sched.step();

        sched.stay_awake();
        for _ in 0..5 {
            assert_eq!(sched.step(), 0);
        }
        sched.can_sleep();
        assert_eq!(sched.step(), 20);
    }

    #[test]
    fn test_stay_awake_nests() {
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.stay_awake();
        sched.stay_awake();
        sched.can_sleep();
        assert_eq!(sched.stay_awake_count(), 1);
        assert_eq!(sched.step(), 0);
        sched.can_sleep();
        assert_eq!(sched.step(), IDLE_UNBOUNDED);
    }

    #[test]
    fn test_stay_awake_from_step() {
        let events = EventQueue::new();
        let phase = Cell::new(0);
        let mut bus = |cx: &mut Context<'_>| {
            phase.set(phase.get() + 1);
            if phase.get() == 1 {
                cx.stay_awake();
                TaskStatus::run_later(3)
            } else {
                cx.can_sleep();
                TaskStatus::Suspend
            }
        };
        let mut sched = scheduler(&events);
        sched.spawn(&mut bus, Some("bus")).unwrap();

        assert_eq!(sched.step(), 0);
        assert_eq!(sched.stay_awake_count(), 1);
        assert_eq!(sched.step(), 0);

        sched.platform_mut().now = 3;
        assert_eq!(sched.step(), 0);
        assert_eq!(sched.stay_awake_count(), 0);
        assert_eq!(sched.step(), IDLE_UNBOUNDED);
        assert_eq!(phase.get(), 2);
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_can_sleep_underflow_is_fatal() {
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.can_sleep();
    }

    #[test]
    #[should_panic(expected = "overflow")]
    fn test_stay_awake_overflow_is_fatal() {
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.queues.stay_awake = u32::MAX;
        sched.stay_awake();
    }

    #[test]
    #[should_panic(expected = "malformed")]
    fn test_malformed_status_is_fatal() {
        let events = EventQueue::new();
        let mut bad = |_: &mut Context<'_>| TaskStatus::Delayed(0);
        let mut sched = scheduler(&events);
        sched.spawn(&mut bad, None).unwrap();
        sched.step();
    }

    #[test]
    fn test_event_wakes_suspended_consumer() {
        let seen = RefCell::new(Vec::new());
        let events = EventQueue::new();
        let flags = EventFlags::new(&events);
        let mut consumer = Consumer {
            flags: &flags,
            seen: &seen,
            status: TaskStatus::Suspend,
            notify_self: false,
        };
        let mut sched = scheduler(&events);
        let id = sched.task_create(&mut consumer, Some("consumer")).unwrap();
        flags.bind(Some(id));
        assert_eq!(sched.task_state(id), TaskState::Initializing);
        sched.task_start(id);

        assert_eq!(sched.step(), 0);
        assert_eq!(sched.step(), IDLE_UNBOUNDED);
        assert!(sched.is_idle());

        flags.set(0b10);
        assert!(!sched.is_idle());
        assert_eq!(sched.step(), 0);
        assert_eq!(*seen.borrow(), [0, 0b10]);
        assert_eq!(sched.task_state(id), TaskState::Suspended);
    }

    #[test]
    fn test_event_cuts_delay_short() {
        let seen = RefCell::new(Vec::new());
        let events = EventQueue::new();
        let flags = EventFlags::new(&events);
        let mut consumer = Consumer {
            flags: &flags,
            seen: &seen,
            status: TaskStatus::run_later(100),
            notify_self: false,
        };
        let mut sched = scheduler(&events);
        let id = sched.task_create(&mut consumer, None).unwrap();
        flags.bind(Some(id));
        sched.task_start(id);
        sched.step();
        assert_eq!(sched.task_state(id), TaskState::Scheduled);

        flags.set(1);
        assert_eq!(sched.step(), 0);
        assert_eq!(*seen.borrow(), [0, 1]);
        // Re-queued from this step, not left behind in the old slot
        assert_eq!(memberships(&sched, id), 1);
        assert_eq!(sched.step(), 100);
    }

    #[test]
    fn test_event_and_timer_in_same_iteration_run_once() {
        let seen = RefCell::new(Vec::new());
        let events = EventQueue::new();
        let flags = EventFlags::new(&events);
        let mut consumer = Consumer {
            flags: &flags,
            seen: &seen,
            status: TaskStatus::run_later(5),
            notify_self: false,
        };
        let mut sched = scheduler(&events);
        let id = sched.task_create(&mut consumer, None).unwrap();
        flags.bind(Some(id));
        sched.task_start(id);
        sched.step();

        sched.platform_mut().now = 5;
        flags.set(4);
        assert_eq!(sched.step(), 0);
        assert_eq!(seen.borrow().len(), 2);
        assert_eq!(memberships(&sched, id), 1);
        assert_eq!(sched.step(), 5);
    }

    #[test]
    fn test_event_for_ready_task_is_not_duplicated() {
        let seen = RefCell::new(Vec::new());
        let events = EventQueue::new();
        let flags = EventFlags::new(&events);
        let mut consumer = Consumer {
            flags: &flags,
            seen: &seen,
            status: TaskStatus::Suspend,
            notify_self: false,
        };
        let mut sched = scheduler(&events);
        let id = sched.task_create(&mut consumer, None).unwrap();
        flags.bind(Some(id));
        sched.task_start(id);

        flags.set(1);
        assert_eq!(sched.step(), 0);
        assert_eq!(sched.step(), IDLE_UNBOUNDED);
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_mutation_during_own_step_is_not_lost() {
        let seen = RefCell::new(Vec::new());
        let events = EventQueue::new();
        let flags = EventFlags::new(&events);
        let mut consumer = Consumer {
            flags: &flags,
            seen: &seen,
            status: TaskStatus::Suspend,
            notify_self: true,
        };
        let mut sched = scheduler(&events);
        let id = sched.task_create(&mut consumer, None).unwrap();
        flags.bind(Some(id));
        sched.task_start(id);

        assert_eq!(sched.step(), 0);
        assert_eq!(sched.step(), 0);
        assert_eq!(sched.step(), IDLE_UNBOUNDED);
        assert_eq!(*seen.borrow(), [0, 0x100]);
    }

    #[test]
    fn test_resume_from_step() {
        let log = Log::default();
        let target = Cell::new(None);
        let mut sleeper = Script::new("sleeper", &log, &[TaskStatus::run_later(1000)]);
        let mut waker = |cx: &mut Context<'_>| {
            log.borrow_mut().push("waker");
            // Resuming itself while active has no effect
            assert!(!cx.resume(cx.id()));
            if let Some(id) = target.get() {
                assert!(cx.resume(id));
            }
            TaskStatus::Suspend
        };
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        let sleeper_id = sched.spawn(&mut sleeper, None).unwrap();
        let waker_id = sched.task_create(&mut waker, Some("waker")).unwrap();

        sched.step();
        assert_eq!(sched.step(), 1000);

        target.set(Some(sleeper_id));
        sched.task_start(waker_id);
        assert_eq!(sched.step(), 0);
        assert_eq!(sched.task_state(waker_id), TaskState::Suspended);
        assert_eq!(sched.task_state(sleeper_id), TaskState::Ready);
        assert_eq!(sched.step(), 0);
        assert_eq!(*log.borrow(), ["sleeper", "waker", "sleeper"]);
    }

    #[test]
    fn test_double_resume_does_not_duplicate() {
        let log = Log::default();
        let mut task = Script::new("t", &log, &[TaskStatus::run_after(30)]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        let id = sched.spawn(&mut task, None).unwrap();
        assert!(!sched.task_resume(id));
        sched.step();

        assert!(sched.task_resume(id));
        assert!(!sched.task_resume(id));
        assert_eq!(memberships(&sched, id), 1);
        assert_eq!(sched.task_state(id), TaskState::Ready);
    }

    #[test]
    fn test_membership_invariant_over_mixed_statuses() {
        let log = Log::default();
        let statuses = [
            TaskStatus::run_later(2),
            TaskStatus::run_after(1),
            TaskStatus::Immediate,
            TaskStatus::run_later(1),
            TaskStatus::Suspend,
        ];
        let mut a = Script::new("a", &log, &statuses);
        let mut b = Script::new("b", &log, &statuses[1..]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        let ids = [
            sched.spawn(&mut a, None).unwrap(),
            sched.spawn(&mut b, None).unwrap(),
        ];

        for tick in 0..20 {
            sched.platform_mut().now = tick;
            sched.step();
            if tick % 3 == 0 {
                sched.task_resume(ids[(tick as usize / 3) % 2]);
            }
            assert_queues_consistent(&sched, &ids);
        }
    }

    #[test]
    fn test_created_task_waits_for_start() {
        let log = Log::default();
        let mut task = Script::new("t", &log, &[]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        let id = sched.task_create(&mut task, Some("t")).unwrap();

        assert_eq!(sched.step(), IDLE_UNBOUNDED);
        assert!(log.borrow().is_empty());
        assert_eq!(sched.task_name(id), Some("t"));

        sched.task_start(id);
        assert_eq!(sched.step(), 0);
        assert_eq!(*log.borrow(), ["t"]);
    }

    #[test]
    fn test_spawn_fails_when_full() {
        let log = Log::default();
        let mut tasks: Vec<Script<'_>> = (0..=MAX_TASKS)
            .map(|_| Script::new("t", &log, &[]))
            .collect();
        let events = EventQueue::new();
        let mut sched = scheduler(&events);

        let mut results = tasks.iter_mut().map(|t| sched.spawn(t, None));
        for _ in 0..MAX_TASKS {
            assert!(results.next().unwrap().is_ok());
        }
        assert_eq!(results.next().unwrap(), Err(SpawnError::NoFreeSlots));
    }

    #[test]
    fn test_context_reports_identity_and_time() {
        let seen = RefCell::new(None);
        let events = EventQueue::new();
        let mut observer = |cx: &mut Context<'_>| {
            *seen.borrow_mut() = Some((cx.id(), cx.name(), cx.now()));
            TaskStatus::Suspend
        };
        let mut sched = Scheduler::new(MockPlatform::at(77), &events);
        let id = sched.spawn(&mut observer, Some("observer")).unwrap();
        assert_eq!(sched.current_task(), None);
        sched.step();

        assert_eq!(*seen.borrow(), Some((id, Some("observer"), 77)));
        assert_eq!(sched.current_task(), None);
    }

    #[test]
    fn test_run_until_idle_hands_budget_to_platform() {
        let log = Log::default();
        let mut a = Script::new("a", &log, &[TaskStatus::Immediate, TaskStatus::run_later(8)]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.platform_mut().idle_advance = 8;
        sched.spawn(&mut a, None).unwrap();

        assert_eq!(sched.run_until_idle(), 8);
        assert_eq!(sched.platform().idles, [8]);
        assert_eq!(sched.platform().now, 8);

        assert_eq!(sched.run_until_idle(), IDLE_UNBOUNDED);
        assert_eq!(*log.borrow(), ["a", "a", "a"]);
    }

    #[test]
    fn test_idle_emits_power_save_notifications() {
        let statuses = RefCell::new(Vec::new());
        let handler = |s: LifecycleStatus| {
            statuses.borrow_mut().push(s);
            true
        };
        let monitor = LifecycleMonitor::new(&handler);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.platform_mut().notify_sleep = true;
        sched.add_monitor(&monitor);

        sched.run_until_idle();
        assert_eq!(
            *statuses.borrow(),
            [LifecycleStatus::EnterPowerSave, LifecycleStatus::ExitPowerSave]
        );
        assert!(sched.lifecycle().notify(LifecycleStatus::Shutdown));
    }

    #[test]
    fn test_start_notifies_startup_once_without_running_tasks() {
        let statuses = RefCell::new(Vec::new());
        let handler = |s: LifecycleStatus| {
            statuses.borrow_mut().push(s);
            true
        };
        let monitor = LifecycleMonitor::new(&handler);
        let log = Log::default();
        let mut task = Script::new("t", &log, &[TaskStatus::run_later(4)]);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.add_monitor(&monitor);
        sched.spawn(&mut task, None).unwrap();

        assert!(sched.start());
        assert_eq!(*statuses.borrow(), [LifecycleStatus::Startup]);
        assert!(log.borrow().is_empty());

        // The run loop body never repeats the announcement
        sched.run_until_idle();
        sched.run_until_idle();
        assert_eq!(*statuses.borrow(), [LifecycleStatus::Startup]);
        assert_eq!(log.borrow().len(), 1);
    }

    #[test]
    fn test_start_reports_veto() {
        let veto = |s: LifecycleStatus| s != LifecycleStatus::Startup;
        let monitor = LifecycleMonitor::new(&veto);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.add_monitor(&monitor);
        assert!(!sched.start());
    }

    #[test]
    fn test_power_save_veto_skips_idle() {
        let veto = |s: LifecycleStatus| s != LifecycleStatus::EnterPowerSave;
        let monitor = LifecycleMonitor::new(&veto);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.platform_mut().notify_sleep = true;
        sched.platform_mut().idle_advance = 5;
        sched.add_monitor(&monitor);

        assert_eq!(sched.run_until_idle(), IDLE_UNBOUNDED);
        assert_eq!(sched.platform().now, 0);

        let accept = |_: LifecycleStatus| true;
        let other = LifecycleMonitor::new(&accept);
        let events = EventQueue::new();
        let mut sched = scheduler(&events);
        sched.platform_mut().notify_sleep = true;
        sched.platform_mut().idle_advance = 5;
        sched.add_monitor(&other);
        sched.run_until_idle();
        assert_eq!(sched.platform().now, 5);
    }

    #[test]
    fn test_spawn_error_display() {
        assert_eq!(
            std::format!("{}", SpawnError::NoFreeSlots),
            std::format!("no free task slots (max {})", MAX_TASKS)
        );
    }

    // -----------------------------------------------------------------------
    // Randomized interleavings
    // -----------------------------------------------------------------------

    mod interleavings {
        use super::*;
        use proptest::prelude::*;

        const TASKS: usize = 4;

        #[derive(Clone, Debug)]
        enum Op {
            Set(usize, u32),
            Clear(usize, u32),
            Assign(usize, u32),
            Resume(usize),
            Advance(u32),
            Step,
        }

        /// Drains its flags, marks itself clean, and cycles through a
        /// fixed list of statuses.
        struct Cycler<'a> {
            flags: &'a EventFlags<'a>,
            dirty: &'a Cell<bool>,
            statuses: Vec<TaskStatus>,
            turn: usize,
        }

        impl Task for Cycler<'_> {
            fn step(&mut self, _cx: &mut Context<'_>) -> TaskStatus {
                self.flags.reset();
                self.dirty.set(false);
                let status = self.statuses[self.turn % self.statuses.len()];
                self.turn += 1;
                status
            }
        }

        fn status_strategy() -> impl Strategy<Value = TaskStatus> {
            prop_oneof![
                1 => Just(TaskStatus::Immediate),
                3 => (1u32..50).prop_map(TaskStatus::run_later),
                2 => (1u32..50).prop_map(TaskStatus::run_after),
                2 => Just(TaskStatus::Suspend),
            ]
        }

        fn op_strategy() -> impl Strategy<Value = Op> {
            prop_oneof![
                2 => (0..TASKS, any::<u32>()).prop_map(|(t, b)| Op::Set(t, b)),
                1 => (0..TASKS, any::<u32>()).prop_map(|(t, b)| Op::Clear(t, b)),
                1 => (0..TASKS, any::<u32>()).prop_map(|(t, b)| Op::Assign(t, b)),
                2 => (0..TASKS).prop_map(Op::Resume),
                2 => (0u32..60).prop_map(Op::Advance),
                4 => Just(Op::Step),
            ]
        }

        fn run_interleaving(start: u32, scripts: Vec<Vec<TaskStatus>>, ops: Vec<Op>) {
            let dirty: [Cell<bool>; TASKS] = core::array::from_fn(|_| Cell::new(false));
            let events = EventQueue::new();
            let flags: [EventFlags<'_>; TASKS] = core::array::from_fn(|_| EventFlags::new(&events));
            let mut tasks: Vec<Cycler<'_>> = scripts
                .into_iter()
                .enumerate()
                .map(|(i, statuses)| Cycler {
                    flags: &flags[i],
                    dirty: &dirty[i],
                    statuses,
                    turn: 0,
                })
                .collect();

            let mut sched = Scheduler::new(MockPlatform::at(start), &events);
            let mut ids = Vec::new();
            for (i, task) in tasks.iter_mut().enumerate() {
                let id = sched.task_create(task, None).unwrap();
                flags[i].bind(Some(id));
                sched.task_start(id);
                ids.push(id);
            }

            for op in ops {
                match op {
                    Op::Set(t, bits) => {
                        flags[t].set(bits);
                        dirty[t].set(true);
                    }
                    Op::Clear(t, bits) => {
                        flags[t].clear(bits);
                        dirty[t].set(true);
                    }
                    Op::Assign(t, bits) => {
                        flags[t].assign(bits);
                        dirty[t].set(true);
                    }
                    Op::Resume(t) => {
                        sched.task_resume(ids[t]);
                    }
                    Op::Advance(ticks) => sched.platform_mut().advance(ticks),
                    Op::Step => {
                        sched.step();
                    }
                }
                assert_queues_consistent(&sched, &ids);
            }

            // Each mutated consumer is at most TASKS places from the ready
            // head once the pending list is drained.
            for _ in 0..=TASKS {
                sched.step();
                assert_queues_consistent(&sched, &ids);
            }
            for (t, flag) in dirty.iter().enumerate() {
                assert!(!flag.get(), "mutation of task {} never stepped it", t);
            }
            assert!(!events.is_pending());
        }

        proptest! {
            #![proptest_config(ProptestConfig::with_cases(256))]

            #[test]
            fn test_random_interleavings_keep_queues_consistent(
                start in prop_oneof![Just(0u32), Just(u32::MAX - 100), any::<u32>()],
                scripts in proptest::collection::vec(
                    proptest::collection::vec(status_strategy(), 1..6),
                    TASKS,
                ),
                ops in proptest::collection::vec(op_strategy(), 0..200),
            ) {
                run_interleaving(start, scripts, ops);
            }
        }
    }
}
