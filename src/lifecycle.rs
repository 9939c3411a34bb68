//! # Lifecycle Notification
//!
//! Broadcasts coarse scheduler transitions (startup, shutdown, power-save
//! and deep-sleep entry/exit) to registered monitors. Drivers use this to
//! park peripherals before the device sleeps, and may veto a transition by
//! returning `false`.
//!
//! Monitors are permanent: they are prepended to an intrusive list on
//! registration and never removed. `notify` calls them newest first.

use core::cell::Cell;

/// Scheduler lifecycle transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStatus {
    Startup,
    Shutdown,
    EnterPowerSave,
    ExitPowerSave,
    EnterDeepSleep,
    ExitDeepSleep,
}

/// A registered lifecycle handler plus its intrusive list link.
pub struct LifecycleMonitor<'a> {
    handler: &'a dyn Fn(LifecycleStatus) -> bool,
    next: Cell<Option<&'a LifecycleMonitor<'a>>>,
}

impl<'a> LifecycleMonitor<'a> {
    /// Wrap a handler. It returns `true` if the transition is acceptable.
    pub const fn new(handler: &'a dyn Fn(LifecycleStatus) -> bool) -> Self {
        Self {
            handler,
            next: Cell::new(None),
        }
    }
}

/// The list of lifecycle monitors.
pub struct Lifecycle<'a> {
    head: Cell<Option<&'a LifecycleMonitor<'a>>>,
}

impl<'a> Lifecycle<'a> {
    pub const fn new() -> Self {
        Self {
            head: Cell::new(None),
        }
    }

    /// Register a monitor for the rest of the program.
    ///
    /// Each monitor must be registered at most once.
    pub fn add_monitor(&self, monitor: &'a LifecycleMonitor<'a>) {
        debug_assert!(
            monitor.next.get().is_none() && !self.contains(monitor),
            "lifecycle monitor registered twice"
        );
        monitor.next.set(self.head.get());
        self.head.set(Some(monitor));
    }

    fn contains(&self, monitor: &'a LifecycleMonitor<'a>) -> bool {
        let mut cursor = self.head.get();
        while let Some(current) = cursor {
            if core::ptr::eq(current, monitor) {
                return true;
            }
            cursor = current.next.get();
        }
        false
    }

    /// Deliver `status` to every monitor, most recently added first.
    ///
    /// All monitors are called even after one rejects. Returns `true` only
    /// if every monitor accepted.
    pub fn notify(&self, status: LifecycleStatus) -> bool {
        let mut accepted = true;
        let mut cursor = self.head.get();
        while let Some(monitor) = cursor {
            accepted &= (monitor.handler)(status);
            cursor = monitor.next.get();
        }
        log::debug!("lifecycle {:?} accepted={}", status, accepted);
        accepted
    }
}

impl Default for Lifecycle<'_> {
    fn default() -> Self {
        Self::new()
    }
}
