//! # Event Flags
//!
//! Asynchronous completion signalling from interrupt (or any producer)
//! context to a waiting task.
//!
//! An `EventFlags` holds 32 independent flag bits and an optional consumer
//! task. Every mutating call (`assign`, `assign_masked`, `set`, `clear`)
//! appends the flags to their `EventQueue`, the pending list the scheduler
//! drains at the start of each step, so the consumer is made ready. This
//! happens even if the bits did not change: a mutation means "something
//! happened", not "the value changed". `reset` reads and clears without
//! notifying, which lets a consumer drain its own flags inside its step
//! without re-triggering itself.
//!
//! ```text
//!  ISR ──set()──► EventFlags ──append once──► EventQueue ──next_consumer()──► Scheduler
//!                    ▲                                                          │
//!                    └────────────────── reset() inside consumer step ◄─────────┘
//! ```
//!
//! Flags are linked into the pending list intrusively, at most once per
//! undrained episode. All shared state sits behind `sync::critical_section`.
//!
//! ## Static Usage
//!
//! ```ignore
//! static EVENTS: EventQueue<'static> = EventQueue::new();
//! static SPI_DONE: EventFlags<'static> = EventFlags::new(&EVENTS);
//!
//! // In the interrupt handler:
//! SPI_DONE.set(1 << 0);
//! ```

use core::cell::Cell;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::sync::{self, CriticalSection, Mutex};
use crate::task::TaskId;

// ---------------------------------------------------------------------------
// Pending event list
// ---------------------------------------------------------------------------

struct PendingList<'a> {
    head: Cell<Option<&'a EventFlags<'a>>>,
    tail: Cell<Option<&'a EventFlags<'a>>>,
}

/// The pending-event list shared by all event flags of one scheduler.
pub struct EventQueue<'a> {
    list: Mutex<PendingList<'a>>,

    /// Set while the list is non-empty, so an idle drain can skip the
    /// critical section.
    ready: AtomicBool,
}

impl<'a> EventQueue<'a> {
    pub const fn new() -> Self {
        Self {
            list: Mutex::new(PendingList {
                head: Cell::new(None),
                tail: Cell::new(None),
            }),
            ready: AtomicBool::new(false),
        }
    }

    /// Returns `true` if any event flags are waiting to be drained.
    #[inline]
    pub fn is_pending(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Append `event` unless it has no consumer or is already pending.
    fn append(&self, cs: CriticalSection<'_>, event: &'a EventFlags<'a>) {
        let state = event.state.borrow(cs);
        if state.consumer.get().is_none() || state.queued.get() {
            return;
        }
        state.queued.set(true);
        state.next.set(None);

        let list = self.list.borrow(cs);
        match list.tail.get() {
            Some(tail) => tail.state.borrow(cs).next.set(Some(event)),
            None => list.head.set(Some(event)),
        }
        list.tail.set(Some(event));
        self.ready.store(true, Ordering::Release);
    }

    /// Pop pending event flags in the order they were first mutated and
    /// return their consumer task, or `None` once the list is empty.
    ///
    /// Flags whose consumer was unbound after they were queued are skipped.
    /// Safe to call while interrupt handlers are mutating flags.
    pub fn next_consumer(&self) -> Option<TaskId> {
        loop {
            if !self.is_pending() {
                return None;
            }

            let popped = sync::critical_section(|cs| {
                let list = self.list.borrow(cs);
                let Some(event) = list.head.get() else {
                    self.ready.store(false, Ordering::Relaxed);
                    return None;
                };

                let state = event.state.borrow(cs);
                let next = state.next.take();
                list.head.set(next);
                if next.is_none() {
                    list.tail.set(None);
                    self.ready.store(false, Ordering::Relaxed);
                }
                state.queued.set(false);
                Some(state.consumer.get())
            });

            match popped {
                Some(Some(consumer)) => return Some(consumer),
                Some(None) => continue,
                None => return None,
            }
        }
    }
}

impl Default for EventQueue<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Event flags
// ---------------------------------------------------------------------------

struct EventState<'a> {
    bits: Cell<u32>,
    consumer: Cell<Option<TaskId>>,
    next: Cell<Option<&'a EventFlags<'a>>>,
    queued: Cell<bool>,
}

/// A 32-bit set of event flags that notifies its consumer task on change.
pub struct EventFlags<'a> {
    queue: &'a EventQueue<'a>,
    state: Mutex<EventState<'a>>,
}

impl<'a> EventFlags<'a> {
    /// Create cleared flags with no consumer. Mutations are recorded but
    /// notify nobody until `bind` attaches a task.
    pub const fn new(queue: &'a EventQueue<'a>) -> Self {
        Self {
            queue,
            state: Mutex::new(EventState {
                bits: Cell::new(0),
                consumer: Cell::new(None),
                next: Cell::new(None),
                queued: Cell::new(false),
            }),
        }
    }

    /// Create cleared flags that notify `consumer`.
    pub const fn with_consumer(queue: &'a EventQueue<'a>, consumer: TaskId) -> Self {
        Self {
            queue,
            state: Mutex::new(EventState {
                bits: Cell::new(0),
                consumer: Cell::new(Some(consumer)),
                next: Cell::new(None),
                queued: Cell::new(false),
            }),
        }
    }

    /// Attach (or with `None`, detach) the consumer task. Does not notify.
    pub fn bind(&self, consumer: Option<TaskId>) {
        sync::critical_section(|cs| self.state.borrow(cs).consumer.set(consumer));
    }

    pub fn consumer(&self) -> Option<TaskId> {
        sync::critical_section(|cs| self.state.borrow(cs).consumer.get())
    }

    // -- Reads ---------------------------------------------------------------

    /// Current flag bits.
    pub fn get(&self) -> u32 {
        sync::critical_section(|cs| self.state.borrow(cs).bits.get())
    }

    /// Returns `true` if every bit in `mask` is set.
    pub fn test_all(&self, mask: u32) -> bool {
        self.get() & mask == mask
    }

    /// Returns `true` if any bit in `mask` is set.
    pub fn test_any(&self, mask: u32) -> bool {
        self.get() & mask != 0
    }

    // -- Mutations (always notify) -------------------------------------------

    /// Replace all bits. Returns the previous value.
    pub fn assign(&'a self, bits: u32) -> u32 {
        self.update(|_| bits)
    }

    /// Replace the bits selected by `mask` with the matching bits of
    /// `bits`. Returns the previous value.
    pub fn assign_masked(&'a self, mask: u32, bits: u32) -> u32 {
        self.update(|old| (old & !mask) | (bits & mask))
    }

    /// Set the bits in `mask`. Returns the previous value.
    pub fn set(&'a self, mask: u32) -> u32 {
        self.update(|old| old | mask)
    }

    /// Clear the bits in `mask`. Returns the previous value.
    pub fn clear(&'a self, mask: u32) -> u32 {
        self.update(|old| old & !mask)
    }

    // -- Drain (never notifies) ----------------------------------------------

    /// Read and zero all bits atomically. Returns the previous value.
    pub fn reset(&self) -> u32 {
        sync::critical_section(|cs| self.state.borrow(cs).bits.replace(0))
    }

    fn update(&'a self, f: impl FnOnce(u32) -> u32) -> u32 {
        sync::critical_section(|cs| {
            let bits = &self.state.borrow(cs).bits;
            let old = bits.get();
            bits.set(f(old));
            self.queue.append(cs, self);
            old
        })
    }
}
