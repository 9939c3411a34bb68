//! # Synchronization Primitives
//!
//! Interrupt-safe critical section abstractions. Event flag state is the
//! only data shared between interrupt handlers and the scheduler, and all
//! of it is accessed through `critical_section` below.
//!
//! On Cortex-M the implementation is provided by the `cortex-m` crate
//! (`critical-section-single-core`: interrupts disabled on entry, restored
//! on exit). Host tests link the `std` implementation instead.

pub use ::critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     let state = SHARED.borrow(cs);
///     // Access shared state safely
/// });
/// ```
///
/// Keep critical sections as short as possible to minimize interrupt latency.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    ::critical_section::with(f)
}
