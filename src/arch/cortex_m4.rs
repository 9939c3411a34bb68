//! # Cortex-M4 Port Layer
//!
//! `Platform` implementation for the ARM Cortex-M4 (Thumb-2) processor.
//! SysTick drives the scheduler tick counter; idling uses `WFI`, with the
//! sleep depth picked from the idle budget.
//!
//! ## Sleep Depth
//!
//! The depth comes from `arch::sleep::enter`:
//!
//! | Budget (ticks)               | Mode        | Notifications                      |
//! |------------------------------|-------------|------------------------------------|
//! | `< POWER_SAVE_THRESHOLD`     | plain `WFI` | none                               |
//! | `< DEEP_SLEEP_THRESHOLD`     | power save  | `EnterPowerSave` / `ExitPowerSave` |
//! | `>= DEEP_SLEEP_THRESHOLD`    | deep sleep  | `EnterDeepSleep` / `ExitDeepSleep` |
//!
//! SysTick stops in deep sleep, so deep sleep is only used when a
//! `WakeTimer` was supplied with `with_wake_timer`. The timer is armed for
//! the budget before `WFI`, and the ticks it measured are added to the
//! tick counter on wake. Without one, long budgets use power save, where
//! SysTick wakes the core every tick.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest). It only bumps an atomic counter, so
//!   it never needs to preempt application interrupts.

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::asm;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};

use crate::arch::sleep::{self, SleepDepth, WakeTimer};
use crate::config::{SYSTEM_CLOCK_HZ, SYSTEM_TIMER_FREQUENCY};
use crate::lifecycle::Lifecycle;
use crate::platform::{Fault, Platform};

/// Ticks since `configure_systick`. Wraps silently.
static TICKS: AtomicU32 = AtomicU32::new(0);

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// Sets up SysTick to fire at `SYSTEM_TIMER_FREQUENCY` using the processor
/// clock. Each tick advances the counter read by `Platform::now`.
///
/// # Parameters
/// - `syst`: Mutable reference to the SysTick peripheral
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / SYSTEM_TIMER_FREQUENCY - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

/// Set SysTick to the lowest interrupt priority.
pub fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [31:24] = SysTick priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = core::ptr::read_volatile(shpr3);
        core::ptr::write_volatile(shpr3, val | (0xFF << 24));
    }
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler. Called at `SYSTEM_TIMER_FREQUENCY`.
#[no_mangle]
pub unsafe extern "C" fn SysTick() {
    TICKS.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Platform
// ---------------------------------------------------------------------------

/// The Cortex-M4 board: owns SysTick, the System Control Block and an
/// optional deep-sleep wake timer.
pub struct CortexM4Platform {
    _syst: SYST,
    scb: SCB,
    wake_timer: Option<&'static mut dyn WakeTimer>,
}

impl CortexM4Platform {
    /// Take over SysTick and start the tick counter.
    pub fn new(mut syst: SYST, scb: SCB) -> Self {
        set_interrupt_priorities();
        configure_systick(&mut syst);
        Self {
            _syst: syst,
            scb,
            wake_timer: None,
        }
    }

    /// Enable deep sleep, ended by `timer`. It must keep counting and be
    /// able to raise an interrupt while SysTick is stopped.
    pub fn with_wake_timer(mut self, timer: &'static mut dyn WakeTimer) -> Self {
        self.wake_timer = Some(timer);
        self
    }
}

impl Platform for CortexM4Platform {
    fn now(&self) -> u32 {
        TICKS.load(Ordering::Relaxed)
    }

    fn idle(&mut self, ticks: u32, lifecycle: &Lifecycle<'_>) {
        let depth = sleep::enter(ticks, self.wake_timer.is_some(), lifecycle);
        match depth {
            SleepDepth::Awake => {}
            SleepDepth::Wait | SleepDepth::PowerSave => asm::wfi(),
            SleepDepth::DeepSleep => {
                if let Some(timer) = self.wake_timer.as_deref_mut() {
                    timer.arm(ticks);
                    self.scb.set_sleepdeep();
                    asm::wfi();
                    self.scb.clear_sleepdeep();
                    TICKS.fetch_add(timer.disarm(), Ordering::Relaxed);
                }
            }
        }
        sleep::exit(depth, lifecycle);
    }

    fn assert_fail(&self, fault: Fault) -> ! {
        log::error!("fatal: {}, resetting", fault);
        SCB::sys_reset()
    }
}
