//! # CoopOS Example Firmware
//!
//! Demonstrates the cooperative scheduler with three tasks:
//!
//! | Task        | Returns                  | Behavior                                   |
//! |-------------|--------------------------|--------------------------------------------|
//! | `heartbeat` | `Delayed(500 ms)`        | Periodic wake-up, may bring the MCU out of sleep |
//! | `sampler`   | `Delayed(2 ms / 100 ms)` | Starts a conversion, keeps the MCU awake until it completes, then publishes the result |
//! | `reporter`  | `Suspend`                | Runs only when its event flags are mutated |
//!
//! A lifecycle monitor logs every power transition and vetoes deep sleep
//! while a sample is waiting to be reported.
//!
//! Build with `--features rt` for a `thumbv7em-none-eabihf` target.

#![no_std]
#![no_main]

use core::cell::Cell;

use cortex_m_rt::entry;
use panic_halt as _;

use coopos::arch::cortex_m4::CortexM4Platform;
use coopos::config::ms_to_ticks;
use coopos::{
    Context, EventFlags, EventQueue, LifecycleMonitor, LifecycleStatus, Scheduler, TaskStatus,
};

/// Event bit: a new sample is available.
const SAMPLE_READY: u32 = 1 << 0;
/// Event bit: the sample exceeded the alarm threshold.
const SAMPLE_ALARM: u32 = 1 << 1;

const ALARM_THRESHOLD: u32 = 3000;

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Creates the tasks and runs the scheduler.
/// Does not return.
#[entry]
fn main() -> ! {
    // Take ownership of core peripherals
    let cp = cortex_m::Peripherals::take().unwrap();
    let platform = CortexM4Platform::new(cp.SYST, cp.SCB);

    let events = EventQueue::new();
    let samples = EventFlags::new(&events);
    let latest = Cell::new(0u32);

    // --- Lifecycle monitor ---

    let power_log = |status: LifecycleStatus| {
        log::info!("power: {:?}", status);
        !(status == LifecycleStatus::EnterDeepSleep && samples.test_any(SAMPLE_READY))
    };
    let monitor = LifecycleMonitor::new(&power_log);

    // --- Tasks ---

    let mut beats = 0u32;
    let mut heartbeat = move |_: &mut Context<'_>| {
        beats = beats.wrapping_add(1);
        log::info!("heartbeat {}", beats);
        TaskStatus::run_later(ms_to_ticks(500))
    };

    let mut converting = false;
    let mut raw = 0u32;
    let mut sampler = |cx: &mut Context<'_>| {
        if !converting {
            // The ADC clock stops in sleep; hold the MCU awake until the
            // conversion completes.
            cx.stay_awake();
            converting = true;
            return TaskStatus::run_later(ms_to_ticks(2));
        }

        converting = false;
        raw = raw.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        let sample = (raw >> 16) & 0x0FFF;
        latest.set(sample);
        if sample > ALARM_THRESHOLD {
            samples.set(SAMPLE_READY | SAMPLE_ALARM);
        } else {
            samples.set(SAMPLE_READY);
        }
        cx.can_sleep();
        TaskStatus::run_later(ms_to_ticks(100))
    };

    let mut reporter = |cx: &mut Context<'_>| {
        let bits = samples.reset();
        if bits & SAMPLE_READY != 0 {
            log::info!("{}: sample {}", cx.name().unwrap_or("?"), latest.get());
        }
        if bits & SAMPLE_ALARM != 0 {
            log::warn!("{}: sample above {}", cx.name().unwrap_or("?"), ALARM_THRESHOLD);
        }
        TaskStatus::Suspend
    };

    // --- Scheduler ---

    let mut sched = Scheduler::new(platform, &events);
    sched.add_monitor(&monitor);

    sched
        .spawn(&mut heartbeat, Some("heartbeat"))
        .expect("Failed to create heartbeat");
    sched
        .spawn(&mut sampler, Some("sampler"))
        .expect("Failed to create sampler");

    // Bind the flags before the reporter first runs
    let reporter_id = sched
        .task_create(&mut reporter, Some("reporter"))
        .expect("Failed to create reporter");
    samples.bind(Some(reporter_id));
    sched.task_start(reporter_id);

    // Start the scheduler; does not return
    sched.run()
}
