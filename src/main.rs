//! # OctOS Demo Firmware
//!
//! Four tasks sharing one CPU by priority:
//!
//! | Task | Role | Behavior |
//! |------|------|----------|
//! | 2 | `burst_short` | Wakes every 2 s, works ~0.2 s, idles |
//! | 3 | `burst_long`  | Wakes every 2 s, works ~0.5 s, idles |
//! | 6 | `main`        | Background work, feeds the log |
//! | 7 | `rest`        | Sleeps until the next interrupt |
//!
//! The SysTick handler plays the periodic timer: every
//! `WAKE_PERIOD_TICKS` it wakes tasks 2 and 3 through the bridge. Task 2
//! always runs first, then task 3, then main resumes.
//!
//! Build with `--features rt --target thumbv7em-none-eabihf`. Log output
//! goes to ITM stimulus port 0.

#![no_std]
#![no_main]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m::peripheral::ITM;
use cortex_m_rt::{entry, exception};
use panic_halt as _;

use octos::arch::cortex_m4::{self, CortexM4};
use octos::config::WAKE_PERIOD_TICKS;
use octos::{Stack, TaskId, TaskSet};

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// `log` backend writing to ITM stimulus port 0.
struct ItmLogger;

impl log::Log for ItmLogger {
    fn enabled(&self, metadata: &log::Metadata<'_>) -> bool {
        metadata.level() <= log::Level::Debug
    }

    fn log(&self, record: &log::Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        octos::sync::critical_section(|_cs| {
            // Safety: stimulus port 0 is only written inside this section.
            let stim = unsafe { &mut (*(ITM::PTR as *mut cortex_m::peripheral::itm::RegisterBlock)).stim[0] };
            cortex_m::iprintln!(stim, "[{}] {}", record.level(), record.args());
        });
    }

    fn flush(&self) {}
}

static LOGGER: ItmLogger = ItmLogger;

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Busy-work iterations per burst.
const T2_ITER: u32 = 15_000;
const T3_ITER: u32 = 30_000;

static T2_STACK: Stack<512> = Stack::new();
static T3_STACK: Stack<512> = Stack::new();
static T7_STACK: Stack<256> = Stack::new();

static T2_BURSTS: AtomicU32 = AtomicU32::new(0);
static T3_BURSTS: AtomicU32 = AtomicU32::new(0);

/// Short burst, then idle until the next periodic wake.
extern "C" fn burst_short() -> ! {
    loop {
        octos::idle(TaskSet::TASK2);
        for _ in 0..T2_ITER {
            cortex_m::asm::delay(10);
        }
        T2_BURSTS.fetch_add(1, Ordering::Relaxed);
    }
}

/// Long burst, then idle until the next periodic wake.
extern "C" fn burst_long() -> ! {
    loop {
        octos::idle(TaskSet::TASK3);
        for _ in 0..T3_ITER {
            cortex_m::asm::delay(10);
        }
        T3_BURSTS.fetch_add(1, Ordering::Relaxed);
    }
}

// ---------------------------------------------------------------------------
// Periodic wake
// ---------------------------------------------------------------------------

static TICKS: AtomicU32 = AtomicU32::new(0);

#[exception]
fn SysTick() {
    let ticks = TICKS.fetch_add(1, Ordering::Relaxed) + 1;
    if ticks % WAKE_PERIOD_TICKS == 0 {
        octos::isr_wake(TaskSet::TASK2 | TaskSet::TASK3);
    }
}

// ---------------------------------------------------------------------------
// Main entry point (task 6)
// ---------------------------------------------------------------------------

#[entry]
fn main() -> ! {
    let mut cp = cortex_m::Peripherals::take().expect("core peripherals already taken");

    log::set_logger(&LOGGER)
        .map(|()| log::set_max_level(log::LevelFilter::Debug))
        .expect("logger already set");

    octos::init(TaskId::TASK6);
    octos::attach(TaskId::TASK7, octos::rest::<CortexM4>, &T7_STACK); // required
    octos::attach(TaskId::TASK3, burst_long, &T3_STACK);
    octos::attach(TaskId::TASK2, burst_short, &T2_STACK);

    cortex_m4::configure_systick(&mut cp.SYST);

    // Let tasks initialize: each runs up to its first idle.
    octos::wake(TaskSet::TASK2 | TaskSet::TASK3);

    let mut reported = 0;
    loop {
        cortex_m::asm::delay(1_000);

        let bursts = T3_BURSTS.load(Ordering::Relaxed);
        if bursts != reported {
            reported = bursts;
            log::info!(
                "{} running, bursts: task2={} task3={}",
                octos::current_task(),
                T2_BURSTS.load(Ordering::Relaxed),
                bursts
            );
        }
    }
}
