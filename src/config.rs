//! # OctOS Configuration
//!
//! Compile-time constants governing the kernel and the demo firmware.
//! All limits are fixed at compile time; no dynamic allocation.

/// Number of task slots. Task ids are bit positions in a `u8`, so this is
/// also the width of a [`TaskSet`](crate::task::TaskSet).
pub const MAX_TASKS: usize = 8;

/// Id of the mandatory lowest-priority task. It must always be attached and
/// is what the resolver falls back to when nothing else is ready.
pub const IDLE_TASK: u8 = 7;

/// Size in bytes of the dedicated exception stack used by interrupt handlers
/// once `init` has moved thread mode onto the process stack (Cortex-M only).
pub const HANDLER_STACK_SIZE: usize = 1024;

/// SysTick frequency in Hz used by the demo firmware.
pub const TICK_HZ: u32 = 1000;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;

/// Demo firmware: ticks between the periodic wake of tasks 2 and 3.
pub const WAKE_PERIOD_TICKS: u32 = 2 * TICK_HZ;
