//! # OctOS: an eight-task cooperative kernel
//!
//! A minimal cooperative multitasking kernel for single-core,
//! memory-constrained microcontrollers.
//!
//! ## Overview
//!
//! OctOS runs up to eight statically configured tasks. A task's id is its
//! priority: task 0 is the most important, task 7 the least, and task 7 must
//! always be attached as the background task. Tasks give up the CPU by
//! calling [`idle`](kernel::Kernel::idle) and get it back when some other
//! task, or an interrupt handler, names them in a
//! [`wake`](kernel::Kernel::wake). Whenever the CPU changes hands the
//! highest-priority task that is attached and not idle gets it.
//!
//! There is no time slicing: the CPU changes hands only at `idle`, `wake`
//! and the interrupt-context bridge calls.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                    │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                  │
//! │   init() · attach() · detach() · idle() · wake()       │
//! ├───────────────────────────────┬────────────────────────┤
//! │  Scheduler (scheduler.rs)     │  Bridge (bridge.rs)    │
//! │  ─ task table, masks          │  ─ isr_wake()          │
//! │  ─ switch_context()           │  ─ isr_idle()          │
//! ├───────────────┬───────────────┴────────────────────────┤
//! │ Resolver      │  Task Model (task.rs)                   │
//! │ resolver.rs   │  TaskId · TaskSet · TCB · Stack         │
//! ├───────────────┴────────────────────────────────────────┤
//! │            Arch Port (arch/*.rs)                        │
//! │    Cortex-M4: PendSV · hosted: call-like stack switch   │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! static T2_STACK: Stack<512> = Stack::new();
//! static T7_STACK: Stack<256> = Stack::new();
//!
//! extern "C" fn task2() -> ! {
//!     loop {
//!         octos::idle(TaskSet::TASK2);
//!         // ... work ...
//!     }
//! }
//!
//! octos::init(TaskId::TASK6);
//! octos::attach(TaskId::TASK7, octos::rest::<CortexM4>, &T7_STACK);
//! octos::attach(TaskId::TASK2, task2, &T2_STACK);
//! octos::wake(TaskSet::TASK2);
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: all state is statically allocated
//! - **No `alloc`**: pure `core` only
//! - **Fixed-size task table**: `[TaskControlBlock; 8]`
//! - **Caller-owned stacks**: never resized or checked for overflow
//! - **Critical sections**: the `critical-section` crate for shared state

#![cfg_attr(not(test), no_std)]

pub mod arch;
pub mod bridge;
pub mod config;
pub mod kernel;
pub mod resolver;
pub mod scheduler;
pub mod sync;
pub mod task;

pub use kernel::{rest, spin, Kernel};
pub use task::{Stack, TaskEntry, TaskId, TaskSet, TaskState};

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use kernel::{
    attach, attach_raw, current_task, detach, idle, init, isr_idle, isr_wake, wake, KERNEL,
};
