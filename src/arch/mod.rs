//! # Architecture Abstraction Layer
//!
//! The [`Port`] trait is the boundary between the portable scheduler and the
//! code that actually moves the CPU from one stack to another. Every port
//! provides the same two-part context-switch engine:
//!
//! 1. a register-level routine that saves every register that can be live
//!    across a switch onto the outgoing stack, calls
//!    [`Kernel::switch_context`](crate::kernel::Kernel) with the resulting
//!    stack pointer, and restores from whatever stack pointer it gets back;
//! 2. a way to enter that routine, synchronously from task context
//!    ([`Port::switch`]) or deferred until the current interrupt handler
//!    returns ([`Port::pend_switch`], the software-interrupt bridge).
//!
//! Ports:
//! - [`cortex_m4`]: ARMv7E-M, PendSV as the software interrupt
//! - [`hosted`]: x86_64 / aarch64 Unix, used to exercise the engine in tests

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

#[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
pub mod hosted;

use crate::kernel::Kernel;
use crate::task::TaskEntry;

/// Platform support for the context-switch engine.
///
/// # Safety
///
/// Implementations must uphold the engine contract: a task switched out and
/// later switched back in resumes with every register, its stack pointer and
/// its interrupt-masking state exactly as they were, and a frame built by
/// [`init_frame`](Port::init_frame) starts `entry` on that stack.
pub unsafe trait Port: Sized + 'static {
    /// Smallest stack a task may be attached with: the first-entry frame,
    /// one saved context and a little headroom.
    const MIN_STACK_SIZE: usize;

    /// Build a first-entry frame below `stack_top` and return the stack
    /// pointer to store as the task's saved context.
    ///
    /// # Safety
    /// `stack_top` must be one past the end of a writable region of at
    /// least `MIN_STACK_SIZE` bytes that no running code is using.
    unsafe fn init_frame(stack_top: *mut u8, entry: TaskEntry) -> *mut u8;

    /// Turn the currently executing context into one the engine can save.
    /// Called once by [`Kernel::init`].
    ///
    /// # Safety
    /// Called once, from the boot context, before any task is attached.
    unsafe fn adopt_current_context(kernel: &'static Kernel<Self>);

    /// Transfer the CPU to the resolver's choice before returning. Called
    /// from task context, outside any critical section, with interrupts
    /// enabled.
    fn switch(kernel: &Kernel<Self>);

    /// Software-interrupt bridge: request the same transfer from interrupt
    /// context. The switch happens on the interrupted task's stack, as if
    /// that task had called [`switch`](Port::switch) itself, once no
    /// handler is active any more.
    fn pend_switch(kernel: &Kernel<Self>);

    /// Whether the caller is an interrupt handler.
    fn in_interrupt() -> bool;

    /// Low-power wait used by the resting idle loop.
    fn wait_for_interrupt();
}
