//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections. The task table and the two masks are
//! the only state the kernel shares with interrupt handlers, and every
//! access to them happens inside one of these.
//!
//! On Cortex-M the implementation comes from `cortex-m`'s
//! `critical-section-single-core` feature: PRIMASK is saved, interrupts are
//! masked, and the saved PRIMASK is restored on exit, so a critical section
//! never leaks its masking into another task. Host builds link the
//! `critical-section` crate's `std` implementation instead.

pub use critical_section::CriticalSection;

/// Execute a closure within a critical section (interrupts disabled).
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     let mut sched = state.borrow_ref_mut(cs);
///     // ...
/// });
/// ```
///
/// Never perform a context switch from inside the closure: switches happen
/// once the section has been left.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}
