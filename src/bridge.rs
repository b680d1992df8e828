//! # Software-Interrupt Bridge
//!
//! Lets interrupt handlers reschedule without corrupting the interrupted
//! task.
//!
//! A handler must not switch stacks itself: its own return path is still
//! pending on the interrupted task's stack. Instead it updates the masks
//! and raises the port's reserved software interrupt. That interrupt is
//! taken only once no other handler is active, directly on the interrupted
//! task's stack, and enters the context-switch engine exactly as if the
//! interrupted task had called it at that instruction. When the task is
//! later chosen again it resumes there with its full context.
//!
//! On Cortex-M the reserved source is PendSV, configured at the lowest
//! exception priority so it can never nest inside another handler. Ports
//! without a dedicated software interrupt would reserve an otherwise unused
//! edge-triggered line and toggle it instead; the contract is the same.

use crate::arch::Port;
use crate::kernel::Kernel;
use crate::task::TaskSet;

impl<P: Port> Kernel<P> {
    /// Interrupt-context [`wake`](Kernel::wake): mark every task in `mask`
    /// ready and, if one outranks the interrupted task, switch to it as soon
    /// as the handler returns.
    pub fn isr_wake(&self, mask: TaskSet) {
        if self.with(|s| s.wake(mask)) {
            P::pend_switch(self);
        }
    }

    /// Interrupt-context suspension: mark every attached task in `mask`
    /// idle (task 7 is never idled). If that includes the interrupted task,
    /// it is switched out as soon as the handler returns.
    pub fn isr_idle(&self, mask: TaskSet) {
        if self.with(|s| s.idle_tasks(mask)) {
            P::pend_switch(self);
        }
    }

    /// Re-run the resolver from interrupt context without changing any mask,
    /// e.g. after a task was attached by a handler.
    pub fn request_reschedule(&self) {
        if self.with(|s| s.needs_switch()) {
            P::pend_switch(self);
        }
    }
}
