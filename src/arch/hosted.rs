//! # Hosted Port
//!
//! Runs OctOS tasks inside one ordinary host thread by switching between
//! caller-provided stacks. There are no interrupts on the host, so the
//! software-interrupt bridge collapses into a direct switch: a test that
//! wants to model an interrupt handler calls the `isr_*` entry points from
//! whichever task happens to be running, which is exactly where a real
//! handler would have landed.
//!
//! ## Switch routine
//!
//! [`host_switch`] is entered like a normal call. It pushes the callee-saved
//! registers of the platform ABI (everything else is already saved by the
//! caller, because to the compiler this is just a call), hands the stack
//! pointer to the engine, and pops the same set from the stack pointer it
//! receives back. The final `ret` lands either after the call in the
//! incoming task, or, for a fresh frame, in [`task_start`].
//!
//! ### x86_64 frame (low → high)
//!
//! ```text
//!   mxcsr:u32 fcw:u16 pad   <- saved sp
//!   r15 r14 r13 r12(entry) rbx rbp
//!   return address (task_start)
//!                           <- 16-byte aligned stack top
//! ```
//!
//! ### aarch64 frame (low → high)
//!
//! ```text
//!   x19(entry) x20 .. x28 x29 x30(task_start) d8 .. d15 fpcr pad   <- saved sp
//! ```

use core::arch::naked_asm;

use super::Port;
use crate::kernel::{engine_entry, EngineFn, Kernel};
use crate::task::TaskEntry;

/// The hosted port.
pub struct Hosted;

unsafe impl Port for Hosted {
    const MIN_STACK_SIZE: usize = 16 * 1024;

    unsafe fn init_frame(stack_top: *mut u8, entry: TaskEntry) -> *mut u8 {
        let top = (stack_top as usize & !0xF) as *mut u8;
        let sp = top.sub(FRAME_SIZE);
        core::ptr::write_bytes(sp, 0, FRAME_SIZE);
        write_frame(sp, entry);
        sp
    }

    unsafe fn adopt_current_context(_kernel: &'static Kernel<Self>) {
        // The thread's own stack becomes the task's; it is saved on the
        // first switch like any other.
    }

    fn switch(kernel: &Kernel<Self>) {
        // Safety: `engine_entry::<Hosted>` matches the kernel pointer, and
        // we are not inside a critical section.
        unsafe { host_switch(kernel as *const Kernel<Self> as *const (), engine_entry::<Hosted>) }
    }

    fn pend_switch(kernel: &Kernel<Self>) {
        Self::switch(kernel)
    }

    fn in_interrupt() -> bool {
        false
    }

    fn wait_for_interrupt() {
        core::hint::spin_loop();
    }
}

// ---------------------------------------------------------------------------
// x86_64 (System V)
// ---------------------------------------------------------------------------

#[cfg(target_arch = "x86_64")]
const FRAME_SIZE: usize = 64;

#[cfg(target_arch = "x86_64")]
unsafe fn write_frame(sp: *mut u8, entry: TaskEntry) {
    const MXCSR_DEFAULT: u32 = 0x1F80;
    const FCW_DEFAULT: u16 = 0x037F;

    (sp as *mut u32).write(MXCSR_DEFAULT);
    (sp.add(4) as *mut u16).write(FCW_DEFAULT);
    let regs = sp.add(8) as *mut usize;
    // r15, r14, r13, r12, rbx, rbp, return address
    regs.add(3).write(entry as usize);
    regs.add(6).write(task_start as *const () as usize);
}

/// Save the callee-saved state, run the engine, restore the chosen task.
///
/// rdi = kernel, rsi = engine.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn host_switch(_kernel: *const (), _engine: EngineFn) {
    naked_asm!(
        "push rbp",
        "push rbx",
        "push r12",
        "push r13",
        "push r14",
        "push r15",
        "sub rsp, 8",
        "stmxcsr [rsp]",
        "fnstcw [rsp + 4]",
        // engine(kernel, sp) -> sp
        "mov rax, rsi",
        "mov rsi, rsp",
        "call rax",
        "mov rsp, rax",
        "ldmxcsr [rsp]",
        "fldcw [rsp + 4]",
        "add rsp, 8",
        "pop r15",
        "pop r14",
        "pop r13",
        "pop r12",
        "pop rbx",
        "pop rbp",
        "ret",
    );
}

/// First instruction of every task: reached by the `ret` of
/// [`host_switch`] with the stack 16-byte aligned and the entry in r12.
#[cfg(target_arch = "x86_64")]
#[unsafe(naked)]
unsafe extern "C" fn task_start() -> ! {
    naked_asm!("call r12", "ud2");
}

// ---------------------------------------------------------------------------
// aarch64 (AAPCS64)
// ---------------------------------------------------------------------------

#[cfg(target_arch = "aarch64")]
const FRAME_SIZE: usize = 176;

#[cfg(target_arch = "aarch64")]
unsafe fn write_frame(sp: *mut u8, entry: TaskEntry) {
    let regs = sp as *mut usize;
    // x19 .. x28, x29, x30
    regs.add(0).write(entry as usize);
    regs.add(11).write(task_start as *const () as usize);
}

/// Save the callee-saved state, run the engine, restore the chosen task.
///
/// x0 = kernel, x1 = engine.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn host_switch(_kernel: *const (), _engine: EngineFn) {
    naked_asm!(
        "sub sp, sp, #176",
        "stp x19, x20, [sp, #0]",
        "stp x21, x22, [sp, #16]",
        "stp x23, x24, [sp, #32]",
        "stp x25, x26, [sp, #48]",
        "stp x27, x28, [sp, #64]",
        "stp x29, x30, [sp, #80]",
        "stp d8, d9, [sp, #96]",
        "stp d10, d11, [sp, #112]",
        "stp d12, d13, [sp, #128]",
        "stp d14, d15, [sp, #144]",
        "mrs x9, fpcr",
        "str x9, [sp, #160]",
        // engine(kernel, sp) -> sp
        "mov x9, x1",
        "mov x1, sp",
        "blr x9",
        "mov sp, x0",
        "ldr x9, [sp, #160]",
        "msr fpcr, x9",
        "ldp d14, d15, [sp, #144]",
        "ldp d12, d13, [sp, #128]",
        "ldp d10, d11, [sp, #112]",
        "ldp d8, d9, [sp, #96]",
        "ldp x29, x30, [sp, #80]",
        "ldp x27, x28, [sp, #64]",
        "ldp x25, x26, [sp, #48]",
        "ldp x23, x24, [sp, #32]",
        "ldp x21, x22, [sp, #16]",
        "ldp x19, x20, [sp, #0]",
        "add sp, sp, #176",
        "ret",
    );
}

/// First instruction of every task: reached by the `ret` of
/// [`host_switch`] with the entry in x19.
#[cfg(target_arch = "aarch64")]
#[unsafe(naked)]
unsafe extern "C" fn task_start() -> ! {
    naked_asm!("blr x19", "brk #0");
}
