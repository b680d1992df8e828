//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor.
//! Implements the context-switch engine on PendSV, which doubles as the
//! software-interrupt bridge.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): used by interrupt handlers
//! - **PSP** (Process Stack Pointer): used by tasks in Thread mode
//!
//! `init` moves the boot context from MSP to PSP and gives handlers their
//! own stack, so the boot context is an ordinary task from then on.
//!
//! On exception entry, the hardware stacks R0–R3, R12, LR, PC and xPSR (and
//! S0–S15/FPSCR when the task has used the FPU) onto the process stack.
//! PendSV saves the rest: R4–R11, the EXC_RETURN value describing which
//! frame type was stacked, and S16–S31 when that frame is an FPU frame.
//!
//! ## Why PendSV is the bridge
//!
//! PendSV runs at the lowest exception priority, so it is never taken while
//! another handler is active. Pended from task context with interrupts
//! enabled, it is taken immediately, before the pending call returns, which
//! makes `idle`/`wake` switch synchronously. Pended from an interrupt
//! handler, it tail-chains after the last active handler and switches on
//! the interrupted task's stack at the interrupted instruction.
//!
//! Interrupt masking needs no per-task bookkeeping: PendSV can only be
//! taken with PRIMASK clear, so every suspended task resumes with
//! interrupts enabled, and critical sections restore the PRIMASK they saved.

use core::arch::{asm, naked_asm};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};

use cortex_m::peripheral::scb::VectActive;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::SCB;
use cortex_m::register;

use super::Port;
use crate::config::{HANDLER_STACK_SIZE, SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel::Kernel;
use crate::task::{Stack, TaskEntry};

/// The Cortex-M4 port.
pub struct CortexM4;

/// The kernel PendSV switches for. Set by `init`.
static ACTIVE: AtomicPtr<Kernel<CortexM4>> = AtomicPtr::new(ptr::null_mut());

/// Exception stack once thread mode runs on PSP.
static HANDLER_STACK: Stack<HANDLER_STACK_SIZE> = Stack::new();

/// EXC_RETURN: thread mode, process stack, basic frame.
const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;

/// xPSR with only the Thumb bit set.
const XPSR_THUMB: u32 = 0x0100_0000;

/// Words PendSV saves below the hardware frame: R4–R11 and EXC_RETURN.
const SW_FRAME_WORDS: usize = 9;

/// Words of a basic hardware exception frame.
const HW_FRAME_WORDS: usize = 8;

unsafe impl Port for CortexM4 {
    // Initial frame, a worst-case FPU save (26 + 16 words) and headroom.
    const MIN_STACK_SIZE: usize = 256;

    /// Initialize a task's stack frame for its first switch-in.
    ///
    /// ## Stack Layout (top = high address, growing down)
    ///
    /// ```text
    /// [Hardware stacked frame]   <- 8-byte aligned
    ///   xPSR  (Thumb bit set)
    ///   PC    (task entry point)
    ///   LR    (task_exit)
    ///   R12, R3, R2, R1, R0  (0)
    /// [Software saved context]
    ///   EXC_RETURN (thread, PSP, no FPU frame)
    ///   R11 .. R4  (0)           <- stack_pointer after init
    /// ```
    unsafe fn init_frame(stack_top: *mut u8, entry: TaskEntry) -> *mut u8 {
        // Align to 8 bytes (AAPCS requirement for the exception frame)
        let top = (stack_top as usize & !0x07) as *mut u32;

        let hw = top.sub(HW_FRAME_WORDS);
        for i in 0..5 {
            hw.add(i).write(0); // R0, R1, R2, R3, R12
        }
        hw.add(5).write(task_exit as usize as u32); // LR
        hw.add(6).write(entry as usize as u32 & !1); // PC
        hw.add(7).write(XPSR_THUMB);

        let sw = hw.sub(SW_FRAME_WORDS);
        for i in 0..8 {
            sw.add(i).write(0); // R4 .. R11
        }
        sw.add(8).write(EXC_RETURN_THREAD_PSP);

        sw as *mut u8
    }

    unsafe fn adopt_current_context(kernel: &'static Kernel<Self>) {
        ACTIVE.store(kernel as *const _ as *mut _, Ordering::Release);
        set_interrupt_priorities();

        if register::control::read().spsel() == register::control::Spsel::Psp {
            return;
        }

        // Thread mode carries on at the same address on PSP; handlers move
        // to their own stack.
        let handler_top = HANDLER_STACK.top();
        asm!(
            "mrs {tmp}, msp",
            "msr psp, {tmp}",
            "mrs {tmp}, control",
            "orr {tmp}, {tmp}, #2",
            "msr control, {tmp}",
            "isb",
            "msr msp, {top}",
            tmp = out(reg) _,
            top = in(reg) handler_top,
        );
    }

    fn switch(_kernel: &Kernel<Self>) {
        SCB::set_pendsv();
        cortex_m::asm::dsb();
        cortex_m::asm::isb();
    }

    fn pend_switch(_kernel: &Kernel<Self>) {
        SCB::set_pendsv();
    }

    fn in_interrupt() -> bool {
        SCB::vect_active() != VectActive::ThreadMode
    }

    fn wait_for_interrupt() {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler: performs the actual context switch.
///
/// ## Sequence
/// 1. Push S16–S31 (FPU frame only), then R4–R11 and EXC_RETURN onto PSP
/// 2. Hand the resulting PSP to the kernel, which records it and returns
///    the incoming task's saved PSP (or the same one if nothing changes)
/// 3. Pop R4–R11 and EXC_RETURN, then S16–S31 if EXC_RETURN says so
/// 4. Return from exception; hardware restores the rest
///
/// # Safety
/// Called only by the NVIC. Must not touch R4–R11 before they are saved.
#[cfg(target_abi = "eabihf")]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "tst lr, #0x10",
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "tst lr, #0x10",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr psp, r0",
        "bx lr",
        switch = sym pendsv_switch,
    );
}

/// PendSV exception handler for soft-float targets: no FPU registers.
#[cfg(not(target_abi = "eabihf"))]
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11, lr}}",
        "bl {switch}",
        "ldmia r0!, {{r4-r11, lr}}",
        "msr psp, r0",
        "bx lr",
        switch = sym pendsv_switch,
    );
}

/// Engine bookkeeping, called from PendSV with the outgoing PSP.
/// Returns the PSP to resume.
unsafe extern "C" fn pendsv_switch(sp: *mut u8) -> *mut u8 {
    let kernel = ACTIVE.load(Ordering::Acquire);
    if kernel.is_null() {
        return sp;
    }
    (*kernel).switch_context(sp)
}

/// Fallback for tasks that return (entry is `fn() -> !`, so they can't).
extern "C" fn task_exit() -> ! {
    loop {
        cortex_m::asm::wfi();
    }
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV to the lowest interrupt priority.
///
/// This keeps the context switch from ever nesting inside another handler.
fn set_interrupt_priorities() {
    unsafe {
        // System Handler Priority Register 3 (SHPR3): 0xE000_ED20
        // Bits [23:16] = PendSV priority
        let shpr3: *mut u32 = 0xE000_ED20 as *mut u32;
        let val = ptr::read_volatile(shpr3);
        ptr::write_volatile(shpr3, val | (0xFF << 16));
    }
}

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer to fire at `TICK_HZ` from the processor
/// clock. The kernel itself has no tick; this is for applications that
/// drive periodic wakes from SysTick.
pub fn configure_systick(syst: &mut cortex_m::peripheral::SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}
