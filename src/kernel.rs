//! # Kernel
//!
//! Public API of OctOS: task table initialization, the wake/idle surface,
//! and the entry point of the context-switch engine.
//!
//! A [`Kernel`] owns one [`Scheduler`] behind an interrupt-safe mutex and is
//! generic over the [`Port`] that performs the actual stack switch. Kernels
//! are `const`-constructible so each one can live in a `static`; on the
//! Cortex-M target the crate provides the global `KERNEL` and free
//! functions wrapping it.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()                      ← becomes task 6
//!         ├─► octos::init(TASK6)    ← adopt the boot context
//!         ├─► octos::attach(..)     ← task 7 (mandatory), then the others
//!         ├─► platform setup        ← clocks, timers, watchdog
//!         └─► octos::wake(..)       ← first scheduling point
//! ```
//!
//! ## Scheduling points
//!
//! The CPU only changes hands inside [`Kernel::idle`], [`Kernel::wake`] and
//! the bridge calls in [`bridge`](crate::bridge). Each one updates the masks
//! inside a critical section, leaves it, and only then asks the port to
//! switch if the resolver's choice differs from the running task.

use core::cell::RefCell;
use core::marker::PhantomData;

use critical_section::Mutex;

use crate::arch::Port;
use crate::scheduler::Scheduler;
use crate::sync;
use crate::task::{Stack, TaskEntry, TaskId, TaskSet, TaskState};

/// Signature of the engine callback invoked by a port's switch routine.
#[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
pub(crate) type EngineFn = unsafe extern "C" fn(*const (), *mut u8) -> *mut u8;

/// An OctOS kernel instance.
pub struct Kernel<P: Port> {
    state: Mutex<RefCell<Scheduler>>,
    _port: PhantomData<fn() -> P>,
}

impl<P: Port> Kernel<P> {
    /// A kernel with an empty task table.
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(Scheduler::new())),
            _port: PhantomData,
        }
    }

    /// Run `f` on the scheduler state inside a critical section.
    #[inline]
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut Scheduler) -> R) -> R {
        sync::critical_section(|cs| f(&mut self.state.borrow_ref_mut(cs)))
    }

    // -----------------------------------------------------------------------
    // Task table
    // -----------------------------------------------------------------------

    /// Designate the currently executing context as task `id`.
    ///
    /// Must be called exactly once, before any [`attach`](Self::attach).
    pub fn init(&'static self, id: TaskId) {
        self.with(|s| s.init(id));
        // Safety: called once, from the context being adopted.
        unsafe { P::adopt_current_context(self) };
        log::debug!("octos: init, boot context is {}", id);
    }

    /// Register `entry` to run as task `id` on `stack`.
    ///
    /// The task becomes ready; it first runs at the next scheduling point
    /// that selects it. Task 7 must be attached before the first such point.
    pub fn attach<const N: usize>(&self, id: TaskId, entry: TaskEntry, stack: &'static Stack<N>) {
        // Safety: a `'static` stack handed to us is ours from now on.
        unsafe { self.attach_raw(id, entry, stack.base(), N) }
    }

    /// Register `entry` to run as task `id` on `[stack_base, stack_base + stack_size)`.
    ///
    /// # Safety
    /// The region must be writable, stay valid for as long as the task is
    /// attached, not overlap any other task's stack, and be large enough
    /// for `entry`'s deepest call chain plus one saved context. `id` must
    /// not be the running task.
    pub unsafe fn attach_raw(
        &self,
        id: TaskId,
        entry: TaskEntry,
        stack_base: *mut u8,
        stack_size: usize,
    ) {
        debug_assert!(stack_size >= P::MIN_STACK_SIZE, "stack too small for {}", id);
        let frame = P::init_frame(stack_base.add(stack_size), entry);
        self.with(|s| s.attach(id, entry, stack_base, stack_size, frame));
        log::debug!("octos: attach {} ({} byte stack at {:p})", id, stack_size, stack_base);
    }

    /// Remove task `id` from the table and from every mask.
    ///
    /// Only for tasks that are idle or have never run; detaching the running
    /// task, or task 7, is a contract violation.
    pub fn detach(&self, id: TaskId) {
        self.with(|s| s.detach(id));
        log::debug!("octos: detach {}", id);
    }

    // -----------------------------------------------------------------------
    // Wake / idle
    // -----------------------------------------------------------------------

    /// Suspend the calling task until a wake names it.
    ///
    /// `interest` records which tasks' wakes the caller cares about; it is
    /// kept for inspection only. Returns once the resolver has chosen the
    /// caller again. Task context only, interrupts enabled. Task 7 cannot
    /// idle; for it this returns at once.
    pub fn idle(&self, interest: TaskSet) {
        debug_assert!(!P::in_interrupt(), "idle from interrupt context");
        let switch = self.with(|s| s.idle_current(interest));
        log::trace!("octos: idle (interest {:?})", interest);
        if switch {
            P::switch(self);
        }
    }

    /// Make every task in `mask` ready, switching to the highest-priority
    /// one before returning if it outranks the caller.
    ///
    /// Task context only; interrupt handlers use
    /// [`isr_wake`](Self::isr_wake).
    pub fn wake(&self, mask: TaskSet) {
        debug_assert!(!P::in_interrupt(), "wake from interrupt context, use isr_wake");
        let switch = self.with(|s| s.wake(mask));
        log::trace!("octos: wake {:?}", mask);
        if switch {
            P::switch(self);
        }
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// The running task.
    pub fn current_task(&self) -> TaskId {
        self.with(|s| s.current_tcb().id)
    }

    /// Tasks currently idle.
    pub fn idle_set(&self) -> TaskSet {
        self.with(|s| s.idle)
    }

    /// Tasks currently attached.
    pub fn attached_set(&self) -> TaskSet {
        self.with(|s| s.attached)
    }

    pub fn task_state(&self, id: TaskId) -> TaskState {
        self.with(|s| s.tcb(id).state)
    }

    /// The interest mask `id` passed to its most recent `idle`.
    pub fn interest(&self, id: TaskId) -> TaskSet {
        self.with(|s| s.tcb(id).interest)
    }

    /// Number of context switches performed so far.
    pub fn switch_count(&self) -> u32 {
        self.with(|s| s.switch_count)
    }

    // -----------------------------------------------------------------------
    // Engine
    // -----------------------------------------------------------------------

    /// Bookkeeping half of a context switch, called by the port's switch
    /// routine with the outgoing task's registers already on its stack.
    /// Returns the stack pointer to restore from.
    pub(crate) fn switch_context(&self, sp: *mut u8) -> *mut u8 {
        self.with(|s| s.switch_context(sp))
    }
}

impl<P: Port> Default for Kernel<P> {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine callback handed to a port's switch routine. `kernel` is a
/// `*const Kernel<P>`.
///
/// # Safety
/// `kernel` must point to a live `Kernel<P>`.
#[cfg(all(unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
pub(crate) unsafe extern "C" fn engine_entry<P: Port>(kernel: *const (), sp: *mut u8) -> *mut u8 {
    let kernel = &*(kernel as *const Kernel<P>);
    kernel.switch_context(sp)
}

// ---------------------------------------------------------------------------
// Idle task bodies
// ---------------------------------------------------------------------------

/// Busy-waiting body for task 7.
pub extern "C" fn spin() -> ! {
    loop {
        core::hint::spin_loop();
    }
}

/// Sleeping body for task 7: waits for the next interrupt, forever.
pub extern "C" fn rest<P: Port>() -> ! {
    loop {
        P::wait_for_interrupt();
    }
}

// ---------------------------------------------------------------------------
// Target-global kernel
// ---------------------------------------------------------------------------

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub use self::global::*;

#[cfg(all(target_arch = "arm", target_os = "none"))]
mod global {
    use super::Kernel;
    use crate::arch::cortex_m4::CortexM4;
    use crate::task::{Stack, TaskEntry, TaskId, TaskSet};

    /// The firmware's kernel instance.
    pub static KERNEL: Kernel<CortexM4> = Kernel::new();

    /// See [`Kernel::init`].
    pub fn init(id: TaskId) {
        KERNEL.init(id)
    }

    /// See [`Kernel::attach`].
    pub fn attach<const N: usize>(id: TaskId, entry: TaskEntry, stack: &'static Stack<N>) {
        KERNEL.attach(id, entry, stack)
    }

    /// See [`Kernel::attach_raw`].
    ///
    /// # Safety
    /// As for [`Kernel::attach_raw`].
    pub unsafe fn attach_raw(id: TaskId, entry: TaskEntry, stack_base: *mut u8, stack_size: usize) {
        KERNEL.attach_raw(id, entry, stack_base, stack_size)
    }

    /// See [`Kernel::detach`].
    pub fn detach(id: TaskId) {
        KERNEL.detach(id)
    }

    /// See [`Kernel::idle`].
    pub fn idle(interest: TaskSet) {
        KERNEL.idle(interest)
    }

    /// See [`Kernel::wake`].
    pub fn wake(mask: TaskSet) {
        KERNEL.wake(mask)
    }

    /// See [`Kernel::isr_wake`].
    pub fn isr_wake(mask: TaskSet) {
        KERNEL.isr_wake(mask)
    }

    /// See [`Kernel::isr_idle`].
    pub fn isr_idle(mask: TaskSet) {
        KERNEL.isr_idle(mask)
    }

    /// See [`Kernel::current_task`].
    pub fn current_task() -> TaskId {
        KERNEL.current_task()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only, real context switches)
// ---------------------------------------------------------------------------

#[cfg(all(test, unix, any(target_arch = "x86_64", target_arch = "aarch64")))]
mod tests {
    use super::*;
    use crate::arch::hosted::Hosted;
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
    use std::sync::Mutex as StdMutex;

    const STACK: usize = 64 * 1024;

    // --- Lossless save/restore -------------------------------------------

    mod round_trip {
        use super::*;

        pub static K: Kernel<Hosted> = Kernel::new();
        static T2_STACK: Stack<STACK> = Stack::new();
        static T7_STACK: Stack<STACK> = Stack::new();
        pub static RESUMES: AtomicU32 = AtomicU32::new(0);
        pub static MISMATCHES: AtomicU32 = AtomicU32::new(0);

        #[inline(never)]
        fn checksum(v: &[u64; 8], f: f64) -> u64 {
            v.iter().fold(f.to_bits(), |acc, x| acc.rotate_left(7) ^ x)
        }

        pub extern "C" fn task2() -> ! {
            let mut locals = [0u64; 8];
            let mut f = 1.5f64;
            let mut counter = 0u64;
            loop {
                for (i, slot) in locals.iter_mut().enumerate() {
                    *slot = counter.wrapping_mul(31).wrapping_add(i as u64);
                }
                f = f * 1.25 + counter as f64;
                let before = checksum(&locals, f);
                let counter_before = counter;

                K.idle(TaskSet::TASK6);

                if checksum(&locals, f) != before || counter != counter_before {
                    MISMATCHES.fetch_add(1, Ordering::SeqCst);
                }
                counter += 1;
                RESUMES.fetch_add(1, Ordering::SeqCst);
            }
        }

        #[test]
        fn test_state_survives_suspension() {
            K.init(TaskId::TASK6);
            K.attach(TaskId::TASK7, spin, &T7_STACK);
            K.attach(TaskId::TASK2, task2, &T2_STACK);

            // The boot context is switched out and back as well.
            let mut mine = 0xfeed_u64;
            for round in 0..50u32 {
                K.wake(TaskSet::TASK2);
                assert_eq!(K.current_task(), TaskId::TASK6);
                assert_eq!(RESUMES.load(Ordering::SeqCst), round);
                mine = mine.rotate_left(3) ^ round as u64;
            }
            let expected = (0..50u64).fold(0xfeed_u64, |acc, r| acc.rotate_left(3) ^ r);

            assert_eq!(mine, expected);
            assert_eq!(MISMATCHES.load(Ordering::SeqCst), 0);
            assert_eq!(K.interest(TaskId::TASK2), TaskSet::TASK6);
            assert_eq!(K.task_state(TaskId::TASK2), TaskState::Idle);
            // 50 wakes, each one switch in and one switch out.
            assert_eq!(K.switch_count(), 100);
        }
    }

    // --- Priority and idempotence ----------------------------------------

    mod priority {
        use super::*;

        pub static K: Kernel<Hosted> = Kernel::new();
        static T2_STACK: Stack<STACK> = Stack::new();
        static T5_STACK: Stack<STACK> = Stack::new();
        static T7_STACK: Stack<STACK> = Stack::new();
        static ORDER: StdMutex<Vec<TaskId>> = StdMutex::new(Vec::new());

        fn record() {
            ORDER.lock().unwrap().push(K.current_task());
        }

        extern "C" fn task2() -> ! {
            loop {
                record();
                K.idle(TaskSet::empty());
            }
        }

        extern "C" fn task5() -> ! {
            loop {
                record();
                K.idle(TaskSet::empty());
            }
        }

        #[test]
        fn test_lowest_id_runs_first_and_wake_is_idempotent() {
            K.init(TaskId::TASK6);
            K.attach(TaskId::TASK7, rest::<Hosted>, &T7_STACK);
            K.attach(TaskId::TASK5, task5, &T5_STACK);
            K.attach(TaskId::TASK2, task2, &T2_STACK);

            // First scheduling point: both fresh tasks run, 2 before 5.
            K.wake(TaskSet::empty());
            assert_eq!(*ORDER.lock().unwrap(), [TaskId::TASK2, TaskId::TASK5]);
            assert_eq!(K.idle_set(), TaskSet::TASK2 | TaskSet::TASK5);

            ORDER.lock().unwrap().clear();
            K.wake(TaskSet::TASK5 | TaskSet::TASK2);
            assert_eq!(*ORDER.lock().unwrap(), [TaskId::TASK2, TaskId::TASK5]);

            // Applying the same wake again lands in the same state.
            let once = (K.current_task(), K.idle_set(), K.attached_set());
            K.wake(TaskSet::TASK5 | TaskSet::TASK2);
            assert_eq!((K.current_task(), K.idle_set(), K.attached_set()), once);
            assert_eq!(once.0, TaskId::TASK6);

            // Nothing to wake: no switch at all.
            let switches = K.switch_count();
            K.wake(TaskSet::empty());
            assert_eq!(K.switch_count(), switches);
        }
    }

    // --- Fallback to task 7 ----------------------------------------------

    mod fallback {
        use super::*;

        pub static K: Kernel<Hosted> = Kernel::new();
        static T3_STACK: Stack<STACK> = Stack::new();
        static T7_STACK: Stack<STACK> = Stack::new();
        static SEEN_BY_7: StdMutex<Vec<(TaskId, TaskSet)>> = StdMutex::new(Vec::new());
        static IDLE_LOOPS: AtomicU64 = AtomicU64::new(0);

        extern "C" fn task3() -> ! {
            loop {
                K.idle(TaskSet::empty());
            }
        }

        /// Stands in for a timer interrupt arriving while task 7 spins.
        extern "C" fn task7() -> ! {
            loop {
                SEEN_BY_7.lock().unwrap().push((K.current_task(), K.idle_set()));
                IDLE_LOOPS.fetch_add(1, Ordering::SeqCst);
                K.isr_wake(TaskSet::TASK6);
            }
        }

        #[test]
        fn test_task7_runs_when_everything_else_is_idle() {
            K.init(TaskId::TASK6);
            K.attach(TaskId::TASK7, task7, &T7_STACK);
            K.attach(TaskId::TASK3, task3, &T3_STACK);
            K.wake(TaskSet::empty());
            assert_eq!(K.idle_set(), TaskSet::TASK3);

            for _ in 0..10 {
                K.idle(TaskSet::TASK3);
                assert_eq!(K.current_task(), TaskId::TASK6);
            }

            assert_eq!(IDLE_LOOPS.load(Ordering::SeqCst), 10);
            for (running, idle) in SEEN_BY_7.lock().unwrap().iter() {
                assert_eq!(*running, TaskId::IDLE);
                assert_eq!(*idle, TaskSet::TASK3 | TaskSet::TASK6);
            }
            assert_eq!(K.task_state(TaskId::IDLE), TaskState::Ready);
        }
    }

    // --- Periodic wakes over a background task ----------------------------

    mod scenario {
        use super::*;

        pub static K: Kernel<Hosted> = Kernel::new();
        static T2_STACK: Stack<STACK> = Stack::new();
        static T3_STACK: Stack<STACK> = Stack::new();
        static T7_STACK: Stack<STACK> = Stack::new();

        /// (observer, running, idle set) at each observation.
        static LOG: StdMutex<Vec<(TaskId, TaskId, TaskSet)>> = StdMutex::new(Vec::new());

        const T2_ITER: usize = 3;
        const T3_ITER: usize = 5;
        const PERIOD: u32 = 20;
        const ROUNDS: u32 = 10;
        const RESTS: usize = 3;

        fn observe(me: TaskId) {
            LOG.lock().unwrap().push((me, K.current_task(), K.idle_set()));
        }

        extern "C" fn task2() -> ! {
            loop {
                K.idle(TaskSet::TASK2);
                for _ in 0..T2_ITER {
                    observe(TaskId::TASK2);
                }
            }
        }

        extern "C" fn task3() -> ! {
            loop {
                K.idle(TaskSet::TASK3);
                for _ in 0..T3_ITER {
                    observe(TaskId::TASK3);
                }
            }
        }

        /// Background task; each pass stands in for the timer interrupt
        /// firing while the CPU has nothing else to do.
        extern "C" fn task7() -> ! {
            loop {
                observe(TaskId::IDLE);
                K.isr_wake(TaskSet::TASK2 | TaskSet::TASK3 | TaskSet::TASK6);
            }
        }

        #[test]
        fn test_priority_order_holds_under_periodic_wakes() {
            K.init(TaskId::TASK6);
            K.attach(TaskId::TASK7, task7, &T7_STACK);
            K.attach(TaskId::TASK3, task3, &T3_STACK);
            K.attach(TaskId::TASK2, task2, &T2_STACK);

            // Let the tasks initialize; each runs up to its first idle.
            K.wake(TaskSet::TASK2 | TaskSet::TASK3);
            assert_eq!(K.idle_set(), TaskSet::TASK2 | TaskSet::TASK3);
            assert!(LOG.lock().unwrap().is_empty());

            // Task 6 works in the background; a periodic interrupt wakes
            // tasks 2 and 3.
            for tick in 0..ROUNDS * PERIOD {
                observe(TaskId::TASK6);
                if tick % PERIOD == 0 {
                    K.isr_wake(TaskSet::TASK2 | TaskSet::TASK3);
                }
            }

            // Task 6 rests too; only task 7 is left to run.
            for _ in 0..RESTS {
                K.idle(TaskSet::TASK2 | TaskSet::TASK3);
                observe(TaskId::TASK6);
            }

            let log = LOG.lock().unwrap();
            for &(me, running, idle) in log.iter() {
                assert_eq!(me, running);
                assert!(!idle.has(me));
                match u8::from(me) {
                    2 => {}
                    3 => assert!(idle.has(TaskId::TASK2)),
                    6 => assert!(idle.contains(TaskSet::TASK2 | TaskSet::TASK3)),
                    7 => assert!(idle.contains(TaskSet::TASK2 | TaskSet::TASK3 | TaskSet::TASK6)),
                    other => panic!("unexpected observer task{}", other),
                }
            }

            let count = |id| log.iter().filter(|e| e.0 == id).count();
            let wakes = ROUNDS as usize + RESTS;
            assert_eq!(count(TaskId::TASK2), wakes * T2_ITER);
            assert_eq!(count(TaskId::TASK3), wakes * T3_ITER);
            assert_eq!(count(TaskId::IDLE), RESTS);
        }
    }

    // --- Caller contracts ------------------------------------------------

    #[cfg(debug_assertions)]
    mod contracts {
        use super::*;

        pub static K: Kernel<Hosted> = Kernel::new();
        static SMALL_STACK: Stack<64> = Stack::new();

        #[test]
        #[should_panic(expected = "stack too small")]
        fn test_undersized_stack_is_rejected() {
            K.init(TaskId::TASK6);
            assert!(SMALL_STACK.size() < Hosted::MIN_STACK_SIZE);
            unsafe {
                K.attach_raw(TaskId::TASK2, spin, SMALL_STACK.base(), SMALL_STACK.size());
            }
        }
    }

    // --- Detach ----------------------------------------------------------

    mod detach {
        use super::*;

        pub static K: Kernel<Hosted> = Kernel::new();
        static T1_STACK: Stack<STACK> = Stack::new();
        static T7_STACK: Stack<STACK> = Stack::new();
        static RUNS: AtomicU32 = AtomicU32::new(0);

        extern "C" fn task1() -> ! {
            loop {
                RUNS.fetch_add(1, Ordering::SeqCst);
                K.idle(TaskSet::empty());
            }
        }

        #[test]
        fn test_detached_task_is_never_scheduled() {
            K.init(TaskId::TASK6);
            K.attach(TaskId::TASK7, spin, &T7_STACK);
            K.attach(TaskId::TASK1, task1, &T1_STACK);
            K.wake(TaskSet::empty());
            assert_eq!(RUNS.load(Ordering::SeqCst), 1);

            K.detach(TaskId::TASK1);
            assert_eq!(K.attached_set(), TaskSet::TASK6 | TaskSet::TASK7);
            K.wake(TaskSet::TASK1);
            assert_eq!(RUNS.load(Ordering::SeqCst), 1);
            assert_eq!(K.task_state(TaskId::TASK1), TaskState::Unattached);

            // Re-attaching starts the entry again on a fresh frame.
            K.attach(TaskId::TASK1, task1, &T1_STACK);
            K.wake(TaskSet::empty());
            assert_eq!(RUNS.load(Ordering::SeqCst), 2);
        }
    }
}
