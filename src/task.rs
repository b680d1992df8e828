//! # Task Table Types
//!
//! Defines the task model for OctOS. There are exactly eight task slots,
//! identified by their priority: task 0 is the most important, task 7 the
//! least. Task 7 is the mandatory background task the scheduler falls back
//! to when nothing else is ready.
//!
//! A [`TaskSet`] is an 8-bit field where bit `i` stands for task `i`. It is
//! used for the attached and idle masks and as the argument of every wake
//! and idle operation.

use core::cell::UnsafeCell;
use core::fmt;

use bitflags::bitflags;

use crate::config::{IDLE_TASK, MAX_TASKS};

/// The function signature for task entry points.
///
/// Tasks run forever and take no arguments. Enabling interrupts on first
/// entry, if the port leaves them masked, is the task's own business.
pub type TaskEntry = extern "C" fn() -> !;

// ---------------------------------------------------------------------------
// Task identity
// ---------------------------------------------------------------------------

/// Identity of a task slot, which is also its priority (lower is higher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(u8);

impl TaskId {
    pub const TASK0: TaskId = TaskId(0);
    pub const TASK1: TaskId = TaskId(1);
    pub const TASK2: TaskId = TaskId(2);
    pub const TASK3: TaskId = TaskId(3);
    pub const TASK4: TaskId = TaskId(4);
    pub const TASK5: TaskId = TaskId(5);
    pub const TASK6: TaskId = TaskId(6);
    pub const TASK7: TaskId = TaskId(7);

    /// The mandatory lowest-priority fallback task.
    pub const IDLE: TaskId = TaskId(IDLE_TASK);

    /// Returns the task id for slot `n`, or `None` if `n` is not a slot.
    pub const fn new(n: u8) -> Option<TaskId> {
        if (n as usize) < MAX_TASKS {
            Some(TaskId(n))
        } else {
            None
        }
    }

    /// Index into the task table.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// The single-member set containing this task.
    #[inline]
    pub const fn set(self) -> TaskSet {
        TaskSet::from_bits_retain(1 << self.0)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task{}", self.0)
    }
}

impl From<TaskId> for u8 {
    fn from(id: TaskId) -> u8 {
        id.0
    }
}

// ---------------------------------------------------------------------------
// Task sets
// ---------------------------------------------------------------------------

bitflags! {
    /// A set of tasks: bit `i` present means task `i` is a member.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TaskSet: u8 {
        const TASK0 = 0x01;
        const TASK1 = 0x02;
        const TASK2 = 0x04;
        const TASK3 = 0x08;
        const TASK4 = 0x10;
        const TASK5 = 0x20;
        const TASK6 = 0x40;
        const TASK7 = 0x80;
    }
}

impl TaskSet {
    /// Iterate over the member ids, highest priority first.
    pub fn ids(self) -> impl Iterator<Item = TaskId> {
        (0..MAX_TASKS as u8)
            .filter(move |n| self.bits() & (1 << n) != 0)
            .map(TaskId)
    }

    /// Whether `id` is a member.
    #[inline]
    pub const fn has(self, id: TaskId) -> bool {
        self.contains(id.set())
    }
}

impl From<TaskId> for TaskSet {
    fn from(id: TaskId) -> TaskSet {
        id.set()
    }
}

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Scheduling state of a task slot.
///
/// ```text
///              attach()                  resolver picks it
/// ┌────────────┐        ┌─────────┐  ─────────────────────►  ┌─────────┐
/// │ Unattached │ ─────► │  Ready  │                          │ Running │
/// └────────────┘        └─────────┘  ◄─────────────────────  └─────────┘
///       ▲                   ▲   ▲     outranked at a switch       │
///       │ detach()          │   │                                 │ idle()
///       │                   │   └──────────── wake() ──────┐      ▼
///       └───────────────────┴──────────────────────────── ┌──────────┐
///                                                          │   Idle   │
///                                                          └──────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Free slot; not schedulable.
    Unattached,
    /// Attached and eligible to be chosen by the resolver.
    Ready,
    /// Voluntarily suspended until a wake names it.
    Idle,
    /// Currently executing. Exactly one task is in this state.
    Running,
}

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Per-slot record in the task table.
///
/// `stack_pointer` is only meaningful while the task is not running: it is
/// what the engine saved when the task was switched out, or the first-entry
/// frame built by the port at attach time.
#[derive(Debug, Clone, Copy)]
pub struct TaskControlBlock {
    /// Slot identifier (and priority).
    pub id: TaskId,

    /// Current scheduling state.
    pub state: TaskState,

    /// Entry point, invoked on first switch-in. `None` for the task adopted
    /// by `init`, which was already running.
    pub entry: Option<TaskEntry>,

    /// Lowest address of the caller-owned stack region.
    pub stack_base: *mut u8,

    /// Size of the stack region in bytes.
    pub stack_size: usize,

    /// Saved stack pointer.
    pub stack_pointer: *mut u8,

    /// Tasks whose wakes the task declared interest in at its last `idle`.
    pub interest: TaskSet,

    /// Number of times the engine has switched this task in.
    pub activations: u32,
}

// Safety: the raw pointers refer to the task's own caller-owned stack, and
// control blocks are only touched inside critical sections.
unsafe impl Send for TaskControlBlock {}

impl TaskControlBlock {
    /// An unattached slot. Used to initialize the static table.
    pub const fn empty(id: TaskId) -> Self {
        Self {
            id,
            state: TaskState::Unattached,
            entry: None,
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            stack_pointer: core::ptr::null_mut(),
            interest: TaskSet::empty(),
            activations: 0,
        }
    }

    /// Register an entry point and stack. `frame` is the initial stack
    /// pointer, already pointing at a first-entry frame.
    pub fn attach(&mut self, entry: TaskEntry, base: *mut u8, size: usize, frame: *mut u8) {
        self.state = TaskState::Ready;
        self.entry = Some(entry);
        self.stack_base = base;
        self.stack_size = size;
        self.stack_pointer = frame;
        self.interest = TaskSet::empty();
        self.activations = 0;
    }

    /// Return the slot to its unattached state.
    pub fn reset(&mut self) {
        *self = Self::empty(self.id);
    }

    /// Whether the slot currently holds a task.
    #[inline]
    pub fn is_attached(&self) -> bool {
        self.state != TaskState::Unattached
    }
}

// ---------------------------------------------------------------------------
// Stack memory
// ---------------------------------------------------------------------------

/// A caller-owned task stack of `N` bytes, suitable for a `static`.
///
/// The kernel never resizes it or checks it for overflow.
#[repr(C, align(16))]
pub struct Stack<const N: usize> {
    mem: UnsafeCell<[u8; N]>,
}

// Safety: the memory is only ever used as the stack of the one task it is
// attached to; the kernel never hands out references into it.
unsafe impl<const N: usize> Sync for Stack<N> {}

impl<const N: usize> Stack<N> {
    /// A zeroed stack, placed in `.bss` when used in a `static`.
    pub const fn new() -> Self {
        Self {
            mem: UnsafeCell::new([0u8; N]),
        }
    }

    /// Lowest address of the region.
    pub const fn base(&self) -> *mut u8 {
        self.mem.get().cast()
    }

    /// One past the highest address of the region.
    pub const fn top(&self) -> *mut u8 {
        self.base().wrapping_add(N)
    }

    pub const fn size(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for Stack<N> {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
