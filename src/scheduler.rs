//! # Scheduler
//!
//! The explicit scheduler state object: the task table, the attached and
//! idle masks, and the id of the running task. Every mutation here is pure
//! bookkeeping; it is the caller's job ([`Kernel`](crate::kernel::Kernel))
//! to hold a critical section and to hand control to the port when a
//! mutation reports that the running task is no longer the right one.
//!
//! ## Invariants
//!
//! - exactly one slot is `Running`, and it is `running`
//! - `running` is attached and not idle
//! - task 7 is never idle, so the candidate set is never empty
//! - a slot's state agrees with the masks, except that a task made ready
//!   or idle stays `Running` until the engine actually switches it out
//!
//! ## Context switch
//!
//! [`Scheduler::switch_context`] is the bookkeeping half of the engine. The
//! port's switch routine saves the outgoing registers on the outgoing stack,
//! passes the resulting stack pointer in, and resumes whatever stack pointer
//! comes back out.

use crate::config::MAX_TASKS;
use crate::resolver;
use crate::task::{TaskControlBlock, TaskEntry, TaskId, TaskSet, TaskState};

/// Scheduler state. One instance per kernel.
pub struct Scheduler {
    /// Task table, indexed by id.
    pub tasks: [TaskControlBlock; MAX_TASKS],

    /// Task currently holding the CPU.
    pub running: TaskId,

    /// Tasks occupying a slot.
    pub attached: TaskSet,

    /// Attached tasks that are suspended until woken.
    pub idle: TaskSet,

    /// Number of completed context switches.
    pub switch_count: u32,
}

impl Scheduler {
    /// An empty table. Until [`init`](Self::init) is called the running id
    /// is nominal only.
    pub const fn new() -> Self {
        Self {
            tasks: [
                TaskControlBlock::empty(TaskId::TASK0),
                TaskControlBlock::empty(TaskId::TASK1),
                TaskControlBlock::empty(TaskId::TASK2),
                TaskControlBlock::empty(TaskId::TASK3),
                TaskControlBlock::empty(TaskId::TASK4),
                TaskControlBlock::empty(TaskId::TASK5),
                TaskControlBlock::empty(TaskId::TASK6),
                TaskControlBlock::empty(TaskId::TASK7),
            ],
            running: TaskId::IDLE,
            attached: TaskSet::empty(),
            idle: TaskSet::empty(),
            switch_count: 0,
        }
    }

    /// Designate `id` as the context that is already executing.
    pub fn init(&mut self, id: TaskId) {
        debug_assert!(self.attached.is_empty(), "init after attach");
        let tcb = &mut self.tasks[id.index()];
        tcb.reset();
        tcb.state = TaskState::Running;
        tcb.activations = 1;
        self.running = id;
        self.attached = id.set();
        self.idle = TaskSet::empty();
    }

    /// Register a task whose first-entry frame is already built at `frame`.
    ///
    /// The task becomes ready; no reschedule happens here.
    pub fn attach(
        &mut self,
        id: TaskId,
        entry: TaskEntry,
        base: *mut u8,
        size: usize,
        frame: *mut u8,
    ) {
        debug_assert!(id != self.running, "attach over the running task");
        self.tasks[id.index()].attach(entry, base, size, frame);
        self.attached.insert(id.set());
        self.idle.remove(id.set());
    }

    /// Remove a task from the table and from every mask.
    pub fn detach(&mut self, id: TaskId) {
        debug_assert!(id != self.running, "detach of the running task");
        debug_assert!(id != TaskId::IDLE, "task 7 must stay attached");
        self.tasks[id.index()].reset();
        self.attached.remove(id.set());
        self.idle.remove(id.set());
    }

    /// The running task suspends itself. `interest` is recorded but does not
    /// affect scheduling.
    ///
    /// Returns whether a switch is needed. Task 7 cannot idle: for it this
    /// only records the interest and returns `false`.
    pub fn idle_current(&mut self, interest: TaskSet) -> bool {
        let me = self.running;
        self.tasks[me.index()].interest = interest;
        if me != TaskId::IDLE {
            self.idle.insert(me.set());
        }
        self.needs_switch()
    }

    /// Mark every attached task in `mask` idle, except task 7.
    ///
    /// Returns whether a switch is needed.
    pub fn idle_tasks(&mut self, mask: TaskSet) -> bool {
        let newly = mask
            .intersection(self.attached)
            .difference(TaskSet::TASK7)
            .difference(self.idle);
        self.idle.insert(newly);
        for id in newly.ids() {
            if id != self.running {
                self.tasks[id.index()].state = TaskState::Idle;
            }
        }
        self.needs_switch()
    }

    /// Clear the idle bit of every task in `mask`.
    ///
    /// Returns whether a switch is needed.
    pub fn wake(&mut self, mask: TaskSet) -> bool {
        let woken = mask.intersection(self.idle);
        self.idle.remove(woken);
        for id in woken.ids() {
            if id != self.running {
                self.tasks[id.index()].state = TaskState::Ready;
            }
        }
        self.needs_switch()
    }

    /// The task the resolver would run now.
    #[inline]
    pub fn next(&self) -> TaskId {
        resolver::resolve(self.attached, self.idle)
    }

    /// Whether the running task is no longer the resolver's choice.
    #[inline]
    pub fn needs_switch(&self) -> bool {
        self.next() != self.running
    }

    /// Engine bookkeeping: record `sp` as the outgoing task's saved stack
    /// pointer, make the resolver's choice the running task, and return its
    /// saved stack pointer.
    ///
    /// If the running task is still the right one, `sp` comes straight back
    /// and nothing is recorded.
    pub fn switch_context(&mut self, sp: *mut u8) -> *mut u8 {
        let outgoing = self.running;
        let incoming = self.next();
        if incoming == outgoing {
            return sp;
        }
        debug_assert!(self.attached.has(incoming), "switch to unattached {}", incoming);

        let out = &mut self.tasks[outgoing.index()];
        out.stack_pointer = sp;
        out.state = if self.idle.has(outgoing) {
            TaskState::Idle
        } else if self.attached.has(outgoing) {
            TaskState::Ready
        } else {
            TaskState::Unattached
        };

        let inc = &mut self.tasks[incoming.index()];
        inc.state = TaskState::Running;
        inc.activations = inc.activations.wrapping_add(1);

        self.running = incoming;
        self.switch_count = self.switch_count.wrapping_add(1);
        inc.stack_pointer
    }

    /// The running task's control block.
    pub fn current_tcb(&self) -> &TaskControlBlock {
        &self.tasks[self.running.index()]
    }

    /// The control block of slot `id`.
    pub fn tcb(&self, id: TaskId) -> &TaskControlBlock {
        &self.tasks[id.index()]
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------
