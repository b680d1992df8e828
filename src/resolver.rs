//! # Ready-Set Resolver
//!
//! Pure decision function mapping the attached and idle masks to the task
//! that should hold the CPU.
//!
//! Priority is static and total, ordered by id: task 0 is the highest, task
//! 7 the lowest. The candidate is the lowest-numbered id that is attached
//! and not idle. Ids are distinct bit positions, so there are no ties.

use crate::task::{TaskId, TaskSet};

/// Select the task to run.
///
/// Task 7 is the mandatory fallback: it is always attached and never idle,
/// so it is OR-ed into the candidate set and the result is always a valid
/// slot, even for a table that breaks that contract.
#[inline]
pub const fn resolve(attached: TaskSet, idle: TaskSet) -> TaskId {
    let ready = ready_set(attached, idle).union(TaskSet::TASK7);
    match TaskId::new(ready.bits().trailing_zeros() as u8) {
        Some(id) => id,
        None => TaskId::IDLE,
    }
}

/// The set of tasks that are attached and not idle.
#[inline]
pub const fn ready_set(attached: TaskSet, idle: TaskSet) -> TaskSet {
    attached.difference(idle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowest_id_wins() {
        let attached = TaskSet::TASK2 | TaskSet::TASK5 | TaskSet::TASK6 | TaskSet::TASK7;
        assert_eq!(resolve(attached, TaskSet::empty()), TaskId::TASK2);
        assert_eq!(resolve(attached, TaskSet::TASK2), TaskId::TASK5);
        assert_eq!(resolve(attached, TaskSet::TASK2 | TaskSet::TASK5), TaskId::TASK6);
    }

    #[test]
    fn test_fallback_to_idle_task() {
        let attached = TaskSet::TASK0 | TaskSet::TASK3 | TaskSet::TASK7;
        let idle = TaskSet::TASK0 | TaskSet::TASK3;
        assert_eq!(resolve(attached, idle), TaskId::IDLE);

        // Nothing but task 7.
        assert_eq!(resolve(TaskSet::TASK7, TaskSet::empty()), TaskId::IDLE);
    }

    #[test]
    fn test_unattached_tasks_are_never_candidates() {
        // Task 1 is "idle-cleared" but not attached.
        let attached = TaskSet::TASK4 | TaskSet::TASK7;
        assert_eq!(resolve(attached, TaskSet::empty()), TaskId::TASK4);
    }

    #[test]
    fn test_every_single_ready_task_is_found() {
        for n in 0..8u8 {
            let id = TaskId::new(n).unwrap();
            let attached = id.set() | TaskSet::TASK7;
            assert_eq!(resolve(attached, TaskSet::empty()), id);
        }
    }

    #[test]
    fn test_ready_set() {
        let attached = TaskSet::TASK1 | TaskSet::TASK2 | TaskSet::TASK7;
        assert_eq!(
            ready_set(attached, TaskSet::TASK1 | TaskSet::TASK4),
            TaskSet::TASK2 | TaskSet::TASK7
        );
    }
}
