//! [`TaskTable`]: the fixed-capacity array of task descriptors, the free
//! list, and the two ready queues and periodic list that index into it.

// SPDX-License-Identifier: GPL-3.0-or-later

use crate::list::IntrusiveList;
use crate::task::{Membership, Task, TaskClass, TaskId, TaskState};

/// Number of application task slots. The source this core is descended from
/// left this as a board-specific constant; no concrete number survived
/// distillation, so a modest embedded-appropriate default is picked here
/// (see `DESIGN.md`). Raise it if an application needs more concurrent
/// tasks.
pub const MAXPROCESS: usize = 8;

/// Number of service (publish/subscribe) objects the bump allocator can hand
/// out over the life of the program. Same provenance as [`MAXPROCESS`].
pub const MAXSERVICES: usize = 4;

/// The table index permanently reserved for the idle task.
pub(crate) const IDLE_INDEX: TaskId = MAXPROCESS as TaskId;

/// `tasks[0..MAXPROCESS]` are application slots, `tasks[MAXPROCESS]` is idle.
///
/// Public task ids are `index + 1` (`0` means "none"/"exhausted", matching
/// the system-call surface in `SPEC_FULL.md` §6); internally everything
/// indexes the table directly by `TaskId`.
pub(crate) struct TaskTable {
    tasks: [Task; MAXPROCESS + 1],
    pub(crate) free: IntrusiveList,
    pub(crate) system_q: IntrusiveList,
    pub(crate) rr_q: IntrusiveList,
    pub(crate) periodic: IntrusiveList,
}

impl TaskTable {
    /// Builds the table with every application slot Dead and linked onto the
    /// free list in index order, and the idle descriptor parked outside any
    /// structure. This is the single construction path the dead pool goes
    /// through (see `DESIGN.md`); there is no other way to get a descriptor
    /// onto the free list.
    pub(crate) fn new() -> Self {
        let mut table = TaskTable {
            tasks: core::array::from_fn(|_| Task::dead()),
            free: IntrusiveList::new(),
            system_q: IntrusiveList::new(),
            rr_q: IntrusiveList::new(),
            periodic: IntrusiveList::new(),
        };

        table.tasks[IDLE_INDEX as usize].class = TaskClass::Idle;
        table.tasks[IDLE_INDEX as usize].state = TaskState::Running;

        for id in 0..MAXPROCESS as TaskId {
            table.free.enqueue(&mut table.tasks, id, Membership::FreeList);
        }

        table
    }

    pub(crate) fn get(&self, id: TaskId) -> &Task {
        &self.tasks[id as usize]
    }

    pub(crate) fn get_mut(&mut self, id: TaskId) -> &mut Task {
        &mut self.tasks[id as usize]
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut [Task] {
        &mut self.tasks
    }

    pub(crate) fn dequeue_system(&mut self) -> Option<TaskId> {
        self.system_q.dequeue(&mut self.tasks)
    }

    pub(crate) fn dequeue_rr(&mut self) -> Option<TaskId> {
        self.rr_q.dequeue(&mut self.tasks)
    }

    pub(crate) fn idle_id(&self) -> TaskId {
        IDLE_INDEX
    }

    /// The top-of-stack address for `id`'s own, pool-reserved stack area —
    /// where `crate::port` fabricates or finds a saved frame.
    pub(crate) fn stack_top(&self, id: TaskId) -> *mut u32 {
        self.get(id).stack_top()
    }

    /// Converts a public, 1-based task id into a table index. `0` is never
    /// valid input here; callers check that before calling in.
    pub(crate) fn index_of(public_id: u16) -> TaskId {
        debug_assert!(public_id >= 1);
        (public_id - 1) as TaskId
    }

    pub(crate) fn public_id_of(index: TaskId) -> u16 {
        index as u16 + 1
    }

    /// Pulls one descriptor off the free list, or `None` if it's empty.
    pub(crate) fn allocate(&mut self) -> Option<TaskId> {
        self.free.dequeue(&mut self.tasks)
    }

    /// Returns `id` to Dead state and the free list. `id` must not currently
    /// be linked into any other structure.
    pub(crate) fn release(&mut self, id: TaskId) {
        let t = self.get_mut(id);
        t.state = TaskState::Dead;
        t.wait_slot = None;
        self.free.enqueue(&mut self.tasks, id, Membership::FreeList);
    }

    /// Enqueues a Ready task onto the structure matching its class: the
    /// system queue, the RR queue, or (for Periodic) nowhere — Periodic
    /// tasks live permanently on [`Self::periodic`] and are never queued.
    pub(crate) fn enqueue_ready(&mut self, id: TaskId) {
        match self.get(id).class {
            TaskClass::System => self.system_q.enqueue(&mut self.tasks, id, Membership::SystemQueue),
            TaskClass::RoundRobin => self.rr_q.enqueue(&mut self.tasks, id, Membership::RoundRobinQueue),
            TaskClass::Periodic => {}
            TaskClass::Idle => unreachable!("idle is never enqueued"),
        }
    }

    /// As [`Self::enqueue_ready`] but links at the head (LIFO restart, used
    /// by publish-wake and by `TaskInterrupt`).
    pub(crate) fn push_ready_front(&mut self, id: TaskId) {
        match self.get(id).class {
            TaskClass::System => self.system_q.push(&mut self.tasks, id, Membership::SystemQueue),
            TaskClass::RoundRobin => self.rr_q.push(&mut self.tasks, id, Membership::RoundRobinQueue),
            TaskClass::Periodic => {}
            TaskClass::Idle => unreachable!("idle is never enqueued"),
        }
    }

    pub(crate) fn add_periodic(&mut self, id: TaskId) {
        self.periodic.enqueue(&mut self.tasks, id, Membership::PeriodicList);
    }

    pub(crate) fn remove_periodic(&mut self, id: TaskId) {
        self.periodic.remove(&mut self.tasks, id);
    }

    /// Every live periodic task, in list order.
    pub(crate) fn periodic_ids(&self) -> PeriodicIter<'_> {
        PeriodicIter {
            tasks: &self.tasks,
            next: self.periodic.head(),
        }
    }
}

pub(crate) struct PeriodicIter<'a> {
    tasks: &'a [Task],
    next: Option<TaskId>,
}

impl Iterator for PeriodicIter<'_> {
    type Item = TaskId;

    fn next(&mut self) -> Option<TaskId> {
        let id = self.next?;
        self.next = self.tasks[id as usize].next;
        Some(id)
    }
}

// End of File
