//! An intrusive doubly-linked list over [`Task`] descriptors, addressed by
//! table index rather than raw pointer.
//!
//! A raw-pointer intrusive list (as in the C source this core is descended
//! from) would need every task descriptor to be pinned at a `'static`
//! address, which is true here too (the task table is a single static
//! array) — but indices are `Copy`, fit in a `u16`, and need no `unsafe` to
//! hand around, so this port uses them instead. See `DESIGN.md`.
//!
//! The free list, the system queue, the round-robin queue, the periodic
//! list, and every service's waiter queue are all instances of the same
//! [`IntrusiveList`] type; what distinguishes them is which [`Membership`]
//! tag they stamp on a descriptor when it's linked in, checked with
//! `debug_assert!` on every operation.

// SPDX-License-Identifier: GPL-3.0-or-later

use crate::task::{Membership, Task, TaskId};

/// A FIFO/LIFO-capable intrusive list over a shared slice of [`Task`]s.
///
/// `enqueue`/`dequeue` give FIFO behaviour (tail-in, head-out); `push` gives
/// LIFO restart at the head (used by `Service_Publish`'s "push to the head"
/// rule and by `TaskInterrupt`'s "preserve position at the front" rule).
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct IntrusiveList {
    head: Option<TaskId>,
    tail: Option<TaskId>,
}

impl IntrusiveList {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn head(&self) -> Option<TaskId> {
        self.head
    }

    /// Link `id` in at the tail. `id` must not currently be linked into any
    /// structure.
    pub(crate) fn enqueue(&mut self, tasks: &mut [Task], id: TaskId, tag: Membership) {
        debug_assert_eq!(tasks[id as usize].membership, Membership::None);
        tasks[id as usize].prev = self.tail;
        tasks[id as usize].next = None;
        tasks[id as usize].membership = tag;

        if let Some(old_tail) = self.tail {
            tasks[old_tail as usize].next = Some(id);
        } else {
            self.head = Some(id);
        }
        self.tail = Some(id);
    }

    /// Link `id` in at the head. `id` must not currently be linked into any
    /// structure.
    pub(crate) fn push(&mut self, tasks: &mut [Task], id: TaskId, tag: Membership) {
        debug_assert_eq!(tasks[id as usize].membership, Membership::None);
        tasks[id as usize].prev = None;
        tasks[id as usize].next = self.head;
        tasks[id as usize].membership = tag;

        if let Some(old_head) = self.head {
            tasks[old_head as usize].prev = Some(id);
        } else {
            self.tail = Some(id);
        }
        self.head = Some(id);
    }

    /// Unlink and return the head of the list, if any.
    pub(crate) fn dequeue(&mut self, tasks: &mut [Task]) -> Option<TaskId> {
        let id = self.head?;
        self.remove(tasks, id);
        Some(id)
    }

    /// Unlink `id` from wherever it sits in the list. `id` must currently be
    /// linked into this list (checked in debug builds only, per `DESIGN.md`).
    pub(crate) fn remove(&mut self, tasks: &mut [Task], id: TaskId) {
        let (prev, next) = {
            let t = &tasks[id as usize];
            (t.prev, t.next)
        };

        match prev {
            Some(p) => tasks[p as usize].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => tasks[n as usize].prev = prev,
            None => self.tail = prev,
        }

        let t = &mut tasks[id as usize];
        t.prev = None;
        t.next = None;
        t.membership = Membership::None;
    }
}

// End of File
