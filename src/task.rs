//! Holds the [`Task`] descriptor and the small enums describing its class and
//! state.

// SPDX-License-Identifier: GPL-3.0-or-later

use core::sync::atomic::{AtomicPtr, Ordering};

use crate::stack::Stack;

/// Bytes reserved for each task's stack, idle included. No concrete number
/// survived distillation (see `DESIGN.md`); this is a modest
/// embedded-appropriate default sized to comfortably hold the fabricated
/// initial frame (`crate::port`) plus a few call levels of a typical task.
pub const TASK_STACK_BYTES: usize = 1024;

/// The function signature for a task entry point.
///
/// Tasks run forever (or until they call `Task_Terminate`) and take the
/// 16-bit argument they were created with.
pub type TaskEntryFn = fn(u16);

/// A stable index into the task table. `0` is never a valid id for an
/// application task; the system-call surface uses it to mean "exhausted".
pub type TaskId = u16;

/// Scheduling class of a task. Determines which structure a Ready task lives
/// on and its priority relative to other classes.
///
/// Priority order, highest first: [`TaskClass::System`], [`TaskClass::Periodic`]
/// (only while a release is due), [`TaskClass::RoundRobin`], [`TaskClass::Idle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskClass {
    System,
    Periodic,
    RoundRobin,
    /// The one distinguished idle descriptor. Never appears on a ready queue;
    /// dispatch falls back to it when nothing else is runnable.
    Idle,
}

/// Task life-cycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// On the free list, available for `Create`.
    Dead,
    Ready,
    Running,
    /// Blocked on a service's waiter queue.
    Waiting,
}

/// Which intrusive structure, if any, a descriptor currently believes it is
/// linked into. Checked by [`crate::list`] in debug builds only; see
/// `DESIGN.md` for why this is not load-bearing in release builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Membership {
    None,
    FreeList,
    SystemQueue,
    RoundRobinQueue,
    PeriodicList,
    ServiceWaiters,
}

/// Periodic-only scheduling parameters. Meaningful only while
/// `class == TaskClass::Periodic`; carried unconditionally on every
/// descriptor to keep the descriptor a plain, fixed-layout struct (see
/// `DESIGN.md`).
#[derive(Debug, Clone, Copy, Default)]
pub struct PeriodicParams {
    /// Ticks between releases.
    pub period: u16,
    /// Worst-case execution time, in ticks, for one release.
    pub wcet: u16,
    /// Ticks remaining until the next release becomes due. `<= 0` (i.e. `0`
    /// on this unsigned counter, since it never goes negative here) means the
    /// release is due.
    pub countdown: u16,
    /// The `start` argument the task was created with (ticks until the
    /// first release), kept for diagnostics only.
    pub start: u16,
}

/// *Task control block* — the full state of one task.
///
/// The size and field order are not load-bearing the way they are in the C
/// source this core is descended from (there is no assembler code indexing
/// into this struct directly; the `Port` trait only ever sees `sp`). Field
/// order here favours readability.
pub struct Task {
    pub(crate) class: TaskClass,
    pub(crate) state: TaskState,

    /// This task's own stack. Reserved at construction time; never resized,
    /// never shared, never freed — the pool-allocation discipline from
    /// `SPEC_FULL.md` §3 applies to the stack area exactly as it does to the
    /// descriptor itself.
    pub(crate) stack: Stack<TASK_STACK_BYTES>,

    /// Saved stack pointer. Valid whenever `state != Running` for this task;
    /// while `Running`, the live stack pointer lives in the real hardware
    /// register and this field holds whatever was last recorded here.
    pub(crate) sp: AtomicPtr<u32>,

    /// The 16-bit argument the task was created with, retrieved by
    /// `Task_GetArg`.
    pub(crate) arg: u16,

    pub(crate) periodic: PeriodicParams,

    /// Intrusive links, as table indices. `None` means "not linked".
    pub(crate) prev: Option<TaskId>,
    pub(crate) next: Option<TaskId>,
    pub(crate) membership: Membership,

    /// Where to deposit a published value when this task is woken from
    /// `Service_Subscribe`. Only meaningful while `state == Waiting`.
    ///
    /// # Safety
    /// The pointee must remain valid for as long as the task is on a waiter
    /// queue, which holds because it always points into the subscriber's own
    /// stack frame (a local variable it does not return past until woken).
    pub(crate) wait_slot: Option<*mut u16>,
}

// SAFETY: `Task`s only ever move between being accessed by the one running
// task and the kernel, both of which execute with interrupts disabled while
// touching this state; see `crate::sched`.
unsafe impl Sync for Task {}

impl Task {
    /// A blank, `Dead` descriptor suitable for array initialisation.
    pub(crate) const fn dead() -> Self {
        Task {
            class: TaskClass::Idle,
            state: TaskState::Dead,
            stack: Stack::new(),
            sp: AtomicPtr::new(core::ptr::null_mut()),
            arg: 0,
            periodic: PeriodicParams {
                period: 0,
                wcet: 0,
                countdown: 0,
                start: 0,
            },
            prev: None,
            next: None,
            membership: Membership::None,
            wait_slot: None,
        }
    }

    pub(crate) fn sp(&self) -> *mut u32 {
        self.sp.load(Ordering::Relaxed)
    }

    /// The address one past this task's stack area — where a fabricated or
    /// hardware-saved frame starts being pushed downward from.
    pub(crate) fn stack_top(&self) -> *mut u32 {
        self.stack.top()
    }

    pub(crate) fn set_sp(&mut self, sp: *mut u32) {
        self.sp.store(sp, Ordering::Relaxed);
    }

    pub fn class(&self) -> TaskClass {
        self.class
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn arg(&self) -> u16 {
        self.arg
    }
}

// End of File
