//! [`Kernel`]: task table + service table + tick bookkeeping, and every
//! operation the system-call surface in `lib.rs` is a thin wrapper around.
//!
//! Every method here is a pure function of kernel state — no register or
//! stack-pointer handling lives in this module, so it runs the same whether
//! it's called from a real `SVC`/`SysTick` trap or from a host-side test.
//! The actual context switch (saving/restoring CPU registers, and the stack
//! fabrication for a brand new task) is the `Port`'s job; see `crate::port`.

// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::KernelError;
use crate::pool::TaskTable;
use crate::service::{Service, ServiceId, ServiceTable};
use crate::task::{PeriodicParams, Task, TaskClass, TaskEntryFn, TaskId, TaskState};
use crate::timer::Ticks;

pub(crate) const MAXSERVICES: usize = crate::pool::MAXSERVICES;

/// Everything the system needs to reach a scheduling decision or service a
/// request, minus any architecture-specific register state.
pub(crate) struct Kernel {
    tasks: TaskTable,
    services: ServiceTable<MAXSERVICES>,
    ticks: Ticks,
    current: TaskId,
    /// Ticks still credited to the periodic release in flight, or `0` if
    /// none is (see `SPEC_FULL.md` §4.3).
    ticks_remaining: u16,
}

impl Kernel {
    pub(crate) fn new(ms_per_tick: u32) -> Self {
        let tasks = TaskTable::new();
        let idle = tasks.idle_id();
        Kernel {
            tasks,
            services: ServiceTable::new(),
            ticks: Ticks::new(ms_per_tick),
            current: idle,
            ticks_remaining: 0,
        }
    }

    pub(crate) fn current_id(&self) -> TaskId {
        self.current
    }

    pub(crate) fn current(&self) -> &Task {
        self.tasks.get(self.current)
    }

    pub(crate) fn task_get_arg(&self) -> u16 {
        self.current().arg()
    }

    pub(crate) fn idle_id(&self) -> TaskId {
        self.tasks.idle_id()
    }

    /// Fabricates and installs the idle descriptor's initial frame. Called
    /// once, from `crate::rtos::init`, before the very first dispatch;
    /// never reached through `create_task` (idle is never created at
    /// runtime).
    pub(crate) fn init_idle(&mut self, build_frame: impl FnOnce(*mut u32, TaskEntryFn, u16) -> *mut u32, entry: TaskEntryFn) {
        let id = self.tasks.idle_id();
        let sp = build_frame(self.tasks.stack_top(id), entry, 0);
        self.tasks.get_mut(id).set_sp(sp);
    }

    /// The saved stack pointer for `id`. Used only by the port layer, after
    /// `dispatch` has chosen `id` as the next task to run.
    pub(crate) fn sp_of(&self, id: TaskId) -> *mut u32 {
        self.tasks.get(id).sp()
    }

    /// Records `sp` as `id`'s saved stack pointer. Used only by the port
    /// layer, to record where a preempted task's context switch left off.
    pub(crate) fn set_sp(&mut self, id: TaskId, sp: *mut u32) {
        self.tasks.get_mut(id).set_sp(sp);
    }

    pub(crate) fn now_ms(&self, subtick_fraction: u8) -> u32 {
        self.ticks.now_ms(subtick_fraction)
    }

    // ---- dispatch -------------------------------------------------------

    /// Chooses the next task to run, in priority order, and marks it
    /// Running. Leaves `self.current` pointing at it.
    ///
    /// If the current task is still Running (i.e. it wasn't demoted by the
    /// request that just ran), it keeps running — this is what lets a
    /// System task that created another System task, say, continue instead
    /// of being starved by its own creation.
    pub(crate) fn dispatch(&mut self) -> Result<TaskId, KernelError> {
        // Idle never gets the "still running, keep it" shortcut below: it has
        // no priority of its own, so every dispatch must re-check whether
        // something better has become ready. Without this, a task created or
        // woken while idle was current would never actually be picked up
        // (idle's `state` stays `Running` until something explicitly demotes
        // it, which nothing does on the "new RR/Periodic task while idle is
        // current" path). See `DESIGN.md`.
        if self.current().class() != TaskClass::Idle && self.current().state() == TaskState::Running {
            return Ok(self.current);
        }

        if let Some(id) = self.tasks.dequeue_system() {
            return self.make_running(id);
        }

        if let Some(id) = self.select_due_periodic()? {
            return self.make_running(id);
        }

        if let Some(id) = self.tasks.dequeue_rr() {
            return self.make_running(id);
        }

        let idle = self.tasks.idle_id();
        self.make_running(idle)
    }

    fn make_running(&mut self, id: TaskId) -> Result<TaskId, KernelError> {
        self.tasks.get_mut(id).state = TaskState::Running;
        self.current = id;
        #[cfg(not(test))]
        defmt::trace!("dispatch -> task {=u16}", crate::pool::TaskTable::public_id_of(id));
        Ok(id)
    }

    /// Finds the unique periodic task whose `countdown` has reached zero,
    /// pops it off the head of the system/RR queues it's never actually on
    /// (it lives on the periodic list, dispatch just has to notice it's
    /// due), and starts its slot accounting. `Err(PeriodicCollision)` if
    /// more than one is due in the same tick.
    fn select_due_periodic(&mut self) -> Result<Option<TaskId>, KernelError> {
        let mut due = None;
        for id in self.tasks.periodic_ids() {
            if self.tasks.get(id).periodic.countdown == 0 {
                if due.is_some() {
                    return Err(KernelError::PeriodicCollision);
                }
                due = Some(id);
            }
        }

        let Some(id) = due else {
            return Ok(None);
        };

        let t = self.tasks.get_mut(id);
        t.periodic.countdown = t.periodic.period;
        if self.ticks_remaining == 0 {
            self.ticks_remaining = t.periodic.wcet;
        }
        Ok(Some(id))
    }

    // ---- request handling -------------------------------------------------

    /// `TimerExpired`: per-tick periodic accounting, WCET overrun check, and
    /// RR preemption. Does not itself pick a new task — call
    /// [`Self::dispatch`] afterwards.
    pub(crate) fn on_tick(&mut self) -> Result<(), KernelError> {
        let current_class = self.current().class();

        if current_class != TaskClass::System && self.ticks_remaining > 0 {
            self.ticks_remaining -= 1;
            if self.ticks_remaining == 0 && current_class == TaskClass::Periodic {
                return Err(KernelError::PeriodicOverran);
            }
        }

        let due_for_decrement: heapless::Vec<TaskId, { crate::pool::MAXPROCESS }> =
            self.tasks.periodic_ids().collect();
        for id in due_for_decrement {
            let countdown = &mut self.tasks.get_mut(id).periodic.countdown;
            if *countdown > 0 {
                *countdown -= 1;
            }
        }

        if current_class == TaskClass::RoundRobin {
            let id = self.current;
            self.tasks.get_mut(id).state = TaskState::Ready;
            self.tasks.enqueue_ready(id);
        }

        self.ticks.advance();
        Ok(())
    }

    /// `TaskNext`: voluntary yield.
    pub(crate) fn yield_current(&mut self) {
        let id = self.current;
        let class = self.tasks.get(id).class();
        self.tasks.get_mut(id).state = TaskState::Ready;
        match class {
            TaskClass::System | TaskClass::RoundRobin => self.tasks.enqueue_ready(id),
            TaskClass::Periodic => self.ticks_remaining = 0,
            TaskClass::Idle => {}
        }
    }

    /// `TaskTerminate`: the current task dies and returns to the free list.
    pub(crate) fn terminate_current(&mut self) {
        let id = self.current;
        if self.tasks.get(id).class() == TaskClass::Periodic {
            self.tasks.remove_periodic(id);
            self.ticks_remaining = 0;
        }
        self.tasks.release(id);
    }

    /// Demotes the current task to Ready (re-enqueueing an RR task at the
    /// tail, or rewinding a Periodic task's slot accounting) to make room
    /// for a higher-priority task that just became runnable. Used by both
    /// `TaskCreate` (new System task while current isn't) and
    /// `TaskInterrupt` (publish woke a System waiter). `at_front` controls
    /// whether the demoted task re-enters its queue at the head (preserving
    /// its place, `TaskInterrupt`) or the tail (`TaskCreate`).
    fn demote_current(&mut self, at_front: bool) {
        let id = self.current;
        let class = self.tasks.get(id).class();
        match class {
            TaskClass::System => {}
            TaskClass::RoundRobin => {
                self.tasks.get_mut(id).state = TaskState::Ready;
                if at_front {
                    self.tasks.push_ready_front(id);
                } else {
                    self.tasks.enqueue_ready(id);
                }
            }
            TaskClass::Periodic => {
                self.tasks.get_mut(id).state = TaskState::Ready;
                let t = self.tasks.get_mut(id);
                t.periodic.countdown = t.periodic.countdown.saturating_add(1);
                self.ticks_remaining = self.ticks_remaining.saturating_add(1);
            }
            TaskClass::Idle => {
                self.tasks.get_mut(id).state = TaskState::Ready;
            }
        }
    }

    /// `TaskInterrupt`: used after a publish wakes a higher-priority waiter.
    /// Preempts the current task unless it is System.
    pub(crate) fn interrupt_current(&mut self) {
        if self.current().class() != TaskClass::System {
            self.demote_current(true);
        }
    }

    /// `TaskCreate`: allocate, validate, fabricate, and enqueue. Returns the
    /// new task's public (1-based) id.
    ///
    /// `build_frame` fabricates the initial stack for the new task, given
    /// that task's own (pool-reserved) stack-top address, and returns its
    /// saved stack pointer; kept generic over a closure so this module never
    /// names a `Port` type.
    pub(crate) fn create_task(
        &mut self,
        class: TaskClass,
        arg: u16,
        periodic: PeriodicParams,
        build_frame: impl FnOnce(*mut u32, TaskEntryFn, u16) -> *mut u32,
        entry: TaskEntryFn,
    ) -> Result<u16, KernelError> {
        if class == TaskClass::Periodic && periodic.wcet > periodic.period {
            return Err(KernelError::WcetGreaterThanPeriod);
        }

        let id = self.tasks.allocate().ok_or(KernelError::TooManyTasks)?;

        let sp = build_frame(self.tasks.stack_top(id), entry, arg);
        let t = self.tasks.get_mut(id);
        t.class = class;
        t.state = TaskState::Ready;
        t.arg = arg;
        t.periodic = periodic;
        t.set_sp(sp);

        match class {
            TaskClass::Periodic => self.tasks.add_periodic(id),
            TaskClass::System | TaskClass::RoundRobin => self.tasks.enqueue_ready(id),
            TaskClass::Idle => unreachable!("idle is never created at runtime"),
        }

        let immediate_start = class != TaskClass::Periodic || periodic.start == 0;
        let current_class = self.current().class();
        if class == TaskClass::System && current_class != TaskClass::System {
            self.demote_current(false);
        } else if current_class == TaskClass::RoundRobin && class == TaskClass::Periodic && immediate_start {
            self.demote_current(false);
        }

        #[cfg(not(test))]
        defmt::debug!(
            "created task {=u16} (class {=u8})",
            crate::pool::TaskTable::public_id_of(id),
            class as u8
        );

        Ok(crate::pool::TaskTable::public_id_of(id))
    }

    // ---- services ---------------------------------------------------------

    pub(crate) fn service_init(&mut self) -> Result<ServiceId, KernelError> {
        self.services.init()
    }

    /// `Service_Subscribe`. Blocks the current task; the caller must treat
    /// this exactly like [`Self::yield_current`] followed by a dispatch to
    /// someone else (the current task will not run again until published
    /// to).
    pub(crate) fn service_subscribe(&mut self, service: ServiceId, slot: *mut u16) -> Result<(), KernelError> {
        if self.current().class() == TaskClass::Periodic {
            return Err(KernelError::PeriodicSubscribed);
        }

        let id = self.current;
        self.tasks.get_mut(id).state = TaskState::Waiting;
        self.tasks.get_mut(id).wait_slot = Some(slot);
        let svc = self.services.get_mut(service);
        svc.add_waiter(self.tasks.tasks_mut(), id);
        Ok(())
    }

    /// `Service_Publish`. Wakes every waiter, LIFO-restarted at the head of
    /// its class's ready queue. Returns whether the caller should now raise
    /// `TaskInterrupt` (a System waiter was woken and the publisher itself
    /// isn't System).
    pub(crate) fn service_publish(&mut self, service: ServiceId, value: u16) -> Result<bool, KernelError> {
        let woke_system = {
            let svc = self.services.get_mut(service);
            let mut woke_system = false;
            let mut drained = heapless_ids::Ids::new();
            for id in svc.drain(self.tasks.tasks_mut()) {
                drained.push(id);
            }
            for id in drained {
                let class = self.tasks.get(id).class();
                if class == TaskClass::Periodic {
                    return Err(KernelError::PeriodicFoundSubscribed);
                }
                if let Some(slot) = self.tasks.get(id).wait_slot {
                    // SAFETY: the slot was supplied by `Service_Subscribe` and
                    // points into the subscriber's own, still-live stack
                    // frame; see `Task::wait_slot`.
                    unsafe { *slot = value };
                }
                self.tasks.get_mut(id).wait_slot = None;
                self.tasks.get_mut(id).state = TaskState::Ready;
                self.tasks.push_ready_front(id);
                if class == TaskClass::System {
                    woke_system = true;
                }
            }
            woke_system
        };

        Ok(woke_system && self.current().class() != TaskClass::System)
    }
}

/// A tiny fixed-capacity id buffer, used only to collect the handful of
/// periodic tasks or service waiters touched in one kernel entry without
/// needing an allocator. Not a general-purpose collection: capacity matches
/// `MAXPROCESS`.
mod heapless_ids {
    use crate::pool::MAXPROCESS;
    use crate::task::TaskId;

    pub(crate) struct Ids {
        buf: [TaskId; MAXPROCESS],
        len: usize,
    }

    impl Ids {
        pub(crate) fn new() -> Self {
            Ids {
                buf: [0; MAXPROCESS],
                len: 0,
            }
        }

        pub(crate) fn push(&mut self, id: TaskId) {
            self.buf[self.len] = id;
            self.len += 1;
        }
    }

    impl IntoIterator for Ids {
        type Item = TaskId;
        type IntoIter = core::iter::Take<core::array::IntoIter<TaskId, MAXPROCESS>>;

        fn into_iter(self) -> Self::IntoIter {
            self.buf.into_iter().take(self.len)
        }
    }

    impl FromIterator<TaskId> for Ids {
        fn from_iter<I: IntoIterator<Item = TaskId>>(iter: I) -> Self {
            let mut ids = Ids::new();
            for id in iter {
                ids.push(id);
            }
            ids
        }
    }
}

/// Exercises the scheduler/service logic against a host `std`, with no
/// hardware, no `Port`, and no real stack frames — `dummy`/`no_frame` stand
/// in for the parts only `crate::port` knows how to do.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskClass;

    fn dummy(_arg: u16) {}

    fn no_frame(stack_top: *mut u32, _entry: TaskEntryFn, _arg: u16) -> *mut u32 {
        stack_top
    }

    fn new_kernel() -> Kernel {
        Kernel::new(1)
    }

    fn create(kernel: &mut Kernel, class: TaskClass, periodic: PeriodicParams) -> u16 {
        kernel
            .create_task(class, 0, periodic, no_frame, dummy)
            .expect("create should succeed")
    }

    // Scenario 1: two RR tasks alternate A B A B A B over six ticks.
    #[test]
    fn round_robin_alternates() {
        let mut kernel = new_kernel();
        let a = create(&mut kernel, TaskClass::RoundRobin, PeriodicParams::default());
        let b = create(&mut kernel, TaskClass::RoundRobin, PeriodicParams::default());

        kernel.dispatch().unwrap();

        let mut seen = heapless::Vec::<u16, 6>::new();
        for _ in 0..6 {
            seen.push(TaskTable::public_id_of(kernel.current_id())).unwrap();
            kernel.on_tick().unwrap();
            kernel.dispatch().unwrap();
        }
        assert_eq!(seen.as_slice(), [a, b, a, b, a, b]);
    }

    // Scenario 2: a System task created while RR is running preempts it
    // immediately; RR resumes once System yields.
    #[test]
    fn system_preempts_round_robin_then_yields_back() {
        let mut kernel = new_kernel();
        let a = create(&mut kernel, TaskClass::RoundRobin, PeriodicParams::default());
        kernel.dispatch().unwrap();
        assert_eq!(kernel.current_id(), TaskTable::index_of(a));

        let sys = create(&mut kernel, TaskClass::System, PeriodicParams::default());
        let next = kernel.dispatch().unwrap();
        assert_eq!(next, TaskTable::index_of(sys));

        kernel.yield_current();
        let next = kernel.dispatch().unwrap();
        assert_eq!(next, TaskTable::index_of(a));
    }

    // Scenario 3: a periodic release that doesn't yield within its WCET
    // overruns on the tick its budget reaches zero.
    #[test]
    fn periodic_overruns_past_wcet() {
        let mut kernel = new_kernel();
        let periodic = PeriodicParams {
            period: 10,
            wcet: 2,
            countdown: 0,
            start: 0,
        };
        create(&mut kernel, TaskClass::Periodic, periodic);
        kernel.dispatch().unwrap();

        kernel.on_tick().expect("first tick is within budget");
        assert_eq!(kernel.on_tick(), Err(KernelError::PeriodicOverran));
    }

    // Scenario 4: two periodics simultaneously due in the same tick collide.
    #[test]
    fn two_periodics_due_on_the_same_tick_collide() {
        let mut kernel = new_kernel();
        let periodic = PeriodicParams {
            period: 10,
            wcet: 1,
            countdown: 5,
            start: 5,
        };
        create(&mut kernel, TaskClass::Periodic, periodic);
        create(&mut kernel, TaskClass::Periodic, periodic);

        for _ in 0..5 {
            kernel.on_tick().unwrap();
        }
        assert_eq!(kernel.dispatch(), Err(KernelError::PeriodicCollision));
    }

    // Scenario 5: publishing wakes every waiter with the value, and a System
    // waiter takes priority over its non-System publisher.
    #[test]
    fn publish_wakes_subscribers_and_system_takes_priority() {
        let mut kernel = new_kernel();
        let sys = create(&mut kernel, TaskClass::System, PeriodicParams::default());
        let r = create(&mut kernel, TaskClass::RoundRobin, PeriodicParams::default());
        let publisher = create(&mut kernel, TaskClass::RoundRobin, PeriodicParams::default());
        let svc = kernel.service_init().unwrap();

        let mut s_slot: u16 = 0;
        let mut r_slot: u16 = 0;

        kernel.current = TaskTable::index_of(sys);
        kernel.service_subscribe(svc, &mut s_slot as *mut u16).unwrap();

        kernel.current = TaskTable::index_of(r);
        kernel.service_subscribe(svc, &mut r_slot as *mut u16).unwrap();

        kernel.current = TaskTable::index_of(publisher);
        let should_interrupt = kernel.service_publish(svc, 7).unwrap();
        assert!(should_interrupt, "a non-System publisher must be interrupted when it wakes a System waiter");

        assert_eq!(s_slot, 7);
        assert_eq!(r_slot, 7);
        assert_eq!(kernel.tasks.get(TaskTable::index_of(sys)).state(), TaskState::Ready);
        assert_eq!(kernel.tasks.get(TaskTable::index_of(r)).state(), TaskState::Ready);

        kernel.interrupt_current();
        let next = kernel.dispatch().unwrap();
        assert_eq!(next, TaskTable::index_of(sys), "System priority wins dispatch after the interrupt");
    }

    // Scenario 6: a periodic task creating another task and yielding within
    // its WCET never overruns.
    #[test]
    fn create_from_periodic_release_is_safe() {
        let mut kernel = new_kernel();
        let periodic = PeriodicParams {
            period: 10,
            wcet: 3,
            countdown: 0,
            start: 0,
        };
        let p = create(&mut kernel, TaskClass::Periodic, periodic);
        kernel.dispatch().unwrap();
        assert_eq!(kernel.current_id(), TaskTable::index_of(p));

        kernel
            .create_task(TaskClass::RoundRobin, 0, PeriodicParams::default(), no_frame, dummy)
            .unwrap();
        assert_eq!(kernel.current_id(), TaskTable::index_of(p), "RR creation must not preempt a running Periodic");

        kernel.on_tick().expect("well within WCET");
        kernel.yield_current();
    }

    #[test]
    fn terminate_returns_descriptor_to_free_list() {
        let mut kernel = new_kernel();
        let mut ids = heapless::Vec::<u16, { crate::pool::MAXPROCESS }>::new();
        for _ in 0..crate::pool::MAXPROCESS {
            ids.push(create(&mut kernel, TaskClass::RoundRobin, PeriodicParams::default())).unwrap();
        }
        assert_eq!(
            kernel.create_task(TaskClass::RoundRobin, 0, PeriodicParams::default(), no_frame, dummy),
            Err(KernelError::TooManyTasks)
        );

        kernel.current = TaskTable::index_of(ids[0]);
        kernel.terminate_current();

        assert!(
            kernel
                .create_task(TaskClass::RoundRobin, 0, PeriodicParams::default(), no_frame, dummy)
                .is_ok(),
            "the freed slot must be available for reuse"
        );
    }

    #[test]
    fn yield_by_sole_ready_task_returns_to_itself() {
        let mut kernel = new_kernel();
        let a = create(&mut kernel, TaskClass::RoundRobin, PeriodicParams::default());
        kernel.dispatch().unwrap();
        assert_eq!(kernel.current_id(), TaskTable::index_of(a));

        kernel.yield_current();
        let next = kernel.dispatch().unwrap();
        assert_eq!(next, TaskTable::index_of(a));
    }

    #[test]
    fn periodic_task_cannot_subscribe() {
        let mut kernel = new_kernel();
        let periodic = PeriodicParams {
            period: 10,
            wcet: 1,
            countdown: 0,
            start: 0,
        };
        let p = create(&mut kernel, TaskClass::Periodic, periodic);
        kernel.current = TaskTable::index_of(p);

        let svc = kernel.service_init().unwrap();
        let mut slot: u16 = 0;
        assert_eq!(
            kernel.service_subscribe(svc, &mut slot as *mut u16),
            Err(KernelError::PeriodicSubscribed)
        );
    }

    #[test]
    fn service_init_exhausts_after_maxservices() {
        let mut kernel = new_kernel();
        for _ in 0..MAXSERVICES {
            kernel.service_init().unwrap();
        }
        assert_eq!(kernel.service_init(), Err(KernelError::MaxServicesReached));
    }

    #[test]
    fn periodic_create_rejects_wcet_greater_than_period() {
        let mut kernel = new_kernel();
        let periodic = PeriodicParams {
            period: 1,
            wcet: 2,
            countdown: 0,
            start: 0,
        };
        assert_eq!(
            kernel.create_task(TaskClass::Periodic, 0, periodic, no_frame, dummy),
            Err(KernelError::WcetGreaterThanPeriod)
        );
    }
}

// End of File
