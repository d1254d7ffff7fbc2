//! [`Rtos`]: the one live [`Kernel`] plus its board collaborators, and the
//! system-call surface every public operation in this crate compiles down
//! to.

// SPDX-License-Identifier: GPL-3.0-or-later

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::ptr::addr_of_mut;
use core::sync::atomic::{AtomicBool, AtomicPtr, Ordering};

use cortex_m::interrupt::free;
use cortex_m::peripheral::SCB;

use crate::abort::{self, BlinkSink};
use crate::error::KernelError;
use crate::port::{CortexMPort, Port};
use crate::sched::Kernel;
use crate::service::ServiceId;
use crate::task::{PeriodicParams, TaskClass, TaskEntryFn};
use crate::timer::TickSource;

static mut RTOS_STORAGE: MaybeUninit<Rtos> = MaybeUninit::uninit();
static RTOS_PTR: AtomicPtr<Rtos> = AtomicPtr::new(core::ptr::null_mut());

/// Set by [`launch`], just before it switches onto the first task's PSP.
/// Guards [`pend_switch`]: a task-create call made between [`init`] and
/// [`launch`] runs on `main()`'s own (MSP) stack, with `PendSV` not yet
/// meaningful to request — there is no task context to save and no PSP to
/// read yet. `launch`'s own dispatch picks up whatever was created in that
/// window without needing a pend.
static LAUNCHED: AtomicBool = AtomicBool::new(false);

/// The live kernel plus the two board collaborators it never touches
/// directly. Built once, by [`init`], at a `'static` address it never moves
/// from afterwards. Not part of the public API: every method is
/// `pub(crate)`, reached only through the system-call wrappers below.
pub(crate) struct Rtos {
    kernel: UnsafeCell<Kernel>,
    tick_source: UnsafeCell<*mut dyn TickSource>,
    blink_sink: UnsafeCell<*mut dyn BlinkSink>,
}

// SAFETY: every access to the cells above happens either inside a
// `cortex_m::interrupt::free` critical section (the syscall wrappers below)
// or from `PendSV`/`SysTick`, which by construction cannot run concurrently
// with a critical section or with each other on a single core.
unsafe impl Sync for Rtos {}

impl Rtos {
    /// Finds the live instance. Panics in debug builds if [`init`] was never
    /// called; in release builds this is simply never reachable before
    /// `init`, since nothing else can run.
    pub(crate) fn get() -> &'static Rtos {
        let ptr = RTOS_PTR.load(Ordering::Acquire);
        debug_assert!(!ptr.is_null(), "rtos::init was never called");
        // SAFETY: only `init` stores into `RTOS_PTR`, and only after fully
        // constructing the `Rtos` at the `'static` address of `RTOS_STORAGE`.
        unsafe { &*ptr }
    }

    pub(crate) fn kernel(&self) -> &mut Kernel {
        // SAFETY: see the `Sync` impl above.
        unsafe { &mut *self.kernel.get() }
    }

    fn tick_source(&self) -> &mut dyn TickSource {
        // SAFETY: see the `Sync` impl above.
        unsafe { &mut *(*self.tick_source.get()) }
    }

    fn blink_sink(&self) -> &mut dyn BlinkSink {
        // SAFETY: see the `Sync` impl above.
        unsafe { &mut *(*self.blink_sink.get()) }
    }

    pub(crate) fn abort(&self, err: KernelError) -> ! {
        abort::abort(self.blink_sink(), err)
    }
}

/// The idle task's body: nothing to do but wait for the next interrupt.
fn idle_entry(_arg: u16) {
    loop {
        cortex_m::asm::wfi();
    }
}

/// Requests that `PendSV` re-evaluate which task should be running. Cheap to
/// call unconditionally once running: if nothing actually changed, dispatch
/// just re-picks the task that was already running. A no-op before
/// [`launch`] — see [`LAUNCHED`].
fn pend_switch() {
    if LAUNCHED.load(Ordering::Relaxed) {
        SCB::set_pendsv();
    }
}

/// Builds the kernel, fabricates idle's frame, and makes the system-call
/// surface below live. Returns normally — call once, from `fn main()`,
/// after configuring the board's tick timer and before any `task_create_*`
/// call, handing this the [`TickSource`]/[`BlinkSink`] implementations the
/// core will drive. Application tasks are created between this call and
/// [`launch`]; idle is the only task that exists when `init` returns.
pub fn init(ms_per_tick: u32, tick_source: &'static mut dyn TickSource, blink_sink: &'static mut dyn BlinkSink) {
    let mut kernel = Kernel::new(ms_per_tick);
    kernel.init_idle(CortexMPort::build_initial_frame, idle_entry);

    let rtos = Rtos {
        kernel: UnsafeCell::new(kernel),
        tick_source: UnsafeCell::new(tick_source as *mut dyn TickSource),
        blink_sink: UnsafeCell::new(blink_sink as *mut dyn BlinkSink),
    };

    // SAFETY: `init` runs once, from `fn main`, before any interrupt that
    // could observe `RTOS_STORAGE`/`RTOS_PTR` is unmasked.
    let ptr: *mut Rtos = unsafe {
        let storage = addr_of_mut!(RTOS_STORAGE);
        (*storage).write(rtos);
        (*storage).as_mut_ptr()
    };
    RTOS_PTR.store(ptr, Ordering::Release);
}

/// Dispatches the first task and jumps into it. Never returns. Call once,
/// from `fn main()`, after [`init`] and after every task the application
/// wants running at boot has been created with `task_create_*`.
pub fn launch() -> ! {
    let rtos = Rtos::get();
    let kernel = rtos.kernel();
    let first = kernel.dispatch().unwrap_or_else(|e| rtos.abort(e));
    let first_sp = kernel.sp_of(first);
    LAUNCHED.store(true, Ordering::Relaxed);

    defmt::info!("starting first task, sp @ {=usize:08x}", first_sp as usize);

    // SAFETY: `first_sp` points at a frame `CortexMPort::build_initial_frame`
    // fabricated in exactly the shape this sequence unstacks (see
    // `DESIGN.md`): the software-saved half (`r4-r11`) immediately below the
    // hardware-shaped half (`r0-r3, r12, lr, pc, xpsr`). Interrupts stay
    // masked for the duration; `cpsie` runs just before handing control to
    // the task, which is the first instruction of its own entry function.
    unsafe {
        core::arch::asm!(
            "cpsid   i",
            "msr     psp, r0",
            "mrs     r1, control",
            "orr     r1, r1, #2",
            "msr     control, r1",
            "isb",
            "ldmia   sp!, {{r4-r11}}",
            "ldmia   sp!, {{r0-r3, r12, r14}}",
            "ldmia   sp!, {{r1, r2}}",
            "cpsie   i",
            "bx      r1",
            in("r0") first_sp,
            options(noreturn),
        )
    }
}

/// `Create System task`.
pub fn task_create_system(entry: TaskEntryFn, arg: u16) -> u16 {
    let rtos = Rtos::get();
    let id = free(|_| {
        rtos.kernel()
            .create_task(TaskClass::System, arg, PeriodicParams::default(), CortexMPort::build_initial_frame, entry)
            .unwrap_or_else(|e| rtos.abort(e))
    });
    pend_switch();
    id
}

/// `Create RR task`.
pub fn task_create_round_robin(entry: TaskEntryFn, arg: u16) -> u16 {
    let rtos = Rtos::get();
    let id = free(|_| {
        rtos.kernel()
            .create_task(TaskClass::RoundRobin, arg, PeriodicParams::default(), CortexMPort::build_initial_frame, entry)
            .unwrap_or_else(|e| rtos.abort(e))
    });
    pend_switch();
    id
}

/// `Create Periodic task`. `start` is the number of ticks until the first
/// release, and doubles as the initial `countdown`.
pub fn task_create_periodic(entry: TaskEntryFn, arg: u16, period: u16, wcet: u16, start: u16) -> u16 {
    let periodic = PeriodicParams {
        period,
        wcet,
        countdown: start,
        start,
    };
    let rtos = Rtos::get();
    let id = free(|_| {
        rtos.kernel()
            .create_task(TaskClass::Periodic, arg, periodic, CortexMPort::build_initial_frame, entry)
            .unwrap_or_else(|e| rtos.abort(e))
    });
    pend_switch();
    id
}

/// `Task_Next`: voluntary yield.
pub fn task_next() {
    let rtos = Rtos::get();
    free(|_| rtos.kernel().yield_current());
    pend_switch();
}

/// `Task_Terminate`. Never returns; the caller's own stack is about to be
/// handed back to the free list.
pub fn task_terminate() -> ! {
    let rtos = Rtos::get();
    free(|_| rtos.kernel().terminate_current());
    pend_switch();
    loop {
        cortex_m::asm::wfi();
    }
}

/// `Task_GetArg`.
pub fn task_get_arg() -> u16 {
    let rtos = Rtos::get();
    free(|_| rtos.kernel().task_get_arg())
}

/// `Now`: elapsed time since boot, in milliseconds.
pub fn now() -> u32 {
    let rtos = Rtos::get();
    free(|_| {
        let subtick = rtos.tick_source().subtick_fraction();
        rtos.kernel().now_ms(subtick)
    })
}

/// `Service_Init`.
pub fn service_init() -> ServiceId {
    let rtos = Rtos::get();
    free(|_| rtos.kernel().service_init().unwrap_or_else(|e| rtos.abort(e)))
}

/// `Service_Subscribe`. Blocks the caller until the next `Service_Publish`.
pub fn service_subscribe(service: ServiceId, slot: *mut u16) {
    let rtos = Rtos::get();
    free(|_| {
        rtos.kernel()
            .service_subscribe(service, slot)
            .unwrap_or_else(|e| rtos.abort(e))
    });
    pend_switch();
}

/// `Service_Publish`. Wakes every waiter; preempts immediately if a System
/// waiter was woken and the publisher itself isn't System.
pub fn service_publish(service: ServiceId, value: u16) {
    let rtos = Rtos::get();
    let woke_system = free(|_| {
        rtos.kernel()
            .service_publish(service, value)
            .unwrap_or_else(|e| rtos.abort(e))
    });
    if woke_system {
        free(|_| rtos.kernel().interrupt_current());
    }
    pend_switch();
}

/// `OS_Abort`: the application gives up deliberately.
pub fn os_abort() -> ! {
    Rtos::get().abort(KernelError::UserAbort)
}

/// Tick interrupt entry point. Stands in for the abstract "one tick
/// elapsed" event from a board's free-running output-compare timer; on this
/// reference port it is the Cortex-M `SysTick` exception, the same vector
/// `cortex-m-rt` dispatches to on the teacher crate this core is descended
/// from.
#[unsafe(no_mangle)]
extern "C" fn SysTick() {
    let rtos = Rtos::get();
    free(|_| {
        if let Err(e) = rtos.kernel().on_tick() {
            rtos.abort(e);
        }
    });
    rtos.tick_source().reprogram_next_deadline();
    pend_switch();
}

// End of File
