//! The [`Port`] trait and the Cortex-M reference implementation: stack-frame
//! fabrication for new tasks, and the `PendSV`-driven context switch itself.
//!
//! The scheduler in `crate::sched` never names a register; everything here
//! is the one place that does.

// SPDX-License-Identifier: GPL-3.0-or-later

use core::arch::naked_asm;

use crate::stack_pusher::StackPusher;
use crate::task::TaskEntryFn;

/// Architecture hook for stack-frame fabrication. The context switch itself
/// (`PendSV`, below) isn't part of this trait — it's a free-standing naked
/// function, the same way `crate`'s teacher keeps it, since a naked
/// `extern "C"` function can't be a trait method.
pub trait Port {
    /// Builds a stack frame for a brand new task, byte-identical to what
    /// [`PendSV`] would have saved had the task just trapped in from its own
    /// entry-point prologue, and returns the saved stack pointer.
    fn build_initial_frame(stack_top: *mut u32, entry: TaskEntryFn, arg: u16) -> *mut u32;
}

/// The reference port for Armv7-M/Armv8-M without an FPU.
pub struct CortexMPort;

impl Port for CortexMPort {
    fn build_initial_frame(stack_top: *mut u32, entry: TaskEntryFn, arg: u16) -> *mut u32 {
        // SAFETY: `stack_top` is the top of a reserved, `TASK_STACK_BYTES`-long
        // area (`crate::task::Task::stack_top`), comfortably larger than the
        // sixteen words pushed below.
        let mut pusher = unsafe { StackPusher::new(stack_top) };

        // Hardware-shaped half: what a genuine exception entry would have
        // pushed for us, were this task already running.
        pusher.push(1 << 24); // xPSR: Thumb bit only, Armv7-M has no other mode
        pusher.push(entry as usize as u32); // PC: first dispatch returns straight into entry
        pusher.push(task_terminate_trampoline as usize as u32); // LR: if entry ever returns
        pusher.push(0); // R12
        pusher.push(0); // R3
        pusher.push(0); // R2
        pusher.push(0); // R1
        pusher.push(u32::from(arg)); // R0: the task's argument

        // Software-saved half, same order `PendSV` pushes and pops.
        pusher.push(0); // R11
        pusher.push(0); // R10
        pusher.push(0); // R9
        pusher.push(0); // R8
        pusher.push(0); // R7
        pusher.push(0); // R6
        pusher.push(0); // R5
        pusher.push(0); // R4

        pusher.current()
    }
}

/// Where a task lands if its entry function ever returns instead of calling
/// `Task_Terminate` itself.
extern "C" fn task_terminate_trampoline() -> ! {
    crate::rtos::task_terminate();
}

/// Context-switch exception.
///
/// Hardware has already pushed `{r0-r3, r12, lr, pc, xpsr}` onto the
/// outgoing task's PSP (this is a genuine `SVC`/`SysTick`-adjacent trap, not
/// a plain function call); we push the remaining `{r4-r11}` on top — the
/// same software-pushed half the fabricated frame in
/// [`CortexMPort::build_initial_frame`] supplies for a task that's never
/// actually run — hand the old stack pointer to [`switch_tasks`], then pop
/// the incoming task's `{r4-r11}` and return. `EXC_RETURN = 0xFFFFFFFD`
/// (Thread mode, PSP) makes the hardware unstack the rest on the way out.
#[unsafe(no_mangle)]
#[unsafe(naked)]
unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs     r0, psp",
        "stmdb   r0!, {{r4-r11}}",
        "bl      {switch_tasks}",
        "ldmia   r0!, {{r4-r11}}",
        "msr     psp, r0",
        "mov     lr, #0xFFFFFFFD",
        "bx      lr",
        switch_tasks = sym switch_tasks,
    );
}

/// Records `old_sp` against the task that was running, dispatches the next
/// one, and returns its saved stack pointer. Called only from [`PendSV`],
/// with interrupts already effectively serialised by the exception itself.
extern "C" fn switch_tasks(old_sp: *mut u32) -> *mut u32 {
    let rtos = crate::rtos::Rtos::get();
    let kernel = rtos.kernel();
    let current = kernel.current_id();
    kernel.set_sp(current, old_sp);
    match kernel.dispatch() {
        Ok(id) => kernel.sp_of(id),
        Err(e) => rtos.abort(e),
    }
}

// End of File
