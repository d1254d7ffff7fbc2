#![cfg_attr(not(test), no_std)]

mod abort;
mod error;
mod list;
mod pool;
mod sched;
mod service;
mod stack;
mod stack_pusher;
mod task;
mod timer;

#[cfg(all(not(test), feature = "arch-cortex-m"))]
mod port;
#[cfg(all(not(test), feature = "arch-cortex-m"))]
mod rtos;

pub use abort::BlinkSink;
pub use error::{BlinkPattern, KernelError};
pub use pool::{MAXPROCESS, MAXSERVICES};
pub use service::ServiceId;
pub use stack::Stack;
pub use task::{PeriodicParams, TaskClass, TaskEntryFn, TaskId, TaskState};
pub use timer::TickSource;

#[cfg(all(not(test), feature = "arch-cortex-m"))]
pub use port::{CortexMPort, Port};
#[cfg(all(not(test), feature = "arch-cortex-m"))]
pub use rtos::{
    init, launch, now, os_abort, service_init, service_publish, service_subscribe, task_create_periodic,
    task_create_round_robin, task_create_system, task_get_arg, task_next, task_terminate,
};

#[cfg(all(not(test), feature = "arch-cortex-m"))]
#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    defmt::println!("PANIC: {}", defmt::Debug2Format(info));
    cortex_m::asm::udf();
}

#[cfg(all(not(test), feature = "arch-cortex-m"))]
#[cortex_m_rt::exception]
unsafe fn HardFault(info: &cortex_m_rt::ExceptionFrame) -> ! {
    defmt::println!("FAULT: {}", defmt::Debug2Format(info));
    cortex_m::asm::udf();
}

#[cfg(all(not(test), feature = "arch-cortex-m"))]
defmt::timestamp!("{=u32:010}", now());
