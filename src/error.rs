//! The fatal error taxonomy and the abort path that reports it.

// SPDX-License-Identifier: GPL-3.0-or-later

/// Every way this kernel can fail.
///
/// None of these are recovered locally: reaching one always drains into
/// [`crate::abort::abort`], which blinks the variant's code forever and never
/// returns. Internal dispatcher code returns `Result<_, KernelError>` instead
/// of calling the abort path directly, so host-side tests can observe the
/// error instead of aborting the test process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// A periodic task was created with `wcet > period`.
    WcetGreaterThanPeriod,
    /// `Service_Init` was called after `MAXSERVICES` services were handed out.
    MaxServicesReached,
    /// The application called `OS_Abort` directly.
    UserAbort,
    /// `Create` was called with an empty free list.
    TooManyTasks,
    /// A periodic release ran past its WCET without yielding.
    PeriodicOverran,
    /// The request dispatcher saw a request kind it doesn't know how to
    /// handle. Unreachable in correct operation.
    RtosInternal,
    /// Two periodic tasks were simultaneously due for release in the same
    /// tick.
    PeriodicCollision,
    /// A periodic task called `Service_Subscribe`.
    PeriodicSubscribed,
    /// `Service_Publish` found a periodic task on a waiter queue.
    PeriodicFoundSubscribed,
}

impl KernelError {
    /// Whether this error is detected at task-creation time (a "compile-time"
    /// class of error in the source taxonomy) as opposed to while the system
    /// is running.
    const fn is_creation_time(self) -> bool {
        matches!(
            self,
            KernelError::WcetGreaterThanPeriod | KernelError::MaxServicesReached
        )
    }

    /// The 1-based position of this error within its class (creation-time or
    /// run-time). Used directly as a blink count.
    const fn position_in_class(self) -> u32 {
        match self {
            KernelError::WcetGreaterThanPeriod => 1,
            KernelError::MaxServicesReached => 2,
            KernelError::UserAbort => 1,
            KernelError::TooManyTasks => 2,
            KernelError::PeriodicOverran => 3,
            KernelError::RtosInternal => 4,
            KernelError::PeriodicCollision => 5,
            KernelError::PeriodicSubscribed => 6,
            KernelError::PeriodicFoundSubscribed => 7,
        }
    }

    /// The blink pattern for this error: a preamble distinguishing
    /// creation-time errors (long, steady) from run-time errors (short
    /// preamble), followed by `count` short blinks.
    pub const fn blink_pattern(self) -> BlinkPattern {
        BlinkPattern {
            steady_preamble: self.is_creation_time(),
            count: self.position_in_class(),
        }
    }
}

/// A blink signature: a preamble, then `count` blinks, then silence and
/// repeat forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlinkPattern {
    /// `true` for creation-time errors (long steady preamble), `false` for
    /// run-time errors (short preamble).
    pub steady_preamble: bool,
    /// Number of short blinks following the preamble.
    pub count: u32,
}
