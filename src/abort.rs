//! The fatal abort path: turns a [`KernelError`] into a blink pattern and
//! drives it forever.

// SPDX-License-Identifier: GPL-3.0-or-later

use crate::error::{BlinkPattern, KernelError};

/// The board collaborator that actually drives an LED. The core only ever
/// decides *what* pattern to show; timing and GPIO access belong to the
/// implementor.
pub trait BlinkSink {
    /// Drives one full cycle of `pattern` — preamble, then `pattern.count`
    /// short blinks, then a pause — and returns. Called in an infinite loop
    /// by [`abort`], so it owns its own timing.
    fn show(&mut self, pattern: BlinkPattern);
}

/// Reports `err` over `defmt` and then blinks its pattern forever. Never
/// returns; this is the only place a `KernelError` is allowed to stop being
/// a `Result` and become final.
pub fn abort(sink: &mut dyn BlinkSink, err: KernelError) -> ! {
    #[cfg(not(test))]
    defmt::error!("kernel abort: {}", defmt::Debug2Format(&err));
    let pattern = err.blink_pattern();
    loop {
        sink.show(pattern);
    }
}

// End of File
