//! Interrupt handling for batch passes
//!
//! A first interrupt stops dispatching new work: in-flight builds and
//! trials finish or hit their timeout, and every remaining item is
//! recorded as interrupted so the report still covers the whole
//! assignment. A second interrupt exits immediately.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Exit code when a pass was cut short by an interrupt
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared flag raised by the signal handler and polled between jobs
#[derive(Debug, Clone, Default)]
pub struct InterruptFlag {
    raised: Arc<AtomicBool>,
}

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn raise(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }

    /// Install the process signal handler wired to this flag.
    pub fn install(&self) -> Result<(), ctrlc::Error> {
        let flag = self.clone();
        ctrlc::set_handler(move || {
            if flag.is_raised() {
                eprintln!("\nReceived second interrupt, exiting immediately...");
                std::process::exit(EXIT_CODE_INTERRUPTED);
            }
            flag.raise();
            eprintln!("\nReceived interrupt, finishing in-flight work...");
        })
    }
}
