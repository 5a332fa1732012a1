//! Single-flight guard for the reload pipeline.

use std::sync::atomic::{AtomicBool, Ordering};

/// Lets at most one holder in at a time. Contenders are turned away, not
/// queued.
#[derive(Debug, Default)]
pub struct SingleFlightGuard {
    running: AtomicBool,
}

/// Held for the duration of one flight; releases the guard on drop,
/// including during unwinding.
#[derive(Debug)]
pub struct FlightPermit<'a> {
    guard: &'a SingleFlightGuard,
}

impl SingleFlightGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self) -> Option<FlightPermit<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightPermit { guard: self })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl Drop for FlightPermit<'_> {
    fn drop(&mut self) {
        self.guard.running.store(false, Ordering::Release);
    }
}
