//! Monotonic clock and elapsed-time timer
//!
//! The stream engine never sleeps; it only asks "how long since the
//! operation started?". The answer comes from a [`Clock`], so tests and the
//! simulator can drive timeouts with a [`ManualClock`] instead of wall time.

use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

/// Source of monotonic milliseconds
pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin. Never decreases.
    fn now_ms(&self) -> u64;
}

/// Clock backed by [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    /// Create a clock anchored at the current instant
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock
///
/// Clones share the same counter, so a test can keep one handle and give
/// another to the code under test.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    /// Create a clock reading zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward
    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get().saturating_add(ms));
    }

    /// Jump to an absolute reading. Earlier readings are ignored.
    pub fn set(&self, ms: u64) {
        if ms > self.now.get() {
            self.now.set(ms);
        }
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// Elapsed-time measurement against a [`Clock`]
#[derive(Debug, Clone)]
pub struct Timer<C: Clock> {
    clock: C,
    start: u64,
}

impl<C: Clock> Timer<C> {
    /// Create a timer started now
    pub fn new(clock: C) -> Self {
        let start = clock.now_ms();
        Self { clock, start }
    }

    /// Restart from the current reading
    pub fn restart(&mut self) {
        self.start = self.clock.now_ms();
    }

    /// Milliseconds since the last (re)start
    pub fn elapsed_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.start)
    }

    /// Underlying clock
    pub fn clock(&self) -> &C {
        &self.clock
    }
}
