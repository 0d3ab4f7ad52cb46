//! Clock - Injectable time source for the debounce window
//!
//! The store never reads wall time directly. Production code uses
//! [`SystemClock`]; tests drive a [`ManualClock`] so flushes happen exactly
//! when the test says so.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use global_bus::clock::{Clock, ManualClock};
//!
//! let clock = ManualClock::new();
//! let t0 = clock.now();
//! clock.advance(Duration::from_millis(150));
//! assert_eq!(clock.now() - t0, Duration::from_millis(150));
//! ```

use std::cell::Cell;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Source of "now" for the coalescer.
pub trait Clock {
    fn now(&self) -> Instant;

    /// Whether [`now`](Clock::now) moves on its own.
    ///
    /// Blocking helpers only sleep on clocks that do.
    fn is_realtime(&self) -> bool {
        true
    }
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Manually advanced clock. Clones share the same time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Rc<Cell<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Rc::new(Cell::new(Instant::now())),
        }
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        self.now.set(self.now.get() + by);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.now.get()
    }

    fn is_realtime(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        let start = clock.now();

        other.advance(Duration::from_millis(40));

        assert_eq!(clock.now() - start, Duration::from_millis(40));
        assert!(!clock.is_realtime());
    }

    #[test]
    fn test_system_clock_is_monotonic() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
        assert!(clock.is_realtime());
    }
}
