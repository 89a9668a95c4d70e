//! Nullable clock — deterministic time for testing.

use std::sync::atomic::{AtomicU64, Ordering};

use loom_types::{Clock, Timestamp};

/// A deterministic clock for testing.
///
/// Time only advances when you tell it to. Thread-safe so it can be shared
/// with a multi-threaded tokio runtime.
pub struct NullClock {
    current: AtomicU64,
}

impl NullClock {
    pub fn new(initial_micros: u64) -> Self {
        Self {
            current: AtomicU64::new(initial_micros),
        }
    }

    /// Advance time by a number of microseconds.
    pub fn advance(&self, micros: u64) {
        self.current.fetch_add(micros, Ordering::SeqCst);
    }

    /// Set the time to a specific value.
    pub fn set(&self, micros: u64) {
        self.current.store(micros, Ordering::SeqCst);
    }
}

impl Clock for NullClock {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_and_set() {
        let clock = NullClock::new(100);
        assert_eq!(clock.now().as_micros(), 100);
        clock.advance(50);
        assert_eq!(clock.now().as_micros(), 150);
        clock.set(7);
        assert_eq!(clock.now().as_micros(), 7);
    }
}
