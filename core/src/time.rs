// Monotonic time source
//
// GUID seeding, EXT4 timestamps and the virtio completion deadline all read
// time through `Clock` so tests can drive it deterministically.

use core::sync::atomic::{AtomicU64, Ordering};

pub trait Clock {
    /// Milliseconds since an arbitrary, fixed origin. Never decreases.
    fn now_ms(&self) -> u64;
}

/// Software clock: reads return the current value, then advance it by `step`.
///
/// With `step == 0` time only moves through `advance`.
pub struct ManualClock {
    now: AtomicU64,
    step: u64,
}

impl ManualClock {
    pub const fn new(start_ms: u64) -> Self {
        Self::with_step(start_ms, 0)
    }

    pub const fn with_step(start_ms: u64, step: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
            step,
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.fetch_add(self.step, Ordering::SeqCst)
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    fn now_ms(&self) -> u64 {
        (**self).now_ms()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_steps() {
        let clock = ManualClock::with_step(100, 5);
        assert_eq!(clock.now_ms(), 100);
        assert_eq!(clock.now_ms(), 105);
        clock.advance(1000);
        assert_eq!(clock.now_ms(), 1110);
    }
}
