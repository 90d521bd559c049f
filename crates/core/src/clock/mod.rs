use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};

/// Timestamps and durations are carried as fractional milliseconds.
pub type Millis = f64;

/// Monotonic time source injected into the scheduler.
pub trait Clock: Send {
    fn now_ms(&self) -> Millis;
}

impl<T: Clock + Sync> Clock for Arc<T> {
    fn now_ms(&self) -> Millis {
        (**self).now_ms()
    }
}

/// Wall-clock time measured from construction.
#[derive(Debug, Clone, Copy)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> Millis {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

/// Deterministic clock that only moves when told to.
///
/// Shared through an [`Arc`] so a driver can advance time while a scheduler
/// owns the other handle.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: Millis) -> Self {
        Self {
            bits: AtomicU64::new(start_ms.to_bits()),
        }
    }

    pub fn shared(start_ms: Millis) -> Arc<Self> {
        Arc::new(Self::new(start_ms))
    }

    pub fn set(&self, ms: Millis) {
        self.bits.store(ms.to_bits(), Ordering::SeqCst);
    }

    /// Moves time forward. Negative deltas are ignored to keep the clock
    /// monotonic.
    pub fn advance(&self, delta_ms: Millis) {
        let delta = delta_ms.max(0.0);
        let now = self.now_ms();
        self.set(now + delta);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_and_ignores_rewinds() {
        let clock = ManualClock::new(100.0);
        clock.advance(10.5);
        assert_eq!(clock.now_ms(), 110.5);
        clock.advance(-50.0);
        assert_eq!(clock.now_ms(), 110.5);
        clock.set(5.0);
        assert_eq!(clock.now_ms(), 5.0);
    }

    #[test]
    fn shared_handles_observe_the_same_time() {
        let clock = ManualClock::shared(0.0);
        let other = clock.clone();
        clock.advance(40.0);
        assert_eq!(other.now_ms(), 40.0);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::new();
        let first = clock.now_ms();
        let second = clock.now_ms();
        assert!(first >= 0.0);
        assert!(second >= first);
    }
}
