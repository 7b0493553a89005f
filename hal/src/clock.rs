//! Monotonic time source with a blocking sleep.
//!
//! Every bounded wait in the driver (connect, stop, flush, DNS) measures
//! elapsed time and yields between polls through this trait, so tests can
//! substitute a virtual clock whose `sleep_ms` simply advances time.

/// Monotonic millisecond clock plus a cooperative sleep.
pub trait Clock {
    /// Milliseconds since an arbitrary epoch (typically boot). Never goes
    /// backwards; wrapping is tolerated by all callers.
    fn uptime_ms(&self) -> u64;

    /// Block (or yield) for at least `ms` milliseconds.
    fn sleep_ms(&self, ms: u32);
}

impl<T: Clock + ?Sized> Clock for &T {
    fn uptime_ms(&self) -> u64 {
        (**self).uptime_ms()
    }

    fn sleep_ms(&self, ms: u32) {
        (**self).sleep_ms(ms)
    }
}
