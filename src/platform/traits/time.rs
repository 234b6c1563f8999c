//! Monotonic time source trait
//!
//! Pure-logic modules (collector, dispatcher, watchdog) take timestamps as
//! plain seconds through this trait instead of touching `embassy_time`
//! directly, so they stay host-testable.

/// Monotonic seconds-since-boot source.
pub trait Clock {
    /// Seconds elapsed since boot. Never decreases.
    fn now_secs(&self) -> u32;
}

/// Clock backed by `embassy_time::Instant`.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> u32 {
        embassy_time::Instant::now().as_secs() as u32
    }
}
