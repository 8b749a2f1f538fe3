//! Millisecond time source consumed by period comparisons and protocol timers.
//!
//! Values wrap around after `u32::MAX` ms; every comparison in the crate uses
//! `wrapping_sub`.
use embassy_time::Instant;

/// Monotonic millisecond tick.
pub trait MonotonicClock {
    fn now_ms(&self) -> u32;
}

/// Clock backed by the embassy time driver.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmbassyClock;

impl MonotonicClock for EmbassyClock {
    fn now_ms(&self) -> u32 {
        Instant::now().as_millis() as u32
    }
}

/// Milliseconds from `since` to `now`, tolerant to wrap-around.
#[inline]
pub fn elapsed_ms(now: u32, since: u32) -> u32 {
    now.wrapping_sub(since)
}
