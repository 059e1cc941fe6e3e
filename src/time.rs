//! Monotonic time source used for every deadline in the crate.
//!
//! Deadlines are absolute millisecond timestamps taken from a [`Clock`]. The
//! clock only has to be monotonic; its epoch is irrelevant.

/// A monotonic millisecond clock with a blocking delay.
///
/// The session calls [`delay_ms`](Clock::delay_ms) only between reconnect
/// attempts; every other wait goes through the transport's readiness poll.
pub trait Clock {
    /// Milliseconds elapsed since an arbitrary, fixed origin.
    fn now_ms(&self) -> u64;

    /// Block the calling thread for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32);
}

/// Milliseconds left until `deadline`, saturating at zero and at `u32::MAX`.
pub fn remaining_ms(now: u64, deadline: u64) -> u32 {
    let left = deadline.saturating_sub(now);
    u32::try_from(left).unwrap_or(u32::MAX)
}

/// Clock backed by [`std::time::Instant`].
#[cfg(feature = "std")]
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: std::time::Instant,
}

#[cfg(feature = "std")]
impl StdClock {
    /// Create a clock whose origin is the moment of the call.
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(feature = "std")]
impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "std")]
impl Clock for StdClock {
    fn now_ms(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    fn delay_ms(&mut self, ms: u32) {
        std::thread::sleep(std::time::Duration::from_millis(u64::from(ms)));
    }
}
