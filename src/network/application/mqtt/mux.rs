//! Readiness multiplexing for the session loop.
//!
//! Each loop iteration blocks exactly once: until the connection is readable
//! or the nearest timer deadline arrives, whichever comes first. The wait is
//! capped so a session with no armed timers still wakes up periodically.

use crate::network::Poll;
use crate::time::{Clock, remaining_ms};

/// Upper bound on a single wait, in milliseconds.
pub const MAX_WAIT_MS: u32 = 5000;

/// Why [`Multiplexer::wait`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Wake {
    /// The connection has bytes (or end-of-stream) to read.
    Readable,
    /// The deadline passed with nothing to read.
    TimedOut,
}

/// Computes the next deadline and performs the bounded wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Multiplexer {
    max_wait_ms: u32,
}

impl Default for Multiplexer {
    fn default() -> Self {
        Self::new(MAX_WAIT_MS)
    }
}

impl Multiplexer {
    /// A multiplexer that never blocks longer than `max_wait_ms`.
    pub const fn new(max_wait_ms: u32) -> Self {
        Self { max_wait_ms }
    }

    /// Earliest of the armed `timers`, no later than `now + max_wait_ms`.
    pub fn deadline(&self, now: u64, timers: &[Option<u64>]) -> u64 {
        let cap = now.saturating_add(u64::from(self.max_wait_ms));
        timers.iter().flatten().copied().fold(cap, u64::min)
    }

    /// Block on `conn` until it is readable or `deadline` passes.
    ///
    /// A deadline already in the past still polls once with a zero timeout so
    /// pending bytes are never starved by overdue timers.
    pub fn wait<C, K>(&self, conn: &mut C, clock: &K, deadline: u64) -> Result<Wake, C::Error>
    where
        C: Poll,
        K: Clock,
    {
        let timeout = remaining_ms(clock.now_ms(), deadline).min(self.max_wait_ms);
        trace!("waiting up to {} ms", timeout);
        match conn.poll_readable(timeout)? {
            crate::network::Readiness::Readable => Ok(Wake::Readable),
            crate::network::Readiness::TimedOut => Ok(Wake::TimedOut),
        }
    }
}
