//! Absolute handshake deadline on the monotonic clock.

use std::time::{Duration, Instant};

/// Point in time after which the warmup is abandoned.
///
/// Computed once when the warmup starts and never extended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    /// `None` when the timeout is too large to be represented.
    at: Option<Instant>,
}

impl Deadline {
    /// Deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self::after_from(Instant::now(), timeout)
    }

    /// Deadline `timeout` after `start`.
    pub fn after_from(start: Instant, timeout: Duration) -> Self {
        Self {
            at: start.checked_add(timeout),
        }
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Instant::now())
    }

    /// Whether the deadline has passed at `now`.
    pub fn is_expired_at(&self, now: Instant) -> bool {
        self.at.map_or(false, |at| now > at)
    }

    /// Time left before expiry, `None` if the deadline never expires.
    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}
