//! Per-key broadcast rate limiting
//!
//! Movement updates arrive far faster than other players need them while a
//! token is being dragged. The throttle remembers when each key last went out
//! and lets the next one through only once the interval has passed.

use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Entries untouched for this long are dropped by [`BroadcastThrottle::cleanup`]
pub const THROTTLE_ENTRY_LIFETIME: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
pub struct BroadcastThrottle {
    last_broadcast: HashMap<String, Instant>,
}

impl BroadcastThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true and records `now` if `key` may broadcast again.
    pub fn should_broadcast(&mut self, key: &str, min_interval: Duration, now: Instant) -> bool {
        match self.last_broadcast.get(key) {
            Some(last) if now.saturating_duration_since(*last) <= min_interval => false,
            _ => {
                self.last_broadcast.insert(key.to_string(), now);
                true
            }
        }
    }

    /// Records a broadcast that bypassed the throttle.
    pub fn record(&mut self, key: &str, now: Instant) {
        self.last_broadcast.insert(key.to_string(), now);
    }

    /// Drops entries older than `max_age`. Returns how many were removed.
    pub fn cleanup(&mut self, max_age: Duration, now: Instant) -> usize {
        let before = self.last_broadcast.len();
        self.last_broadcast
            .retain(|_, last| now.saturating_duration_since(*last) <= max_age);
        before - self.last_broadcast.len()
    }

    pub fn len(&self) -> usize {
        self.last_broadcast.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_broadcast.is_empty()
    }
}
