//! In-memory throttle for cursor rebroadcasts.
//!
//! DESIGN
//! ======
//! One timestamp per (connection, room): the last cursor update relayed
//! there. Rooms are throttled independently.
//! An update arriving sooner than `min_interval` after it is dropped, not
//! queued or coalesced. A zero interval disables the check entirely and
//! every update is relayed.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use uuid::Uuid;

#[derive(Clone)]
pub struct CursorRateLimiter {
    inner: Arc<Mutex<HashMap<(Uuid, Uuid), Instant>>>,
    min_interval: Duration,
}

impl CursorRateLimiter {
    #[must_use]
    pub fn new(min_interval: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), min_interval }
    }

    /// Returns `true` if the update may be relayed, and records it.
    #[must_use]
    pub fn check_and_record(&self, connection_id: Uuid, room_id: Uuid) -> bool {
        self.check_and_record_at(connection_id, room_id, Instant::now())
    }

    fn check_and_record_at(&self, connection_id: Uuid, room_id: Uuid, now: Instant) -> bool {
        if self.min_interval.is_zero() {
            return true;
        }

        let mut last_relayed = self
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let key = (connection_id, room_id);
        if let Some(last) = last_relayed.get(&key)
            && now.saturating_duration_since(*last) < self.min_interval
        {
            return false;
        }
        last_relayed.insert(key, now);
        true
    }

    /// Drop tracking for a closed connection in every room.
    pub fn forget(&self, connection_id: Uuid) {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(conn, _), _| *conn != connection_id);
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[path = "rate_limit_test.rs"]
mod tests;
