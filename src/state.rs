//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! owns the connection registry and one `RoomState` per live room. Each room
//! sits behind its own async mutex; every event for that room is handled to
//! completion (store calls and fan-out included) while the mutex is held, so
//! a room's events are serialized while different rooms proceed in parallel.
//!
//! LOCK ORDER
//! ==========
//! user presence -> registry -> rooms map -> room. No path acquires an
//! earlier lock while holding a later one. The registry lock is never held
//! across an await on the store.
//!
//! A user's presence lock is held from the registry update through the
//! online/offline announcements, so a room sees one user's transitions in
//! the order the registry made them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, mpsc};
use tracing::info;
use uuid::Uuid;

use crate::config::Config;
use crate::frame::Outbound;
use crate::rate_limit::CursorRateLimiter;
use crate::services::auth::SessionVerifier;
use crate::services::registry::Registry;
use crate::store::{Card, Store};

// =============================================================================
// ROOM STATE
// =============================================================================

/// One connection subscribed to a room's broadcasts.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub user_id: Uuid,
    pub display_name: String,
    pub tx: mpsc::Sender<Outbound>,
}

/// Result of subscribing a connection to a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Subscription {
    /// The connection was already subscribed; nothing changed.
    Already,
    /// Another connection of the same user is already in the room.
    NewConnection,
    /// First connection of this user in the room.
    UserEntered,
}

/// Result of removing a subscribed connection from a room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribed {
    pub user_id: Uuid,
    pub display_name: String,
    /// No other connection of the user remains in the room.
    pub user_left: bool,
    /// The connection had published a cursor position in the room.
    pub had_cursor: bool,
}

/// Per-room live state.
#[derive(Debug, Default)]
pub struct RoomState {
    /// Subscribed connections: `connection_id` -> subscriber.
    pub subscribers: HashMap<Uuid, Subscriber>,
    /// Card snapshot in creation order. `None` until first hydrated from the store.
    pub board: Option<Vec<Card>>,
    /// Connections with a live cursor in this room.
    pub cursors: HashSet<Uuid>,
}

impl RoomState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &mut self,
        connection_id: Uuid,
        user_id: Uuid,
        display_name: &str,
        tx: mpsc::Sender<Outbound>,
    ) -> Subscription {
        if self.subscribers.contains_key(&connection_id) {
            return Subscription::Already;
        }
        let entered = !self.has_user(user_id);
        self.subscribers
            .insert(connection_id, Subscriber { user_id, display_name: display_name.to_owned(), tx });
        if entered { Subscription::UserEntered } else { Subscription::NewConnection }
    }

    /// Remove a connection. Returns `None` if it was not subscribed.
    pub fn unsubscribe(&mut self, connection_id: Uuid) -> Option<Unsubscribed> {
        let subscriber = self.subscribers.remove(&connection_id)?;
        let had_cursor = self.cursors.remove(&connection_id);
        Some(Unsubscribed {
            user_left: !self.has_user(subscriber.user_id),
            user_id: subscriber.user_id,
            display_name: subscriber.display_name,
            had_cursor,
        })
    }

    #[must_use]
    pub fn has_user(&self, user_id: Uuid) -> bool {
        self.subscribers.values().any(|s| s.user_id == user_id)
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.subscribers.is_empty()
    }
}

#[cfg(test)]
impl RoomState {
    /// Distinct users currently subscribed.
    pub fn users(&self) -> HashSet<Uuid> {
        self.subscribers.values().map(|s| s.user_id).collect()
    }
}

pub type SharedRoom = Arc<Mutex<RoomState>>;

// =============================================================================
// PRESENCE LOCKS
// =============================================================================

/// One async mutex per user with a presence transition in flight.
///
/// Entries are created on demand and removed by the last guard to drop.
#[derive(Clone, Default)]
pub struct PresenceLocks {
    inner: Arc<std::sync::Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl PresenceLocks {
    /// Wait for exclusive use of a user's presence.
    pub async fn lock(&self, user_id: Uuid) -> PresenceGuard {
        let mutex = self.map().entry(user_id).or_default().clone();
        let guard = mutex.lock_owned().await;
        PresenceGuard { locks: self.clone(), user_id, guard: Some(guard) }
    }

    fn map(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Arc<Mutex<()>>>> {
        self.inner.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
impl PresenceLocks {
    pub fn tracked(&self) -> usize {
        self.map().len()
    }
}

pub struct PresenceGuard {
    locks: PresenceLocks,
    user_id: Uuid,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PresenceGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Handles are only cloned under the map lock, so a count of one
        // means nobody is waiting.
        let mut map = self.locks.map();
        if map.get(&self.user_id).is_some_and(|m| Arc::strong_count(m) == 1) {
            map.remove(&self.user_id);
        }
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub verifier: Arc<dyn SessionVerifier>,
    pub registry: Arc<RwLock<Registry>>,
    pub rooms: Arc<RwLock<HashMap<Uuid, SharedRoom>>>,
    pub presence_locks: PresenceLocks,
    pub cursor_limiter: CursorRateLimiter,
    /// Capacity of each connection's outbound queue.
    pub outbound_capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn Store>, verifier: Arc<dyn SessionVerifier>, config: &Config) -> Self {
        Self {
            store,
            verifier,
            registry: Arc::new(RwLock::new(Registry::new())),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            presence_locks: PresenceLocks::default(),
            cursor_limiter: CursorRateLimiter::new(Duration::from_millis(config.cursor_min_interval_ms)),
            outbound_capacity: config.outbound_queue_capacity,
        }
    }

    /// Room handle, creating empty state on first use.
    pub async fn room(&self, room_id: Uuid) -> SharedRoom {
        if let Some(room) = self.existing_room(room_id).await {
            return room;
        }
        let mut rooms = self.rooms.write().await;
        rooms.entry(room_id).or_default().clone()
    }

    /// Room handle only if the room is live.
    pub async fn existing_room(&self, room_id: Uuid) -> Option<SharedRoom> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    /// Give back a room handle and drop the room from memory if nothing uses it.
    pub async fn release_room(&self, room_id: Uuid, room: SharedRoom) {
        drop(room);
        self.evict_if_idle(room_id).await;
    }

    /// Evict a room with no subscribers that no task is holding.
    ///
    /// The map lock blocks new handles from being cloned out, so a strong
    /// count of one means no other task can be using the room.
    pub async fn evict_if_idle(&self, room_id: Uuid) {
        {
            let rooms = self.rooms.read().await;
            let Some(room) = rooms.get(&room_id) else {
                return;
            };
            if Arc::strong_count(room) > 1 || !room.try_lock().is_ok_and(|r| r.is_idle()) {
                return;
            }
        }

        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get(&room_id) else {
            return;
        };
        if Arc::strong_count(room) == 1 && room.try_lock().is_ok_and(|r| r.is_idle()) {
            rooms.remove(&room_id);
            info!(%room_id, "evicted room from memory");
        }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
