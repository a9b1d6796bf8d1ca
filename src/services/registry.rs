//! Connection registry: who is connected, and as whom.
//!
//! ARCHITECTURE
//! ============
//! `Registry` is plain data behind `AppState::registry`: live connections by
//! id plus each user's connection set. A user's presence is derived from the
//! size of that set, so "came online" and "went offline" are decided inside
//! the same write lock that adds or removes the connection. A per-user
//! presence lock spans that decision and its announcements, so concurrent
//! connects and disconnects of one user reach rooms in registry order.
//!
//! LIFECYCLE
//! =========
//! 1. `authenticate` runs before the websocket upgrade; failure creates no state
//! 2. `connect` loads memberships, registers, subscribes to every member room
//! 3. The connection's task owns its `Session` until the socket closes
//! 4. `disconnect` unregisters, unsubscribes, and announces presence

use std::collections::{HashMap, HashSet};

use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::error::EventError;
use crate::frame::Outbound;
use crate::services::auth::{AuthError, Identity};
use crate::services::presence;
use crate::state::AppState;

// =============================================================================
// REGISTRY
// =============================================================================

/// One live transport connection.
#[derive(Debug, Clone)]
pub struct Connection {
    pub user_id: Uuid,
    pub display_name: String,
    pub tx: mpsc::Sender<Outbound>,
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<Uuid, Connection>,
    users: HashMap<Uuid, HashSet<Uuid>>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection. Returns `true` if it is the user's first.
    pub fn register(&mut self, connection_id: Uuid, connection: Connection) -> bool {
        let user_connections = self.users.entry(connection.user_id).or_default();
        let came_online = user_connections.is_empty();
        user_connections.insert(connection_id);
        self.connections.insert(connection_id, connection);
        came_online
    }

    /// Remove a connection. Returns how many connections the user still
    /// holds, or `None` if the connection was never registered.
    pub fn unregister(&mut self, connection_id: Uuid) -> Option<usize> {
        let user_id = self.connections.remove(&connection_id)?.user_id;
        let remaining = match self.users.get_mut(&user_id) {
            Some(user_connections) => {
                user_connections.remove(&connection_id);
                user_connections.len()
            }
            None => 0,
        };
        if remaining == 0 {
            self.users.remove(&user_id);
        }
        Some(remaining)
    }

    #[must_use]
    pub fn get(&self, connection_id: Uuid) -> Option<&Connection> {
        self.connections.get(&connection_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}

#[cfg(test)]
impl Registry {
    pub fn user_connection_count(&self, user_id: Uuid) -> usize {
        self.users.get(&user_id).map_or(0, HashSet::len)
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.user_connection_count(user_id) > 0
    }
}

// =============================================================================
// SESSION
// =============================================================================

/// Per-connection state owned by the connection's task.
#[derive(Debug)]
pub struct Session {
    pub connection_id: Uuid,
    pub identity: Identity,
    /// Rooms the user belonged to at connect time.
    pub memberships: HashSet<Uuid>,
    /// Rooms this connection is currently subscribed to.
    pub rooms: HashSet<Uuid>,
    pub tx: mpsc::Sender<Outbound>,
}

impl Session {
    #[must_use]
    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.identity.display_name
    }

    /// Check the membership cached at connect time.
    ///
    /// # Errors
    ///
    /// Returns `NotMember` if the user was not a member of the room.
    pub fn authorize(&self, room_id: Uuid) -> Result<(), EventError> {
        if self.memberships.contains(&room_id) {
            Ok(())
        } else {
            Err(EventError::NotMember(room_id))
        }
    }

    /// `session:connected` payload for this connection.
    #[must_use]
    pub fn welcome(&self) -> Outbound {
        Outbound::SessionConnected {
            connection_id: self.connection_id,
            user_id: self.user_id(),
            display_name: self.identity.display_name.clone(),
            rooms: presence::sorted(&self.rooms),
        }
    }
}

// =============================================================================
// LIFECYCLE
// =============================================================================

/// Verify a session token.
///
/// # Errors
///
/// Returns `MissingToken` when no token was presented, or the verifier's
/// rejection.
pub async fn authenticate(state: &AppState, token: Option<&str>) -> Result<Identity, AuthError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::MissingToken)?;
    state.verifier.verify(token).await
}

/// Register an authenticated connection and subscribe it to its rooms.
///
/// Memberships are loaded before anything is registered, so a store failure
/// leaves no trace of the connection. Registration and the online
/// announcement run under the user's presence lock.
///
/// # Errors
///
/// Returns `Dependency` if memberships cannot be loaded.
pub async fn connect(state: &AppState, identity: &Identity, tx: mpsc::Sender<Outbound>) -> Result<Session, EventError> {
    let memberships = presence::load_memberships(state, identity.user_id).await?;
    let connection_id = Uuid::new_v4();

    let _presence = state.presence_locks.lock(identity.user_id).await;
    let came_online = {
        let mut registry = state.registry.write().await;
        registry.register(
            connection_id,
            Connection { user_id: identity.user_id, display_name: identity.display_name.clone(), tx: tx.clone() },
        )
    };

    let mut session = Session { connection_id, identity: identity.clone(), memberships, rooms: HashSet::new(), tx };
    info!(%connection_id, user_id = %session.user_id(), rooms = session.memberships.len(), came_online, "connection registered");

    presence::subscribe_memberships(state, &mut session, came_online).await;
    if came_online {
        presence::on_user_online(state, &session.identity, &session.memberships).await;
    }

    Ok(session)
}

/// Tear down a connection: unregister, unsubscribe, announce presence.
///
/// Runs under the user's presence lock, so a reconnect waits until the
/// offline announcement is out.
pub async fn disconnect(state: &AppState, session: &Session) {
    let _presence = state.presence_locks.lock(session.user_id()).await;
    let remaining = state
        .registry
        .write()
        .await
        .unregister(session.connection_id);
    let went_offline = remaining == Some(0);

    for room_id in presence::sorted(&session.rooms) {
        presence::unsubscribe(state, session.connection_id, room_id, !went_offline).await;
    }

    if went_offline {
        presence::on_user_offline(state, &session.identity, &session.memberships).await;
    }
    state.cursor_limiter.forget(session.connection_id);

    info!(
        connection_id = %session.connection_id,
        user_id = %session.user_id(),
        remaining = remaining.unwrap_or(0),
        "connection closed"
    );
}

#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;
