//! Presence tracker: room subscriptions and online/offline transitions.
//!
//! DESIGN
//! ======
//! A room's subscriber set is keyed by connection, but announcements are per
//! user: `user:joined` fires when a user's first connection enters a room and
//! `user:left` when the last one leaves. Global transitions come from the
//! registry (first connection / last connection) and are announced to every
//! room the user is a member of. When a disconnect takes the user offline,
//! `presence:offline` replaces the per-room `user:left`.
//!
//! Room join/leave touches only in-memory routing. The persisted membership
//! list is read once at connect and never written here.

use std::collections::HashSet;

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EventError;
use crate::frame::Outbound;
use crate::services::auth::Identity;
use crate::services::broadcast::{self, Delivery};
use crate::services::registry::Session;
use crate::state::{AppState, Subscription};
use crate::store::PresenceStatus;

/// Rooms the user belongs to, cached for the connection's lifetime.
///
/// # Errors
///
/// Returns `Dependency` if the store fails.
pub async fn load_memberships(state: &AppState, user_id: Uuid) -> Result<HashSet<Uuid>, EventError> {
    Ok(state.store.room_memberships(user_id).await?)
}

/// Subscribe a freshly registered connection to every member room.
///
/// When the user just came online, the per-room `user:joined` is left to the
/// `presence:online` announcement that follows.
pub async fn subscribe_memberships(state: &AppState, session: &mut Session, came_online: bool) {
    for room_id in sorted(&session.memberships) {
        subscribe(state, session, room_id, !came_online).await;
    }
}

/// Handle `room:join`. Joining a room already joined is a no-op.
///
/// # Errors
///
/// Returns `NotMember` if the user is not a member of the room.
pub async fn join_room(state: &AppState, session: &mut Session, room_id: Uuid) -> Result<Subscription, EventError> {
    session.authorize(room_id)?;
    let subscription = subscribe(state, session, room_id, true).await;
    if subscription != Subscription::Already {
        info!(connection_id = %session.connection_id, user_id = %session.user_id(), %room_id, ?subscription, "joined room");
    }
    Ok(subscription)
}

/// Handle `room:leave`. Leaving a room not joined is a no-op.
pub async fn leave_room(state: &AppState, session: &mut Session, room_id: Uuid) {
    if session.rooms.remove(&room_id) {
        unsubscribe(state, session.connection_id, room_id, true).await;
        info!(connection_id = %session.connection_id, user_id = %session.user_id(), %room_id, "left room");
    }
}

async fn subscribe(state: &AppState, session: &mut Session, room_id: Uuid, announce: bool) -> Subscription {
    let room = state.room(room_id).await;
    let subscription = {
        let mut room = room.lock().await;
        let subscription =
            room.subscribe(session.connection_id, session.user_id(), session.display_name(), session.tx.clone());
        if announce && subscription == Subscription::UserEntered {
            let event = Outbound::UserJoined {
                room_id,
                user_id: session.user_id(),
                display_name: session.display_name().to_owned(),
            };
            broadcast::deliver(&room, &event, Delivery::Inclusive);
        }
        subscription
    };
    session.rooms.insert(room_id);
    state.release_room(room_id, room).await;
    subscription
}

/// Remove a connection from a room and tell the members who remain.
///
/// Always drops the connection's cursor with `board:cursor:leave`; announces
/// `user:left` only when `announce` is set and no other connection of the
/// user is still in the room.
pub async fn unsubscribe(state: &AppState, connection_id: Uuid, room_id: Uuid, announce: bool) {
    let Some(room) = state.existing_room(room_id).await else {
        return;
    };
    {
        let mut room = room.lock().await;
        if let Some(gone) = room.unsubscribe(connection_id) {
            if gone.had_cursor {
                let event = Outbound::CursorLeave { room_id, connection_id, user_id: gone.user_id };
                broadcast::deliver(&room, &event, Delivery::Inclusive);
            }
            if announce && gone.user_left {
                let event =
                    Outbound::UserLeft { room_id, user_id: gone.user_id, display_name: gone.display_name };
                broadcast::deliver(&room, &event, Delivery::Inclusive);
            }
        }
    }
    state.release_room(room_id, room).await;
}

/// Announce that a user's first connection is up.
pub async fn on_user_online(state: &AppState, identity: &Identity, rooms: &HashSet<Uuid>) {
    info!(user_id = %identity.user_id, "user online");
    persist_presence(state, identity.user_id, PresenceStatus::Online).await;
    for room_id in sorted(rooms) {
        let event = Outbound::PresenceOnline {
            room_id,
            user_id: identity.user_id,
            display_name: identity.display_name.clone(),
        };
        broadcast::broadcast_to_room(state, room_id, &event, Delivery::Inclusive).await;
    }
}

/// Announce that a user's last connection is gone.
pub async fn on_user_offline(state: &AppState, identity: &Identity, rooms: &HashSet<Uuid>) {
    info!(user_id = %identity.user_id, "user offline");
    persist_presence(state, identity.user_id, PresenceStatus::Offline).await;
    for room_id in sorted(rooms) {
        let event = Outbound::PresenceOffline {
            room_id,
            user_id: identity.user_id,
            display_name: identity.display_name.clone(),
        };
        broadcast::broadcast_to_room(state, room_id, &event, Delivery::Inclusive).await;
    }
}

/// Best-effort write of the presence transition; failures are only logged.
async fn persist_presence(state: &AppState, user_id: Uuid, status: PresenceStatus) {
    if let Err(e) = state.store.set_presence(user_id, status).await {
        warn!(error = %e, %user_id, status = status.as_str(), "presence persist failed");
    }
}

pub(crate) fn sorted(rooms: &HashSet<Uuid>) -> Vec<Uuid> {
    let mut rooms: Vec<Uuid> = rooms.iter().copied().collect();
    rooms.sort_unstable();
    rooms
}

#[cfg(test)]
#[path = "presence_test.rs"]
mod tests;
