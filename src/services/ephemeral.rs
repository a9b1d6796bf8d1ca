//! Ephemeral fan-out: cursor positions and typing indicators.
//!
//! Neither is persisted and the server keeps no typing state. Both go to the
//! room with the sender excluded, and only to rooms that are live; an event
//! for a room nobody is subscribed to reaches nobody and is dropped.

use uuid::Uuid;

use crate::error::EventError;
use crate::frame::Outbound;
use crate::services::broadcast::{self, Delivery};
use crate::services::registry::Session;
use crate::state::AppState;

/// Relay a cursor position to the rest of the room.
///
/// Updates from a connection not subscribed to the room, or inside the
/// configured throttle interval, are dropped silently. A relayed cursor is
/// recorded against the connection; leaving the room clears it with
/// `board:cursor:leave`.
///
/// # Errors
///
/// Returns `NotMember`, or `Validation` for non-finite coordinates.
pub async fn update_cursor(state: &AppState, session: &Session, room_id: Uuid, x: f64, y: f64) -> Result<(), EventError> {
    session.authorize(room_id)?;
    if !(x.is_finite() && y.is_finite()) {
        return Err(EventError::Validation("cursor coordinates must be finite".into()));
    }

    let Some(room) = state.existing_room(room_id).await else {
        return Ok(());
    };
    let mut room = room.lock().await;
    if !room.subscribers.contains_key(&session.connection_id) {
        return Ok(());
    }
    if !state.cursor_limiter.check_and_record(session.connection_id, room_id) {
        return Ok(());
    }
    room.cursors.insert(session.connection_id);
    let event = Outbound::CursorUpdate {
        room_id,
        connection_id: session.connection_id,
        user_id: session.user_id(),
        display_name: session.display_name().to_owned(),
        x,
        y,
    };
    broadcast::deliver(&room, &event, Delivery::Exclusive(session.connection_id));
    Ok(())
}

/// Relay a typing indicator to the rest of the room.
///
/// # Errors
///
/// Returns `NotMember` if the user is not a member of the room.
pub async fn set_typing(state: &AppState, session: &Session, room_id: Uuid, is_typing: bool) -> Result<(), EventError> {
    session.authorize(room_id)?;
    let event = Outbound::UserTyping {
        room_id,
        user_id: session.user_id(),
        display_name: session.display_name().to_owned(),
        is_typing,
    };
    broadcast::broadcast_to_room(state, room_id, &event, Delivery::Exclusive(session.connection_id)).await;
    Ok(())
}

#[cfg(test)]
#[path = "ephemeral_test.rs"]
mod tests;
