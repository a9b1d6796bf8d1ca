//! Messaging pipeline: persisted chat messages and read cursors.
//!
//! Sending checks membership against the store on every message. Read
//! cursors use the membership set cached at connect.

use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EventError;
use crate::frame::Outbound;
use crate::services::broadcast::{self, Delivery};
use crate::services::registry::Session;
use crate::state::AppState;
use crate::store::{Message, MessageKind, NewMessage};

/// Persist a chat message and broadcast it to the whole room, sender included.
///
/// The sender's profile is read before the insert; a failed lookup stores
/// nothing.
///
/// # Errors
///
/// Returns `Validation` for blank content, `NotMember` if the store does not
/// list the sender in the room, or `Dependency` on store failure.
pub async fn send_message(
    state: &AppState,
    session: &Session,
    room_id: Uuid,
    content: String,
    kind: MessageKind,
    metadata: Option<serde_json::Value>,
) -> Result<Message, EventError> {
    if content.trim().is_empty() {
        return Err(EventError::Validation("message content required".into()));
    }
    let user_id = session.user_id();
    if !state.store.is_member(room_id, user_id).await? {
        return Err(EventError::NotMember(room_id));
    }

    let room = state.room(room_id).await;
    let result = {
        let guard = room.lock().await;
        persist(state, session, NewMessage { room_id, user_id, content, kind, metadata })
            .await
            .map(|message| {
                broadcast::deliver(&guard, &Outbound::MessageNew(message.clone()), Delivery::Inclusive);
                message
            })
    };
    state.release_room(room_id, room).await;

    if let Ok(message) = &result {
        info!(%room_id, %user_id, message_id = %message.record.id, kind = kind.as_str(), "message sent");
        if let Err(e) = state.store.touch_room(room_id).await {
            warn!(error = %e, %room_id, "room activity update failed");
        }
    }
    result
}

async fn persist(state: &AppState, session: &Session, new: NewMessage) -> Result<Message, EventError> {
    let profile = state.store.user_profile(new.user_id).await?;
    let record = state.store.insert_message(new).await?;

    let (user_name, user_avatar) = match profile {
        Some(profile) => (profile.name, profile.avatar_url),
        None => (session.display_name().to_owned(), None),
    };
    Ok(Message { record, user_name, user_avatar })
}

/// Move the caller's read cursor for a room. Nothing is broadcast.
///
/// # Errors
///
/// Returns `NotMember`, or `Dependency` if the store write fails.
pub async fn mark_read(state: &AppState, session: &Session, room_id: Uuid) -> Result<(), EventError> {
    session.authorize(room_id)?;
    state.store.mark_read(room_id, session.user_id()).await?;
    Ok(())
}

#[cfg(test)]
#[path = "message_test.rs"]
mod tests;
