//! Board service: card create/move/resize/delete and snapshots.
//!
//! DESIGN
//! ======
//! A room's cards live in `RoomState::board`, hydrated from the store the
//! first time something needs the full list (snapshot or delete) and kept
//! while the room is live. Every mutation is written through to the store
//! first; memory and fan-out only follow a successful write, so a store
//! failure leaves no trace anywhere.
//!
//! Moves and resizes are last-write-wins and open to any member. Deletes are
//! owner-only.

use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::EventError;
use crate::frame::Outbound;
use crate::services::broadcast::{self, Delivery};
use crate::services::registry::Session;
use crate::state::{AppState, RoomState};
use crate::store::{Card, CardKind};

/// Fields a client supplies to create a card.
#[derive(Debug, Clone, PartialEq)]
pub struct CardDraft {
    pub kind: CardKind,
    pub content: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CardDraft {
    fn validate(&self) -> Result<(), EventError> {
        if self.content.trim().is_empty() {
            return Err(EventError::Validation("card content required".into()));
        }
        validate_point(self.x, self.y)?;
        validate_size(self.width, self.height)
    }
}

// =============================================================================
// MUTATIONS
// =============================================================================

/// Create a card owned by the caller and broadcast it to the whole room.
///
/// # Errors
///
/// Returns `NotMember`, `Validation` for blank content or bad geometry, or
/// `Dependency` if the owner lookup or the store write fails.
pub async fn create_card(
    state: &AppState,
    session: &Session,
    room_id: Uuid,
    draft: CardDraft,
) -> Result<Card, EventError> {
    session.authorize(room_id)?;
    draft.validate()?;

    // Same owner name the store joins in when hydrating.
    let owner_name = match state.store.user_profile(session.user_id()).await? {
        Some(profile) => profile.name,
        None => session.display_name().to_owned(),
    };

    let card = Card {
        id: Uuid::new_v4(),
        room_id,
        owner_user_id: session.user_id(),
        owner_name,
        kind: draft.kind,
        content: draft.content,
        x: draft.x,
        y: draft.y,
        width: draft.width,
        height: draft.height,
        created_at: now_micros(),
    };

    let room = state.room(room_id).await;
    let result = {
        let mut guard = room.lock().await;
        match state.store.insert_card(&card).await {
            Ok(()) => {
                if let Some(board) = guard.board.as_mut() {
                    board.push(card.clone());
                }
                broadcast::deliver(&guard, &Outbound::CardCreated(card.clone()), Delivery::Inclusive);
                info!(%room_id, card_id = %card.id, user_id = %card.owner_user_id, kind = card.kind.as_str(), "card created");
                Ok(card)
            }
            Err(e) => Err(e.into()),
        }
    };
    state.release_room(room_id, room).await;
    result
}

/// Move a card. Unknown cards are ignored (logged, nothing broadcast).
///
/// # Errors
///
/// Returns `NotMember`, `Validation` for non-finite coordinates, or
/// `Dependency` if the store write fails.
pub async fn move_card(
    state: &AppState,
    session: &Session,
    room_id: Uuid,
    card_id: Uuid,
    x: f64,
    y: f64,
) -> Result<(), EventError> {
    session.authorize(room_id)?;
    validate_point(x, y)?;

    let room = state.room(room_id).await;
    let result = {
        let mut guard = room.lock().await;
        apply_move(state, &mut guard, session.connection_id, room_id, card_id, x, y).await
    };
    state.release_room(room_id, room).await;
    result
}

async fn apply_move(
    state: &AppState,
    room: &mut RoomState,
    connection_id: Uuid,
    room_id: Uuid,
    card_id: Uuid,
    x: f64,
    y: f64,
) -> Result<(), EventError> {
    if !cached_or_unknown(room, card_id) || !state.store.update_card_position(room_id, card_id, x, y).await? {
        warn!(%room_id, %card_id, "move for unknown card ignored");
        return Ok(());
    }
    if let Some(card) = cached_card_mut(room, card_id) {
        card.x = x;
        card.y = y;
    }
    broadcast::deliver(room, &Outbound::CardMoved { room_id, card_id, x, y }, Delivery::Exclusive(connection_id));
    Ok(())
}

/// Resize a card. Unknown cards are ignored (logged, nothing broadcast).
///
/// # Errors
///
/// Returns `NotMember`, `Validation` for negative or non-finite sizes, or
/// `Dependency` if the store write fails.
pub async fn resize_card(
    state: &AppState,
    session: &Session,
    room_id: Uuid,
    card_id: Uuid,
    width: f64,
    height: f64,
) -> Result<(), EventError> {
    session.authorize(room_id)?;
    validate_size(width, height)?;

    let room = state.room(room_id).await;
    let result = {
        let mut guard = room.lock().await;
        apply_resize(state, &mut guard, session.connection_id, room_id, card_id, width, height).await
    };
    state.release_room(room_id, room).await;
    result
}

async fn apply_resize(
    state: &AppState,
    room: &mut RoomState,
    connection_id: Uuid,
    room_id: Uuid,
    card_id: Uuid,
    width: f64,
    height: f64,
) -> Result<(), EventError> {
    if !cached_or_unknown(room, card_id) || !state.store.update_card_size(room_id, card_id, width, height).await? {
        warn!(%room_id, %card_id, "resize for unknown card ignored");
        return Ok(());
    }
    if let Some(card) = cached_card_mut(room, card_id) {
        card.width = width;
        card.height = height;
    }
    let event = Outbound::CardResized { room_id, card_id, width, height };
    broadcast::deliver(room, &event, Delivery::Exclusive(connection_id));
    Ok(())
}

/// Delete a card the caller owns and broadcast the removal to the whole room.
///
/// # Errors
///
/// Returns `NotMember`, `CardNotFound`, `NotOwner` when the caller does not
/// own the card, or `Dependency` if the store fails.
pub async fn delete_card(state: &AppState, session: &Session, room_id: Uuid, card_id: Uuid) -> Result<(), EventError> {
    session.authorize(room_id)?;

    let room = state.room(room_id).await;
    let result = {
        let mut guard = room.lock().await;
        apply_delete(state, &mut guard, session.user_id(), room_id, card_id).await
    };
    state.release_room(room_id, room).await;
    result
}

async fn apply_delete(
    state: &AppState,
    room: &mut RoomState,
    requester: Uuid,
    room_id: Uuid,
    card_id: Uuid,
) -> Result<(), EventError> {
    let board = hydrate(state, room, room_id).await?;
    let Some(card) = board.iter().find(|c| c.id == card_id) else {
        return Err(EventError::CardNotFound(card_id));
    };
    if card.owner_user_id != requester {
        return Err(EventError::NotOwner(card_id));
    }

    let removed = state.store.delete_card(room_id, card_id).await?;
    board.retain(|c| c.id != card_id);
    if !removed {
        return Err(EventError::CardNotFound(card_id));
    }

    broadcast::deliver(room, &Outbound::CardDeleted { room_id, card_id }, Delivery::Inclusive);
    info!(%room_id, %card_id, user_id = %requester, "card deleted");
    Ok(())
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Current cards of a room in creation order.
///
/// # Errors
///
/// Returns `NotMember`, or `Dependency` if hydration fails.
pub async fn load_snapshot(state: &AppState, session: &Session, room_id: Uuid) -> Result<Vec<Card>, EventError> {
    session.authorize(room_id)?;

    let room = state.room(room_id).await;
    let result = {
        let mut guard = room.lock().await;
        hydrate(state, &mut guard, room_id).await.map(|cards| cards.to_vec())
    };
    state.release_room(room_id, room).await;
    result
}

// =============================================================================
// HELPERS
// =============================================================================

/// Load the room's cards from the store unless already in memory.
async fn hydrate<'a>(state: &AppState, room: &'a mut RoomState, room_id: Uuid) -> Result<&'a mut Vec<Card>, EventError> {
    if room.board.is_none() {
        let cards = state.store.list_cards(room_id).await?;
        info!(%room_id, count = cards.len(), "hydrated board from store");
        room.board = Some(cards);
    }
    Ok(room.board.get_or_insert_with(Vec::new))
}

/// `false` only when the board is in memory and the card is not on it.
fn cached_or_unknown(room: &RoomState, card_id: Uuid) -> bool {
    room.board
        .as_ref()
        .is_none_or(|board| board.iter().any(|c| c.id == card_id))
}

fn cached_card_mut(room: &mut RoomState, card_id: Uuid) -> Option<&mut Card> {
    room.board
        .as_mut()
        .and_then(|board| board.iter_mut().find(|c| c.id == card_id))
}

/// Current time at the precision Postgres stores.
fn now_micros() -> OffsetDateTime {
    let now = OffsetDateTime::now_utc();
    now - Duration::nanoseconds(i64::from(now.nanosecond() % 1_000))
}

fn validate_point(x: f64, y: f64) -> Result<(), EventError> {
    if x.is_finite() && y.is_finite() {
        Ok(())
    } else {
        Err(EventError::Validation("coordinates must be finite".into()))
    }
}

fn validate_size(width: f64, height: f64) -> Result<(), EventError> {
    if width.is_finite() && height.is_finite() && width >= 0.0 && height >= 0.0 {
        Ok(())
    } else {
        Err(EventError::Validation("width and height must be finite and non-negative".into()))
    }
}

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;
