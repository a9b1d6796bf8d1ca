//! Frame: the wire protocol for realtime sessions.
//!
//! ARCHITECTURE
//! ============
//! Every message on a room connection is a JSON text frame shaped as
//! `{"event": "<kind>", "data": {...}}`. Inbound and outbound kinds are both
//! closed enums, so the dispatch layer matches on variants instead of
//! splitting strings, and every payload is validated by `serde` before any
//! handler sees it.
//!
//! DESIGN
//! ======
//! - Field names are camelCase on the wire.
//! - Unknown inbound kinds are rejected with `E_UNKNOWN_EVENT`; a known kind
//!   with a malformed payload is rejected with `E_VALIDATION`.
//! - Errors are delivered as an `error` event carrying a grepable code, a
//!   human message, the retryable flag, and the inbound kind that failed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::EventError;
use crate::store::{Card, CardKind, Message, MessageKind};

// =============================================================================
// ERROR CODES
// =============================================================================

/// Grepable error code and retryable flag for structured error events.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

// =============================================================================
// INBOUND
// =============================================================================

/// Client → server events.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum Inbound {
    #[serde(rename = "room:join")]
    RoomJoin { room_id: Uuid },
    #[serde(rename = "room:leave")]
    RoomLeave { room_id: Uuid },
    #[serde(rename = "message:send")]
    MessageSend {
        room_id: Uuid,
        content: String,
        #[serde(rename = "type", default)]
        kind: MessageKind,
        #[serde(default)]
        metadata: Option<serde_json::Value>,
    },
    #[serde(rename = "message:typing")]
    MessageTyping { room_id: Uuid, is_typing: bool },
    #[serde(rename = "message:read")]
    MessageRead { room_id: Uuid },
    #[serde(rename = "board:load")]
    BoardLoad { room_id: Uuid },
    #[serde(rename = "board:card:create")]
    CardCreate {
        room_id: Uuid,
        #[serde(rename = "type")]
        kind: CardKind,
        content: String,
        x: f64,
        y: f64,
        width: f64,
        height: f64,
    },
    #[serde(rename = "board:card:move")]
    CardMove { room_id: Uuid, card_id: Uuid, x: f64, y: f64 },
    #[serde(rename = "board:card:resize")]
    CardResize { room_id: Uuid, card_id: Uuid, width: f64, height: f64 },
    #[serde(rename = "board:card:delete")]
    CardDelete { room_id: Uuid, card_id: Uuid },
    #[serde(rename = "board:cursor")]
    Cursor { room_id: Uuid, x: f64, y: f64 },
}

impl Inbound {
    /// Every inbound kind the server understands.
    pub const KINDS: &'static [&'static str] = &[
        "room:join",
        "room:leave",
        "message:send",
        "message:typing",
        "message:read",
        "board:load",
        "board:card:create",
        "board:card:move",
        "board:card:resize",
        "board:card:delete",
        "board:cursor",
    ];

    /// Wire name of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RoomJoin { .. } => "room:join",
            Self::RoomLeave { .. } => "room:leave",
            Self::MessageSend { .. } => "message:send",
            Self::MessageTyping { .. } => "message:typing",
            Self::MessageRead { .. } => "message:read",
            Self::BoardLoad { .. } => "board:load",
            Self::CardCreate { .. } => "board:card:create",
            Self::CardMove { .. } => "board:card:move",
            Self::CardResize { .. } => "board:card:resize",
            Self::CardDelete { .. } => "board:card:delete",
            Self::Cursor { .. } => "board:cursor",
        }
    }

    /// Room every inbound event is scoped to.
    #[must_use]
    pub fn room_id(&self) -> Uuid {
        match self {
            Self::RoomJoin { room_id }
            | Self::RoomLeave { room_id }
            | Self::MessageSend { room_id, .. }
            | Self::MessageTyping { room_id, .. }
            | Self::MessageRead { room_id }
            | Self::BoardLoad { room_id }
            | Self::CardCreate { room_id, .. }
            | Self::CardMove { room_id, .. }
            | Self::CardResize { room_id, .. }
            | Self::CardDelete { room_id, .. }
            | Self::Cursor { room_id, .. } => *room_id,
        }
    }

    /// High-frequency events that are neither persisted nor logged per frame.
    #[must_use]
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, Self::Cursor { .. } | Self::MessageTyping { .. })
    }
}

/// Only the tag is inspected here, to tell unknown kinds from bad payloads.
#[derive(Deserialize)]
struct Envelope {
    event: String,
}

/// Parse one inbound text frame.
///
/// # Errors
///
/// Returns `UnknownEvent` for a kind outside [`Inbound::KINDS`] and
/// `Validation` for invalid JSON or a payload that does not fit its kind.
pub fn parse_inbound(text: &str) -> Result<Inbound, EventError> {
    let envelope: Envelope =
        serde_json::from_str(text).map_err(|e| EventError::Validation(format!("invalid frame: {e}")))?;

    if !Inbound::KINDS.contains(&envelope.event.as_str()) {
        return Err(EventError::UnknownEvent(envelope.event));
    }

    serde_json::from_str(text).map_err(|e| EventError::Validation(format!("invalid {} payload: {e}", envelope.event)))
}

// =============================================================================
// OUTBOUND
// =============================================================================

/// Server → client events.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all_fields = "camelCase")]
pub enum Outbound {
    #[serde(rename = "session:connected")]
    SessionConnected { connection_id: Uuid, user_id: Uuid, display_name: String, rooms: Vec<Uuid> },
    #[serde(rename = "presence:online")]
    PresenceOnline { room_id: Uuid, user_id: Uuid, display_name: String },
    #[serde(rename = "presence:offline")]
    PresenceOffline { room_id: Uuid, user_id: Uuid, display_name: String },
    #[serde(rename = "user:joined")]
    UserJoined { room_id: Uuid, user_id: Uuid, display_name: String },
    #[serde(rename = "user:left")]
    UserLeft { room_id: Uuid, user_id: Uuid, display_name: String },
    #[serde(rename = "message:new")]
    MessageNew(Message),
    #[serde(rename = "user:typing")]
    UserTyping { room_id: Uuid, user_id: Uuid, display_name: String, is_typing: bool },
    #[serde(rename = "board:state")]
    BoardState { room_id: Uuid, cards: Vec<Card> },
    #[serde(rename = "board:card:created")]
    CardCreated(Card),
    #[serde(rename = "board:card:moved")]
    CardMoved { room_id: Uuid, card_id: Uuid, x: f64, y: f64 },
    #[serde(rename = "board:card:resized")]
    CardResized { room_id: Uuid, card_id: Uuid, width: f64, height: f64 },
    #[serde(rename = "board:card:deleted")]
    CardDeleted { room_id: Uuid, card_id: Uuid },
    #[serde(rename = "board:cursor:update")]
    CursorUpdate { room_id: Uuid, connection_id: Uuid, user_id: Uuid, display_name: String, x: f64, y: f64 },
    #[serde(rename = "board:cursor:leave")]
    CursorLeave { room_id: Uuid, connection_id: Uuid, user_id: Uuid },
    #[serde(rename = "error")]
    Error {
        code: String,
        message: String,
        retryable: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        event: Option<String>,
    },
}

impl Outbound {
    /// Build an error event from a typed error.
    #[must_use]
    pub fn error_from(err: &(impl ErrorCode + ?Sized), event: Option<&str>) -> Self {
        Self::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
            retryable: err.retryable(),
            event: event.map(str::to_string),
        }
    }

    /// Wire name of this event.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SessionConnected { .. } => "session:connected",
            Self::PresenceOnline { .. } => "presence:online",
            Self::PresenceOffline { .. } => "presence:offline",
            Self::UserJoined { .. } => "user:joined",
            Self::UserLeft { .. } => "user:left",
            Self::MessageNew(_) => "message:new",
            Self::UserTyping { .. } => "user:typing",
            Self::BoardState { .. } => "board:state",
            Self::CardCreated(_) => "board:card:created",
            Self::CardMoved { .. } => "board:card:moved",
            Self::CardResized { .. } => "board:card:resized",
            Self::CardDeleted { .. } => "board:card:deleted",
            Self::CursorUpdate { .. } => "board:cursor:update",
            Self::CursorLeave { .. } => "board:cursor:leave",
            Self::Error { .. } => "error",
        }
    }
}

#[cfg(test)]
impl Outbound {
    /// Error code carried by an `error` event.
    pub fn error_code(&self) -> Option<&str> {
        match self {
            Self::Error { code, .. } => Some(code),
            _ => None,
        }
    }
}

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;
