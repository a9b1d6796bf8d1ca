//! Store: the persistence collaborator.
//!
//! SYSTEM CONTEXT
//! ==============
//! Users, rooms, memberships, messages and cards are owned by an external
//! database. The realtime core only reaches it through the narrow [`Store`]
//! trait below. `PgStore` is the production implementation; `MemoryStore`
//! keeps everything in-process for local development and tests.
//!
//! Every method is awaited while the caller holds its room's lock, so a slow
//! store stalls that room only.

pub mod memory;
pub mod postgres;

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// =============================================================================
// ERRORS
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

// =============================================================================
// RECORDS
// =============================================================================

/// Content type of a board card.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardKind {
    Text,
    Image,
    Video,
}

impl CardKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
        }
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "text" => Some(Self::Text),
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            _ => None,
        }
    }
}

/// A positioned, sized content block on a room's board. Mirrors `board_cards`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    pub room_id: Uuid,
    pub owner_user_id: Uuid,
    /// Owner's display name at read time; not part of the card's identity.
    pub owner_name: String,
    #[serde(rename = "type")]
    pub kind: CardKind,
    pub content: String,
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Content type of a chat message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image,
    Video,
    File,
}

impl MessageKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Video => "video",
            Self::File => "file",
        }
    }
}

/// Message fields accepted for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
}

/// Persisted message row. Mirrors `messages`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub id: Uuid,
    pub room_id: Uuid,
    pub user_id: Uuid,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub metadata: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A persisted message enriched with its sender's profile for broadcast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(flatten)]
    pub record: MessageRecord,
    pub user_name: String,
    pub user_avatar: Option<String>,
}

/// Public profile fields used to enrich broadcasts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }
}

// =============================================================================
// TRAIT
// =============================================================================

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Rooms the user is a member of.
    async fn room_memberships(&self, user_id: Uuid) -> Result<HashSet<Uuid>, StoreError>;

    /// Authoritative membership check.
    async fn is_member(&self, room_id: Uuid, user_id: Uuid) -> Result<bool, StoreError>;

    async fn user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError>;

    /// Insert a message; the store assigns `id` and `created_at`.
    async fn insert_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError>;

    /// Bump the room's last-activity timestamp.
    async fn touch_room(&self, room_id: Uuid) -> Result<(), StoreError>;

    /// Move the member's read cursor to now.
    async fn mark_read(&self, room_id: Uuid, user_id: Uuid) -> Result<(), StoreError>;

    /// All cards of a room in creation order.
    async fn list_cards(&self, room_id: Uuid) -> Result<Vec<Card>, StoreError>;

    async fn insert_card(&self, card: &Card) -> Result<(), StoreError>;

    /// Returns `false` when no card matched.
    async fn update_card_position(&self, room_id: Uuid, card_id: Uuid, x: f64, y: f64) -> Result<bool, StoreError>;

    /// Returns `false` when no card matched.
    async fn update_card_size(
        &self,
        room_id: Uuid,
        card_id: Uuid,
        width: f64,
        height: f64,
    ) -> Result<bool, StoreError>;

    /// Returns `false` when no card matched.
    async fn delete_card(&self, room_id: Uuid, card_id: Uuid) -> Result<bool, StoreError>;

    async fn set_presence(&self, user_id: Uuid, status: PresenceStatus) -> Result<(), StoreError>;
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
