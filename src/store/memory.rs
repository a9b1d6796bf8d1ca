//! In-process `Store` used when no database is configured, and by tests.
//!
//! A seed file (`STORE_SEED_FILE`) can pre-populate users and room members so
//! a local server is usable without Postgres. Tests can flip the store into
//! a failing mode where every call returns `StoreError::Unavailable`.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Deserialize;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Card, MessageRecord, NewMessage, PresenceStatus, Store, StoreError, UserProfile};

/// Users and room rosters loaded at startup.
#[derive(Debug, Default, Deserialize)]
pub struct Seed {
    #[serde(default)]
    pub users: Vec<UserProfile>,
    #[serde(default)]
    pub rooms: Vec<SeedRoom>,
}

#[derive(Debug, Deserialize)]
pub struct SeedRoom {
    pub id: Uuid,
    #[serde(default)]
    pub members: Vec<Uuid>,
}

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, UserProfile>,
    /// `room_id` -> (`user_id` -> last read time).
    members: HashMap<Uuid, HashMap<Uuid, Option<OffsetDateTime>>>,
    room_activity: HashMap<Uuid, OffsetDateTime>,
    messages: Vec<MessageRecord>,
    cards: Vec<Card>,
    presence: HashMap<Uuid, PresenceStatus>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    failing: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_seed(seed: Seed) -> Self {
        let store = Self::new();
        for user in seed.users {
            store.add_user(user);
        }
        for room in seed.rooms {
            for user_id in room.members {
                store.add_member(room.id, user_id);
            }
        }
        store
    }

    /// Load a JSON seed file.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the file cannot be read or parsed.
    pub fn from_seed_file(path: &Path) -> Result<Self, StoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Unavailable(format!("seed file {}: {e}", path.display())))?;
        let seed: Seed = serde_json::from_str(&raw)
            .map_err(|e| StoreError::Unavailable(format!("seed file {}: {e}", path.display())))?;
        Ok(Self::from_seed(seed))
    }

    pub fn add_user(&self, user: UserProfile) {
        self.lock().users.insert(user.id, user);
    }

    pub fn add_member(&self, room_id: Uuid, user_id: Uuid) {
        self.lock()
            .members
            .entry(room_id)
            .or_default()
            .entry(user_id)
            .or_insert(None);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store set to fail".into()));
        }
        Ok(self.lock())
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Make every subsequent call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn remove_member(&self, room_id: Uuid, user_id: Uuid) {
        if let Some(members) = self.lock().members.get_mut(&room_id) {
            members.remove(&user_id);
        }
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.lock().messages.clone()
    }

    pub fn cards(&self, room_id: Uuid) -> Vec<Card> {
        self.lock()
            .cards
            .iter()
            .filter(|c| c.room_id == room_id)
            .cloned()
            .collect()
    }

    pub fn presence(&self, user_id: Uuid) -> Option<PresenceStatus> {
        self.lock().presence.get(&user_id).copied()
    }

    pub fn last_read(&self, room_id: Uuid, user_id: Uuid) -> Option<OffsetDateTime> {
        self.lock()
            .members
            .get(&room_id)
            .and_then(|m| m.get(&user_id).copied())
            .flatten()
    }

    pub fn room_activity(&self, room_id: Uuid) -> Option<OffsetDateTime> {
        self.lock().room_activity.get(&room_id).copied()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn room_memberships(&self, user_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        let inner = self.check()?;
        Ok(inner
            .members
            .iter()
            .filter(|(_, members)| members.contains_key(&user_id))
            .map(|(room_id, _)| *room_id)
            .collect())
    }

    async fn is_member(&self, room_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let inner = self.check()?;
        Ok(inner
            .members
            .get(&room_id)
            .is_some_and(|m| m.contains_key(&user_id)))
    }

    async fn user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        Ok(self.check()?.users.get(&user_id).cloned())
    }

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
        let mut inner = self.check()?;
        let record = MessageRecord {
            id: Uuid::new_v4(),
            room_id: message.room_id,
            user_id: message.user_id,
            content: message.content,
            kind: message.kind,
            metadata: message.metadata,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.messages.push(record.clone());
        Ok(record)
    }

    async fn touch_room(&self, room_id: Uuid) -> Result<(), StoreError> {
        self.check()?
            .room_activity
            .insert(room_id, OffsetDateTime::now_utc());
        Ok(())
    }

    async fn mark_read(&self, room_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        let mut inner = self.check()?;
        if let Some(last_read) = inner
            .members
            .get_mut(&room_id)
            .and_then(|m| m.get_mut(&user_id))
        {
            *last_read = Some(OffsetDateTime::now_utc());
        }
        Ok(())
    }

    async fn list_cards(&self, room_id: Uuid) -> Result<Vec<Card>, StoreError> {
        let inner = self.check()?;
        Ok(inner
            .cards
            .iter()
            .filter(|c| c.room_id == room_id)
            .cloned()
            .collect())
    }

    async fn insert_card(&self, card: &Card) -> Result<(), StoreError> {
        self.check()?.cards.push(card.clone());
        Ok(())
    }

    async fn update_card_position(&self, room_id: Uuid, card_id: Uuid, x: f64, y: f64) -> Result<bool, StoreError> {
        let mut inner = self.check()?;
        let Some(card) = inner
            .cards
            .iter_mut()
            .find(|c| c.id == card_id && c.room_id == room_id)
        else {
            return Ok(false);
        };
        card.x = x;
        card.y = y;
        Ok(true)
    }

    async fn update_card_size(
        &self,
        room_id: Uuid,
        card_id: Uuid,
        width: f64,
        height: f64,
    ) -> Result<bool, StoreError> {
        let mut inner = self.check()?;
        let Some(card) = inner
            .cards
            .iter_mut()
            .find(|c| c.id == card_id && c.room_id == room_id)
        else {
            return Ok(false);
        };
        card.width = width;
        card.height = height;
        Ok(true)
    }

    async fn delete_card(&self, room_id: Uuid, card_id: Uuid) -> Result<bool, StoreError> {
        let mut inner = self.check()?;
        let before = inner.cards.len();
        inner
            .cards
            .retain(|c| !(c.id == card_id && c.room_id == room_id));
        Ok(inner.cards.len() < before)
    }

    async fn set_presence(&self, user_id: Uuid, status: PresenceStatus) -> Result<(), StoreError> {
        self.check()?.presence.insert(user_id, status);
        Ok(())
    }
}
