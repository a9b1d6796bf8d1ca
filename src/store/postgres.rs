//! Postgres-backed `Store`.
//!
//! Queries are plain `sqlx::query` / `query_as` with tuple rows; the schema
//! lives in `src/db/migrations`.

use std::collections::HashSet;

use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{Card, CardKind, MessageRecord, NewMessage, PresenceStatus, Store, StoreError, UserProfile};

type CardRow = (Uuid, Uuid, Uuid, String, String, String, f64, f64, f64, f64, OffsetDateTime);

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn card_from_row(row: CardRow) -> Result<Card, StoreError> {
    let (id, room_id, owner_user_id, owner_name, kind, content, x, y, width, height, created_at) = row;
    let kind = CardKind::parse(&kind).ok_or_else(|| StoreError::Corrupt(format!("card {id} has type {kind:?}")))?;
    Ok(Card { id, room_id, owner_user_id, owner_name, kind, content, x, y, width, height, created_at })
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn room_memberships(&self, user_id: Uuid) -> Result<HashSet<Uuid>, StoreError> {
        let rows = sqlx::query_scalar::<_, Uuid>("SELECT room_id FROM room_members WHERE user_id = $1")
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().collect())
    }

    async fn is_member(&self, room_id: Uuid, user_id: Uuid) -> Result<bool, StoreError> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM room_members WHERE room_id = $1 AND user_id = $2)")
                .bind(room_id)
                .bind(user_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(exists)
    }

    async fn user_profile(&self, user_id: Uuid) -> Result<Option<UserProfile>, StoreError> {
        let row = sqlx::query_as::<_, (Uuid, String, Option<String>)>(
            "SELECT id, name, avatar_url FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id, name, avatar_url)| UserProfile { id, name, avatar_url }))
    }

    async fn insert_message(&self, message: NewMessage) -> Result<MessageRecord, StoreError> {
        let (id, created_at) = sqlx::query_as::<_, (Uuid, OffsetDateTime)>(
            "INSERT INTO messages (room_id, user_id, content, type, metadata)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, created_at",
        )
        .bind(message.room_id)
        .bind(message.user_id)
        .bind(&message.content)
        .bind(message.kind.as_str())
        .bind(&message.metadata)
        .fetch_one(&self.pool)
        .await?;

        Ok(MessageRecord {
            id,
            room_id: message.room_id,
            user_id: message.user_id,
            content: message.content,
            kind: message.kind,
            metadata: message.metadata,
            created_at,
        })
    }

    async fn touch_room(&self, room_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE rooms SET updated_at = now() WHERE id = $1")
            .bind(room_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_read(&self, room_id: Uuid, user_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE room_members SET last_read_at = now() WHERE room_id = $1 AND user_id = $2")
            .bind(room_id)
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_cards(&self, room_id: Uuid) -> Result<Vec<Card>, StoreError> {
        let rows = sqlx::query_as::<_, CardRow>(
            "SELECT bc.id, bc.room_id, bc.user_id, u.name, bc.type, bc.content,
                    bc.x, bc.y, bc.width, bc.height, bc.created_at
             FROM board_cards bc
             JOIN users u ON u.id = bc.user_id
             WHERE bc.room_id = $1
             ORDER BY bc.created_at ASC, bc.seq ASC",
        )
        .bind(room_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(card_from_row).collect()
    }

    async fn insert_card(&self, card: &Card) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO board_cards (id, room_id, user_id, type, content, x, y, width, height, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(card.id)
        .bind(card.room_id)
        .bind(card.owner_user_id)
        .bind(card.kind.as_str())
        .bind(&card.content)
        .bind(card.x)
        .bind(card.y)
        .bind(card.width)
        .bind(card.height)
        .bind(card.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_card_position(&self, room_id: Uuid, card_id: Uuid, x: f64, y: f64) -> Result<bool, StoreError> {
        let result =
            sqlx::query("UPDATE board_cards SET x = $1, y = $2, updated_at = now() WHERE id = $3 AND room_id = $4")
                .bind(x)
                .bind(y)
                .bind(card_id)
                .bind(room_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_card_size(
        &self,
        room_id: Uuid,
        card_id: Uuid,
        width: f64,
        height: f64,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE board_cards SET width = $1, height = $2, updated_at = now() WHERE id = $3 AND room_id = $4",
        )
        .bind(width)
        .bind(height)
        .bind(card_id)
        .bind(room_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_card(&self, room_id: Uuid, card_id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM board_cards WHERE id = $1 AND room_id = $2")
            .bind(card_id)
            .bind(room_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn set_presence(&self, user_id: Uuid, status: PresenceStatus) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO user_presence (user_id, status, last_activity)
             VALUES ($1, $2, now())
             ON CONFLICT (user_id) DO UPDATE SET status = EXCLUDED.status, last_activity = now()",
        )
        .bind(user_id)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

