//! Persistence for finished chat turns.
//!
//! A turn becomes two `messages` rows (the user's text and the model's
//! reply) plus the reply's `function_calls` / `function_responses` rows.
//! Without a database the turns are kept in memory.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::bridge::ConversationTurn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait TurnStore: Send + Sync {
    async fn save_turn(&self, turn: &ConversationTurn) -> Result<(), StoreError>;

    /// Backend name for health output.
    fn kind(&self) -> &'static str;
}

// ── Postgres ────────────────────────────────────────────────────────────────

pub struct PgTurnStore {
    db: sqlx::PgPool,
}

impl PgTurnStore {
    pub fn new(db: sqlx::PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl TurnStore for PgTurnStore {
    async fn save_turn(&self, turn: &ConversationTurn) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO messages (id, turn_id, content, sender, is_streaming, status, timestamp) \
             VALUES ($1, $2, $3, 'user', FALSE, 'completed', $4)",
        )
        .bind(Uuid::new_v4())
        .bind(turn.id)
        .bind(&turn.user_text)
        .bind(turn.started_at)
        .execute(&mut *tx)
        .await?;

        let reply_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO messages (id, turn_id, content, sender, is_streaming, status, error, timestamp) \
             VALUES ($1, $2, $3, 'ai', FALSE, $4, $5, $6)",
        )
        .bind(reply_id)
        .bind(turn.id)
        .bind(&turn.accumulated_text)
        .bind(turn.status.as_str())
        .bind(turn.error.as_deref())
        .bind(turn.finished_at.unwrap_or(turn.started_at))
        .execute(&mut *tx)
        .await?;

        for (position, call) in turn.function_calls.iter().enumerate() {
            sqlx::query(
                "INSERT INTO function_calls (message_id, position, name, arguments) VALUES ($1, $2, $3, $4)",
            )
            .bind(reply_id)
            .bind(position as i32)
            .bind(&call.name)
            .bind(&call.arguments)
            .execute(&mut *tx)
            .await?;
        }

        for (position, response) in turn.function_responses.iter().enumerate() {
            sqlx::query(
                "INSERT INTO function_responses (message_id, position, name, response) VALUES ($1, $2, $3, $4)",
            )
            .bind(reply_id)
            .bind(position as i32)
            .bind(&response.name)
            .bind(&response.result)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::debug!(turn_id = %turn.id, "store: turn persisted");
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "postgres"
    }
}

// ── In-memory ───────────────────────────────────────────────────────────────

/// Turns kept by a [`MemoryTurnStore`] before the oldest are evicted.
pub const DEFAULT_MEMORY_TURNS: usize = 1000;

/// Ring of the most recent turns; nothing survives a restart.
pub struct MemoryTurnStore {
    turns: RwLock<VecDeque<ConversationTurn>>,
    capacity: usize,
}

impl Default for MemoryTurnStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MEMORY_TURNS)
    }
}

impl MemoryTurnStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding at most `capacity` turns (at least one).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            turns: RwLock::new(VecDeque::with_capacity(capacity.min(64))),
            capacity,
        }
    }

    /// Retained turns, oldest first.
    pub async fn turns(&self) -> Vec<ConversationTurn> {
        self.turns.read().await.iter().cloned().collect()
    }
}

#[async_trait]
impl TurnStore for MemoryTurnStore {
    async fn save_turn(&self, turn: &ConversationTurn) -> Result<(), StoreError> {
        let mut turns = self.turns.write().await;
        while turns.len() >= self.capacity {
            turns.pop_front();
        }
        turns.push_back(turn.clone());
        Ok(())
    }

    fn kind(&self) -> &'static str {
        "memory"
    }
}
