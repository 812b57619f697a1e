//! Data Access Layer
//!
//! All interaction with the PostgreSQL database. Conversation documents and
//! per-user progress are stored as JSON columns; turns are serialized per
//! conversation with an optimistic version check, so two concurrent steps on
//! the same conversation cannot both commit.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parley_core::generate::Persona;
use parley_core::interpreter::{Conversation, UserProgress};
use parley_core::progression::{SentCounts, Stage};
use sqlx::PgPool;
use sqlx::types::Json;
use uuid::Uuid;

/// A user as stored, with their persona and progression state.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub persona: Persona,
    pub interests: Vec<String>,
    pub progress: UserProgress,
}

/// A conversation as stored, with the version its next turn must be saved
/// against.
#[derive(Debug, Clone)]
pub struct StoredConversation {
    pub id: Uuid,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub conversation: Conversation,
}

/// Result of a guarded turn save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved,
    /// Another turn committed first; the caller should reload and retry.
    Conflict,
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: String,
    persona: Json<Persona>,
    interests: Json<Vec<String>>,
    sent_counts: Json<SentCounts>,
    max_unlocked_stage: String,
}

impl UserRow {
    fn into_record(self) -> Result<UserRecord> {
        let max_unlocked_stage = self
            .max_unlocked_stage
            .parse::<Stage>()
            .context("invalid stage stored for user")?;
        Ok(UserRecord {
            id: self.id,
            persona: self.persona.0,
            interests: self.interests.0,
            progress: UserProgress {
                sent_counts: self.sent_counts.0,
                max_unlocked_stage,
            },
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    version: i32,
    created_at: DateTime<Utc>,
    doc: Json<Conversation>,
}

impl From<ConversationRow> for StoredConversation {
    fn from(row: ConversationRow) -> Self {
        StoredConversation {
            id: row.id,
            version: row.version,
            created_at: row.created_at,
            conversation: row.doc.0,
        }
    }
}

/// A wrapper around the `PgPool` to provide a clear data access interface.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Creates a new `Db` instance.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Runs all pending `sqlx` migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Fetches a user, provisioning a default persona on first sight.
    pub async fn ensure_user(&self, user_id: &str) -> Result<UserRecord> {
        let default_persona = Persona::new(
            "User",
            "You are a person practicing clear communication over text.",
        );
        sqlx::query(
            "INSERT INTO users (id, persona, interests, sent_counts, max_unlocked_stage) \
             VALUES ($1, $2, $3, $4, $5) ON CONFLICT (id) DO NOTHING",
        )
        .bind(user_id)
        .bind(Json(&default_persona))
        .bind(Json(&Vec::<String>::new()))
        .bind(Json(&SentCounts::new()))
        .bind(Stage::Level0.as_str())
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, UserRow>(
            "SELECT id, persona, interests, sent_counts, max_unlocked_stage \
             FROM users WHERE id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        row.into_record()
    }

    /// Inserts a freshly created conversation document.
    pub async fn create_conversation(
        &self,
        user_id: &str,
        conversation: &Conversation,
    ) -> Result<(Uuid, DateTime<Utc>)> {
        let row: (Uuid, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO conversations (user_id, stage, doc) VALUES ($1, $2, $3) \
             RETURNING id, created_at",
        )
        .bind(user_id)
        .bind(conversation.stage.as_str())
        .bind(Json(conversation))
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    /// Retrieves a single conversation, scoped to its owner.
    pub async fn get_conversation(
        &self,
        conversation_id: Uuid,
        user_id: &str,
    ) -> Result<Option<StoredConversation>> {
        let row = sqlx::query_as::<_, ConversationRow>(
            "SELECT id, version, created_at, doc FROM conversations WHERE id = $1 AND user_id = $2",
        )
        .bind(conversation_id)
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(StoredConversation::from))
    }

    /// Lists a user's conversations, newest first, optionally per stage.
    pub async fn list_conversations(
        &self,
        user_id: &str,
        stage: Option<Stage>,
    ) -> Result<Vec<StoredConversation>> {
        let rows = match stage {
            Some(stage) => {
                sqlx::query_as::<_, ConversationRow>(
                    "SELECT id, version, created_at, doc FROM conversations \
                     WHERE user_id = $1 AND stage = $2 ORDER BY created_at DESC",
                )
                .bind(user_id)
                .bind(stage.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query_as::<_, ConversationRow>(
                    "SELECT id, version, created_at, doc FROM conversations \
                     WHERE user_id = $1 ORDER BY created_at DESC",
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?
            }
        };
        Ok(rows.into_iter().map(StoredConversation::from).collect())
    }

    /// Commits one completed turn: the updated conversation document and the
    /// user's progression, in a single transaction guarded by the version the
    /// turn was computed against.
    pub async fn save_turn(
        &self,
        conversation_id: Uuid,
        user_id: &str,
        expected_version: i32,
        conversation: &Conversation,
        progress: &UserProgress,
    ) -> Result<SaveOutcome> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE conversations SET doc = $1, version = version + 1 \
             WHERE id = $2 AND user_id = $3 AND version = $4",
        )
        .bind(Json(conversation))
        .bind(conversation_id)
        .bind(user_id)
        .bind(expected_version)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(SaveOutcome::Conflict);
        }

        sqlx::query("UPDATE users SET sent_counts = $1, max_unlocked_stage = $2 WHERE id = $3")
            .bind(Json(&progress.sent_counts))
            .bind(progress.max_unlocked_stage.as_str())
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(SaveOutcome::Saved)
    }
}
