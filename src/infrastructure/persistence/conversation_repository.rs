//! PostgreSQL implementation of the conversation ledger

use crate::domain::conversation::{Conversation, ConversationLedger, ConversationStatus, FailureReason};
use crate::domain::shared::{DomainError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, error};
use uuid::Uuid;

#[derive(FromRow)]
struct ConversationRow {
    id: Uuid,
    campaign_id: Uuid,
    bridge_name: String,
    sequence_number: i32,
    initial_call: bool,
    current_attempt: i32,
    contact_name: String,
    contact_number: String,
    status: String,
    recording_url: Option<String>,
    recording_duration: Option<i32>,
    call_duration: Option<i32>,
    reason_code: Option<i32>,
    reason_message: Option<String>,
    note_id: Option<Uuid>,
    skipped: bool,
    skip_cooldown: bool,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ConversationRow> for Conversation {
    fn from(r: ConversationRow) -> Self {
        Conversation {
            id: r.id,
            campaign_id: r.campaign_id,
            bridge_name: r.bridge_name,
            sequence_number: r.sequence_number,
            initial_call: r.initial_call,
            current_attempt: r.current_attempt,
            contact_name: r.contact_name,
            contact_number: r.contact_number,
            status: ConversationStatus::from_str(&r.status).unwrap_or(ConversationStatus::Failed),
            recording_url: r.recording_url,
            recording_duration: r.recording_duration,
            call_duration: r.call_duration,
            reason_code: r.reason_code,
            reason_message: r.reason_message,
            note_id: r.note_id,
            skipped: r.skipped,
            skip_cooldown: r.skip_cooldown,
            created_by: r.created_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

fn status_names(statuses: &[ConversationStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

pub struct PgConversationRepository {
    pool: PgPool,
}

impl PgConversationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationLedger for PgConversationRepository {
    async fn insert_many(&self, conversations: &[Conversation]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for c in conversations {
            sqlx::query(
                r#"
                INSERT INTO conversations (
                    id, campaign_id, bridge_name, sequence_number, initial_call,
                    current_attempt, contact_name, contact_number, status,
                    skipped, skip_cooldown, created_by, created_at, updated_at
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
                "#,
            )
            .bind(c.id)
            .bind(c.campaign_id)
            .bind(&c.bridge_name)
            .bind(c.sequence_number)
            .bind(c.initial_call)
            .bind(c.current_attempt)
            .bind(&c.contact_name)
            .bind(&c.contact_number)
            .bind(c.status.as_str())
            .bind(c.skipped)
            .bind(c.skip_cooldown)
            .bind(c.created_by)
            .bind(c.created_at)
            .bind(c.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to insert conversation {}: {}", c.id, e);
                DomainError::from(e)
            })?;
        }
        tx.commit().await?;

        debug!("Inserted {} conversations", conversations.len());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, ConversationRow>("SELECT * FROM conversations WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(Conversation::from))
    }

    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            "SELECT * FROM conversations WHERE campaign_id = $1 ORDER BY sequence_number",
        )
        .bind(campaign_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn list_by_status(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, ConversationRow>(
            r#"
            SELECT * FROM conversations
            WHERE campaign_id = $1 AND status = ANY($2)
            ORDER BY sequence_number
            "#,
        )
        .bind(campaign_id)
        .bind(status_names(statuses))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(Conversation::from).collect())
    }

    async fn exists_with_status(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM conversations WHERE campaign_id = $1 AND status = ANY($2))",
        )
        .bind(campaign_id)
        .bind(status_names(statuses))
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn max_sequence(&self, campaign_id: Uuid) -> Result<i32> {
        let max: Option<i32> = sqlx::query_scalar(
            "SELECT MAX(sequence_number) FROM conversations WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(max.unwrap_or(0))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
        reason: Option<FailureReason>,
    ) -> Result<bool> {
        let predecessors = ConversationStatus::predecessors_of(status);
        let (reason_code, reason_message) = match reason {
            Some(r) => (r.code, Some(r.message)),
            None => (None, None),
        };

        // The predecessor filter makes the transition check and the write one statement
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET status = $2,
                reason_code = COALESCE($3, reason_code),
                reason_message = COALESCE($4, reason_message),
                updated_at = NOW()
            WHERE id = $1 AND status = ANY($5)
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(reason_code)
        .bind(reason_message)
        .bind(status_names(&predecessors))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update status of conversation {}: {}", id, e);
            DomainError::from(e)
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn complete_where(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE conversations
            SET status = 'completed', updated_at = NOW()
            WHERE campaign_id = $1 AND status = ANY($2)
            "#,
        )
        .bind(campaign_id)
        .bind(status_names(statuses))
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn update_call_duration(&self, id: Uuid, seconds: i32) -> Result<()> {
        sqlx::query("UPDATE conversations SET call_duration = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(seconds)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_recording(&self, id: Uuid, url: &str, duration: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE conversations
            SET recording_url = $2, recording_duration = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(url)
        .bind(duration)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_skipped(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE conversations SET skipped = TRUE, skip_cooldown = TRUE, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_note(&self, id: Uuid, note_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE conversations SET note_id = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(note_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
