//! PostgreSQL implementation of the participant call ledger

use crate::domain::participant::{LegStatus, LegType, ParticipantCall, ParticipantLedger};
use crate::domain::shared::{DomainError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, error};
use uuid::Uuid;

#[derive(FromRow)]
struct ParticipantCallRow {
    id: Uuid,
    conversation_id: Uuid,
    leg_type: String,
    leg_sid: String,
    status: String,
    recording_url: Option<String>,
    recording_duration: Option<i32>,
    call_duration: Option<i32>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ParticipantCallRow> for ParticipantCall {
    fn from(r: ParticipantCallRow) -> Self {
        ParticipantCall {
            id: r.id,
            conversation_id: r.conversation_id,
            leg_type: LegType::from_str(&r.leg_type).unwrap_or(LegType::Client),
            leg_sid: r.leg_sid,
            status: LegStatus::from_str(&r.status).unwrap_or(LegStatus::Failed),
            recording_url: r.recording_url,
            recording_duration: r.recording_duration,
            call_duration: r.call_duration,
            created_by: r.created_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

pub struct PgParticipantRepository {
    pool: PgPool,
}

impl PgParticipantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ParticipantLedger for PgParticipantRepository {
    async fn insert(&self, call: &ParticipantCall) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO participant_calls (
                id, conversation_id, leg_type, leg_sid, status,
                created_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(call.id)
        .bind(call.conversation_id)
        .bind(call.leg_type.as_str())
        .bind(&call.leg_sid)
        .bind(call.status.as_str())
        .bind(call.created_by)
        .bind(call.created_at)
        .bind(call.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to insert leg {}: {}", call.leg_sid, e);
            DomainError::from(e)
        })?;

        debug!("Recorded {} leg {}", call.leg_type.as_str(), call.leg_sid);
        Ok(())
    }

    async fn list_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<ParticipantCall>> {
        let rows = sqlx::query_as::<_, ParticipantCallRow>(
            "SELECT * FROM participant_calls WHERE conversation_id = $1 ORDER BY created_at",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ParticipantCall::from).collect())
    }

    async fn find_by_leg(&self, leg_sid: &str) -> Result<Option<ParticipantCall>> {
        let row = sqlx::query_as::<_, ParticipantCallRow>(
            "SELECT * FROM participant_calls WHERE leg_sid = $1",
        )
        .bind(leg_sid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(ParticipantCall::from))
    }

    async fn update_status(&self, leg_sid: &str, status: LegStatus) -> Result<bool> {
        let predecessors: Vec<String> = LegStatus::predecessors_of(status)
            .iter()
            .map(|s| s.as_str().to_string())
            .collect();
        let result = sqlx::query(
            r#"
            UPDATE participant_calls SET status = $2, updated_at = NOW()
            WHERE leg_sid = $1 AND status = ANY($3)
            "#,
        )
        .bind(leg_sid)
        .bind(status.as_str())
        .bind(predecessors)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update status of leg {}: {}", leg_sid, e);
            DomainError::from(e)
        })?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_recording(&self, leg_sid: &str, url: &str, duration: i32) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE participant_calls
            SET recording_url = $2, recording_duration = $3, updated_at = NOW()
            WHERE leg_sid = $1
            "#,
        )
        .bind(leg_sid)
        .bind(url)
        .bind(duration)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
