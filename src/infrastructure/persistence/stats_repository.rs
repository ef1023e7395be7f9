//! PostgreSQL implementation of the campaign stats repository

use crate::domain::shared::{DomainError, Result};
use crate::domain::stats::{CampaignStats, CampaignStatsRepository, StatField};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, error};
use uuid::Uuid;

#[derive(FromRow)]
struct CampaignStatsRow {
    id: Uuid,
    campaign_id: Uuid,
    total_contacts: i64,
    dialed_contacts: i64,
    answered_calls: i64,
    unanswered_calls: i64,
    voicemail_drops: i64,
    active_call_duration: i64,
    campaign_duration: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CampaignStatsRow> for CampaignStats {
    fn from(r: CampaignStatsRow) -> Self {
        CampaignStats {
            id: r.id,
            campaign_id: r.campaign_id,
            total_contacts: r.total_contacts,
            dialed_contacts: r.dialed_contacts,
            answered_calls: r.answered_calls,
            unanswered_calls: r.unanswered_calls,
            voicemail_drops: r.voicemail_drops,
            active_call_duration: r.active_call_duration,
            campaign_duration: r.campaign_duration,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

pub struct PgStatsRepository {
    pool: PgPool,
}

impl PgStatsRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignStatsRepository for PgStatsRepository {
    async fn create_if_absent(&self, stats: &CampaignStats) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO campaign_stats (
                id, campaign_id, total_contacts, dialed_contacts, answered_calls,
                unanswered_calls, voicemail_drops, active_call_duration,
                campaign_duration, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (campaign_id) DO NOTHING
            "#,
        )
        .bind(stats.id)
        .bind(stats.campaign_id)
        .bind(stats.total_contacts)
        .bind(stats.dialed_contacts)
        .bind(stats.answered_calls)
        .bind(stats.unanswered_calls)
        .bind(stats.voicemail_drops)
        .bind(stats.active_call_duration)
        .bind(stats.campaign_duration)
        .bind(stats.created_at)
        .bind(stats.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create stats of campaign {}: {}", stats.campaign_id, e);
            DomainError::from(e)
        })?;

        Ok(result.rows_affected() > 0)
    }

    async fn get(&self, campaign_id: Uuid) -> Result<Option<CampaignStats>> {
        let row = sqlx::query_as::<_, CampaignStatsRow>(
            "SELECT * FROM campaign_stats WHERE campaign_id = $1",
        )
        .bind(campaign_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(CampaignStats::from))
    }

    async fn increment(&self, campaign_id: Uuid, field: StatField, delta: i64) -> Result<i64> {
        let column = field.column();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, CampaignStatsRow>(
            "SELECT * FROM campaign_stats WHERE campaign_id = $1 FOR UPDATE",
        )
        .bind(campaign_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| DomainError::NotFound(format!("stats of campaign {}", campaign_id)))?;

        let mut stats = CampaignStats::from(row);
        let value = stats.get(field) + delta;
        stats.set(field, value);

        // `column` comes from a closed enum, never from input
        let update = format!(
            "UPDATE campaign_stats SET {} = $2, updated_at = $3 WHERE campaign_id = $1",
            column
        );
        sqlx::query(&update)
            .bind(campaign_id)
            .bind(value)
            .bind(stats.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Failed to increment {} of campaign {}: {}", column, campaign_id, e);
                DomainError::from(e)
            })?;
        tx.commit().await?;

        debug!("Campaign {} {} = {}", campaign_id, column, value);
        Ok(value)
    }
}
