//! PostgreSQL implementation of the campaign repository

use crate::domain::campaign::{Campaign, CampaignRepository, CampaignSettings, CampaignStatus};
use crate::domain::shared::{Contact, DomainError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tracing::{debug, error};
use uuid::Uuid;

#[derive(FromRow)]
struct CampaignRow {
    id: Uuid,
    workspace_id: Uuid,
    name: String,
    assignee_id: Uuid,
    dialing_number: String,
    dialing_number_id: Uuid,
    contact_list_id: Uuid,
    recording_enabled: bool,
    voicemail_enabled: bool,
    voicemail_url: Option<String>,
    cool_off_enabled: bool,
    cool_off_period: Option<i32>,
    call_attempts_enabled: bool,
    max_attempts: Option<i32>,
    attempt_gap: Option<i32>,
    call_script_id: Option<Uuid>,
    next_number_to_dial: Option<String>,
    status: String,
    is_archived: bool,
    created_by: Uuid,
    modified_by: Option<Uuid>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CampaignRow> for Campaign {
    fn from(r: CampaignRow) -> Self {
        Campaign {
            id: r.id,
            workspace_id: r.workspace_id,
            name: r.name,
            assignee_id: r.assignee_id,
            dialing_number: r.dialing_number,
            dialing_number_id: r.dialing_number_id,
            contact_list_id: r.contact_list_id,
            settings: CampaignSettings {
                recording_enabled: r.recording_enabled,
                voicemail_enabled: r.voicemail_enabled,
                voicemail_url: r.voicemail_url,
                cool_off_enabled: r.cool_off_enabled,
                cool_off_period: r.cool_off_period,
                call_attempts_enabled: r.call_attempts_enabled,
                max_attempts: r.max_attempts,
                attempt_gap: r.attempt_gap,
                call_script_id: r.call_script_id,
            },
            next_number_to_dial: r.next_number_to_dial,
            status: CampaignStatus::from_str(&r.status).unwrap_or(CampaignStatus::Active),
            is_archived: r.is_archived,
            created_by: r.created_by,
            modified_by: r.modified_by,
            created_at: r.created_at,
            updated_at: r.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ContactRow {
    name: String,
    number: String,
}

pub struct PgCampaignRepository {
    pool: PgPool,
}

impl PgCampaignRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Insert a campaign row; campaigns are authored outside the dialer
    pub async fn create(&self, campaign: &Campaign) -> Result<()> {
        let s = &campaign.settings;
        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, workspace_id, name, assignee_id, dialing_number, dialing_number_id,
                contact_list_id, recording_enabled, voicemail_enabled, voicemail_url,
                cool_off_enabled, cool_off_period, call_attempts_enabled, max_attempts,
                attempt_gap, call_script_id, next_number_to_dial, status, is_archived,
                created_by, modified_by, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(campaign.id)
        .bind(campaign.workspace_id)
        .bind(&campaign.name)
        .bind(campaign.assignee_id)
        .bind(&campaign.dialing_number)
        .bind(campaign.dialing_number_id)
        .bind(campaign.contact_list_id)
        .bind(s.recording_enabled)
        .bind(s.voicemail_enabled)
        .bind(s.voicemail_url.as_ref())
        .bind(s.cool_off_enabled)
        .bind(s.cool_off_period)
        .bind(s.call_attempts_enabled)
        .bind(s.max_attempts)
        .bind(s.attempt_gap)
        .bind(s.call_script_id)
        .bind(campaign.next_number_to_dial.as_ref())
        .bind(campaign.status.as_str())
        .bind(campaign.is_archived)
        .bind(campaign.created_by)
        .bind(campaign.modified_by)
        .bind(campaign.created_at)
        .bind(campaign.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to create campaign {}: {}", campaign.id, e);
            DomainError::from(e)
        })?;

        debug!("Created campaign: {}", campaign.id);
        Ok(())
    }

    /// Replace the contacts of a list, keeping the given order
    pub async fn replace_contacts(&self, contact_list_id: Uuid, contacts: &[Contact]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM contacts WHERE contact_list_id = $1")
            .bind(contact_list_id)
            .execute(&mut *tx)
            .await?;
        for (position, contact) in contacts.iter().enumerate() {
            sqlx::query(
                "INSERT INTO contacts (id, contact_list_id, position, name, number) VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(Uuid::new_v4())
            .bind(contact_list_id)
            .bind(position as i32)
            .bind(&contact.name)
            .bind(&contact.number)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl CampaignRepository for PgCampaignRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Campaign>> {
        let row = sqlx::query_as::<_, CampaignRow>("SELECT * FROM campaigns WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to get campaign {}: {}", id, e);
                DomainError::from(e)
            })?;

        Ok(row.map(Campaign::from))
    }

    async fn update_status(&self, id: Uuid, status: CampaignStatus, modified_by: Uuid) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = $2, modified_by = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(modified_by)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to update status of campaign {}: {}", id, e);
            DomainError::from(e)
        })?;

        if result.rows_affected() == 0 {
            return Err(DomainError::NotFound(format!("campaign {}", id)));
        }
        debug!("Campaign {} is now {}", id, status.as_str());
        Ok(())
    }

    async fn update_next_number_to_dial(&self, id: Uuid, number: Option<String>) -> Result<()> {
        sqlx::query("UPDATE campaigns SET next_number_to_dial = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(number)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to checkpoint campaign {}: {}", id, e);
                DomainError::from(e)
            })?;
        Ok(())
    }

    async fn list_contacts(&self, contact_list_id: Uuid) -> Result<Vec<Contact>> {
        let rows = sqlx::query_as::<_, ContactRow>(
            "SELECT name, number FROM contacts WHERE contact_list_id = $1 ORDER BY position",
        )
        .bind(contact_list_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list contacts of list {}: {}", contact_list_id, e);
            DomainError::from(e)
        })?;

        Ok(rows
            .into_iter()
            .map(|r| Contact::new(r.name, r.number))
            .collect())
    }
}
