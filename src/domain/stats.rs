//! Campaign statistics counters

use crate::domain::shared::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A counter column of the campaign stats row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatField {
    TotalContacts,
    DialedContacts,
    AnsweredCalls,
    UnansweredCalls,
    VoicemailDrops,
    /// Seconds spent in answered calls
    ActiveCallDuration,
    /// Seconds spent dialing
    CampaignDuration,
}

impl StatField {
    /// Column name, also used as the wire name
    pub fn column(&self) -> &'static str {
        match self {
            StatField::TotalContacts => "total_contacts",
            StatField::DialedContacts => "dialed_contacts",
            StatField::AnsweredCalls => "answered_calls",
            StatField::UnansweredCalls => "unanswered_calls",
            StatField::VoicemailDrops => "voicemail_drops",
            StatField::ActiveCallDuration => "active_call_duration",
            StatField::CampaignDuration => "campaign_duration",
        }
    }
}

/// Durable per-campaign counters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignStats {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub total_contacts: i64,
    pub dialed_contacts: i64,
    pub answered_calls: i64,
    pub unanswered_calls: i64,
    pub voicemail_drops: i64,
    pub active_call_duration: i64,
    pub campaign_duration: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CampaignStats {
    pub fn new(campaign_id: Uuid, total_contacts: i64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            total_contacts,
            dialed_contacts: 0,
            answered_calls: 0,
            unanswered_calls: 0,
            voicemail_drops: 0,
            active_call_duration: 0,
            campaign_duration: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn get(&self, field: StatField) -> i64 {
        match field {
            StatField::TotalContacts => self.total_contacts,
            StatField::DialedContacts => self.dialed_contacts,
            StatField::AnsweredCalls => self.answered_calls,
            StatField::UnansweredCalls => self.unanswered_calls,
            StatField::VoicemailDrops => self.voicemail_drops,
            StatField::ActiveCallDuration => self.active_call_duration,
            StatField::CampaignDuration => self.campaign_duration,
        }
    }

    pub fn set(&mut self, field: StatField, value: i64) {
        let slot = match field {
            StatField::TotalContacts => &mut self.total_contacts,
            StatField::DialedContacts => &mut self.dialed_contacts,
            StatField::AnsweredCalls => &mut self.answered_calls,
            StatField::UnansweredCalls => &mut self.unanswered_calls,
            StatField::VoicemailDrops => &mut self.voicemail_drops,
            StatField::ActiveCallDuration => &mut self.active_call_duration,
            StatField::CampaignDuration => &mut self.campaign_duration,
        };
        *slot = value;
        self.updated_at = Utc::now();
    }
}

/// Stats repository interface.
///
/// `increment` takes a row lock, reads the current value and writes
/// `current + delta` inside one transaction; it must never be a blind
/// `field = field + delta`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignStatsRepository: Send + Sync {
    /// Returns false when a row already exists for the campaign
    async fn create_if_absent(&self, stats: &CampaignStats) -> Result<bool>;

    async fn get(&self, campaign_id: Uuid) -> Result<Option<CampaignStats>>;

    /// Returns the new value
    async fn increment(&self, campaign_id: Uuid, field: StatField, delta: i64) -> Result<i64>;
}
