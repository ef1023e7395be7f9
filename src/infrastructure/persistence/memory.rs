//! In-memory repositories
//!
//! Used by tests and by `memory` builds that run without PostgreSQL. Each
//! write happens under one lock, so they give the same atomicity as the
//! PostgreSQL statements they stand in for.

use crate::domain::campaign::{Campaign, CampaignRepository, CampaignStatus};
use crate::domain::conversation::{Conversation, ConversationLedger, ConversationStatus, FailureReason};
use crate::domain::participant::{LegStatus, ParticipantCall, ParticipantLedger};
use crate::domain::shared::{Contact, DomainError, Result};
use crate::domain::stats::{CampaignStats, CampaignStatsRepository, StatField};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

#[derive(Default)]
pub struct InMemoryCampaignRepository {
    campaigns: Arc<RwLock<HashMap<Uuid, Campaign>>>,
    contacts: Arc<RwLock<HashMap<Uuid, Vec<Contact>>>>,
}

impl InMemoryCampaignRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, campaign: Campaign) {
        self.campaigns.write().await.insert(campaign.id, campaign);
    }

    pub async fn set_contacts(&self, contact_list_id: Uuid, contacts: Vec<Contact>) {
        self.contacts.write().await.insert(contact_list_id, contacts);
    }
}

#[async_trait]
impl CampaignRepository for InMemoryCampaignRepository {
    async fn get(&self, id: Uuid) -> Result<Option<Campaign>> {
        Ok(self.campaigns.read().await.get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: CampaignStatus, modified_by: Uuid) -> Result<()> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&id)
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", id)))?;
        campaign.status = status;
        campaign.modified_by = Some(modified_by);
        campaign.updated_at = Utc::now();
        Ok(())
    }

    async fn update_next_number_to_dial(&self, id: Uuid, number: Option<String>) -> Result<()> {
        if let Some(campaign) = self.campaigns.write().await.get_mut(&id) {
            campaign.next_number_to_dial = number;
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn list_contacts(&self, contact_list_id: Uuid) -> Result<Vec<Contact>> {
        Ok(self
            .contacts
            .read()
            .await
            .get(&contact_list_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Default)]
pub struct InMemoryConversationRepository {
    conversations: Arc<RwLock<HashMap<Uuid, Conversation>>>,
}

impl InMemoryConversationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn sorted(mut conversations: Vec<Conversation>) -> Vec<Conversation> {
        conversations.sort_by_key(|c| c.sequence_number);
        conversations
    }
}

#[async_trait]
impl ConversationLedger for InMemoryConversationRepository {
    async fn insert_many(&self, conversations: &[Conversation]) -> Result<()> {
        let mut store = self.conversations.write().await;
        for conversation in conversations {
            let clash = store.values().any(|c| {
                c.campaign_id == conversation.campaign_id
                    && c.sequence_number == conversation.sequence_number
            });
            if clash {
                return Err(DomainError::Database(format!(
                    "duplicate sequence {} in campaign {}",
                    conversation.sequence_number, conversation.campaign_id
                )));
            }
            store.insert(conversation.id, conversation.clone());
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self.conversations.read().await.get(&id).cloned())
    }

    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Conversation>> {
        let store = self.conversations.read().await;
        Ok(Self::sorted(
            store
                .values()
                .filter(|c| c.campaign_id == campaign_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list_by_status(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<Vec<Conversation>> {
        let store = self.conversations.read().await;
        Ok(Self::sorted(
            store
                .values()
                .filter(|c| c.campaign_id == campaign_id && statuses.contains(&c.status))
                .cloned()
                .collect(),
        ))
    }

    async fn exists_with_status(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<bool> {
        let store = self.conversations.read().await;
        Ok(store
            .values()
            .any(|c| c.campaign_id == campaign_id && statuses.contains(&c.status)))
    }

    async fn max_sequence(&self, campaign_id: Uuid) -> Result<i32> {
        let store = self.conversations.read().await;
        Ok(store
            .values()
            .filter(|c| c.campaign_id == campaign_id)
            .map(|c| c.sequence_number)
            .max()
            .unwrap_or(0))
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
        reason: Option<FailureReason>,
    ) -> Result<bool> {
        let mut store = self.conversations.write().await;
        let Some(conversation) = store.get_mut(&id) else {
            return Ok(false);
        };
        if !conversation.status.can_transition_to(status) {
            return Ok(false);
        }
        conversation.status = status;
        if let Some(reason) = reason {
            conversation.reason_code = reason.code;
            conversation.reason_message = Some(reason.message);
        }
        conversation.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_where(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<u64> {
        let mut store = self.conversations.write().await;
        let mut changed = 0;
        for conversation in store
            .values_mut()
            .filter(|c| c.campaign_id == campaign_id && statuses.contains(&c.status))
        {
            conversation.status = ConversationStatus::Completed;
            conversation.updated_at = Utc::now();
            changed += 1;
        }
        Ok(changed)
    }

    async fn update_call_duration(&self, id: Uuid, seconds: i32) -> Result<()> {
        if let Some(c) = self.conversations.write().await.get_mut(&id) {
            c.call_duration = Some(seconds);
        }
        Ok(())
    }

    async fn update_recording(&self, id: Uuid, url: &str, duration: i32) -> Result<()> {
        if let Some(c) = self.conversations.write().await.get_mut(&id) {
            c.recording_url = Some(url.to_string());
            c.recording_duration = Some(duration);
        }
        Ok(())
    }

    async fn mark_skipped(&self, id: Uuid) -> Result<()> {
        if let Some(c) = self.conversations.write().await.get_mut(&id) {
            c.skipped = true;
            c.skip_cooldown = true;
        }
        Ok(())
    }

    async fn set_note(&self, id: Uuid, note_id: Uuid) -> Result<()> {
        if let Some(c) = self.conversations.write().await.get_mut(&id) {
            c.note_id = Some(note_id);
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryParticipantRepository {
    calls: Arc<RwLock<Vec<ParticipantCall>>>,
}

impl InMemoryParticipantRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ParticipantLedger for InMemoryParticipantRepository {
    async fn insert(&self, call: &ParticipantCall) -> Result<()> {
        self.calls.write().await.push(call.clone());
        Ok(())
    }

    async fn list_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<ParticipantCall>> {
        Ok(self
            .calls
            .read()
            .await
            .iter()
            .filter(|c| c.conversation_id == conversation_id)
            .cloned()
            .collect())
    }

    async fn find_by_leg(&self, leg_sid: &str) -> Result<Option<ParticipantCall>> {
        Ok(self
            .calls
            .read()
            .await
            .iter()
            .find(|c| c.leg_sid == leg_sid)
            .cloned())
    }

    async fn update_status(&self, leg_sid: &str, status: LegStatus) -> Result<bool> {
        let mut calls = self.calls.write().await;
        match calls.iter_mut().find(|c| c.leg_sid == leg_sid) {
            Some(call) if call.status.can_transition_to(status) => {
                call.status = status;
                call.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_recording(&self, leg_sid: &str, url: &str, duration: i32) -> Result<()> {
        if let Some(call) = self.calls.write().await.iter_mut().find(|c| c.leg_sid == leg_sid) {
            call.recording_url = Some(url.to_string());
            call.recording_duration = Some(duration);
        }
        Ok(())
    }
}

/// Stats rows behind a mutex, so an increment is one read-modify-write
#[derive(Default)]
pub struct InMemoryStatsRepository {
    rows: Mutex<HashMap<Uuid, CampaignStats>>,
}

impl InMemoryStatsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CampaignStatsRepository for InMemoryStatsRepository {
    async fn create_if_absent(&self, stats: &CampaignStats) -> Result<bool> {
        let mut rows = self.rows.lock().await;
        if rows.contains_key(&stats.campaign_id) {
            return Ok(false);
        }
        rows.insert(stats.campaign_id, stats.clone());
        Ok(true)
    }

    async fn get(&self, campaign_id: Uuid) -> Result<Option<CampaignStats>> {
        Ok(self.rows.lock().await.get(&campaign_id).cloned())
    }

    async fn increment(&self, campaign_id: Uuid, field: StatField, delta: i64) -> Result<i64> {
        let mut rows = self.rows.lock().await;
        let stats = rows
            .get_mut(&campaign_id)
            .ok_or_else(|| DomainError::NotFound(format!("stats of campaign {}", campaign_id)))?;
        let value = stats.get(field) + delta;
        stats.set(field, value);
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation(campaign_id: Uuid, seq: i32) -> Conversation {
        Conversation::queued(
            campaign_id,
            &Contact::new("Ada", format!("+1555000{}", seq)),
            seq,
            true,
            1,
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn test_guarded_update_refuses_terminal_rows() {
        let repo = InMemoryConversationRepository::new();
        let c = conversation(Uuid::new_v4(), 1);
        repo.insert_many(&[c.clone()]).await.unwrap();

        assert!(repo
            .update_status(c.id, ConversationStatus::Busy, None)
            .await
            .unwrap());
        assert!(!repo
            .update_status(c.id, ConversationStatus::InProgress, None)
            .await
            .unwrap());
        assert_eq!(repo.get(c.id).await.unwrap().unwrap().status, ConversationStatus::Busy);
    }

    #[tokio::test]
    async fn test_duplicate_sequence_is_rejected() {
        let repo = InMemoryConversationRepository::new();
        let campaign_id = Uuid::new_v4();
        repo.insert_many(&[conversation(campaign_id, 1)]).await.unwrap();
        assert!(repo.insert_many(&[conversation(campaign_id, 1)]).await.is_err());
        assert_eq!(repo.max_sequence(campaign_id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats_increment_requires_row() {
        let repo = InMemoryStatsRepository::new();
        let campaign_id = Uuid::new_v4();
        assert!(repo
            .increment(campaign_id, StatField::AnsweredCalls, 1)
            .await
            .is_err());

        assert!(repo.create_if_absent(&CampaignStats::new(campaign_id, 2)).await.unwrap());
        assert!(!repo.create_if_absent(&CampaignStats::new(campaign_id, 9)).await.unwrap());
        assert_eq!(repo.increment(campaign_id, StatField::AnsweredCalls, 1).await.unwrap(), 1);
        assert_eq!(repo.get(campaign_id).await.unwrap().unwrap().total_contacts, 2);
    }
}
