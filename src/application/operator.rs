//! Operator actions on a single conversation

use crate::application::advance::Advancer;
use crate::application::jobs::JobPublisher;
use crate::application::state_cache::CampaignStateCache;
use crate::domain::conversation::{Conversation, ConversationLedger, ConversationStatus};
use crate::domain::dial_state::{CampaignCacheState, LiveLegs};
use crate::domain::jobs::{Job, Schedule};
use crate::domain::provider::{BridgeProvider, RecordingAction};
use crate::domain::shared::{DomainError, Result};
use crate::domain::stats::StatField;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct ConversationOperator {
    conversations: Arc<dyn ConversationLedger>,
    provider: Arc<dyn BridgeProvider>,
    cache: Arc<CampaignStateCache>,
    advancer: Advancer,
    jobs: JobPublisher,
    stat_delay_secs: u64,
}

impl ConversationOperator {
    pub fn new(
        conversations: Arc<dyn ConversationLedger>,
        provider: Arc<dyn BridgeProvider>,
        cache: Arc<CampaignStateCache>,
        advancer: Advancer,
        jobs: JobPublisher,
        stat_delay_secs: u64,
    ) -> Self {
        Self {
            conversations,
            provider,
            cache,
            advancer,
            jobs,
            stat_delay_secs,
        }
    }

    /// Skip a contact.
    ///
    /// A future contact leaves the queue. The contact under the pointer is
    /// either passed over before its dial, or its live call is ended and the
    /// campaign moves on without the cool-off.
    pub async fn skip(&self, conversation_id: Uuid) -> Result<()> {
        let conversation = self.load(conversation_id).await?;
        if conversation.status.is_terminal() {
            return Err(DomainError::InvalidOperation(
                "Conversation already finished. Can not skip.".to_string(),
            ));
        }

        let _guard = self.cache.lock(conversation.campaign_id).await;
        self.conversations.mark_skipped(conversation_id).await?;
        self.conversations
            .update_status(conversation_id, ConversationStatus::Completed, None)
            .await?;

        let Some(mut state) = self.cache.get(conversation.campaign_id).await? else {
            return Ok(());
        };
        let Some(contact) = state.by_conversation(conversation_id).cloned() else {
            return Ok(());
        };
        info!(
            "Skipping sequence {} of campaign {}",
            contact.sequence_number, state.campaign_id
        );

        if contact.sequence_number != state.current_sequence {
            state.remove(conversation_id);
            return self.cache.put(&state).await;
        }

        if conversation.status == ConversationStatus::InQueue {
            // Not dialed yet; the scheduled dial goes stale
            self.advancer
                .advance(&mut state, contact.sequence_number, 0)
                .await?;
            return Ok(());
        }

        if let Some(current) = state
            .queue
            .iter_mut()
            .find(|c| c.conversation_id == conversation_id)
        {
            current.skip_cooldown = true;
        }
        self.cache.put(&state).await?;
        self.provider
            .terminate_bridge(&state.credentials, &conversation.bridge_name)
            .await
    }

    /// Put the contact on hold, or take it off hold
    pub async fn hold(&self, conversation_id: Uuid, hold: bool) -> Result<()> {
        let verb = if hold { "hold" } else { "unhold" };
        let live = self
            .live_legs(conversation_id, &format!("Can not {} call.", verb))
            .await?;
        let conversation = self.load(conversation_id).await?;
        let state = self
            .running(conversation.campaign_id, &format!("Can not {} call.", verb))
            .await?;

        self.provider
            .hold_leg(
                &state.credentials,
                &conversation.bridge_name,
                &live.client_leg_sid,
                hold,
            )
            .await?;
        let status = if hold {
            ConversationStatus::OnHold
        } else {
            ConversationStatus::InProgress
        };
        self.conversations
            .update_status(conversation_id, status, None)
            .await?;
        debug!("Conversation {} {}", conversation_id, verb);
        Ok(())
    }

    /// Play the campaign's voicemail to the contact
    pub async fn drop_voicemail(&self, conversation_id: Uuid) -> Result<()> {
        let conversation = self.load(conversation_id).await?;
        let state = self
            .running(conversation.campaign_id, "Can not drop voicemail.")
            .await?;
        if !state.settings.voicemail_enabled {
            return Err(DomainError::InvalidOperation(
                "Voicemail drop is not enabled for this campaign.".to_string(),
            ));
        }
        let url = state.settings.voicemail_url.clone().ok_or_else(|| {
            DomainError::InvalidOperation("No voicemail configured for this campaign.".to_string())
        })?;
        let live = self
            .live_legs(conversation_id, "Can not drop voicemail.")
            .await?;

        self.provider
            .drop_voicemail(&state.credentials, &live.client_leg_sid, &url)
            .await?;
        info!("Dropped voicemail on conversation {}", conversation_id);

        self.jobs
            .publish(
                format!("voicemail:{}", conversation_id),
                Job::IncrementStat {
                    campaign_id: conversation.campaign_id,
                    field: StatField::VoicemailDrops,
                    delta: 1,
                },
                Schedule::after_secs(self.stat_delay_secs),
            )
            .await
    }

    pub async fn control_recording(&self, conversation_id: Uuid, action: RecordingAction) -> Result<()> {
        let conversation = self.load(conversation_id).await?;
        let state = self
            .running(conversation.campaign_id, "Can not control recording.")
            .await?;
        if !state.settings.recording_enabled {
            return Err(DomainError::InvalidOperation(
                "Recording is not enabled for this campaign.".to_string(),
            ));
        }
        self.live_legs(conversation_id, "Can not control recording.")
            .await?;
        self.provider
            .control_recording(&state.credentials, &conversation.bridge_name, action)
            .await
    }

    pub async fn set_note(&self, conversation_id: Uuid, note_id: Uuid) -> Result<()> {
        self.load(conversation_id).await?;
        self.conversations.set_note(conversation_id, note_id).await
    }

    async fn live_legs(&self, conversation_id: Uuid, action: &str) -> Result<LiveLegs> {
        self.cache
            .get_live_legs(conversation_id)
            .await?
            .ok_or_else(|| {
                DomainError::InvalidOperation(format!("Conversation not active. {}", action))
            })
    }

    async fn running(&self, campaign_id: Uuid, action: &str) -> Result<CampaignCacheState> {
        self.cache.get(campaign_id).await?.ok_or_else(|| {
            DomainError::InvalidOperation(format!("Campaign is not dialing. {}", action))
        })
    }

    async fn load(&self, conversation_id: Uuid) -> Result<Conversation> {
        self.conversations
            .get(conversation_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("conversation {}", conversation_id)))
    }
}
