//! Dialer control loop
//!
//! The five control commands of a campaign and the dial primitive they share.
//! Every command runs under the campaign's cache lock, so a command never
//! interleaves with a webhook advancing the same campaign.

use crate::application::advance::Advancer;
use crate::application::billing_meter::BillingMeter;
use crate::application::jobs::JobPublisher;
use crate::application::state_cache::CampaignStateCache;
use crate::application::stats::StatsAccumulator;
use crate::domain::callback_token::CallbackToken;
use crate::domain::campaign::{Campaign, CampaignRepository, CampaignStatus, ControlAction};
use crate::domain::conversation::{Conversation, ConversationLedger, ConversationStatus};
use crate::domain::dial_state::{CampaignCacheState, LegSnapshot, QueuedContact, RunStatus};
use crate::domain::foundation::FoundationRpc;
use crate::domain::jobs::{Job, Schedule};
use crate::domain::participant::{LegType, ParticipantCall, ParticipantLedger};
use crate::domain::provider::{AgentDialMetadata, BridgeProvider};
use crate::domain::shared::{DomainError, ProviderCredentials, Result};
use crate::domain::stats::StatField;
use chrono::Utc;
use futures::future::join_all;
use metrics::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const REATTEMPT_CONCLUDED: &str = "The campaign has concluded, and retrying is not possible.";

/// Collaborators of the control loop
pub struct DialerDeps {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub conversations: Arc<dyn ConversationLedger>,
    pub participants: Arc<dyn ParticipantLedger>,
    pub stats: Arc<StatsAccumulator>,
    pub cache: Arc<CampaignStateCache>,
    pub provider: Arc<dyn BridgeProvider>,
    pub foundation: Arc<dyn FoundationRpc>,
    pub billing: Arc<BillingMeter>,
    pub advancer: Advancer,
    pub jobs: JobPublisher,
}

pub struct DialerControlLoop {
    campaigns: Arc<dyn CampaignRepository>,
    conversations: Arc<dyn ConversationLedger>,
    participants: Arc<dyn ParticipantLedger>,
    stats: Arc<StatsAccumulator>,
    cache: Arc<CampaignStateCache>,
    provider: Arc<dyn BridgeProvider>,
    foundation: Arc<dyn FoundationRpc>,
    billing: Arc<BillingMeter>,
    advancer: Advancer,
    jobs: JobPublisher,
    feature_name: String,
    stat_delay_secs: u64,
}

impl DialerControlLoop {
    pub fn new(deps: DialerDeps, feature_name: String, stat_delay_secs: u64) -> Self {
        Self {
            campaigns: deps.campaigns,
            conversations: deps.conversations,
            participants: deps.participants,
            stats: deps.stats,
            cache: deps.cache,
            provider: deps.provider,
            foundation: deps.foundation,
            billing: deps.billing,
            advancer: deps.advancer,
            jobs: deps.jobs,
            feature_name,
            stat_delay_secs,
        }
    }

    /// Operator entry point: workspace gates, then the command
    pub async fn control(&self, campaign_id: Uuid, action: ControlAction, member_id: Uuid) -> Result<Campaign> {
        let campaign = self.load(campaign_id).await?;
        self.ensure_feature_enabled(campaign.workspace_id).await?;

        // Stopping a campaign must work on an empty balance
        if action.target_status() == CampaignStatus::InProgress
            && !self.billing.has_sufficient_credit(campaign.workspace_id).await?
        {
            return Err(DomainError::InsufficientCredit);
        }

        info!("Campaign {} control: {}", campaign_id, action.as_str());
        counter!("dialer_control_total", "action" => action.as_str()).increment(1);

        match action {
            ControlAction::Start => self.start(campaign_id, member_id).await?,
            ControlAction::Pause => self.pause(campaign_id, member_id).await?,
            ControlAction::Resume => self.resume(campaign_id, member_id).await?,
            ControlAction::End => self.end(campaign_id, member_id).await?,
            ControlAction::Reattempt => self.reattempt(campaign_id, member_id).await?,
        }

        self.load(campaign_id).await
    }

    pub async fn start(&self, campaign_id: Uuid, member_id: Uuid) -> Result<()> {
        let _guard = self.cache.lock(campaign_id).await;
        let campaign = self.load(campaign_id).await?;
        match campaign.status {
            CampaignStatus::InProgress => return Err(DomainError::CampaignAlreadyActive),
            CampaignStatus::Ended => {
                return Err(DomainError::CampaignAlreadyEnded(
                    "Cannot re-start completed campaign.".to_string(),
                ))
            }
            _ => {}
        }

        let contacts = self.campaigns.list_contacts(campaign.contact_list_id).await?;
        if contacts.is_empty() {
            return Err(DomainError::NoContactsRemaining);
        }
        let credentials = self.foundation.provider_credentials(campaign.workspace_id).await?;

        let base = self.conversations.max_sequence(campaign.id).await?;
        let conversations: Vec<Conversation> = contacts
            .iter()
            .enumerate()
            .map(|(i, contact)| {
                Conversation::queued(campaign.id, contact, base + i as i32 + 1, true, 1, member_id)
            })
            .collect();
        self.conversations.insert_many(&conversations).await?;
        self.stats.open(campaign.id, contacts.len() as i64).await?;

        info!(
            "Starting campaign {} with {} contacts",
            campaign.id,
            conversations.len()
        );
        self.launch(&campaign, &conversations, credentials, false, member_id)
            .await
    }

    pub async fn pause(&self, campaign_id: Uuid, member_id: Uuid) -> Result<()> {
        let _guard = self.cache.lock(campaign_id).await;
        let campaign = self.load(campaign_id).await?;
        match campaign.status {
            CampaignStatus::Ended => {
                return Err(DomainError::CampaignAlreadyEnded(
                    "Cannot pause completed campaign.".to_string(),
                ))
            }
            CampaignStatus::Paused => return Err(DomainError::CampaignAlreadyPaused),
            _ => {}
        }

        let credentials = self.credentials_for(&campaign).await?;
        self.terminate_live(&campaign, &credentials).await?;
        let completed = self
            .conversations
            .complete_where(campaign.id, &ConversationStatus::LIVE)
            .await?;
        self.cache.delete(campaign.id).await?;
        self.campaigns
            .update_status(campaign.id, CampaignStatus::Paused, member_id)
            .await?;

        info!("Paused campaign {} ({} live conversations stopped)", campaign.id, completed);
        Ok(())
    }

    pub async fn resume(&self, campaign_id: Uuid, member_id: Uuid) -> Result<()> {
        let _guard = self.cache.lock(campaign_id).await;
        let campaign = self.load(campaign_id).await?;
        match campaign.status {
            CampaignStatus::Ended => {
                return Err(DomainError::CampaignAlreadyEnded(
                    "Cannot resume completed campaign.".to_string(),
                ))
            }
            CampaignStatus::InProgress => return Err(DomainError::CampaignAlreadyActive),
            _ => {}
        }

        let checkpoint = campaign
            .next_number_to_dial
            .clone()
            .ok_or(DomainError::NoContactsRemaining)?;
        let all = self.conversations.list_for_campaign(campaign.id).await?;
        let anchor = all
            .iter()
            .filter(|c| c.contact_number == checkpoint)
            .map(|c| c.sequence_number)
            .max()
            .ok_or(DomainError::NoContactsRemaining)?;
        let mut queue: Vec<Conversation> = all
            .into_iter()
            .filter(|c| c.sequence_number >= anchor && !c.status.is_terminal())
            .collect();
        queue.sort_by_key(|c| c.sequence_number);

        let is_reattempt = match queue.first() {
            Some(head) => !head.initial_call,
            None => return Err(DomainError::NoContactsRemaining),
        };
        let credentials = self.foundation.provider_credentials(campaign.workspace_id).await?;

        info!(
            "Resuming campaign {} from {} ({} contacts left)",
            campaign.id,
            checkpoint,
            queue.len()
        );
        self.launch(&campaign, &queue, credentials, is_reattempt, member_id)
            .await
    }

    pub async fn reattempt(&self, campaign_id: Uuid, member_id: Uuid) -> Result<()> {
        let _guard = self.cache.lock(campaign_id).await;
        let campaign = self.load(campaign_id).await?;

        let retryable = self
            .conversations
            .exists_with_status(
                campaign.id,
                &[ConversationStatus::Busy, ConversationStatus::NoAnswer],
            )
            .await?;
        if !retryable {
            return Err(DomainError::CampaignAlreadyEnded(REATTEMPT_CONCLUDED.to_string()));
        }
        if campaign.status == CampaignStatus::InProgress {
            return Err(DomainError::CampaignAlreadyActive);
        }

        let all = self.conversations.list_for_campaign(campaign.id).await?;
        let base = all.iter().map(|c| c.sequence_number).max().unwrap_or(0);

        // Latest attempt of every contact decides whether it is retried
        let mut latest: HashMap<&str, &Conversation> = HashMap::new();
        for conversation in &all {
            latest
                .entry(conversation.contact_number.as_str())
                .and_modify(|seen| {
                    if conversation.sequence_number > seen.sequence_number {
                        *seen = conversation;
                    }
                })
                .or_insert(conversation);
        }
        let mut candidates: Vec<&Conversation> = latest
            .into_values()
            .filter(|c| ConversationStatus::RETRYABLE.contains(&c.status))
            .filter(|c| campaign.settings.allows_attempt(c.current_attempt))
            .collect();
        candidates.sort_by_key(|c| c.sequence_number);
        if candidates.is_empty() {
            return Err(DomainError::CampaignAlreadyEnded(REATTEMPT_CONCLUDED.to_string()));
        }

        let conversations: Vec<Conversation> = candidates
            .iter()
            .enumerate()
            .map(|(i, previous)| {
                Conversation::queued(
                    campaign.id,
                    &previous.contact(),
                    base + i as i32 + 1,
                    false,
                    previous.current_attempt + 1,
                    member_id,
                )
            })
            .collect();
        self.conversations.insert_many(&conversations).await?;
        let credentials = self.foundation.provider_credentials(campaign.workspace_id).await?;

        info!(
            "Reattempting {} contacts of campaign {}",
            conversations.len(),
            campaign.id
        );
        self.launch(&campaign, &conversations, credentials, true, member_id)
            .await
    }

    pub async fn end(&self, campaign_id: Uuid, member_id: Uuid) -> Result<()> {
        let _guard = self.cache.lock(campaign_id).await;
        let campaign = self.load(campaign_id).await?;
        if campaign.status == CampaignStatus::Ended {
            return Err(DomainError::CampaignAlreadyEnded(
                "Campaign has already ended.".to_string(),
            ));
        }
        self.end_run(&campaign, member_id).await
    }

    /// Deferred end of a campaign that dialed its last contact
    pub async fn finish_dialing(&self, campaign_id: Uuid) -> Result<()> {
        let _guard = self.cache.lock(campaign_id).await;
        let Some(state) = self.cache.get(campaign_id).await? else {
            debug!("Campaign {} already stopped, nothing to end", campaign_id);
            return Ok(());
        };
        if state.status != RunStatus::DialingCompleted {
            return Ok(());
        }

        let campaign = self.load(campaign_id).await?;
        if campaign.status == CampaignStatus::Ended {
            return self.cache.delete(campaign_id).await;
        }
        info!("Campaign {} finished dialing, ending", campaign_id);
        self.end_run(&campaign, campaign.created_by).await
    }

    /// Deferred dial of the contact a campaign advanced to
    pub async fn dial_scheduled(&self, campaign_id: Uuid, conversation_id: Uuid) -> Result<()> {
        let _guard = self.cache.lock(campaign_id).await;
        let Some(mut state) = self.cache.get(campaign_id).await? else {
            debug!("Campaign {} stopped before dialing {}", campaign_id, conversation_id);
            return Ok(());
        };
        if state.status != RunStatus::InProgress {
            return Ok(());
        }

        let campaign = self.load(campaign_id).await?;
        if campaign.status != CampaignStatus::InProgress {
            debug!(
                "Campaign {} is {}, not dialing",
                campaign_id,
                campaign.status.as_str()
            );
            return Ok(());
        }

        let Some(contact) = state.by_conversation(conversation_id).cloned() else {
            return Ok(());
        };
        if contact.sequence_number != state.current_sequence {
            debug!(
                "Stale dial for sequence {} (pointer at {})",
                contact.sequence_number, state.current_sequence
            );
            return Ok(());
        }
        match self.conversations.get(conversation_id).await? {
            Some(conversation) if conversation.status == ConversationStatus::InQueue => {}
            _ => {
                debug!("Conversation {} already dialed", conversation_id);
                return Ok(());
            }
        }

        match self.dial(&mut state, &contact).await {
            // The conversation is closed and the run already moved on
            Err(DomainError::ProviderCallFailed { .. }) => Ok(()),
            other => other,
        }
    }

    /// Seed the cache for a new run and dial its first contact
    async fn launch(
        &self,
        campaign: &Campaign,
        conversations: &[Conversation],
        credentials: ProviderCredentials,
        is_reattempt: bool,
        member_id: Uuid,
    ) -> Result<()> {
        let mut state = CampaignCacheState::seed(campaign, conversations, credentials, is_reattempt);
        let head = state.head().cloned().ok_or(DomainError::NoContactsRemaining)?;
        self.cache.put(&state).await?;
        self.campaigns
            .update_status(campaign.id, CampaignStatus::InProgress, member_id)
            .await?;
        self.dial(&mut state, &head).await
    }

    /// Checkpoint, create the bridge and ring the agent.
    ///
    /// A rejected agent leg fails only this conversation: the bridge is torn
    /// down and the run advances before the rejection is returned.
    async fn dial(&self, state: &mut CampaignCacheState, contact: &QueuedContact) -> Result<()> {
        state.point_at(contact);
        self.cache.put(state).await?;
        self.campaigns
            .update_next_number_to_dial(state.campaign_id, Some(contact.contact_number.clone()))
            .await?;
        self.conversations
            .update_status(contact.conversation_id, ConversationStatus::Pending, None)
            .await?;

        let token = CallbackToken {
            workspace_id: state.workspace_id,
            campaign_id: state.campaign_id,
            bridge_name: contact.bridge_name.clone(),
            conversation_id: contact.conversation_id,
            is_reattempt: state.is_reattempt,
        }
        .encode();

        let bridge = self
            .provider
            .create_bridge(
                &state.credentials,
                &contact.bridge_name,
                &token,
                state.settings.recording_enabled,
            )
            .await?;

        let upcoming = state.after(contact.sequence_number);
        let metadata = AgentDialMetadata {
            campaign_id: state.campaign_id,
            conversation_id: contact.conversation_id,
            call_script_id: state.settings.call_script_id,
            cool_off_period: state.settings.cool_off_period,
            contact_name: contact.contact_name.clone(),
            contact_number: contact.contact_number.clone(),
            sequence_number: contact.sequence_number,
            next_number: upcoming.map(|c| c.contact_number.clone()),
            next_conversation_id: upcoming.map(|c| c.conversation_id),
            is_reattempt: state.is_reattempt,
            recording_enabled: state.settings.recording_enabled,
        };

        let identity = state.assignee_id.to_string();
        let leg = match self
            .provider
            .dial_identity(
                &state.credentials,
                &identity,
                &state.dialing_number,
                &bridge,
                &token,
                &metadata,
            )
            .await
        {
            Ok(leg) => leg,
            Err(failure) => {
                let reason = failure.reason();
                error!(
                    "Agent dial for conversation {} rejected: {}",
                    contact.conversation_id, reason.message
                );
                counter!("dialer_dials_failed_total", "leg" => "agent").increment(1);
                self.conversations
                    .update_status(
                        contact.conversation_id,
                        ConversationStatus::Failed,
                        Some(reason.clone()),
                    )
                    .await?;
                if let Err(e) = self
                    .provider
                    .terminate_bridge(&state.credentials, &contact.bridge_name)
                    .await
                {
                    warn!("Could not terminate bridge {}: {}", contact.bridge_name, e);
                }
                self.advancer
                    .advance(state, contact.sequence_number, 0)
                    .await?;
                return Err(DomainError::ProviderCallFailed {
                    code: reason.code,
                    message: reason.message,
                });
            }
        };

        self.participants
            .insert(&ParticipantCall::placed(
                contact.conversation_id,
                LegType::Agent,
                leg.sid.clone(),
                state.assignee_id,
            ))
            .await?;
        self.cache
            .put_leg(
                &leg.sid,
                &LegSnapshot {
                    campaign_id: state.campaign_id,
                    conversation_id: contact.conversation_id,
                    leg_type: LegType::Agent,
                },
            )
            .await?;
        self.jobs
            .publish(
                format!("dialed:{}", contact.conversation_id),
                Job::IncrementStat {
                    campaign_id: state.campaign_id,
                    field: StatField::DialedContacts,
                    delta: 1,
                },
                Schedule::after_secs(self.stat_delay_secs),
            )
            .await?;

        counter!("dialer_dials_total").increment(1);
        info!(
            "Dialed sequence {} of campaign {} (agent leg {})",
            contact.sequence_number, state.campaign_id, leg.sid
        );
        Ok(())
    }

    /// Stop tracking every open conversation and close the run
    async fn end_run(&self, campaign: &Campaign, member_id: Uuid) -> Result<()> {
        let state = self.cache.get(campaign.id).await?;
        let credentials = match &state {
            Some(state) => state.credentials.clone(),
            None => self.foundation.provider_credentials(campaign.workspace_id).await?,
        };

        self.terminate_live(campaign, &credentials).await?;
        let completed = self
            .conversations
            .complete_where(campaign.id, &ConversationStatus::OPEN)
            .await?;
        self.cache.delete(campaign.id).await?;

        if let Some(state) = state {
            let elapsed = (Utc::now() - state.started_at).num_seconds().max(0);
            self.stats
                .increment(campaign.id, StatField::CampaignDuration, elapsed)
                .await?;
        }
        self.campaigns
            .update_status(campaign.id, CampaignStatus::Ended, member_id)
            .await?;

        info!("Ended campaign {} ({} open conversations stopped)", campaign.id, completed);
        Ok(())
    }

    async fn terminate_live(&self, campaign: &Campaign, credentials: &ProviderCredentials) -> Result<()> {
        let live = self
            .conversations
            .list_by_status(campaign.id, &ConversationStatus::LIVE)
            .await?;
        let results = join_all(
            live.iter()
                .map(|c| self.provider.terminate_bridge(credentials, &c.bridge_name)),
        )
        .await;
        for (conversation, result) in live.iter().zip(results) {
            if let Err(e) = result {
                warn!(
                    "Could not terminate bridge {} of conversation {}: {}",
                    conversation.bridge_name, conversation.id, e
                );
            }
        }
        Ok(())
    }

    async fn credentials_for(&self, campaign: &Campaign) -> Result<ProviderCredentials> {
        match self.cache.get(campaign.id).await? {
            Some(state) => Ok(state.credentials),
            None => self.foundation.provider_credentials(campaign.workspace_id).await,
        }
    }

    async fn ensure_feature_enabled(&self, workspace_id: Uuid) -> Result<()> {
        match self
            .foundation
            .workspace_feature(workspace_id, &self.feature_name)
            .await?
        {
            Some(feature) if feature.is_enabled => Ok(()),
            _ => Err(DomainError::FeatureDisabled(
                "Sales dialer feature disabled".to_string(),
            )),
        }
    }

    async fn load(&self, campaign_id: Uuid) -> Result<Campaign> {
        self.campaigns
            .get(campaign_id)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("campaign {}", campaign_id)))
    }
}
