//! Bridge event dispatcher
//!
//! Consumes the provider's bridge webhooks and drives a campaign from one
//! contact to the next. Every handler starts by re-reading the campaign's
//! cached state; no state means the campaign stopped dialing and the event is
//! dropped without touching anything.

use crate::application::advance::Advancer;
use crate::application::billing_meter::BillingMeter;
use crate::application::jobs::JobPublisher;
use crate::application::state_cache::{conversation_key, leg_key, CampaignStateCache};
use crate::config::DialerConfig;
use crate::domain::billing::{ChargeContext, ChargeOutcome};
use crate::domain::callback_token::CallbackToken;
use crate::domain::conversation::{ConversationLedger, ConversationStatus};
use crate::domain::dial_state::{CampaignCacheState, LegSnapshot, LiveLegs, RunStatus};
use crate::domain::jobs::{Job, Schedule};
use crate::domain::participant::{derive_outcome, LegStatus, LegType, ParticipantCall, ParticipantLedger};
use crate::domain::provider::BridgeProvider;
use crate::domain::shared::{DomainError, Result};
use crate::domain::stats::StatField;
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Bridge webhook kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeEventKind {
    LegJoined,
    LegLeft,
    BridgeEnded,
}

impl BridgeEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeEventKind::LegJoined => "leg-joined",
            BridgeEventKind::LegLeft => "leg-left",
            BridgeEventKind::BridgeEnded => "bridge-ended",
        }
    }

    /// Parse the provider's status callback event name
    pub fn from_provider(s: &str) -> Option<Self> {
        match s {
            "participant-join" => Some(BridgeEventKind::LegJoined),
            "participant-leave" => Some(BridgeEventKind::LegLeft),
            "conference-end" => Some(BridgeEventKind::BridgeEnded),
            _ => None,
        }
    }
}

/// A bridge webhook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeEvent {
    pub kind: BridgeEventKind,
    pub bridge_name: String,
    pub bridge_sid: String,
    /// Join order of the leg inside the bridge
    pub leg_sequence: Option<i32>,
    pub leg_sid: Option<String>,
    pub reason_code: Option<i32>,
    pub reason_message: Option<String>,
}

pub struct BridgeEventDispatcher {
    conversations: Arc<dyn ConversationLedger>,
    participants: Arc<dyn ParticipantLedger>,
    provider: Arc<dyn BridgeProvider>,
    cache: Arc<CampaignStateCache>,
    billing: Arc<BillingMeter>,
    advancer: Advancer,
    jobs: JobPublisher,
    config: DialerConfig,
}

impl BridgeEventDispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        conversations: Arc<dyn ConversationLedger>,
        participants: Arc<dyn ParticipantLedger>,
        provider: Arc<dyn BridgeProvider>,
        cache: Arc<CampaignStateCache>,
        billing: Arc<BillingMeter>,
        advancer: Advancer,
        jobs: JobPublisher,
        config: DialerConfig,
    ) -> Self {
        Self {
            conversations,
            participants,
            provider,
            cache,
            billing,
            advancer,
            jobs,
            config,
        }
    }

    /// Webhook entry point. Errors are logged and never reach the provider.
    pub async fn on_bridge_event(&self, token: &CallbackToken, event: &BridgeEvent) {
        counter!("dialer_webhooks_total", "event" => event.kind.as_str()).increment(1);
        if let Err(e) = self.handle(token, event).await {
            error!(
                "Failed to handle {} for bridge {} of campaign {}: {}",
                event.kind.as_str(),
                event.bridge_name,
                token.campaign_id,
                e
            );
        }
    }

    /// Leg status callback entry point
    pub async fn on_leg_status(&self, token: &CallbackToken, leg_sid: &str, status: &str) {
        counter!("dialer_webhooks_total", "event" => "leg-status").increment(1);
        if let Err(e) = self.handle_leg_status(token, leg_sid, status).await {
            error!("Failed to handle status {} of leg {}: {}", status, leg_sid, e);
        }
    }

    /// Recording callback entry point
    pub async fn on_recording(&self, token: &CallbackToken, url: &str, duration: i32) {
        counter!("dialer_webhooks_total", "event" => "recording").increment(1);
        if let Err(e) = self.handle_recording(token, url, duration).await {
            error!(
                "Failed to store recording of conversation {}: {}",
                token.conversation_id, e
            );
        }
    }

    pub async fn handle(&self, token: &CallbackToken, event: &BridgeEvent) -> Result<()> {
        let Some(state) = self.cache.get(token.campaign_id).await? else {
            debug!(
                "Campaign {} not dialing, ignoring {}",
                token.campaign_id,
                event.kind.as_str()
            );
            return Ok(());
        };

        match event.kind {
            BridgeEventKind::LegJoined => self.leg_joined(token, &state, event).await,
            BridgeEventKind::LegLeft => self.leg_left(token, &state, event).await,
            BridgeEventKind::BridgeEnded => self.bridge_ended(token).await,
        }
    }

    async fn leg_joined(
        &self,
        token: &CallbackToken,
        state: &CampaignCacheState,
        event: &BridgeEvent,
    ) -> Result<()> {
        let contact = state
            .by_bridge(&event.bridge_name)
            .or_else(|| state.by_conversation(token.conversation_id))
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("bridge {}", event.bridge_name)))?;

        if event.leg_sequence == Some(1) && !token.is_reattempt {
            let charge = ChargeContext {
                workspace_id: token.workspace_id,
                campaign_id: token.campaign_id,
                conversation_id: contact.conversation_id,
                bridge_name: event.bridge_name.clone(),
                bridge_sid: event.bridge_sid.clone(),
                leg_sid: event.leg_sid.clone().unwrap_or_default(),
                from: state.dialing_number.clone(),
                to: contact.contact_number.clone(),
            };
            match self.billing.schedule_first_charge(&charge).await {
                Ok(ChargeOutcome::InsufficientCredit) => {
                    return self.billing.force_complete(&charge).await;
                }
                Ok(ChargeOutcome::Charged(_)) => {}
                Err(e) => error!(
                    "First charge of conversation {} failed: {}",
                    contact.conversation_id, e
                ),
            }
        }

        let leg_sid = event
            .leg_sid
            .as_deref()
            .ok_or_else(|| DomainError::InvalidOperation("leg-joined without leg".to_string()))?;
        let Some(snapshot) = self.cache.get_leg(leg_sid).await? else {
            self.provider
                .terminate_bridge(&state.credentials, &event.bridge_name)
                .await?;
            return Err(DomainError::NotFound(format!("leg {}", leg_sid)));
        };

        if snapshot.leg_type != LegType::Agent {
            debug!("Contact leg {} joined bridge {}", leg_sid, event.bridge_name);
            return Ok(());
        }
        if self.cache.get_live_legs(contact.conversation_id).await?.is_some() {
            debug!(
                "Contact of conversation {} already placed",
                contact.conversation_id
            );
            return Ok(());
        }

        let placed = self
            .provider
            .dial_external_number(
                &state.credentials,
                &event.bridge_sid,
                &contact.contact_number,
                &state.dialing_number,
                &token.encode(),
            )
            .await;

        match placed {
            Ok(leg) => {
                info!(
                    "Placed contact leg {} for conversation {}",
                    leg.sid, contact.conversation_id
                );
                self.cache
                    .put_live_legs(
                        contact.conversation_id,
                        &LiveLegs {
                            client_leg_sid: leg.sid.clone(),
                            status: "initiated".to_string(),
                        },
                    )
                    .await?;
                self.cache
                    .put_leg(
                        &leg.sid,
                        &LegSnapshot {
                            campaign_id: token.campaign_id,
                            conversation_id: contact.conversation_id,
                            leg_type: LegType::Client,
                        },
                    )
                    .await?;
                self.participants
                    .insert(&ParticipantCall::placed(
                        contact.conversation_id,
                        LegType::Client,
                        leg.sid,
                        state.assignee_id,
                    ))
                    .await
            }
            Err(failure) => {
                let reason = failure.reason();
                warn!(
                    "Provider rejected contact {} of conversation {}: {}",
                    contact.contact_number, contact.conversation_id, reason.message
                );
                counter!("dialer_dials_failed_total", "leg" => "client").increment(1);
                self.conversations
                    .update_status(contact.conversation_id, ConversationStatus::Failed, Some(reason))
                    .await?;
                self.provider
                    .terminate_bridge(&state.credentials, &event.bridge_name)
                    .await
            }
        }
    }

    async fn leg_left(
        &self,
        token: &CallbackToken,
        state: &CampaignCacheState,
        event: &BridgeEvent,
    ) -> Result<()> {
        let leg_sid = event
            .leg_sid
            .as_deref()
            .ok_or_else(|| DomainError::InvalidOperation("leg-left without leg".to_string()))?;
        let snapshot = self
            .cache
            .get_leg(leg_sid)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("leg {}", leg_sid)))?;

        if snapshot.leg_type == LegType::Client {
            return self
                .provider
                .terminate_bridge(&state.credentials, &event.bridge_name)
                .await;
        }

        self.advance(token, event).await
    }

    /// Move the campaign past the conversation whose agent leg just left
    async fn advance(&self, token: &CallbackToken, event: &BridgeEvent) -> Result<()> {
        let _guard = self.cache.lock(token.campaign_id).await;
        let Some(mut state) = self.cache.get(token.campaign_id).await? else {
            return Ok(());
        };
        if state.status == RunStatus::DialingCompleted {
            return Ok(());
        }

        let finished = state
            .by_bridge(&event.bridge_name)
            .or_else(|| state.by_conversation(token.conversation_id))
            .cloned()
            .ok_or_else(|| DomainError::NotFound(format!("bridge {}", event.bridge_name)))?;
        if finished.sequence_number != state.current_sequence {
            debug!(
                "Stale agent leg-left for sequence {} (pointer at {}) in campaign {}",
                finished.sequence_number, state.current_sequence, state.campaign_id
            );
            return Ok(());
        }

        if let Err(e) = self
            .provider
            .terminate_bridge(&state.credentials, &event.bridge_name)
            .await
        {
            warn!("Could not terminate bridge {}: {}", event.bridge_name, e);
        }

        let cool_off = if finished.skip_cooldown {
            0
        } else {
            state.settings.cool_off_secs()
        };
        self.advancer
            .advance(&mut state, finished.sequence_number, cool_off)
            .await?;
        Ok(())
    }

    async fn bridge_ended(&self, token: &CallbackToken) -> Result<()> {
        self.jobs
            .publish(
                format!("finalize:{}", token.conversation_id),
                Job::FinalizeConversation {
                    token: token.clone(),
                },
                Schedule::after_secs(self.config.finalize_delay_secs),
            )
            .await
    }

    /// Settle a conversation once its bridge is gone
    pub async fn finalize_conversation(&self, token: &CallbackToken) -> Result<()> {
        let conversation_id = token.conversation_id;
        let legs = self.participants.list_for_conversation(conversation_id).await?;
        let outcome = derive_outcome(&legs);
        let changed = self
            .conversations
            .update_status(conversation_id, outcome, None)
            .await?;
        debug!(
            "Conversation {} outcome {} (applied: {})",
            conversation_id,
            outcome.as_str(),
            changed
        );

        let answered = legs
            .iter()
            .any(|leg| leg.leg_type == LegType::Client && leg.status.was_answered());

        if answered {
            let duration = match self.cache.get(token.campaign_id).await? {
                Some(state) => self
                    .provider
                    .fetch_bridge(&state.credentials, &token.bridge_name)
                    .await?
                    .map(|bridge| bridge.duration_secs())
                    .unwrap_or(0),
                None => {
                    warn!("No credentials to measure bridge {}", token.bridge_name);
                    0
                }
            };
            self.conversations
                .update_call_duration(conversation_id, duration)
                .await?;
            self.jobs
                .publish(
                    format!("answered:{}", conversation_id),
                    Job::IncrementStat {
                        campaign_id: token.campaign_id,
                        field: StatField::AnsweredCalls,
                        delta: 1,
                    },
                    Schedule::after_secs(self.config.stat_delay_secs),
                )
                .await?;
            self.jobs
                .publish(
                    format!("duration:{}", conversation_id),
                    Job::IncrementStat {
                        campaign_id: token.campaign_id,
                        field: StatField::ActiveCallDuration,
                        delta: duration as i64,
                    },
                    Schedule::after_secs(self.config.stat_delay_secs),
                )
                .await?;
        } else {
            self.jobs
                .publish(
                    format!("unanswered:{}", conversation_id),
                    Job::IncrementStat {
                        campaign_id: token.campaign_id,
                        field: StatField::UnansweredCalls,
                        delta: 1,
                    },
                    Schedule::after_secs(self.config.stat_delay_secs),
                )
                .await?;
        }

        self.cache.delete_key(&conversation_key(conversation_id)).await
    }

    /// Call status callback of an agent or contact leg
    pub async fn handle_leg_status(&self, token: &CallbackToken, leg_sid: &str, status: &str) -> Result<()> {
        if self.cache.get(token.campaign_id).await?.is_none() {
            return Ok(());
        }
        if status == "initiated" {
            return Ok(());
        }
        let Some(leg_status) = LegStatus::from_provider(status) else {
            warn!("Unknown call status {} for leg {}", status, leg_sid);
            return Ok(());
        };

        if !self.participants.update_status(leg_sid, leg_status).await? {
            debug!("Ignoring status {} for leg {}: unknown or already past it", status, leg_sid);
            return Ok(());
        }

        let leg_type = match self.cache.get_leg(leg_sid).await? {
            Some(snapshot) => Some(snapshot.leg_type),
            None => self
                .participants
                .find_by_leg(leg_sid)
                .await?
                .map(|call| call.leg_type),
        };

        if leg_type == Some(LegType::Client) {
            if let Some(conversation_status) = leg_status.as_conversation_status() {
                self.conversations
                    .update_status(token.conversation_id, conversation_status, None)
                    .await?;
            }
            if let Some(mut live) = self.cache.get_live_legs(token.conversation_id).await? {
                live.status = leg_status.as_str().to_string();
                self.cache.put_live_legs(token.conversation_id, &live).await?;
            }
        }

        if leg_status.is_terminal() {
            self.jobs
                .publish(
                    format!("expire:{}", leg_sid),
                    Job::ExpireCacheKey { key: leg_key(leg_sid) },
                    Schedule::after_secs(self.config.leg_cache_ttl_secs),
                )
                .await?;
        }
        Ok(())
    }

    pub async fn handle_recording(&self, token: &CallbackToken, url: &str, duration: i32) -> Result<()> {
        if self.cache.get(token.campaign_id).await?.is_none() {
            return Ok(());
        }
        self.conversations
            .update_recording(token.conversation_id, url, duration)
            .await
    }
}
