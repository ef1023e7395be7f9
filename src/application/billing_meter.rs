//! Usage metering of dialed calls
//!
//! The first tick runs when the first leg joins a bridge. While the bridge
//! stays active a recurring job charges connect time every interval; once the
//! bridge is gone one settlement charge closes the meter. Running out of
//! credit force-completes the conversation and ends the call.

use crate::application::jobs::JobPublisher;
use crate::application::state_cache::CampaignStateCache;
use crate::config::BillingConfig;
use crate::domain::billing::{
    BillingGateway, BillingKind, ChargeContext, ChargeOutcome, ChargeRequest,
    DEFAULT_TOTAL_PARTICIPANTS,
};
use crate::domain::conversation::{ConversationLedger, ConversationStatus};
use crate::domain::jobs::{Job, Schedule};
use crate::domain::provider::BridgeProvider;
use crate::domain::shared::{ProviderCredentials, Result};
use metrics::counter;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct BillingMeter {
    billing: Arc<dyn BillingGateway>,
    provider: Arc<dyn BridgeProvider>,
    conversations: Arc<dyn ConversationLedger>,
    cache: Arc<CampaignStateCache>,
    jobs: JobPublisher,
    config: BillingConfig,
}

impl BillingMeter {
    pub fn new(
        billing: Arc<dyn BillingGateway>,
        provider: Arc<dyn BridgeProvider>,
        conversations: Arc<dyn ConversationLedger>,
        cache: Arc<CampaignStateCache>,
        jobs: JobPublisher,
        config: BillingConfig,
    ) -> Self {
        Self {
            billing,
            provider,
            conversations,
            cache,
            jobs,
            config,
        }
    }

    /// Whether the workspace may place or keep calls
    pub async fn has_sufficient_credit(&self, workspace_id: uuid::Uuid) -> Result<bool> {
        let credit = self.billing.workspace_credit(workspace_id).await?;
        Ok(credit > self.config.credit_threshold)
    }

    /// Charge bridge and leg setup, plus connect time when the bridge is live
    pub async fn schedule_first_charge(&self, ctx: &ChargeContext) -> Result<ChargeOutcome> {
        let active = self.bridge_active(ctx).await?;

        let mut kinds = vec![BillingKind::Sip, BillingKind::Bridge];
        if active {
            kinds.push(BillingKind::Call);
        }

        let outcome = self.execute(ctx, kinds, DEFAULT_TOTAL_PARTICIPANTS, active).await?;
        debug!("First charge for conversation {}: {:?}", ctx.conversation_id, outcome);
        if active && matches!(outcome, ChargeOutcome::Charged(_)) {
            self.jobs
                .publish_unique(
                    Job::RecurringCharge { charge: ctx.clone() },
                    Schedule::after_secs(self.config.first_charge_delay_secs),
                )
                .await?;
        }
        Ok(outcome)
    }

    /// One recurring tick
    pub async fn recurring_charge(&self, ctx: &ChargeContext) -> Result<ChargeOutcome> {
        let outcome = if self.bridge_active(ctx).await? {
            let outcome = self
                .execute(
                    ctx,
                    vec![BillingKind::Sip, BillingKind::Bridge, BillingKind::Call],
                    DEFAULT_TOTAL_PARTICIPANTS,
                    true,
                )
                .await?;
            if matches!(outcome, ChargeOutcome::Charged(_)) {
                self.jobs
                    .publish_unique(
                        Job::RecurringCharge { charge: ctx.clone() },
                        Schedule::after_secs(self.config.recharge_interval_secs),
                    )
                    .await?;
            }
            outcome
        } else {
            info!(
                "Bridge {} no longer active, settling conversation {}",
                ctx.bridge_name, ctx.conversation_id
            );
            self.execute(ctx, vec![BillingKind::Sip, BillingKind::Bridge], 1, false)
                .await?
        };

        if outcome == ChargeOutcome::InsufficientCredit {
            self.force_complete(ctx).await?;
        }
        Ok(outcome)
    }

    /// End the call of a conversation whose workspace ran out of credit
    pub async fn force_complete(&self, ctx: &ChargeContext) -> Result<()> {
        warn!(
            "Insufficient credit in workspace {}, completing conversation {}",
            ctx.workspace_id, ctx.conversation_id
        );
        self.conversations
            .update_status(ctx.conversation_id, ConversationStatus::Completed, None)
            .await?;
        if let Some(credentials) = self.credentials(ctx).await? {
            self.provider
                .terminate_bridge(&credentials, &ctx.bridge_name)
                .await?;
        }
        Ok(())
    }

    async fn execute(
        &self,
        ctx: &ChargeContext,
        kinds: Vec<BillingKind>,
        total_participants: u32,
        in_progress: bool,
    ) -> Result<ChargeOutcome> {
        if !self.has_sufficient_credit(ctx.workspace_id).await? {
            counter!("billing_charges_total", "outcome" => "insufficient_credit").increment(1);
            return Ok(ChargeOutcome::InsufficientCredit);
        }

        let request = ChargeRequest {
            workspace_id: ctx.workspace_id,
            parent_leg_sid: ctx.leg_sid.clone(),
            bridge_sid: ctx.bridge_sid.clone(),
            from: ctx.from.clone(),
            to: ctx.to.clone(),
            total_participants,
            billing_kinds: kinds.iter().map(BillingKind::code).collect(),
            is_call_in_progress: in_progress,
            remarks: format!("Power dialer conversation {}", ctx.conversation_id),
        };
        let receipt = self.billing.charge_outbound_call(&request).await?;

        let outcome = if receipt.success { "charged" } else { "rejected" };
        counter!("billing_charges_total", "outcome" => outcome).increment(1);
        Ok(ChargeOutcome::Charged(receipt))
    }

    /// A bridge of a campaign that is no longer cached counts as inactive
    async fn bridge_active(&self, ctx: &ChargeContext) -> Result<bool> {
        let Some(credentials) = self.credentials(ctx).await? else {
            return Ok(false);
        };
        let bridge = self
            .provider
            .fetch_bridge(&credentials, &ctx.bridge_name)
            .await?;
        Ok(bridge.map(|b| b.status.is_active()).unwrap_or(false))
    }

    async fn credentials(&self, ctx: &ChargeContext) -> Result<Option<ProviderCredentials>> {
        Ok(self
            .cache
            .get(ctx.campaign_id)
            .await?
            .map(|state| state.credentials))
    }
}
