//! Moving a campaign's dial pointer forward

use crate::application::jobs::JobPublisher;
use crate::application::state_cache::CampaignStateCache;
use crate::config::DialerConfig;
use crate::domain::campaign::CampaignRepository;
use crate::domain::dial_state::{CampaignCacheState, QueuedContact, RunStatus};
use crate::domain::jobs::{Job, Schedule};
use crate::domain::shared::Result;
use std::sync::Arc;
use tracing::{debug, info};

/// Caller must hold the campaign's cache lock.
#[derive(Clone)]
pub struct Advancer {
    campaigns: Arc<dyn CampaignRepository>,
    cache: Arc<CampaignStateCache>,
    jobs: JobPublisher,
    config: DialerConfig,
}

impl Advancer {
    pub fn new(
        campaigns: Arc<dyn CampaignRepository>,
        cache: Arc<CampaignStateCache>,
        jobs: JobPublisher,
        config: DialerConfig,
    ) -> Self {
        Self {
            campaigns,
            cache,
            jobs,
            config,
        }
    }

    /// Point the campaign at the contact after `from_sequence` and schedule
    /// its dial, or mark dialing completed and schedule the deferred end.
    ///
    /// Returns the contact that will be dialed next.
    pub async fn advance(
        &self,
        state: &mut CampaignCacheState,
        from_sequence: i32,
        cool_off_secs: u64,
    ) -> Result<Option<QueuedContact>> {
        match state.after(from_sequence).cloned() {
            None => {
                info!("Campaign {} dialed its last contact", state.campaign_id);
                state.status = RunStatus::DialingCompleted;
                state.next_number_to_dial = None;
                self.cache.put(state).await?;
                self.campaigns
                    .update_next_number_to_dial(state.campaign_id, None)
                    .await?;
                self.jobs
                    .publish(
                        format!("end:{}:{}", state.campaign_id, state.started_at.timestamp_millis()),
                        Job::EndCampaign {
                            campaign_id: state.campaign_id,
                        },
                        Schedule::after_secs(self.config.end_grace_secs),
                    )
                    .await?;
                Ok(None)
            }
            Some(next) => {
                state.point_at(&next);
                self.cache.put(state).await?;
                self.campaigns
                    .update_next_number_to_dial(state.campaign_id, Some(next.contact_number.clone()))
                    .await?;

                let delay = self.config.next_dial_delay_secs + cool_off_secs;
                debug!(
                    "Campaign {} advancing to sequence {} in {}s",
                    state.campaign_id, next.sequence_number, delay
                );
                self.jobs
                    .publish(
                        format!("dial:{}", next.conversation_id),
                        Job::DialContact {
                            campaign_id: state.campaign_id,
                            conversation_id: next.conversation_id,
                        },
                        Schedule::after_secs(delay),
                    )
                    .await?;
                Ok(Some(next))
            }
        }
    }
}
