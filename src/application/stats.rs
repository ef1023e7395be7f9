//! Campaign statistics accumulator

use crate::domain::stats::{CampaignStats, CampaignStatsRepository, StatField};
use crate::domain::shared::Result;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub struct StatsAccumulator {
    repository: Arc<dyn CampaignStatsRepository>,
}

impl StatsAccumulator {
    pub fn new(repository: Arc<dyn CampaignStatsRepository>) -> Self {
        Self { repository }
    }

    /// Create the stats row of a campaign on its first run
    pub async fn open(&self, campaign_id: Uuid, total_contacts: i64) -> Result<()> {
        let created = self
            .repository
            .create_if_absent(&CampaignStats::new(campaign_id, total_contacts))
            .await?;
        if created {
            info!("Created stats for campaign {} ({} contacts)", campaign_id, total_contacts);
        }
        Ok(())
    }

    /// Add `delta` to one counter under the row lock
    pub async fn increment(&self, campaign_id: Uuid, field: StatField, delta: i64) -> Result<i64> {
        let value = self.repository.increment(campaign_id, field, delta).await?;
        debug!("Campaign {} {} += {} -> {}", campaign_id, field.column(), delta, value);
        Ok(value)
    }

    pub async fn get(&self, campaign_id: Uuid) -> Result<Option<CampaignStats>> {
        self.repository.get(campaign_id).await
    }
}
