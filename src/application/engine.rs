//! Wiring of the dialer services over a set of ports

use crate::application::advance::Advancer;
use crate::application::billing_meter::BillingMeter;
use crate::application::bridge_events::BridgeEventDispatcher;
use crate::application::dialer::{DialerControlLoop, DialerDeps};
use crate::application::jobs::{JobPublisher, JobRunner};
use crate::application::operator::ConversationOperator;
use crate::application::state_cache::CampaignStateCache;
use crate::application::stats::StatsAccumulator;
use crate::config::{BillingConfig, DialerConfig};
use crate::domain::billing::BillingGateway;
use crate::domain::cache::CacheStore;
use crate::domain::campaign::CampaignRepository;
use crate::domain::conversation::ConversationLedger;
use crate::domain::foundation::FoundationRpc;
use crate::domain::jobs::JobScheduler;
use crate::domain::participant::ParticipantLedger;
use crate::domain::provider::BridgeProvider;
use crate::domain::stats::CampaignStatsRepository;
use std::sync::Arc;

/// Storage and outside services the engine runs on
pub struct Ports {
    pub campaigns: Arc<dyn CampaignRepository>,
    pub conversations: Arc<dyn ConversationLedger>,
    pub participants: Arc<dyn ParticipantLedger>,
    pub stats: Arc<dyn CampaignStatsRepository>,
    pub cache: Arc<dyn CacheStore>,
    pub provider: Arc<dyn BridgeProvider>,
    pub billing: Arc<dyn BillingGateway>,
    pub foundation: Arc<dyn FoundationRpc>,
    pub scheduler: Arc<dyn JobScheduler>,
}

pub struct DialerEngine {
    pub dialer: Arc<DialerControlLoop>,
    pub dispatcher: Arc<BridgeEventDispatcher>,
    pub operator: Arc<ConversationOperator>,
    pub runner: Arc<JobRunner>,
    pub cache: Arc<CampaignStateCache>,
    pub stats: Arc<StatsAccumulator>,
}

impl DialerEngine {
    pub fn assemble(ports: Ports, dialer_config: &DialerConfig, billing_config: &BillingConfig) -> Self {
        let cache = Arc::new(CampaignStateCache::new(ports.cache));
        let stats = Arc::new(StatsAccumulator::new(ports.stats));
        let jobs = JobPublisher::new(ports.scheduler, dialer_config.queue_name.clone());

        let billing = Arc::new(BillingMeter::new(
            ports.billing,
            ports.provider.clone(),
            ports.conversations.clone(),
            cache.clone(),
            jobs.clone(),
            billing_config.clone(),
        ));
        let advancer = Advancer::new(
            ports.campaigns.clone(),
            cache.clone(),
            jobs.clone(),
            dialer_config.clone(),
        );

        let dialer = Arc::new(DialerControlLoop::new(
            DialerDeps {
                campaigns: ports.campaigns,
                conversations: ports.conversations.clone(),
                participants: ports.participants.clone(),
                stats: stats.clone(),
                cache: cache.clone(),
                provider: ports.provider.clone(),
                foundation: ports.foundation,
                billing: billing.clone(),
                advancer: advancer.clone(),
                jobs: jobs.clone(),
            },
            billing_config.feature_name.clone(),
            dialer_config.stat_delay_secs,
        ));
        let dispatcher = Arc::new(BridgeEventDispatcher::new(
            ports.conversations.clone(),
            ports.participants,
            ports.provider.clone(),
            cache.clone(),
            billing.clone(),
            advancer.clone(),
            jobs.clone(),
            dialer_config.clone(),
        ));
        let operator = Arc::new(ConversationOperator::new(
            ports.conversations,
            ports.provider,
            cache.clone(),
            advancer,
            jobs.clone(),
            dialer_config.stat_delay_secs,
        ));
        let runner = Arc::new(JobRunner::new(
            dialer.clone(),
            dispatcher.clone(),
            billing,
            stats.clone(),
            cache.clone(),
            jobs,
            dialer_config.job_marker_ttl_secs,
        ));

        Self {
            dialer,
            dispatcher,
            operator,
            runner,
            cache,
            stats,
        }
    }
}
