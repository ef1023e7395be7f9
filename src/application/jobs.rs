//! Job publishing and execution
//!
//! Handlers publish through [`JobPublisher`]; the worker hands every delivered
//! envelope to [`JobRunner`], which skips envelopes it already completed.

use crate::application::billing_meter::BillingMeter;
use crate::application::bridge_events::BridgeEventDispatcher;
use crate::application::dialer::DialerControlLoop;
use crate::application::state_cache::{job_key, CampaignStateCache};
use crate::application::stats::StatsAccumulator;
use crate::domain::jobs::{Job, JobEnvelope, JobScheduler, Schedule};
use crate::domain::shared::Result;
use metrics::{counter, histogram};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// Publishes jobs onto the dialer queue
#[derive(Clone)]
pub struct JobPublisher {
    scheduler: Arc<dyn JobScheduler>,
    queue: String,
}

impl JobPublisher {
    pub fn new(scheduler: Arc<dyn JobScheduler>, queue: impl Into<String>) -> Self {
        Self {
            scheduler,
            queue: queue.into(),
        }
    }

    /// Publish a job deduplicated on `id`
    pub async fn publish(&self, id: impl Into<String>, job: Job, schedule: Schedule) -> Result<()> {
        let envelope = JobEnvelope::new(id, self.queue.clone(), job);
        debug!("Publishing {} ({})", envelope.job.name(), envelope.id);
        self.scheduler.enqueue(envelope, schedule).await
    }

    /// Publish a job that runs every time it is published
    pub async fn publish_unique(&self, job: Job, schedule: Schedule) -> Result<()> {
        let envelope = JobEnvelope::unique(self.queue.clone(), job);
        debug!("Publishing {} ({})", envelope.job.name(), envelope.id);
        self.scheduler.enqueue(envelope, schedule).await
    }
}

/// Executes delivered jobs
pub struct JobRunner {
    dialer: Arc<DialerControlLoop>,
    dispatcher: Arc<BridgeEventDispatcher>,
    billing: Arc<BillingMeter>,
    stats: Arc<StatsAccumulator>,
    cache: Arc<CampaignStateCache>,
    jobs: JobPublisher,
    marker_ttl_secs: u64,
}

impl JobRunner {
    pub fn new(
        dialer: Arc<DialerControlLoop>,
        dispatcher: Arc<BridgeEventDispatcher>,
        billing: Arc<BillingMeter>,
        stats: Arc<StatsAccumulator>,
        cache: Arc<CampaignStateCache>,
        jobs: JobPublisher,
        marker_ttl_secs: u64,
    ) -> Self {
        Self {
            dialer,
            dispatcher,
            billing,
            stats,
            cache,
            jobs,
            marker_ttl_secs,
        }
    }

    /// Run one envelope unless it already completed
    pub async fn run(&self, envelope: &JobEnvelope) -> Result<()> {
        if envelope.dedupe && self.cache.is_job_done(&envelope.id).await? {
            debug!("Skipping duplicate {} ({})", envelope.job.name(), envelope.id);
            return Ok(());
        }

        match &envelope.job {
            Job::DialContact {
                campaign_id,
                conversation_id,
            } => self.dialer.dial_scheduled(*campaign_id, *conversation_id).await?,
            Job::EndCampaign { campaign_id } => self.dialer.finish_dialing(*campaign_id).await?,
            Job::FinalizeConversation { token } => {
                self.dispatcher.finalize_conversation(token).await?
            }
            Job::IncrementStat {
                campaign_id,
                field,
                delta,
            } => {
                self.stats.increment(*campaign_id, *field, *delta).await?;
            }
            Job::RecurringCharge { charge } => {
                self.billing.recurring_charge(charge).await?;
            }
            Job::ExpireCacheKey { key } => self.cache.delete_key(key).await?,
        }

        if !envelope.dedupe {
            return Ok(());
        }
        self.cache.mark_job_done(&envelope.id).await?;
        self.jobs
            .publish_unique(
                Job::ExpireCacheKey {
                    key: job_key(&envelope.id),
                },
                Schedule::after_secs(self.marker_ttl_secs),
            )
            .await
    }

    /// Run an envelope and log the failure, for worker loops
    pub async fn execute(&self, envelope: JobEnvelope) {
        let name = envelope.job.name();
        let started = Instant::now();
        let result = self.run(&envelope).await;
        histogram!("dialer_job_duration_seconds", "job" => name).record(started.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                counter!("dialer_jobs_total", "job" => name, "outcome" => "ok").increment(1);
            }
            Err(e) => {
                error!("Job {} ({}) failed: {}", name, envelope.id, e);
                counter!("dialer_jobs_total", "job" => name, "outcome" => "error").increment(1);
            }
        }
    }
}
