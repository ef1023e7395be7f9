//! Background jobs
//!
//! Jobs are fire-and-forget and delivered at least once. Each envelope carries
//! a dedupe id; the worker skips ids it has already completed.

use crate::domain::billing::ChargeContext;
use crate::domain::callback_token::CallbackToken;
use crate::domain::shared::Result;
use crate::domain::stats::StatField;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "job", rename_all = "snake_case")]
pub enum Job {
    /// Dial the contact the campaign pointer advanced to
    DialContact { campaign_id: Uuid, conversation_id: Uuid },
    /// End a campaign whose dialing completed
    EndCampaign { campaign_id: Uuid },
    /// Settle a conversation after its bridge ended
    FinalizeConversation { token: CallbackToken },
    IncrementStat { campaign_id: Uuid, field: StatField, delta: i64 },
    RecurringCharge { charge: ChargeContext },
    ExpireCacheKey { key: String },
}

impl Job {
    /// Queue-level job name
    pub fn name(&self) -> &'static str {
        match self {
            Job::DialContact { .. } => "add_agent_to_conversation",
            Job::EndCampaign { .. } => "end_campaign",
            Job::FinalizeConversation { .. } => "handle_campaign_conversation_end",
            Job::IncrementStat { .. } => "update_campaign_stats",
            Job::RecurringCharge { .. } => "task_campaign_call_charge",
            Job::ExpireCacheKey { .. } => "expire_cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    /// Dedupe token
    pub id: String,
    pub queue: String,
    pub job: Job,
    /// Whether the worker records `id` as done and skips redeliveries
    #[serde(default = "dedupe_by_default")]
    pub dedupe: bool,
}

fn dedupe_by_default() -> bool {
    true
}

impl JobEnvelope {
    pub fn new(id: impl Into<String>, queue: impl Into<String>, job: Job) -> Self {
        Self {
            id: id.into(),
            queue: queue.into(),
            job,
            dedupe: true,
        }
    }

    /// Envelope for a job that must never be deduplicated
    pub fn unique(queue: impl Into<String>, job: Job) -> Self {
        let id = format!("{}:{}", job.name(), Uuid::new_v4());
        Self {
            dedupe: false,
            ..Self::new(id, queue, job)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Now,
    After(Duration),
    At(DateTime<Utc>),
}

impl Schedule {
    pub fn after_secs(secs: u64) -> Self {
        if secs == 0 {
            Schedule::Now
        } else {
            Schedule::After(Duration::from_secs(secs))
        }
    }

    /// Delay from `now` until the job is due
    pub fn delay_from(&self, now: DateTime<Utc>) -> Duration {
        match self {
            Schedule::Now => Duration::ZERO,
            Schedule::After(d) => *d,
            Schedule::At(at) => (*at - now).to_std().unwrap_or(Duration::ZERO),
        }
    }
}

/// Job queue capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobScheduler: Send + Sync {
    async fn enqueue(&self, envelope: JobEnvelope, schedule: Schedule) -> Result<()>;
}
