//! Job execution and completion markers

mod common;

use common::{is_stat, Harness};
use powerdial::application::state_cache::job_key;
use powerdial::domain::jobs::{Job, JobEnvelope, Schedule};
use powerdial::domain::stats::{CampaignStatsRepository, StatField};
use std::time::Duration;

const A: &str = "+15554440001";

fn is_expire(job: &Job) -> bool {
    matches!(job, Job::ExpireCacheKey { .. })
}

#[tokio::test]
async fn test_completion_marker_expires_after_retention() {
    let h = Harness::new();
    let campaign = h.campaign(&[A]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    let dedupe_id = format!("dialed:{}", first.id);

    assert_eq!(h.run_jobs(is_stat).await, 1);
    assert!(h.engine.cache.is_job_done(&dedupe_id).await.unwrap());

    let expiries = h.scheduler.pending_matching(is_expire);
    assert_eq!(expiries.len(), 1);
    assert_eq!(expiries[0].1, Schedule::After(Duration::from_secs(86_400)));
    assert_eq!(
        expiries[0].0.job,
        Job::ExpireCacheKey { key: job_key(&dedupe_id) }
    );

    assert_eq!(h.run_jobs(is_expire).await, 1);
    assert!(!h.engine.cache.is_job_done(&dedupe_id).await.unwrap());
    // Expiry jobs leave nothing behind
    assert!(h.scheduler.pending_matching(is_expire).is_empty());
}

#[tokio::test]
async fn test_unique_jobs_leave_no_marker() {
    let h = Harness::new();
    let campaign = h.campaign(&[A]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let entries_before = h.cache.len().await;

    let envelope = JobEnvelope::unique(
        "pd_queue",
        Job::IncrementStat {
            campaign_id: campaign.id,
            field: StatField::AnsweredCalls,
            delta: 1,
        },
    );
    h.engine.runner.run(&envelope).await.unwrap();
    h.engine.runner.run(&envelope).await.unwrap();

    let stats = h.stats.get(campaign.id).await.unwrap().unwrap();
    assert_eq!(stats.answered_calls, 2);
    assert_eq!(h.cache.len().await, entries_before);
    assert!(h.scheduler.pending_matching(is_expire).is_empty());
}
