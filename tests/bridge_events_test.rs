//! Bridge webhook handling against in-memory stores

mod common;

use common::{is_dial, is_finalize, is_stat, Harness, ProviderCall};
use powerdial::application::BridgeEventKind;
use powerdial::domain::conversation::ConversationStatus;
use powerdial::domain::jobs::Job;
use powerdial::domain::participant::{LegStatus, LegType, ParticipantLedger};
use powerdial::domain::provider::BridgeStatus;
use powerdial::domain::stats::CampaignStatsRepository;
use powerdial::DomainError;

const A: &str = "+15553330001";
const B: &str = "+15553330002";

fn is_recurring_charge(job: &Job) -> bool {
    matches!(job, Job::RecurringCharge { .. })
}

#[tokio::test]
async fn test_events_for_stopped_campaign_are_dropped() {
    let h = Harness::new();
    let campaign = h.campaign(&[A, B]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    let agent_leg = h.provider.last_agent_leg();
    h.engine.dialer.pause(campaign.id, h.member).await.unwrap();

    let calls_before = h.provider.calls().len();
    let token = h.token(&campaign, &first);
    for kind in [BridgeEventKind::LegJoined, BridgeEventKind::LegLeft] {
        let event = h.event(kind, &first, &agent_leg, 1);
        h.engine.dispatcher.handle(&token, &event).await.unwrap();
    }
    h.engine
        .dispatcher
        .handle_leg_status(&token, &agent_leg, "completed")
        .await
        .unwrap();
    h.engine
        .dispatcher
        .handle_recording(&token, "https://rec.example.com/1", 12)
        .await
        .unwrap();

    assert_eq!(h.provider.calls().len(), calls_before);
    assert!(h.scheduler.pending_matching(is_dial).is_empty());
    assert!(h.billing.charges().is_empty());
    assert_eq!(h.conversation_at(campaign.id, 1).await.recording_url, None);
}

#[tokio::test]
async fn test_agent_join_places_contact_once() {
    let h = Harness::new();
    let campaign = h.campaign(&[A, B]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    let agent_leg = h.provider.last_agent_leg();

    let token = h.token(&campaign, &first);
    let event = h.event(BridgeEventKind::LegJoined, &first, &agent_leg, 1);
    h.engine.dispatcher.handle(&token, &event).await.unwrap();
    h.engine.dispatcher.handle(&token, &event).await.unwrap();

    let placed: Vec<ProviderCall> = h
        .provider
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ProviderCall::DialExternal { .. }))
        .collect();
    assert_eq!(
        placed,
        vec![ProviderCall::DialExternal {
            bridge_sid: "CF-1".into(),
            number: A.into(),
        }]
    );

    let legs = h.participants.list_for_conversation(first.id).await.unwrap();
    let mut types: Vec<LegType> = legs.iter().map(|l| l.leg_type).collect();
    types.sort_by_key(|t| t.as_str());
    assert_eq!(types, vec![LegType::Agent, LegType::Client]);

    // Setup charge without connect time: the bridge is not live yet
    let charges = h.billing.charges();
    assert!(!charges.is_empty());
    assert!(!charges[0].is_call_in_progress);
    assert_eq!(charges[0].parent_leg_sid, agent_leg);
}

#[tokio::test]
async fn test_live_bridge_starts_recurring_charges() {
    let h = Harness::new();
    *h.provider.bridge_status.lock().unwrap() = Some(BridgeStatus::InProgress);
    let campaign = h.campaign(&[A]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;

    let token = h.token(&campaign, &first);
    let event = h.event(BridgeEventKind::LegJoined, &first, &h.provider.last_agent_leg(), 1);
    h.engine.dispatcher.handle(&token, &event).await.unwrap();

    assert_eq!(h.scheduler.pending_matching(is_recurring_charge).len(), 1);
    assert!(h.billing.charges()[0].is_call_in_progress);
}

#[tokio::test]
async fn test_reattempt_join_is_not_charged_again() {
    let h = Harness::new();
    let campaign = h.campaign(&[A]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;

    let mut token = h.token(&campaign, &first);
    token.is_reattempt = true;
    let event = h.event(BridgeEventKind::LegJoined, &first, &h.provider.last_agent_leg(), 1);
    h.engine.dispatcher.handle(&token, &event).await.unwrap();

    assert!(h.billing.charges().is_empty());
    let placed = h
        .provider
        .calls()
        .into_iter()
        .filter(|c| matches!(c, ProviderCall::DialExternal { .. }))
        .count();
    assert_eq!(placed, 1);
}

#[tokio::test]
async fn test_join_without_credit_completes_conversation() {
    let h = Harness::new();
    let campaign = h.campaign(&[A, B]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    h.billing.set_credit(0.01);
    *h.provider.bridge_status.lock().unwrap() = Some(BridgeStatus::InProgress);

    let token = h.token(&campaign, &first);
    let event = h.event(BridgeEventKind::LegJoined, &first, &h.provider.last_agent_leg(), 1);
    h.engine.dispatcher.handle(&token, &event).await.unwrap();

    assert_eq!(
        h.conversation_at(campaign.id, 1).await.status,
        ConversationStatus::Completed
    );
    assert_eq!(h.provider.terminated(), vec![first.bridge_name.clone()]);
    // No later tick may terminate the bridge a second time
    assert!(h.scheduler.pending_matching(is_recurring_charge).is_empty());
    assert!(!h
        .provider
        .calls()
        .iter()
        .any(|c| matches!(c, ProviderCall::DialExternal { .. })));
}

#[tokio::test]
async fn test_rejected_contact_fails_conversation() {
    let h = Harness::new();
    let campaign = h.campaign(&[A, B]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    h.provider.fail_client_with(21214);

    let token = h.token(&campaign, &first);
    let event = h.event(BridgeEventKind::LegJoined, &first, &h.provider.last_agent_leg(), 1);
    h.engine.dispatcher.handle(&token, &event).await.unwrap();

    let first_now = h.conversation_at(campaign.id, 1).await;
    assert_eq!(first_now.status, ConversationStatus::Failed);
    assert_eq!(first_now.reason_code, Some(21214));
    assert_eq!(first_now.reason_message.as_deref(), Some("Invalid Number."));
    assert_eq!(h.provider.terminated(), vec![first.bridge_name.clone()]);
}

#[tokio::test]
async fn test_unknown_leg_join_terminates_bridge() {
    let h = Harness::new();
    let campaign = h.campaign(&[A]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;

    let token = h.token(&campaign, &first);
    let event = h.event(BridgeEventKind::LegJoined, &first, "CA-unknown", 2);
    let err = h.engine.dispatcher.handle(&token, &event).await.unwrap_err();

    assert!(matches!(err, DomainError::NotFound(_)));
    assert_eq!(h.provider.terminated(), vec![first.bridge_name.clone()]);
}

#[tokio::test]
async fn test_contact_leaving_ends_bridge_without_advancing() {
    let h = Harness::new();
    let campaign = h.campaign(&[A, B]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;

    let token = h.token(&campaign, &first);
    let joined = h.event(BridgeEventKind::LegJoined, &first, &h.provider.last_agent_leg(), 1);
    h.engine.dispatcher.handle(&token, &joined).await.unwrap();

    let left = h.event(BridgeEventKind::LegLeft, &first, &h.provider.last_client_leg(), 2);
    h.engine.dispatcher.handle(&token, &left).await.unwrap();

    assert_eq!(h.provider.terminated(), vec![first.bridge_name.clone()]);
    assert!(h.scheduler.pending_matching(is_dial).is_empty());
    assert_eq!(h.reload(campaign.id).await.next_number_to_dial.as_deref(), Some(A));
}

#[tokio::test]
async fn test_answered_call_is_finalized_with_duration() {
    let h = Harness::new();
    let campaign = h.campaign(&[A, B]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    let agent_leg = h.provider.last_agent_leg();

    let token = h.token(&campaign, &first);
    let joined = h.event(BridgeEventKind::LegJoined, &first, &agent_leg, 1);
    h.engine.dispatcher.handle(&token, &joined).await.unwrap();
    let client_leg = h.provider.last_client_leg();

    for (leg, status) in [
        (client_leg.as_str(), "in-progress"),
        (agent_leg.as_str(), "completed"),
        (client_leg.as_str(), "completed"),
    ] {
        h.engine
            .dispatcher
            .handle_leg_status(&token, leg, status)
            .await
            .unwrap();
    }
    assert_eq!(
        h.conversation_at(campaign.id, 1).await.status,
        ConversationStatus::Completed
    );
    let client = h.participants.find_by_leg(&client_leg).await.unwrap().unwrap();
    assert_eq!(client.status, LegStatus::Completed);

    *h.provider.bridge_status.lock().unwrap() = Some(BridgeStatus::Completed);
    *h.provider.bridge_duration_secs.lock().unwrap() = 42;
    let ended = h.event(BridgeEventKind::BridgeEnded, &first, &agent_leg, 1);
    h.engine.dispatcher.handle(&token, &ended).await.unwrap();
    // Redelivered
    h.engine.dispatcher.handle(&token, &ended).await.unwrap();

    assert_eq!(h.run_jobs(is_finalize).await, 2);
    assert_eq!(h.conversation_at(campaign.id, 1).await.call_duration, Some(42));

    h.run_jobs(is_stat).await;
    let stats = h.stats.get(campaign.id).await.unwrap().unwrap();
    assert_eq!(stats.dialed_contacts, 1);
    assert_eq!(stats.answered_calls, 1);
    assert_eq!(stats.unanswered_calls, 0);
    assert_eq!(stats.active_call_duration, 42);
}

#[tokio::test]
async fn test_terminal_status_is_final() {
    let h = Harness::new();
    let campaign = h.campaign(&[A, B]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;

    let token = h.token(&campaign, &first);
    let joined = h.event(BridgeEventKind::LegJoined, &first, &h.provider.last_agent_leg(), 1);
    h.engine.dispatcher.handle(&token, &joined).await.unwrap();
    let client_leg = h.provider.last_client_leg();

    h.engine
        .dispatcher
        .handle_leg_status(&token, &client_leg, "no-answer")
        .await
        .unwrap();
    // A late in-progress must not reopen the conversation
    h.engine
        .dispatcher
        .handle_leg_status(&token, &client_leg, "in-progress")
        .await
        .unwrap();

    let ended = h.event(BridgeEventKind::BridgeEnded, &first, &client_leg, 2);
    h.engine.dispatcher.handle(&token, &ended).await.unwrap();
    h.run_jobs(is_finalize).await;

    assert_eq!(
        h.conversation_at(campaign.id, 1).await.status,
        ConversationStatus::NoAnswer
    );
}

#[tokio::test]
async fn test_late_leg_status_does_not_change_outcome() {
    let h = Harness::new();
    let campaign = h.campaign(&[A, B]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    let agent_leg = h.provider.last_agent_leg();

    let token = h.token(&campaign, &first);
    let joined = h.event(BridgeEventKind::LegJoined, &first, &agent_leg, 1);
    h.engine.dispatcher.handle(&token, &joined).await.unwrap();
    let client_leg = h.provider.last_client_leg();

    for (leg, status) in [
        (agent_leg.as_str(), "ringing"),
        (agent_leg.as_str(), "in-progress"),
        (client_leg.as_str(), "in-progress"),
        (agent_leg.as_str(), "completed"),
        (client_leg.as_str(), "completed"),
        (agent_leg.as_str(), "ringing"),
        (client_leg.as_str(), "queued"),
    ] {
        h.engine
            .dispatcher
            .handle_leg_status(&token, leg, status)
            .await
            .unwrap();
    }

    let agent = h.participants.find_by_leg(&agent_leg).await.unwrap().unwrap();
    assert_eq!(agent.status, LegStatus::Completed);
    let client = h.participants.find_by_leg(&client_leg).await.unwrap().unwrap();
    assert_eq!(client.status, LegStatus::Completed);

    *h.provider.bridge_status.lock().unwrap() = Some(BridgeStatus::Completed);
    *h.provider.bridge_duration_secs.lock().unwrap() = 30;
    let ended = h.event(BridgeEventKind::BridgeEnded, &first, &agent_leg, 1);
    h.engine.dispatcher.handle(&token, &ended).await.unwrap();
    h.run_jobs(is_finalize).await;

    assert_eq!(
        h.conversation_at(campaign.id, 1).await.status,
        ConversationStatus::Completed
    );
    h.run_jobs(is_stat).await;
    let stats = h.stats.get(campaign.id).await.unwrap().unwrap();
    assert_eq!(stats.answered_calls, 1);
    assert_eq!(stats.unanswered_calls, 0);
}

#[tokio::test]
async fn test_unanswered_call_counts_once() {
    let h = Harness::new();
    let campaign = h.campaign(&[A]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;
    let agent_leg = h.provider.last_agent_leg();

    let token = h.token(&campaign, &first);
    h.engine
        .dispatcher
        .handle_leg_status(&token, &agent_leg, "busy")
        .await
        .unwrap();
    let ended = h.event(BridgeEventKind::BridgeEnded, &first, &agent_leg, 1);
    h.engine.dispatcher.handle(&token, &ended).await.unwrap();
    h.run_jobs(is_finalize).await;
    h.engine.dispatcher.handle(&token, &ended).await.unwrap();
    h.run_jobs(is_finalize).await;

    assert_eq!(
        h.conversation_at(campaign.id, 1).await.status,
        ConversationStatus::Busy
    );
    h.run_jobs(is_stat).await;
    let stats = h.stats.get(campaign.id).await.unwrap().unwrap();
    assert_eq!(stats.unanswered_calls, 1);
    assert_eq!(stats.answered_calls, 0);
}

#[tokio::test]
async fn test_recording_is_stored() {
    let h = Harness::new();
    let campaign = h.campaign(&[A]).await;
    h.engine.dialer.start(campaign.id, h.member).await.unwrap();
    let first = h.conversation_at(campaign.id, 1).await;

    let token = h.token(&campaign, &first);
    h.engine
        .dispatcher
        .handle_recording(&token, "https://rec.example.com/RE1", 37)
        .await
        .unwrap();

    let first = h.conversation_at(campaign.id, 1).await;
    assert_eq!(first.recording_url.as_deref(), Some("https://rec.example.com/RE1"));
    assert_eq!(first.recording_duration, Some(37));
}
