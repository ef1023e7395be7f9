//! Shared fixtures: in-memory repositories, fake outside services and a
//! scheduler that holds jobs until a test runs them.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use powerdial::application::{BridgeEvent, BridgeEventKind, DialerEngine, Ports};
use powerdial::config::{BillingConfig, DialerConfig};
use powerdial::domain::billing::{BillingGateway, ChargeReceipt, ChargeRequest};
use powerdial::domain::callback_token::CallbackToken;
use powerdial::domain::campaign::{Campaign, CampaignRepository, CampaignSettings};
use powerdial::domain::conversation::{Conversation, ConversationLedger};
use powerdial::domain::foundation::{FoundationRpc, WorkspaceFeature};
use powerdial::domain::jobs::{Job, JobEnvelope, JobScheduler, Schedule};
use powerdial::domain::provider::{
    AgentDialMetadata, BridgeHandle, BridgeInfo, BridgeProvider, BridgeStatus, DialFailure,
    LegHandle, RecordingAction,
};
use powerdial::domain::shared::{Contact, ProviderCredentials, Result};
use powerdial::infrastructure::cache::InMemoryCacheStore;
use powerdial::infrastructure::persistence::{
    InMemoryCampaignRepository, InMemoryConversationRepository, InMemoryParticipantRepository,
    InMemoryStatsRepository,
};

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderCall {
    CreateBridge { name: String },
    DialIdentity { identity: String, bridge: String, metadata: AgentDialMetadata },
    DialExternal { bridge_sid: String, number: String },
    Terminate { name: String },
    Hold { leg_sid: String, hold: bool },
    DropVoicemail { leg_sid: String, audio_url: String },
    Recording { bridge: String, action: RecordingAction },
}

/// Provider that accepts everything unless told otherwise
#[derive(Default)]
pub struct FakeProvider {
    calls: Mutex<Vec<ProviderCall>>,
    legs: AtomicUsize,
    agent_legs: Mutex<Vec<String>>,
    client_legs: Mutex<Vec<String>>,
    pub agent_failure: Mutex<Option<DialFailure>>,
    pub client_failure: Mutex<Option<DialFailure>>,
    pub bridge_status: Mutex<Option<BridgeStatus>>,
    pub bridge_duration_secs: Mutex<i64>,
}

impl FakeProvider {
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn agent_dials(&self) -> Vec<AgentDialMetadata> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::DialIdentity { metadata, .. } => Some(metadata),
                _ => None,
            })
            .collect()
    }

    pub fn last_agent_leg(&self) -> String {
        self.agent_legs.lock().unwrap().last().cloned().unwrap()
    }

    pub fn last_client_leg(&self) -> String {
        self.client_legs.lock().unwrap().last().cloned().unwrap()
    }

    pub fn terminated(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                ProviderCall::Terminate { name } => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn fail_client_with(&self, code: i32) {
        *self.client_failure.lock().unwrap() = Some(DialFailure {
            code: Some(code),
            message: Some("rejected".into()),
        });
    }

    pub fn fail_agent_with(&self, code: i32) {
        *self.agent_failure.lock().unwrap() = Some(DialFailure {
            code: Some(code),
            message: Some("rejected".into()),
        });
    }

    fn record(&self, call: ProviderCall) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_sid(&self, prefix: &str) -> String {
        format!("{}-{}", prefix, self.legs.fetch_add(1, Ordering::SeqCst) + 1)
    }
}

#[async_trait]
impl BridgeProvider for FakeProvider {
    async fn create_bridge(
        &self,
        _credentials: &ProviderCredentials,
        name: &str,
        _callback_token: &str,
        _recording_enabled: bool,
    ) -> Result<BridgeHandle> {
        self.record(ProviderCall::CreateBridge { name: name.to_string() });
        Ok(BridgeHandle {
            name: name.to_string(),
            instructions: format!("<Conference>{}</Conference>", name),
        })
    }

    async fn dial_identity(
        &self,
        _credentials: &ProviderCredentials,
        identity: &str,
        _from: &str,
        bridge: &BridgeHandle,
        _callback_token: &str,
        metadata: &AgentDialMetadata,
    ) -> std::result::Result<LegHandle, DialFailure> {
        self.record(ProviderCall::DialIdentity {
            identity: identity.to_string(),
            bridge: bridge.name.clone(),
            metadata: metadata.clone(),
        });
        if let Some(failure) = self.agent_failure.lock().unwrap().clone() {
            return Err(failure);
        }
        let sid = self.next_sid("CA-agent");
        self.agent_legs.lock().unwrap().push(sid.clone());
        Ok(LegHandle { sid })
    }

    async fn dial_external_number(
        &self,
        _credentials: &ProviderCredentials,
        bridge_sid: &str,
        number: &str,
        _from: &str,
        _callback_token: &str,
    ) -> std::result::Result<LegHandle, DialFailure> {
        self.record(ProviderCall::DialExternal {
            bridge_sid: bridge_sid.to_string(),
            number: number.to_string(),
        });
        if let Some(failure) = self.client_failure.lock().unwrap().clone() {
            return Err(failure);
        }
        let sid = self.next_sid("CA-client");
        self.client_legs.lock().unwrap().push(sid.clone());
        Ok(LegHandle { sid })
    }

    async fn terminate_bridge(&self, _credentials: &ProviderCredentials, name: &str) -> Result<()> {
        self.record(ProviderCall::Terminate { name: name.to_string() });
        Ok(())
    }

    async fn fetch_bridge(&self, _credentials: &ProviderCredentials, _name: &str) -> Result<Option<BridgeInfo>> {
        let Some(status) = *self.bridge_status.lock().unwrap() else {
            return Ok(None);
        };
        let updated_at = Utc::now();
        let created_at = updated_at - ChronoDuration::seconds(*self.bridge_duration_secs.lock().unwrap());
        Ok(Some(BridgeInfo {
            sid: "CF-1".into(),
            status,
            created_at,
            updated_at,
        }))
    }

    async fn hold_leg(
        &self,
        _credentials: &ProviderCredentials,
        _bridge_name: &str,
        leg_sid: &str,
        hold: bool,
    ) -> Result<()> {
        self.record(ProviderCall::Hold { leg_sid: leg_sid.to_string(), hold });
        Ok(())
    }

    async fn drop_voicemail(&self, _credentials: &ProviderCredentials, leg_sid: &str, audio_url: &str) -> Result<()> {
        self.record(ProviderCall::DropVoicemail {
            leg_sid: leg_sid.to_string(),
            audio_url: audio_url.to_string(),
        });
        Ok(())
    }

    async fn control_recording(
        &self,
        _credentials: &ProviderCredentials,
        bridge_name: &str,
        action: RecordingAction,
    ) -> Result<()> {
        self.record(ProviderCall::Recording { bridge: bridge_name.to_string(), action });
        Ok(())
    }
}

pub struct FakeBilling {
    pub credit: Mutex<f64>,
    pub charges: Mutex<Vec<ChargeRequest>>,
}

impl Default for FakeBilling {
    fn default() -> Self {
        Self {
            credit: Mutex::new(25.0),
            charges: Mutex::new(Vec::new()),
        }
    }
}

impl FakeBilling {
    pub fn set_credit(&self, credit: f64) {
        *self.credit.lock().unwrap() = credit;
    }

    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }
}

#[async_trait]
impl BillingGateway for FakeBilling {
    async fn workspace_credit(&self, _workspace_id: Uuid) -> Result<f64> {
        Ok(*self.credit.lock().unwrap())
    }

    async fn charge_outbound_call(&self, request: &ChargeRequest) -> Result<ChargeReceipt> {
        self.charges.lock().unwrap().push(request.clone());
        Ok(ChargeReceipt {
            success: true,
            charge_amount: 0.02,
        })
    }
}

pub struct FakeFoundation {
    pub feature_enabled: Mutex<Option<bool>>,
}

impl Default for FakeFoundation {
    fn default() -> Self {
        Self {
            feature_enabled: Mutex::new(Some(true)),
        }
    }
}

#[async_trait]
impl FoundationRpc for FakeFoundation {
    async fn workspace_feature(&self, _workspace_id: Uuid, name: &str) -> Result<Option<WorkspaceFeature>> {
        Ok(self
            .feature_enabled
            .lock()
            .unwrap()
            .map(|is_enabled| WorkspaceFeature {
                name: name.to_string(),
                is_enabled,
            }))
    }

    async fn provider_credentials(&self, _workspace_id: Uuid) -> Result<ProviderCredentials> {
        Ok(ProviderCredentials {
            account_sid: "AC-test".into(),
            auth_token: "token".into(),
            ..Default::default()
        })
    }
}

/// Holds published jobs until a test runs them
#[derive(Default)]
pub struct RecordingScheduler {
    jobs: Mutex<Vec<(JobEnvelope, Schedule)>>,
}

impl RecordingScheduler {
    pub fn pending(&self) -> Vec<(JobEnvelope, Schedule)> {
        self.jobs.lock().unwrap().clone()
    }

    pub fn pending_matching(&self, filter: impl Fn(&Job) -> bool) -> Vec<(JobEnvelope, Schedule)> {
        self.pending()
            .into_iter()
            .filter(|(envelope, _)| filter(&envelope.job))
            .collect()
    }

    /// Remove and return the matching jobs
    pub fn take(&self, filter: impl Fn(&Job) -> bool) -> Vec<JobEnvelope> {
        let mut jobs = self.jobs.lock().unwrap();
        let (taken, kept): (Vec<_>, Vec<_>) = jobs.drain(..).partition(|(e, _)| filter(&e.job));
        *jobs = kept;
        taken.into_iter().map(|(e, _)| e).collect()
    }
}

#[async_trait]
impl JobScheduler for RecordingScheduler {
    async fn enqueue(&self, envelope: JobEnvelope, schedule: Schedule) -> Result<()> {
        self.jobs.lock().unwrap().push((envelope, schedule));
        Ok(())
    }
}

pub fn is_dial(job: &Job) -> bool {
    matches!(job, Job::DialContact { .. })
}

pub fn is_end(job: &Job) -> bool {
    matches!(job, Job::EndCampaign { .. })
}

pub fn is_finalize(job: &Job) -> bool {
    matches!(job, Job::FinalizeConversation { .. })
}

pub fn is_stat(job: &Job) -> bool {
    matches!(job, Job::IncrementStat { .. })
}

pub struct Harness {
    pub campaigns: Arc<InMemoryCampaignRepository>,
    pub conversations: Arc<InMemoryConversationRepository>,
    pub participants: Arc<InMemoryParticipantRepository>,
    pub stats: Arc<InMemoryStatsRepository>,
    pub cache: InMemoryCacheStore,
    pub provider: Arc<FakeProvider>,
    pub billing: Arc<FakeBilling>,
    pub foundation: Arc<FakeFoundation>,
    pub scheduler: Arc<RecordingScheduler>,
    pub engine: DialerEngine,
    pub member: Uuid,
}

impl Harness {
    pub fn new() -> Self {
        let campaigns = Arc::new(InMemoryCampaignRepository::new());
        let conversations = Arc::new(InMemoryConversationRepository::new());
        let participants = Arc::new(InMemoryParticipantRepository::new());
        let stats = Arc::new(InMemoryStatsRepository::new());
        let cache = InMemoryCacheStore::new();
        let provider = Arc::new(FakeProvider::default());
        let billing = Arc::new(FakeBilling::default());
        let foundation = Arc::new(FakeFoundation::default());
        let scheduler = Arc::new(RecordingScheduler::default());

        let engine = DialerEngine::assemble(
            Ports {
                campaigns: campaigns.clone(),
                conversations: conversations.clone(),
                participants: participants.clone(),
                stats: stats.clone(),
                cache: Arc::new(cache.clone()),
                provider: provider.clone(),
                billing: billing.clone(),
                foundation: foundation.clone(),
                scheduler: scheduler.clone(),
            },
            &DialerConfig::default(),
            &BillingConfig::default(),
        );

        Self {
            campaigns,
            conversations,
            participants,
            stats,
            cache,
            provider,
            billing,
            foundation,
            scheduler,
            engine,
            member: Uuid::new_v4(),
        }
    }

    /// Store a campaign dialing `numbers` in order
    pub async fn campaign(&self, numbers: &[&str]) -> Campaign {
        self.campaign_with(numbers, CampaignSettings::default()).await
    }

    pub async fn campaign_with(&self, numbers: &[&str], settings: CampaignSettings) -> Campaign {
        let campaign = Campaign::new(
            Uuid::new_v4(),
            "Spring outreach".to_string(),
            Uuid::new_v4(),
            "+15550000000".to_string(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            self.member,
        )
        .with_settings(settings);

        let contacts = numbers
            .iter()
            .enumerate()
            .map(|(i, n)| Contact::new(format!("Contact {}", i + 1), *n))
            .collect();
        self.campaigns.set_contacts(campaign.contact_list_id, contacts).await;
        self.campaigns.insert(campaign.clone()).await;
        campaign
    }

    pub async fn reload(&self, campaign_id: Uuid) -> Campaign {
        self.campaigns.get(campaign_id).await.unwrap().unwrap()
    }

    pub async fn conversations_of(&self, campaign_id: Uuid) -> Vec<Conversation> {
        self.conversations.list_for_campaign(campaign_id).await.unwrap()
    }

    pub async fn conversation_at(&self, campaign_id: Uuid, sequence_number: i32) -> Conversation {
        self.conversations_of(campaign_id)
            .await
            .into_iter()
            .find(|c| c.sequence_number == sequence_number)
            .unwrap()
    }

    pub fn token(&self, campaign: &Campaign, conversation: &Conversation) -> CallbackToken {
        CallbackToken {
            workspace_id: campaign.workspace_id,
            campaign_id: campaign.id,
            bridge_name: conversation.bridge_name.clone(),
            conversation_id: conversation.id,
            is_reattempt: !conversation.initial_call,
        }
    }

    pub fn event(
        &self,
        kind: BridgeEventKind,
        conversation: &Conversation,
        leg_sid: &str,
        leg_sequence: i32,
    ) -> BridgeEvent {
        BridgeEvent {
            kind,
            bridge_name: conversation.bridge_name.clone(),
            bridge_sid: format!("CF-{}", conversation.sequence_number),
            leg_sequence: Some(leg_sequence),
            leg_sid: Some(leg_sid.to_string()),
            reason_code: None,
            reason_message: None,
        }
    }

    /// Drive the agent leg of `conversation` out of its bridge
    pub async fn agent_left(&self, campaign: &Campaign, conversation: &Conversation, agent_leg: &str) {
        let token = self.token(campaign, conversation);
        let event = self.event(BridgeEventKind::LegLeft, conversation, agent_leg, 1);
        self.engine.dispatcher.handle(&token, &event).await.unwrap();
    }

    /// Run the queued jobs accepted by `filter`; returns how many ran
    pub async fn run_jobs(&self, filter: impl Fn(&Job) -> bool) -> usize {
        let jobs = self.scheduler.take(filter);
        for envelope in &jobs {
            self.engine.runner.run(envelope).await.unwrap();
        }
        jobs.len()
    }
}
