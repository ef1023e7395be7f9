//! Call-control provider port
//!
//! The provider hosts the bridges and places the legs. Everything it tells us
//! afterwards arrives through webhooks carrying a [`CallbackToken`].
//!
//! [`CallbackToken`]: crate::domain::callback_token::CallbackToken

use crate::domain::conversation::FailureReason;
use crate::domain::shared::{ProviderCredentials, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A bridge ready to be joined
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeHandle {
    pub name: String,
    /// Provider call instructions that put a leg into the bridge
    pub instructions: String,
}

/// A leg accepted by the provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LegHandle {
    pub sid: String,
}

/// Provider rejection of a leg placement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DialFailure {
    pub code: Option<i32>,
    pub message: Option<String>,
}

impl DialFailure {
    /// Translate into the reason stored on the conversation
    pub fn reason(&self) -> FailureReason {
        FailureReason {
            code: self.code,
            message: failure_message(self.code, self.message.as_deref()),
        }
    }
}

/// Bridge status reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeStatus {
    Init,
    Queued,
    Ringing,
    InProgress,
    Completed,
    Failed,
    Busy,
    NoAnswer,
    Canceled,
}

impl BridgeStatus {
    pub fn from_provider(s: &str) -> Option<Self> {
        match s {
            "init" => Some(BridgeStatus::Init),
            "queued" => Some(BridgeStatus::Queued),
            "ringing" => Some(BridgeStatus::Ringing),
            "in-progress" | "in_progress" => Some(BridgeStatus::InProgress),
            "completed" => Some(BridgeStatus::Completed),
            "failed" => Some(BridgeStatus::Failed),
            "busy" => Some(BridgeStatus::Busy),
            "no-answer" | "no_answer" => Some(BridgeStatus::NoAnswer),
            "canceled" => Some(BridgeStatus::Canceled),
            _ => None,
        }
    }

    /// Billable connect time is accruing
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            BridgeStatus::Queued | BridgeStatus::Ringing | BridgeStatus::InProgress
        )
    }
}

/// Provider view of a bridge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeInfo {
    pub sid: String,
    pub status: BridgeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BridgeInfo {
    /// Measured bridge lifetime in seconds
    pub fn duration_secs(&self) -> i32 {
        (self.updated_at - self.created_at).num_seconds().max(0) as i32
    }
}

/// Parameters handed to the agent's client when its leg rings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentDialMetadata {
    pub campaign_id: Uuid,
    pub conversation_id: Uuid,
    pub call_script_id: Option<Uuid>,
    pub cool_off_period: Option<i32>,
    pub contact_name: String,
    pub contact_number: String,
    pub sequence_number: i32,
    pub next_number: Option<String>,
    pub next_conversation_id: Option<Uuid>,
    pub is_reattempt: bool,
    pub recording_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordingAction {
    Stop,
    Pause,
    Resume,
}

impl RecordingAction {
    /// Provider recording status requested by the action
    pub fn provider_status(&self) -> &'static str {
        match self {
            RecordingAction::Stop => "stopped",
            RecordingAction::Pause => "paused",
            RecordingAction::Resume => "in-progress",
        }
    }
}

/// Bridge provider capability
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeProvider: Send + Sync {
    async fn create_bridge(
        &self,
        credentials: &ProviderCredentials,
        name: &str,
        callback_token: &str,
        recording_enabled: bool,
    ) -> Result<BridgeHandle>;

    /// Ring the agent's client identity and drop it into the bridge
    async fn dial_identity(
        &self,
        credentials: &ProviderCredentials,
        identity: &str,
        from: &str,
        bridge: &BridgeHandle,
        callback_token: &str,
        metadata: &AgentDialMetadata,
    ) -> std::result::Result<LegHandle, DialFailure>;

    /// Call an external number into an existing bridge
    async fn dial_external_number(
        &self,
        credentials: &ProviderCredentials,
        bridge_sid: &str,
        number: &str,
        from: &str,
        callback_token: &str,
    ) -> std::result::Result<LegHandle, DialFailure>;

    async fn terminate_bridge(&self, credentials: &ProviderCredentials, name: &str) -> Result<()>;

    async fn fetch_bridge(&self, credentials: &ProviderCredentials, name: &str) -> Result<Option<BridgeInfo>>;

    async fn hold_leg(
        &self,
        credentials: &ProviderCredentials,
        bridge_name: &str,
        leg_sid: &str,
        hold: bool,
    ) -> Result<()>;

    async fn drop_voicemail(&self, credentials: &ProviderCredentials, leg_sid: &str, audio_url: &str) -> Result<()>;

    async fn control_recording(
        &self,
        credentials: &ProviderCredentials,
        bridge_name: &str,
        action: RecordingAction,
    ) -> Result<()>;
}

/// Human readable message for a provider rejection code
pub fn failure_message(code: Option<i32>, provider_message: Option<&str>) -> String {
    let known = match code {
        Some(21215) => Some("Geographic Permission not enabled. Please contact support."),
        Some(21214) => Some("Invalid Number."),
        Some(20005) => Some("Account not active."),
        Some(32205) => Some("Geographic Permission not enabled."),
        Some(10001) => Some("Account is not active."),
        Some(21203) => Some("International calling not enabled."),
        Some(21210) => Some("Phone number not verified."),
        Some(21217) => Some("Phone number does not appear to be valid."),
        _ => None,
    };
    known
        .map(str::to_string)
        .or_else(|| provider_message.filter(|m| !m.is_empty()).map(str::to_string))
        .unwrap_or_else(|| "Call could not be placed.".to_string())
}
