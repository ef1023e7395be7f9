//! Call legs of a conversation

use crate::domain::conversation::ConversationStatus;
use crate::domain::shared::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of the bridge a leg belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LegType {
    Agent,
    /// The dialed contact
    Client,
}

impl LegType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LegType::Agent => "agent",
            LegType::Client => "client",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "agent" => Some(LegType::Agent),
            "client" => Some(LegType::Client),
            _ => None,
        }
    }
}

/// Leg status mirroring the provider's call status values
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LegStatus {
    Queued,
    Ringing,
    InProgress,
    Canceled,
    Completed,
    Busy,
    NoAnswer,
    Failed,
}

impl LegStatus {
    pub const ALL: [LegStatus; 8] = [
        LegStatus::Queued,
        LegStatus::Ringing,
        LegStatus::InProgress,
        LegStatus::Canceled,
        LegStatus::Completed,
        LegStatus::Busy,
        LegStatus::NoAnswer,
        LegStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LegStatus::Queued => "queued",
            LegStatus::Ringing => "ringing",
            LegStatus::InProgress => "in_progress",
            LegStatus::Canceled => "canceled",
            LegStatus::Completed => "completed",
            LegStatus::Busy => "busy",
            LegStatus::NoAnswer => "no_answer",
            LegStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(LegStatus::Queued),
            "ringing" => Some(LegStatus::Ringing),
            "in_progress" => Some(LegStatus::InProgress),
            "canceled" => Some(LegStatus::Canceled),
            "completed" => Some(LegStatus::Completed),
            "busy" => Some(LegStatus::Busy),
            "no_answer" => Some(LegStatus::NoAnswer),
            "failed" => Some(LegStatus::Failed),
            _ => None,
        }
    }

    /// Parse a provider call status (`in-progress`, `no-answer`, ...)
    pub fn from_provider(s: &str) -> Option<Self> {
        Self::from_str(&s.trim().to_ascii_lowercase().replace('-', "_"))
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            LegStatus::Canceled
                | LegStatus::Completed
                | LegStatus::Busy
                | LegStatus::NoAnswer
                | LegStatus::Failed
        )
    }

    fn rank(&self) -> u8 {
        match self {
            LegStatus::Queued => 0,
            LegStatus::Ringing => 1,
            LegStatus::InProgress => 2,
            _ => 3,
        }
    }

    /// Legs only move forward; a terminal status is final
    pub fn can_transition_to(&self, next: LegStatus) -> bool {
        !self.is_terminal() && next.rank() > self.rank()
    }

    /// Every status from which `next` may be written
    pub fn predecessors_of(next: LegStatus) -> Vec<LegStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }

    /// Whether the contact picked up on this leg
    pub fn was_answered(&self) -> bool {
        matches!(self, LegStatus::InProgress | LegStatus::Completed)
    }

    /// Conversation status reported by a contact leg, if any
    pub fn as_conversation_status(&self) -> Option<ConversationStatus> {
        match self {
            LegStatus::InProgress => Some(ConversationStatus::InProgress),
            LegStatus::Completed => Some(ConversationStatus::Completed),
            LegStatus::Busy => Some(ConversationStatus::Busy),
            LegStatus::NoAnswer => Some(ConversationStatus::NoAnswer),
            LegStatus::Failed => Some(ConversationStatus::Failed),
            LegStatus::Canceled => Some(ConversationStatus::Cancelled),
            LegStatus::Queued | LegStatus::Ringing => None,
        }
    }
}

/// One call leg placed into a conversation's bridge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantCall {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub leg_type: LegType,
    /// Provider call identifier
    pub leg_sid: String,
    pub status: LegStatus,
    pub recording_url: Option<String>,
    pub recording_duration: Option<i32>,
    pub call_duration: Option<i32>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ParticipantCall {
    /// A freshly placed leg, queued at the provider
    pub fn placed(conversation_id: Uuid, leg_type: LegType, leg_sid: String, created_by: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            conversation_id,
            leg_type,
            leg_sid,
            status: LegStatus::Queued,
            recording_url: None,
            recording_duration: None,
            call_duration: None,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derive the final conversation outcome from its legs.
///
/// The agent leg decides. A conversation without legs never got a dial out
/// and counts as failed; one without an agent leg was cancelled before the
/// agent could be reached.
pub fn derive_outcome(legs: &[ParticipantCall]) -> ConversationStatus {
    if legs.is_empty() {
        return ConversationStatus::Failed;
    }
    match legs.iter().find(|leg| leg.leg_type == LegType::Agent) {
        None => ConversationStatus::Cancelled,
        Some(agent) => match agent.status {
            LegStatus::Failed => ConversationStatus::Failed,
            LegStatus::Busy => ConversationStatus::Busy,
            LegStatus::NoAnswer => ConversationStatus::NoAnswer,
            LegStatus::Canceled => ConversationStatus::Cancelled,
            LegStatus::Completed | LegStatus::InProgress => ConversationStatus::Completed,
            LegStatus::Queued | LegStatus::Ringing => ConversationStatus::Failed,
        },
    }
}

/// Participant call repository interface
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ParticipantLedger: Send + Sync {
    async fn insert(&self, call: &ParticipantCall) -> Result<()>;

    async fn list_for_conversation(&self, conversation_id: Uuid) -> Result<Vec<ParticipantCall>>;

    async fn find_by_leg(&self, leg_sid: &str) -> Result<Option<ParticipantCall>>;

    /// Guarded by `LegStatus::predecessors_of`. Returns false when the leg
    /// is unknown or the write would move it backwards.
    async fn update_status(&self, leg_sid: &str, status: LegStatus) -> Result<bool>;

    async fn update_recording(&self, leg_sid: &str, url: &str, duration: i32) -> Result<()>;
}
