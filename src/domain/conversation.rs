//! Conversation ledger
//!
//! One conversation per contact dial attempt. Rows are created in bulk when a
//! campaign starts or is reattempted and are never deleted.

use crate::domain::shared::{Contact, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Conversation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Pending,
    InQueue,
    InProgress,
    OnHold,
    Completed,
    Failed,
    Busy,
    NoAnswer,
    Cancelled,
}

impl ConversationStatus {
    pub const ALL: [ConversationStatus; 9] = [
        ConversationStatus::Pending,
        ConversationStatus::InQueue,
        ConversationStatus::InProgress,
        ConversationStatus::OnHold,
        ConversationStatus::Completed,
        ConversationStatus::Failed,
        ConversationStatus::Busy,
        ConversationStatus::NoAnswer,
        ConversationStatus::Cancelled,
    ];

    /// Statuses that stop tracking on pause
    pub const LIVE: [ConversationStatus; 2] =
        [ConversationStatus::InProgress, ConversationStatus::OnHold];

    /// Statuses completed when a campaign ends
    pub const OPEN: [ConversationStatus; 4] = [
        ConversationStatus::InProgress,
        ConversationStatus::InQueue,
        ConversationStatus::Pending,
        ConversationStatus::OnHold,
    ];

    /// Outcomes that qualify a contact for a reattempt pass
    pub const RETRYABLE: [ConversationStatus; 4] = [
        ConversationStatus::Failed,
        ConversationStatus::Cancelled,
        ConversationStatus::Busy,
        ConversationStatus::NoAnswer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationStatus::Pending => "pending",
            ConversationStatus::InQueue => "in_queue",
            ConversationStatus::InProgress => "in_progress",
            ConversationStatus::OnHold => "on_hold",
            ConversationStatus::Completed => "completed",
            ConversationStatus::Failed => "failed",
            ConversationStatus::Busy => "busy",
            ConversationStatus::NoAnswer => "no_answer",
            ConversationStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ConversationStatus::Pending),
            "in_queue" => Some(ConversationStatus::InQueue),
            "in_progress" => Some(ConversationStatus::InProgress),
            "on_hold" => Some(ConversationStatus::OnHold),
            "completed" => Some(ConversationStatus::Completed),
            "failed" => Some(ConversationStatus::Failed),
            "busy" => Some(ConversationStatus::Busy),
            "no_answer" => Some(ConversationStatus::NoAnswer),
            "cancelled" => Some(ConversationStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConversationStatus::Completed
                | ConversationStatus::Failed
                | ConversationStatus::Busy
                | ConversationStatus::NoAnswer
                | ConversationStatus::Cancelled
        )
    }

    /// Whether the status only moves forward from `self` to `next`.
    ///
    /// Queued rows may move anywhere, live rows may toggle hold or finish,
    /// terminal rows never change.
    pub fn can_transition_to(&self, next: ConversationStatus) -> bool {
        if *self == next {
            return false;
        }
        match self {
            ConversationStatus::Pending | ConversationStatus::InQueue => true,
            ConversationStatus::InProgress | ConversationStatus::OnHold => !matches!(
                next,
                ConversationStatus::Pending | ConversationStatus::InQueue
            ),
            _ => false,
        }
    }

    /// Every status from which `next` may be written
    pub fn predecessors_of(next: ConversationStatus) -> Vec<ConversationStatus> {
        Self::ALL
            .into_iter()
            .filter(|s| s.can_transition_to(next))
            .collect()
    }
}

/// Provider failure recorded on a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub code: Option<i32>,
    pub message: String,
}

/// A single dial attempt of one contact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub campaign_id: Uuid,
    /// Friendly name of the provider bridge hosting this attempt
    pub bridge_name: String,
    pub sequence_number: i32,
    /// First pass (`true`) or reattempt pass (`false`)
    pub initial_call: bool,
    pub current_attempt: i32,
    pub contact_name: String,
    pub contact_number: String,
    pub status: ConversationStatus,
    pub recording_url: Option<String>,
    pub recording_duration: Option<i32>,
    /// Seconds
    pub call_duration: Option<i32>,
    pub reason_code: Option<i32>,
    pub reason_message: Option<String>,
    pub note_id: Option<Uuid>,
    pub skipped: bool,
    pub skip_cooldown: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Create a queued attempt with a fresh bridge name
    pub fn queued(
        campaign_id: Uuid,
        contact: &Contact,
        sequence_number: i32,
        initial_call: bool,
        current_attempt: i32,
        created_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            campaign_id,
            bridge_name: Uuid::new_v4().to_string(),
            sequence_number,
            initial_call,
            current_attempt,
            contact_name: contact.name.clone(),
            contact_number: contact.number.clone(),
            status: ConversationStatus::InQueue,
            recording_url: None,
            recording_duration: None,
            call_duration: None,
            reason_code: None,
            reason_message: None,
            note_id: None,
            skipped: false,
            skip_cooldown: false,
            created_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn contact(&self) -> Contact {
        Contact::new(self.contact_name.clone(), self.contact_number.clone())
    }
}

/// Durable conversation storage.
///
/// `update_status` is the only status writer and must apply the transition
/// atomically against `ConversationStatus::predecessors_of`, returning
/// whether the row changed.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ConversationLedger: Send + Sync {
    async fn insert_many(&self, conversations: &[Conversation]) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// All conversations of a campaign ordered by sequence number
    async fn list_for_campaign(&self, campaign_id: Uuid) -> Result<Vec<Conversation>>;

    async fn list_by_status(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<Vec<Conversation>>;

    async fn exists_with_status(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<bool>;

    /// Highest sequence number used by the campaign, 0 when empty
    async fn max_sequence(&self, campaign_id: Uuid) -> Result<i32>;

    async fn update_status(
        &self,
        id: Uuid,
        status: ConversationStatus,
        reason: Option<FailureReason>,
    ) -> Result<bool>;

    /// Move every conversation in `statuses` to completed
    async fn complete_where(
        &self,
        campaign_id: Uuid,
        statuses: &[ConversationStatus],
    ) -> Result<u64>;

    async fn update_call_duration(&self, id: Uuid, seconds: i32) -> Result<()>;

    async fn update_recording(&self, id: Uuid, url: &str, duration: i32) -> Result<()>;

    /// Flag an operator skip; the dial after it ignores the cool-off
    async fn mark_skipped(&self, id: Uuid) -> Result<()>;

    async fn set_note(&self, id: Uuid, note_id: Uuid) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_is_final() {
        for terminal in ConversationStatus::ALL.iter().filter(|s| s.is_terminal()) {
            for next in ConversationStatus::ALL {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_live_cannot_requeue() {
        assert!(ConversationStatus::InProgress.can_transition_to(ConversationStatus::OnHold));
        assert!(ConversationStatus::OnHold.can_transition_to(ConversationStatus::InProgress));
        assert!(ConversationStatus::InProgress.can_transition_to(ConversationStatus::Busy));
        assert!(!ConversationStatus::InProgress.can_transition_to(ConversationStatus::Pending));
        assert!(!ConversationStatus::OnHold.can_transition_to(ConversationStatus::InQueue));
    }

    #[test]
    fn test_predecessors_of_completed() {
        let preds = ConversationStatus::predecessors_of(ConversationStatus::Completed);
        assert_eq!(
            preds,
            vec![
                ConversationStatus::Pending,
                ConversationStatus::InQueue,
                ConversationStatus::InProgress,
                ConversationStatus::OnHold,
            ]
        );
        assert!(ConversationStatus::predecessors_of(ConversationStatus::Pending)
            .contains(&ConversationStatus::InQueue));
    }

    #[test]
    fn test_queued_conversation() {
        let campaign_id = Uuid::new_v4();
        let contact = Contact::new("Ada", "+15550001");
        let a = Conversation::queued(campaign_id, &contact, 1, true, 1, Uuid::new_v4());
        let b = Conversation::queued(campaign_id, &contact, 2, true, 1, Uuid::new_v4());

        assert_eq!(a.status, ConversationStatus::InQueue);
        assert_eq!(a.contact(), contact);
        assert_ne!(a.bridge_name, b.bridge_name);
    }
}
