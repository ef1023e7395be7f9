//! In-flight dialing state of a running campaign
//!
//! The state lives in the shared cache under the campaign id and exists only
//! while the campaign is dialing. Webhooks that find no state are stale.

use crate::domain::campaign::{Campaign, CampaignSettings};
use crate::domain::conversation::Conversation;
use crate::domain::participant::LegType;
use crate::domain::shared::ProviderCredentials;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Overall run status kept in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    InProgress,
    /// Last contact dialed, waiting for the deferred end
    DialingCompleted,
}

/// One entry of the cached dial queue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedContact {
    pub conversation_id: Uuid,
    pub bridge_name: String,
    pub sequence_number: i32,
    pub contact_name: String,
    pub contact_number: String,
    pub initial_call: bool,
    pub skip_cooldown: bool,
}

impl From<&Conversation> for QueuedContact {
    fn from(c: &Conversation) -> Self {
        Self {
            conversation_id: c.id,
            bridge_name: c.bridge_name.clone(),
            sequence_number: c.sequence_number,
            contact_name: c.contact_name.clone(),
            contact_number: c.contact_number.clone(),
            initial_call: c.initial_call,
            skip_cooldown: c.skip_cooldown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CampaignCacheState {
    pub campaign_id: Uuid,
    pub workspace_id: Uuid,
    pub status: RunStatus,
    pub is_reattempt: bool,
    /// Ordered by sequence number
    pub queue: Vec<QueuedContact>,
    /// Sequence number of the conversation currently being dialed
    pub current_sequence: i32,
    pub next_number_to_dial: Option<String>,
    pub assignee_id: Uuid,
    pub dialing_number: String,
    pub dialing_number_id: Uuid,
    pub settings: CampaignSettings,
    pub credentials: ProviderCredentials,
    pub started_at: DateTime<Utc>,
}

impl CampaignCacheState {
    /// Seed the state for a new run, pointer on the queue head
    pub fn seed(
        campaign: &Campaign,
        conversations: &[Conversation],
        credentials: ProviderCredentials,
        is_reattempt: bool,
    ) -> Self {
        let mut queue: Vec<QueuedContact> = conversations.iter().map(QueuedContact::from).collect();
        queue.sort_by_key(|c| c.sequence_number);
        let current_sequence = queue.first().map(|c| c.sequence_number).unwrap_or(0);

        Self {
            campaign_id: campaign.id,
            workspace_id: campaign.workspace_id,
            status: RunStatus::InProgress,
            is_reattempt,
            queue,
            current_sequence,
            next_number_to_dial: None,
            assignee_id: campaign.assignee_id,
            dialing_number: campaign.dialing_number.clone(),
            dialing_number_id: campaign.dialing_number_id,
            settings: campaign.settings.clone(),
            credentials,
            started_at: Utc::now(),
        }
    }

    pub fn head(&self) -> Option<&QueuedContact> {
        self.queue.first()
    }

    pub fn current(&self) -> Option<&QueuedContact> {
        self.by_sequence(self.current_sequence)
    }

    pub fn by_sequence(&self, sequence_number: i32) -> Option<&QueuedContact> {
        self.queue.iter().find(|c| c.sequence_number == sequence_number)
    }

    pub fn by_bridge(&self, bridge_name: &str) -> Option<&QueuedContact> {
        self.queue.iter().find(|c| c.bridge_name == bridge_name)
    }

    pub fn by_conversation(&self, conversation_id: Uuid) -> Option<&QueuedContact> {
        self.queue.iter().find(|c| c.conversation_id == conversation_id)
    }

    /// First queued contact after `sequence_number`
    pub fn after(&self, sequence_number: i32) -> Option<&QueuedContact> {
        self.queue
            .iter()
            .filter(|c| c.sequence_number > sequence_number)
            .min_by_key(|c| c.sequence_number)
    }

    /// Move the pointer onto `contact` and checkpoint its number
    pub fn point_at(&mut self, contact: &QueuedContact) {
        self.current_sequence = contact.sequence_number;
        self.next_number_to_dial = Some(contact.contact_number.clone());
    }

    /// Drop a contact from the queue; the current one is kept
    pub fn remove(&mut self, conversation_id: Uuid) -> bool {
        let before = self.queue.len();
        let current = self.current_sequence;
        self.queue
            .retain(|c| c.conversation_id != conversation_id || c.sequence_number == current);
        self.queue.len() != before
    }
}

/// Cached owner of a provider leg, keyed by leg sid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegSnapshot {
    pub campaign_id: Uuid,
    pub conversation_id: Uuid,
    pub leg_type: LegType,
}

/// Cached live legs of a conversation, keyed by conversation id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveLegs {
    pub client_leg_sid: String,
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::shared::Contact;

    fn state_with(numbers: &[&str]) -> CampaignCacheState {
        let campaign = Campaign::new(
            Uuid::new_v4(),
            "Spring".into(),
            Uuid::new_v4(),
            "+15550000".into(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
        );
        let conversations: Vec<Conversation> = numbers
            .iter()
            .enumerate()
            .map(|(i, n)| {
                Conversation::queued(campaign.id, &Contact::new("c", *n), i as i32 + 1, true, 1, campaign.created_by)
            })
            .rev()
            .collect();
        CampaignCacheState::seed(&campaign, &conversations, ProviderCredentials::default(), false)
    }

    #[test]
    fn test_seed_orders_queue_and_points_at_head() {
        let state = state_with(&["A", "B", "C"]);
        assert_eq!(state.current_sequence, 1);
        assert_eq!(state.head().map(|c| c.contact_number.as_str()), Some("A"));
        assert_eq!(state.status, RunStatus::InProgress);
    }

    #[test]
    fn test_after_and_point_at() {
        let mut state = state_with(&["A", "B", "C"]);
        let next = state.after(1).cloned().unwrap();
        assert_eq!(next.contact_number, "B");

        state.point_at(&next);
        assert_eq!(state.current_sequence, 2);
        assert_eq!(state.next_number_to_dial.as_deref(), Some("B"));
        assert!(state.after(3).is_none());
    }

    #[test]
    fn test_remove_keeps_current() {
        let mut state = state_with(&["A", "B", "C"]);
        let a = state.by_sequence(1).unwrap().conversation_id;
        let b = state.by_sequence(2).unwrap().conversation_id;

        assert!(!state.remove(a));
        assert!(state.remove(b));
        assert_eq!(state.after(1).map(|c| c.contact_number.as_str()), Some("C"));
    }

    #[test]
    fn test_state_json_roundtrip_field_names() {
        let state = state_with(&["A"]);
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["status"], "in_progress");
        assert!(json.get("next_number_to_dial").is_some());
    }
}
