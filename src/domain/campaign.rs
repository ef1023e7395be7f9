//! Campaign aggregate
//!
//! A campaign owns a contact list, a calling number and an assignee (the agent
//! that is bridged to every answered contact). Its `status` is written only by
//! the control commands; the dial loop additionally writes the durable
//! `next_number_to_dial` checkpoint.

use crate::domain::shared::{Contact, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Campaign lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    /// Created, never started
    Active,
    /// Currently dialing
    InProgress,
    Paused,
    Ended,
    Completed,
    Archived,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Active => "active",
            CampaignStatus::InProgress => "inprogress",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Ended => "ended",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Archived => "archived",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CampaignStatus::Active),
            "inprogress" => Some(CampaignStatus::InProgress),
            "paused" => Some(CampaignStatus::Paused),
            "ended" => Some(CampaignStatus::Ended),
            "completed" => Some(CampaignStatus::Completed),
            "archived" => Some(CampaignStatus::Archived),
            _ => None,
        }
    }
}

/// Operator control command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Pause,
    Resume,
    End,
    Reattempt,
}

impl ControlAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::End => "end",
            ControlAction::Reattempt => "reattempt",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "start" => Some(ControlAction::Start),
            "pause" => Some(ControlAction::Pause),
            "resume" => Some(ControlAction::Resume),
            "end" => Some(ControlAction::End),
            "reattempt" => Some(ControlAction::Reattempt),
            _ => None,
        }
    }

    /// Campaign status written once the command succeeds
    pub fn target_status(&self) -> CampaignStatus {
        match self {
            ControlAction::Start | ControlAction::Resume | ControlAction::Reattempt => {
                CampaignStatus::InProgress
            }
            ControlAction::Pause => CampaignStatus::Paused,
            ControlAction::End => CampaignStatus::Ended,
        }
    }
}

/// Feature toggles of a campaign.
///
/// Copied into the campaign cache when a run starts, so edits made while the
/// campaign is dialing only affect the next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CampaignSettings {
    pub recording_enabled: bool,
    pub voicemail_enabled: bool,
    pub voicemail_url: Option<String>,
    pub cool_off_enabled: bool,
    /// Seconds
    pub cool_off_period: Option<i32>,
    pub call_attempts_enabled: bool,
    pub max_attempts: Option<i32>,
    /// Seconds
    pub attempt_gap: Option<i32>,
    pub call_script_id: Option<Uuid>,
}

impl CampaignSettings {
    /// Cool-off applied between two dials, zero when disabled
    pub fn cool_off_secs(&self) -> u64 {
        if self.cool_off_enabled {
            self.cool_off_period.unwrap_or(0).max(0) as u64
        } else {
            0
        }
    }

    /// Whether a contact that already had `attempts` dials may be dialed again
    pub fn allows_attempt(&self, attempts: i32) -> bool {
        match (self.call_attempts_enabled, self.max_attempts) {
            (true, Some(max)) => attempts < max,
            _ => true,
        }
    }
}

/// Campaign aggregate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    /// Agent identity dialed for every contact
    pub assignee_id: Uuid,
    pub dialing_number: String,
    pub dialing_number_id: Uuid,
    pub contact_list_id: Uuid,
    pub settings: CampaignSettings,
    /// Durable resume checkpoint
    pub next_number_to_dial: Option<String>,
    pub status: CampaignStatus,
    pub is_archived: bool,
    pub created_by: Uuid,
    pub modified_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn new(
        workspace_id: Uuid,
        name: String,
        assignee_id: Uuid,
        dialing_number: String,
        dialing_number_id: Uuid,
        contact_list_id: Uuid,
        created_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            workspace_id,
            name,
            assignee_id,
            dialing_number,
            dialing_number_id,
            contact_list_id,
            settings: CampaignSettings::default(),
            next_number_to_dial: None,
            status: CampaignStatus::Active,
            is_archived: false,
            created_by,
            modified_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_settings(mut self, settings: CampaignSettings) -> Self {
        self.settings = settings;
        self
    }
}

/// Campaign repository interface
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CampaignRepository: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Campaign>>;

    async fn update_status(&self, id: Uuid, status: CampaignStatus, modified_by: Uuid) -> Result<()>;

    /// Persist the resume checkpoint
    async fn update_next_number_to_dial(&self, id: Uuid, number: Option<String>) -> Result<()>;

    /// Contacts of a contact list in list order
    async fn list_contacts(&self, contact_list_id: Uuid) -> Result<Vec<Contact>>;
}
