//! Usage billing for dialed calls

use crate::domain::shared::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Participants billed while both legs are connected
pub const DEFAULT_TOTAL_PARTICIPANTS: u32 = 2;

/// Charge component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingKind {
    /// Leg setup
    Sip,
    /// Bridge setup
    Bridge,
    /// Connect time
    Call,
}

impl BillingKind {
    pub fn code(&self) -> u8 {
        match self {
            BillingKind::Sip => 0,
            BillingKind::Bridge => 1,
            BillingKind::Call => 2,
        }
    }
}

/// Everything needed to charge one conversation's bridge.
///
/// Carried by the recurring charge job, so it must be self-contained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeContext {
    pub workspace_id: Uuid,
    pub campaign_id: Uuid,
    pub conversation_id: Uuid,
    pub bridge_name: String,
    pub bridge_sid: String,
    pub leg_sid: String,
    pub from: String,
    pub to: String,
}

/// Billing RPC request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub workspace_id: Uuid,
    pub parent_leg_sid: String,
    pub bridge_sid: String,
    pub from: String,
    pub to: String,
    pub total_participants: u32,
    pub billing_kinds: Vec<u8>,
    pub is_call_in_progress: bool,
    pub remarks: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeReceipt {
    pub success: bool,
    pub charge_amount: f64,
}

/// Result of one metering tick
#[derive(Debug, Clone, PartialEq)]
pub enum ChargeOutcome {
    Charged(ChargeReceipt),
    /// Credit at or below the threshold; nothing was charged
    InsufficientCredit,
}

/// Billing service reached over RPC
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BillingGateway: Send + Sync {
    async fn workspace_credit(&self, workspace_id: Uuid) -> Result<f64>;

    async fn charge_outbound_call(&self, request: &ChargeRequest) -> Result<ChargeReceipt>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_billing_codes() {
        assert_eq!(BillingKind::Sip.code(), 0);
        assert_eq!(BillingKind::Bridge.code(), 1);
        assert_eq!(BillingKind::Call.code(), 2);
    }
}
