//! Opaque token round-tripped through the provider's webhooks

use crate::domain::shared::{DomainError, Result};
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Campaign context of a bridge.
///
/// Encoded as url-safe base64 of
/// `{workspace},{campaign},{bridge},{conversation},{0|1}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackToken {
    pub workspace_id: Uuid,
    pub campaign_id: Uuid,
    pub bridge_name: String,
    pub conversation_id: Uuid,
    pub is_reattempt: bool,
}

impl CallbackToken {
    pub fn encode(&self) -> String {
        URL_SAFE.encode(self.to_string())
    }

    pub fn decode(token: &str) -> Result<Self> {
        let token = token.trim();
        let bytes = URL_SAFE
            .decode(token)
            .or_else(|_| URL_SAFE_NO_PAD.decode(token.trim_end_matches('=')))
            .map_err(|e| DomainError::InvalidCallbackToken(format!("not base64: {}", e)))?;
        let raw = String::from_utf8(bytes)
            .map_err(|_| DomainError::InvalidCallbackToken("not utf-8".to_string()))?;

        let parts: Vec<&str> = raw.split(',').collect();
        if parts.len() != 5 {
            return Err(DomainError::InvalidCallbackToken(format!(
                "expected 5 fields, got {}",
                parts.len()
            )));
        }

        let uuid = |s: &str| {
            Uuid::parse_str(s).map_err(|_| DomainError::InvalidCallbackToken(format!("bad id {}", s)))
        };

        Ok(Self {
            workspace_id: uuid(parts[0])?,
            campaign_id: uuid(parts[1])?,
            bridge_name: parts[2].to_string(),
            conversation_id: uuid(parts[3])?,
            is_reattempt: match parts[4] {
                "1" | "true" | "True" => true,
                "0" | "false" | "False" | "" => false,
                other => {
                    return Err(DomainError::InvalidCallbackToken(format!(
                        "bad reattempt flag {}",
                        other
                    )))
                }
            },
        })
    }
}

impl fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{}",
            self.workspace_id,
            self.campaign_id,
            self.bridge_name,
            self.conversation_id,
            u8::from(self.is_reattempt)
        )
    }
}
