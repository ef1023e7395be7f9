//! Provider webhook ingress
//!
//! Takes the decoded form fields of a provider callback plus the `token`
//! query parameter, and hands them to the dispatcher. The provider always
//! gets an acknowledgement; failures are only logged.

use crate::application::bridge_events::{BridgeEvent, BridgeEventDispatcher, BridgeEventKind};
use crate::domain::callback_token::CallbackToken;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Empty call-instruction document returned to the provider
pub const ACK_BODY: &str = "<Response></Response>";
pub const ACK_CONTENT_TYPE: &str = "text/xml";

pub type FormFields = HashMap<String, String>;

pub struct WebhookIngress {
    dispatcher: Arc<BridgeEventDispatcher>,
}

impl WebhookIngress {
    pub fn new(dispatcher: Arc<BridgeEventDispatcher>) -> Self {
        Self { dispatcher }
    }

    /// Conference status callback
    pub async fn bridge_event(&self, token: &str, form: &FormFields) -> &'static str {
        let Some(token) = decode(token) else {
            return ACK_BODY;
        };
        match parse_bridge_event(&token, form) {
            Some(event) => self.dispatcher.on_bridge_event(&token, &event).await,
            None => debug!(
                "Ignoring bridge callback {:?} for {}",
                form.get("StatusCallbackEvent"),
                token.bridge_name
            ),
        }
        ACK_BODY
    }

    /// Call status callback of a leg
    pub async fn leg_status(&self, token: &str, form: &FormFields) -> &'static str {
        let Some(token) = decode(token) else {
            return ACK_BODY;
        };
        match (field(form, "CallSid"), field(form, "CallStatus")) {
            (Some(leg_sid), Some(status)) => {
                self.dispatcher.on_leg_status(&token, leg_sid, status).await
            }
            _ => warn!(
                "Leg status callback for conversation {} without CallSid/CallStatus",
                token.conversation_id
            ),
        }
        ACK_BODY
    }

    /// Recording status callback
    pub async fn recording(&self, token: &str, form: &FormFields) -> &'static str {
        let Some(token) = decode(token) else {
            return ACK_BODY;
        };
        match field(form, "RecordingUrl") {
            Some(url) => {
                let duration = parse_int(form, "RecordingDuration").unwrap_or(0);
                self.dispatcher.on_recording(&token, url, duration).await
            }
            None => warn!(
                "Recording callback for conversation {} without RecordingUrl",
                token.conversation_id
            ),
        }
        ACK_BODY
    }
}

fn decode(raw: &str) -> Option<CallbackToken> {
    match CallbackToken::decode(raw) {
        Ok(token) => Some(token),
        Err(e) => {
            warn!("Dropping webhook: {}", e);
            None
        }
    }
}

fn field<'a>(form: &'a FormFields, name: &str) -> Option<&'a str> {
    form.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

fn parse_int(form: &FormFields, name: &str) -> Option<i32> {
    field(form, name).and_then(|v| v.trim().parse().ok())
}

/// Translate a conference callback; `None` for events the dialer ignores
pub fn parse_bridge_event(token: &CallbackToken, form: &FormFields) -> Option<BridgeEvent> {
    let kind = BridgeEventKind::from_provider(field(form, "StatusCallbackEvent")?)?;
    Some(BridgeEvent {
        kind,
        bridge_name: field(form, "FriendlyName")
            .unwrap_or(&token.bridge_name)
            .to_string(),
        bridge_sid: field(form, "ConferenceSid").unwrap_or_default().to_string(),
        leg_sequence: parse_int(form, "SequenceNumber"),
        leg_sid: field(form, "CallSid").map(str::to_string),
        reason_code: parse_int(form, "ReasonCode"),
        reason_message: field(form, "Reason").map(str::to_string),
    })
}
