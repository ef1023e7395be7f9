//! REST client for the call-control provider
//!
//! Bridges are provider conferences addressed by friendly name. Legs are
//! placed with form-encoded POSTs; every webhook URL carries the campaign's
//! callback token as its `token` query parameter.

use crate::config::ProviderConfig;
use crate::domain::provider::{
    AgentDialMetadata, BridgeHandle, BridgeInfo, BridgeProvider, BridgeStatus, DialFailure,
    LegHandle, RecordingAction,
};
use crate::domain::shared::{DomainError, ProviderCredentials, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use tracing::{debug, error, warn};

pub const BRIDGE_EVENTS_PATH: &str = "/power-dialer/bridge-events";
pub const LEG_STATUS_PATH: &str = "/power-dialer/leg-status";
pub const RECORDING_PATH: &str = "/power-dialer/recording";

#[derive(Debug, Deserialize)]
struct ApiError {
    code: Option<i32>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: String,
}

#[derive(Debug, Deserialize)]
struct ParticipantResource {
    call_sid: String,
}

#[derive(Debug, Deserialize)]
struct ConferenceResource {
    sid: String,
    status: String,
    date_created: Option<String>,
    date_updated: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConferencePage {
    #[serde(default)]
    conferences: Vec<ConferenceResource>,
}

pub struct RestBridgeProvider {
    client: reqwest::Client,
    api_base_url: String,
    webhook_base_url: String,
}

impl RestBridgeProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DomainError::Provider(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
            webhook_base_url: config.webhook_base_url.trim_end_matches('/').to_string(),
        })
    }

    fn account_url(&self, credentials: &ProviderCredentials, resource: &str) -> String {
        format!(
            "{}/Accounts/{}/{}",
            self.api_base_url, credentials.account_sid, resource
        )
    }

    /// Webhook URL with the token and extra parameters in its query
    fn callback_url(&self, path: &str, token: &str, extra: &[(&str, String)]) -> Result<String> {
        let mut params: Vec<(&str, String)> = vec![("token", token.to_string())];
        params.extend(extra.iter().cloned());
        Url::parse_with_params(&format!("{}{}", self.webhook_base_url, path), &params)
            .map(String::from)
            .map_err(|e| DomainError::Provider(format!("bad webhook url: {}", e)))
    }

    fn authorized(&self, credentials: &ProviderCredentials, request: RequestBuilder) -> RequestBuilder {
        if credentials.api_key.is_empty() {
            request.basic_auth(&credentials.account_sid, Some(&credentials.auth_token))
        } else {
            request.basic_auth(&credentials.api_key, Some(&credentials.api_secret))
        }
    }

    async fn post_form(
        &self,
        credentials: &ProviderCredentials,
        url: &str,
        form: &[(&str, String)],
    ) -> std::result::Result<Response, DialFailure> {
        let response = self
            .authorized(credentials, self.client.post(url))
            .form(form)
            .send()
            .await
            .map_err(|e| DialFailure {
                code: None,
                message: Some(format!("request failed: {}", e)),
            })?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match serde_json::from_str::<ApiError>(&body) {
            Ok(api) => Err(DialFailure {
                code: api.code,
                message: api.message,
            }),
            Err(_) => Err(DialFailure {
                code: None,
                message: Some(format!("provider returned {}", status)),
            }),
        }
    }

    async fn post_checked(
        &self,
        credentials: &ProviderCredentials,
        url: &str,
        form: &[(&str, String)],
    ) -> Result<Response> {
        self.post_form(credentials, url, form).await.map_err(|failure| {
            let reason = failure.reason();
            error!("Provider request to {} failed: {}", url, reason.message);
            DomainError::Provider(reason.message)
        })
    }

    async fn find_conferences(
        &self,
        credentials: &ProviderCredentials,
        name: &str,
    ) -> Result<Vec<ConferenceResource>> {
        let url = self.account_url(credentials, "Conferences.json");
        let response = self
            .authorized(credentials, self.client.get(&url))
            .query(&[("FriendlyName", name)])
            .send()
            .await
            .map_err(|e| DomainError::Provider(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(DomainError::Provider(format!(
                "conference lookup returned {}",
                response.status()
            )));
        }
        let page: ConferencePage = response
            .json()
            .await
            .map_err(|e| DomainError::Provider(format!("bad conference page: {}", e)))?;
        Ok(page.conferences)
    }

    async fn live_conference(&self, credentials: &ProviderCredentials, name: &str) -> Result<String> {
        self.find_conferences(credentials, name)
            .await?
            .into_iter()
            .find(|c| BridgeStatus::from_provider(&c.status).map_or(false, |s| s.is_active()))
            .map(|c| c.sid)
            .ok_or_else(|| DomainError::NotFound(format!("live bridge {}", name)))
    }
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// Call instructions joining a leg to the named conference
fn bridge_instructions(name: &str, status_callback: &str, recording_callback: Option<&str>) -> String {
    let recording = match recording_callback {
        Some(url) => format!(
            r#" record="record-from-start" recordingStatusCallback="{}""#,
            xml_escape(url)
        ),
        None => String::new(),
    };
    format!(
        r#"<Response><Dial><Conference startConferenceOnEnter="true" endConferenceOnExit="true" beep="false" statusCallback="{}" statusCallbackEvent="start end join leave"{}>{}</Conference></Dial></Response>"#,
        xml_escape(status_callback),
        recording,
        xml_escape(name)
    )
}

/// Provider timestamps are RFC 2822
fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc2822(s).ok())
        .map(|t| t.with_timezone(&Utc))
}

fn metadata_params(metadata: &AgentDialMetadata) -> Vec<(&'static str, String)> {
    let mut params = vec![
        ("campaignId", metadata.campaign_id.to_string()),
        ("conversationId", metadata.conversation_id.to_string()),
        ("contactName", metadata.contact_name.clone()),
        ("contactNumber", metadata.contact_number.clone()),
        ("sequenceNumber", metadata.sequence_number.to_string()),
        ("isReattempt", metadata.is_reattempt.to_string()),
        ("recordingEnabled", metadata.recording_enabled.to_string()),
    ];
    if let Some(id) = metadata.call_script_id {
        params.push(("callScriptId", id.to_string()));
    }
    if let Some(secs) = metadata.cool_off_period {
        params.push(("coolOffPeriod", secs.to_string()));
    }
    if let Some(number) = &metadata.next_number {
        params.push(("nextNumber", number.clone()));
    }
    if let Some(id) = metadata.next_conversation_id {
        params.push(("nextConversationId", id.to_string()));
    }
    params
}

#[async_trait]
impl BridgeProvider for RestBridgeProvider {
    async fn create_bridge(
        &self,
        _credentials: &ProviderCredentials,
        name: &str,
        callback_token: &str,
        recording_enabled: bool,
    ) -> Result<BridgeHandle> {
        let status_callback = self.callback_url(BRIDGE_EVENTS_PATH, callback_token, &[])?;
        let recording_callback = if recording_enabled {
            Some(self.callback_url(RECORDING_PATH, callback_token, &[])?)
        } else {
            None
        };

        // The conference comes into existence when the first leg joins it
        Ok(BridgeHandle {
            name: name.to_string(),
            instructions: bridge_instructions(name, &status_callback, recording_callback.as_deref()),
        })
    }

    async fn dial_identity(
        &self,
        credentials: &ProviderCredentials,
        identity: &str,
        from: &str,
        bridge: &BridgeHandle,
        callback_token: &str,
        metadata: &AgentDialMetadata,
    ) -> std::result::Result<LegHandle, DialFailure> {
        let to = Url::parse_with_params(&format!("client:{}", identity), metadata_params(metadata))
            .map(String::from)
            .map_err(|e| DialFailure {
                code: None,
                message: Some(format!("bad client address: {}", e)),
            })?;
        let status_callback = self
            .callback_url(LEG_STATUS_PATH, callback_token, &[])
            .map_err(|e| DialFailure {
                code: None,
                message: Some(e.to_string()),
            })?;

        let url = self.account_url(credentials, "Calls.json");
        let form = [
            ("To", to),
            ("From", from.to_string()),
            ("Twiml", bridge.instructions.clone()),
            ("StatusCallback", status_callback),
            ("StatusCallbackEvent", "initiated".to_string()),
            ("StatusCallbackEvent", "ringing".to_string()),
            ("StatusCallbackEvent", "answered".to_string()),
            ("StatusCallbackEvent", "completed".to_string()),
        ];
        let response = self.post_form(credentials, &url, &form).await?;
        let call: CallResource = response.json().await.map_err(|e| DialFailure {
            code: None,
            message: Some(format!("bad call resource: {}", e)),
        })?;

        debug!("Agent {} ringing on leg {}", identity, call.sid);
        Ok(LegHandle { sid: call.sid })
    }

    async fn dial_external_number(
        &self,
        credentials: &ProviderCredentials,
        bridge_sid: &str,
        number: &str,
        from: &str,
        callback_token: &str,
    ) -> std::result::Result<LegHandle, DialFailure> {
        let status_callback = self
            .callback_url(LEG_STATUS_PATH, callback_token, &[])
            .map_err(|e| DialFailure {
                code: None,
                message: Some(e.to_string()),
            })?;

        let url = self.account_url(
            credentials,
            &format!("Conferences/{}/Participants.json", bridge_sid),
        );
        let form = [
            ("To", number.to_string()),
            ("From", from.to_string()),
            ("EndConferenceOnExit", "true".to_string()),
            ("StatusCallback", status_callback),
            ("StatusCallbackEvent", "initiated".to_string()),
            ("StatusCallbackEvent", "ringing".to_string()),
            ("StatusCallbackEvent", "answered".to_string()),
            ("StatusCallbackEvent", "completed".to_string()),
        ];
        let response = self.post_form(credentials, &url, &form).await?;
        let participant: ParticipantResource = response.json().await.map_err(|e| DialFailure {
            code: None,
            message: Some(format!("bad participant resource: {}", e)),
        })?;

        Ok(LegHandle {
            sid: participant.call_sid,
        })
    }

    async fn terminate_bridge(&self, credentials: &ProviderCredentials, name: &str) -> Result<()> {
        let conferences = self.find_conferences(credentials, name).await?;
        for conference in conferences
            .iter()
            .filter(|c| BridgeStatus::from_provider(&c.status).map_or(false, |s| s.is_active()))
        {
            let url = self.account_url(credentials, &format!("Conferences/{}.json", conference.sid));
            self.post_checked(credentials, &url, &[("Status", "completed".to_string())])
                .await?;
            debug!("Terminated bridge {} ({})", name, conference.sid);
        }
        Ok(())
    }

    async fn fetch_bridge(&self, credentials: &ProviderCredentials, name: &str) -> Result<Option<BridgeInfo>> {
        let Some(conference) = self.find_conferences(credentials, name).await?.into_iter().next() else {
            return Ok(None);
        };
        let Some(status) = BridgeStatus::from_provider(&conference.status) else {
            warn!("Unknown status {} of bridge {}", conference.status, name);
            return Ok(None);
        };

        let created_at = parse_timestamp(conference.date_created.as_deref()).unwrap_or_else(Utc::now);
        let updated_at = parse_timestamp(conference.date_updated.as_deref()).unwrap_or(created_at);
        Ok(Some(BridgeInfo {
            sid: conference.sid,
            status,
            created_at,
            updated_at,
        }))
    }

    async fn hold_leg(
        &self,
        credentials: &ProviderCredentials,
        bridge_name: &str,
        leg_sid: &str,
        hold: bool,
    ) -> Result<()> {
        let conference_sid = self.live_conference(credentials, bridge_name).await?;
        let url = self.account_url(
            credentials,
            &format!("Conferences/{}/Participants/{}.json", conference_sid, leg_sid),
        );
        self.post_checked(credentials, &url, &[("Hold", hold.to_string())])
            .await?;
        Ok(())
    }

    async fn drop_voicemail(&self, credentials: &ProviderCredentials, leg_sid: &str, audio_url: &str) -> Result<()> {
        let url = self.account_url(credentials, &format!("Calls/{}.json", leg_sid));
        let twiml = format!(
            "<Response><Play>{}</Play><Hangup/></Response>",
            xml_escape(audio_url)
        );
        self.post_checked(credentials, &url, &[("Twiml", twiml)]).await?;
        Ok(())
    }

    async fn control_recording(
        &self,
        credentials: &ProviderCredentials,
        bridge_name: &str,
        action: RecordingAction,
    ) -> Result<()> {
        let conference_sid = self.live_conference(credentials, bridge_name).await?;
        let url = self.account_url(
            credentials,
            &format!("Conferences/{}/Recordings/Twilio.CURRENT.json", conference_sid),
        );
        self.post_checked(
            credentials,
            &url,
            &[("Status", action.provider_status().to_string())],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> RestBridgeProvider {
        RestBridgeProvider::new(&ProviderConfig {
            api_base_url: "https://api.example.com/2010-04-01/".into(),
            webhook_base_url: "https://dialer.example.com".into(),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[test]
    fn test_callback_url_encodes_token() {
        let url = provider()
            .callback_url(BRIDGE_EVENTS_PATH, "YWJj+/==", &[])
            .unwrap();
        assert!(url.starts_with("https://dialer.example.com/power-dialer/bridge-events?token="));
        assert!(url.ends_with("YWJj%2B%2F%3D%3D"));
    }

    #[tokio::test]
    async fn test_bridge_instructions_escape_and_record() {
        let bridge = provider()
            .create_bridge(&ProviderCredentials::default(), "a&b", "tok", true)
            .await
            .unwrap();
        assert!(bridge.instructions.contains(">a&amp;b</Conference>"));
        assert!(bridge.instructions.contains("recordingStatusCallback="));

        let quiet = provider()
            .create_bridge(&ProviderCredentials::default(), "b1", "tok", false)
            .await
            .unwrap();
        assert!(!quiet.instructions.contains("record="));
    }

    #[test]
    fn test_parse_provider_timestamp() {
        let at = parse_timestamp(Some("Tue, 31 Aug 2010 20:36:28 +0000")).unwrap();
        assert_eq!(at.timestamp(), 1283286988);
        assert!(parse_timestamp(Some("yesterday")).is_none());
    }

    #[test]
    fn test_account_url_trims_base() {
        let creds = ProviderCredentials {
            account_sid: "AC1".into(),
            ..Default::default()
        };
        assert_eq!(
            provider().account_url(&creds, "Calls.json"),
            "https://api.example.com/2010-04-01/Accounts/AC1/Calls.json"
        );
    }
}
