//! Outbound Dialer - call control against the telephony provider's REST API.
//! reqwest only; the provider is reached with form posts and basic auth.

use crate::error::{TelephonyError, TelephonyResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info};

const TWILIO_API_BASE: &str = "https://api.twilio.com/2010-04-01";

/// Provider events we ask to be called back for.
pub const STATUS_CALLBACK_EVENTS: [&str; 4] = ["initiated", "ringing", "answered", "completed"];

/// Call-control operations the orchestrator needs from the provider.
#[async_trait]
pub trait CallControl: Send + Sync {
    /// Place a call to `to`; returns the provider's call id.
    async fn place_call(&self, to: &str) -> TelephonyResult<String>;

    /// Move a live call to `completed`.
    async fn complete_call(&self, call_id: &str) -> TelephonyResult<()>;

    /// Ids of the most recent calls, newest first.
    async fn list_recent_calls(&self, limit: usize) -> TelephonyResult<Vec<String>>;
}

#[derive(Debug, Clone)]
pub struct TwilioCredentials {
    pub account_sid: String,
    pub auth_token: String,
    /// Originating number.
    pub from_number: String,
}

/// Twilio REST client.
#[derive(Debug, Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    credentials: TwilioCredentials,
    base_url: String,
    api_base: String,
}

#[derive(Debug, Deserialize)]
struct CallResource {
    sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CallList {
    #[serde(default)]
    calls: Vec<CallResource>,
}

impl TwilioClient {
    /// `base_url` is this service's public URL; webhooks hang off it.
    pub fn new(credentials: TwilioCredentials, base_url: impl Into<String>) -> TelephonyResult<Self> {
        if credentials.account_sid.is_empty() || credentials.auth_token.is_empty() {
            return Err(TelephonyError::Config(
                "Twilio account SID and auth token are required".to_string(),
            ));
        }
        Ok(Self {
            http: reqwest::Client::new(),
            credentials,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_base: TWILIO_API_BASE.to_string(),
        })
    }

    /// Point at a different API root (test servers, regional edges).
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn calls_url(&self) -> String {
        format!(
            "{}/Accounts/{}/Calls.json",
            self.api_base, self.credentials.account_sid
        )
    }

    fn call_url(&self, call_id: &str) -> String {
        format!(
            "{}/Accounts/{}/Calls/{}.json",
            self.api_base, self.credentials.account_sid, call_id
        )
    }

    /// Form body for a new outbound call.
    fn dial_form(&self, to: &str) -> Vec<(&'static str, String)> {
        let mut form = vec![
            ("To", to.to_string()),
            ("From", self.credentials.from_number.clone()),
            ("Url", format!("{}/webhook/voice", self.base_url)),
            ("StatusCallback", format!("{}/webhook/status", self.base_url)),
            ("StatusCallbackMethod", "POST".to_string()),
        ];
        form.extend(
            STATUS_CALLBACK_EVENTS
                .iter()
                .map(|e| ("StatusCallbackEvent", e.to_string())),
        );
        form
    }

    async fn checked(response: reqwest::Response) -> TelephonyResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(TelephonyError::Provider {
            status: status.as_u16(),
            body,
        })
    }
}

#[async_trait]
impl CallControl for TwilioClient {
    async fn place_call(&self, to: &str) -> TelephonyResult<String> {
        let response = self
            .http
            .post(self.calls_url())
            .basic_auth(&self.credentials.account_sid, Some(&self.credentials.auth_token))
            .form(&self.dial_form(to))
            .send()
            .await?;
        let call: CallResource = Self::checked(response).await?.json().await?;
        let sid = call.sid.ok_or(TelephonyError::MissingCallId)?;
        info!(call_id = %sid, to, "📞 Outbound call placed");
        Ok(sid)
    }

    async fn complete_call(&self, call_id: &str) -> TelephonyResult<()> {
        let response = self
            .http
            .post(self.call_url(call_id))
            .basic_auth(&self.credentials.account_sid, Some(&self.credentials.auth_token))
            .form(&[("Status", "completed")])
            .send()
            .await?;
        Self::checked(response).await?;
        info!(call_id, "Call marked completed at provider");
        Ok(())
    }

    async fn list_recent_calls(&self, limit: usize) -> TelephonyResult<Vec<String>> {
        let response = self
            .http
            .get(self.calls_url())
            .basic_auth(&self.credentials.account_sid, Some(&self.credentials.auth_token))
            .query(&[("PageSize", limit.to_string())])
            .send()
            .await?;
        let list: CallList = Self::checked(response).await?.json().await?;
        let ids: Vec<String> = list.calls.into_iter().filter_map(|c| c.sid).collect();
        debug!(count = ids.len(), "Listed recent calls");
        Ok(ids)
    }
}

/// TwiML that connects the answered call to our media-stream socket.
pub fn connect_stream_twiml(stream_url: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <Response><Connect><Stream url=\"{}\"/></Connect></Response>",
        xml_escape(stream_url)
    )
}

fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> TwilioClient {
        TwilioClient::new(
            TwilioCredentials {
                account_sid: "AC123".into(),
                auth_token: "secret".into(),
                from_number: "+15559999".into(),
            },
            "https://outreach.example.com/",
        )
        .unwrap()
    }

    #[test]
    fn dial_form_points_webhooks_at_base_url() {
        let form = client().dial_form("+15550000");
        assert!(form.contains(&("Url", "https://outreach.example.com/webhook/voice".into())));
        assert!(form.contains(&(
            "StatusCallback",
            "https://outreach.example.com/webhook/status".into()
        )));
        let events: Vec<&str> = form
            .iter()
            .filter(|(k, _)| *k == "StatusCallbackEvent")
            .map(|(_, v)| v.as_str())
            .collect();
        assert_eq!(events, STATUS_CALLBACK_EVENTS);
    }

    #[test]
    fn urls_are_scoped_to_account() {
        let c = client().with_api_base("http://localhost:9000/");
        assert_eq!(c.calls_url(), "http://localhost:9000/Accounts/AC123/Calls.json");
        assert_eq!(c.call_url("CA1"), "http://localhost:9000/Accounts/AC123/Calls/CA1.json");
    }

    #[test]
    fn missing_credentials_are_rejected() {
        let err = TwilioClient::new(
            TwilioCredentials {
                account_sid: String::new(),
                auth_token: String::new(),
                from_number: String::new(),
            },
            "https://x",
        )
        .unwrap_err();
        assert!(matches!(err, TelephonyError::Config(_)));
    }

    #[test]
    fn twiml_connects_media_stream() {
        assert_eq!(
            connect_stream_twiml("wss://host/media-stream"),
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?><Response><Connect>\
             <Stream url=\"wss://host/media-stream\"/></Connect></Response>"
        );
    }
}
