//! Service configuration. Precedence: environment > TOML file (`OUTREACH_CONFIG`,
//! default `config/outreach.toml`) > built-in defaults.
//!
//! Env names are the upper-case field names (`TWILIO_ACCOUNT_SID`, `PORT`, ...).
//! Call `dotenvy::dotenv()` first if a `.env` file should count.

use serde::Deserialize;
use std::fmt;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Deserialize)]
pub struct OutreachConfig {
    #[serde(default)]
    pub twilio_account_sid: String,
    #[serde(default)]
    pub twilio_auth_token: String,
    /// Originating number for outbound calls.
    #[serde(default)]
    pub twilio_phone_number: String,
    /// Externally reachable URL of this service (webhooks are built from it).
    #[serde(default)]
    pub base_url: String,
    pub host: String,
    pub port: u16,

    #[serde(default)]
    pub openai_api_key: String,
    pub realtime_url: String,
    pub realtime_model: String,
    pub voice: String,

    pub contacts_path: String,
    pub call_interval_secs: u64,
    pub session_ttl_secs: u64,
    /// Allow the 10-character id heuristic when exact ids do not match.
    pub fuzzy_id_matching: bool,
    /// Start dialing the ledger as soon as the server is up.
    pub autostart_queue: bool,

    pub session_config_delay_ms: u64,
    pub greeting_delay_ms: u64,
    pub extraction_grace_secs: u64,
    pub goodbye_grace_secs: u64,
}

impl OutreachConfig {
    /// Load from `OUTREACH_CONFIG` (or `config/outreach`) plus environment.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("OUTREACH_CONFIG").unwrap_or_else(|_| "config/outreach".to_string());
        Self::load_from(Path::new(&config_path))
    }

    pub fn load_from(path: &Path) -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .set_default("host", "0.0.0.0")?
            .set_default("port", 5050_i64)?
            .set_default("realtime_url", "wss://api.openai.com/v1/realtime")?
            .set_default("realtime_model", "gpt-4o-mini-realtime-preview-2024-12-17")?
            .set_default("voice", "alloy")?
            .set_default("contacts_path", "contacts.csv")?
            .set_default("call_interval_secs", 120_i64)?
            .set_default("session_ttl_secs", 1800_i64)?
            .set_default("fuzzy_id_matching", true)?
            .set_default("autostart_queue", true)?
            .set_default("session_config_delay_ms", 1000_i64)?
            .set_default("greeting_delay_ms", 1000_i64)?
            .set_default("extraction_grace_secs", 7_i64)?
            .set_default("goodbye_grace_secs", 5_i64)?;

        let with_toml = path.with_extension("toml");
        let builder = if path.is_file() {
            builder.add_source(config::File::from(path))
        } else if with_toml.is_file() {
            builder.add_source(config::File::from(with_toml.as_path()))
        } else {
            builder
        };

        builder
            .add_source(config::Environment::default())
            .build()?
            .try_deserialize()
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn call_interval(&self) -> Duration {
        Duration::from_secs(self.call_interval_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    /// Full realtime endpoint including the model query.
    pub fn realtime_endpoint(&self) -> String {
        format!("{}?model={}", self.realtime_url, self.realtime_model)
    }

    /// `wss://` URL of the media-stream socket. `host` is the request's Host
    /// header when available.
    pub fn media_stream_url(&self, host: Option<&str>) -> String {
        let host = host
            .filter(|h| !h.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| {
                self.base_url
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string()
            });
        format!("wss://{}/media-stream", host)
    }

    /// Settings that must be present before any call can be placed.
    pub fn missing_required(&self) -> Vec<&'static str> {
        [
            ("TWILIO_ACCOUNT_SID", &self.twilio_account_sid),
            ("TWILIO_AUTH_TOKEN", &self.twilio_auth_token),
            ("TWILIO_PHONE_NUMBER", &self.twilio_phone_number),
            ("BASE_URL", &self.base_url),
            ("OPENAI_API_KEY", &self.openai_api_key),
        ]
        .into_iter()
        .filter(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
        .collect()
    }
}

fn redact(secret: &str) -> &'static str {
    if secret.is_empty() {
        "<unset>"
    } else {
        "<set>"
    }
}

impl fmt::Debug for OutreachConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutreachConfig")
            .field("twilio_account_sid", &redact(&self.twilio_account_sid))
            .field("twilio_auth_token", &redact(&self.twilio_auth_token))
            .field("twilio_phone_number", &self.twilio_phone_number)
            .field("base_url", &self.base_url)
            .field("bind", &self.bind_addr())
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("realtime_endpoint", &self.realtime_endpoint())
            .field("voice", &self.voice)
            .field("contacts_path", &self.contacts_path)
            .field("call_interval_secs", &self.call_interval_secs)
            .field("session_ttl_secs", &self.session_ttl_secs)
            .field("fuzzy_id_matching", &self.fuzzy_id_matching)
            .field("autostart_queue", &self.autostart_queue)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_values_override_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("outreach.toml");
        std::fs::write(
            &path,
            "call_interval_secs = 30\nvoice = \"verse\"\nbase_url = \"https://calls.example.com/\"\n",
        )
        .unwrap();

        let cfg = OutreachConfig::load_from(&dir.path().join("outreach")).unwrap();
        assert_eq!(cfg.call_interval(), Duration::from_secs(30));
        assert_eq!(cfg.voice, "verse");
        assert_eq!(cfg.extraction_grace_secs, 7);
        assert_eq!(
            cfg.media_stream_url(None),
            "wss://calls.example.com/media-stream"
        );
        assert_eq!(
            cfg.media_stream_url(Some("abc.ngrok.io")),
            "wss://abc.ngrok.io/media-stream"
        );
        assert!(format!("{:?}", cfg).contains("twilio_auth_token"));
    }
}
