//! Outreach persona - the newsletter script the AI follows, its declared
//! email-capture function, and the phrases that mark a finished call.

use crate::error::ExtractionError;
use crate::protocol::SessionProfile;
use serde::Deserialize;
use serde_json::{json, Value};

/// Name of the structured email-capture function.
pub const COLLECT_EMAIL: &str = "collect_email";

/// Spoken closings that mean the assistant is wrapping up.
/// Matched case-insensitively as substrings.
pub const GOODBYE_PHRASES: &[&str] = &[
    "have a great day",
    "goodbye",
    "thank you for your time",
    "you're all set",
    "first newsletter will arrive",
];

const INSTRUCTIONS: &str = "You are an AI assistant phoning people about a free weekly AI newsletter \
that goes out every Wednesday morning.

Call flow:
1. Open by asking \"Hello, is this [name]?\" using the name of the person being called.
2. Wait for them to confirm who they are.
3. Introduce yourself and the newsletter in one or two sentences.
4. Ask whether they would like to receive it.
5. If they are interested, ask for their email address.
6. Read the address back to them. Only after they confirm it, call collect_email with confirmed=true.
7. Once the address is saved, thank them by name, tell them the first newsletter arrives next \
Wednesday, and say goodbye.
8. If they are not interested, thank them for their time by name, wish them a great day, and end \
the call.

Keep every reply short, friendly and professional.";

/// `session.update` profile for this persona.
pub fn session_profile(voice: &str) -> SessionProfile {
    SessionProfile {
        voice: voice.to_string(),
        instructions: INSTRUCTIONS.to_string(),
        tools: vec![collect_email_tool()],
    }
}

/// Function schema the model uses to hand over a confirmed email address.
pub fn collect_email_tool() -> Value {
    json!({
        "type": "function",
        "name": COLLECT_EMAIL,
        "description": "Save the caller's email address once they have confirmed it is correct.",
        "parameters": {
            "type": "object",
            "properties": {
                "email": {
                    "type": "string",
                    "description": "The caller's email address"
                },
                "confirmed": {
                    "type": "boolean",
                    "description": "True only after the caller confirmed the address read back to them"
                }
            },
            "required": ["email", "confirmed"]
        }
    })
}

/// Opening line request. Without a name the model opens on its own.
pub fn greeting(name: Option<&str>) -> Option<String> {
    name.map(|n| format!("Start the call by saying: \"Hello, is this {}?\"", n))
}

pub fn farewell(name: Option<&str>) -> String {
    match name {
        Some(n) => format!(
            "Thank {} by name for their email, tell them their first newsletter will arrive next Wednesday, and say goodbye.",
            n
        ),
        None => "Thank the caller for their email, tell them their first newsletter will arrive next Wednesday, and say goodbye.".to_string(),
    }
}

/// Close after the address could not be stored. Never claims success.
pub fn save_failed_close(name: Option<&str>) -> String {
    let who = name.unwrap_or("the caller");
    format!(
        "Apologise to {} that their email could not be saved right now, tell them the team will follow up, thank them for their time, and say goodbye.",
        who
    )
}

/// True if `text` contains any closing phrase.
pub fn contains_goodbye(text: &str) -> bool {
    let lower = text.to_lowercase();
    GOODBYE_PHRASES.iter().any(|p| lower.contains(p))
}

/// A validated email capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailCapture {
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct RawCapture {
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    confirmed: bool,
}

/// Validate `collect_email` arguments. Anything short of a confirmed,
/// plausible address is rejected.
pub fn parse_email_capture(arguments: &str) -> Result<EmailCapture, ExtractionError> {
    let raw: RawCapture = serde_json::from_str(arguments)?;
    let email = raw
        .email
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or(ExtractionError::MissingEmail)?;
    if !raw.confirmed {
        return Err(ExtractionError::Unconfirmed);
    }
    if !looks_like_email(&email) {
        return Err(ExtractionError::InvalidEmail(email));
    }
    Ok(EmailCapture { email })
}

fn looks_like_email(email: &str) -> bool {
    if email.chars().any(|c| c.is_whitespace() || c == ',') {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}

/// What the model is told when a capture is rejected, so it can retry.
pub fn rejection_message(err: &ExtractionError) -> &'static str {
    match err {
        ExtractionError::Unconfirmed => {
            "Email not confirmed. Read the address back to the caller and ask them to confirm it."
        }
        ExtractionError::MissingEmail => {
            "No email address was provided. Ask the caller for their email address."
        }
        ExtractionError::InvalidEmail(_) | ExtractionError::Malformed(_) => {
            "The email address could not be understood. Ask the caller to spell it again."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_requires_confirmation_and_address() {
        assert_eq!(
            parse_email_capture(r#"{"email":" jane@x.com ","confirmed":true}"#).unwrap(),
            EmailCapture {
                email: "jane@x.com".into()
            }
        );
        assert!(matches!(
            parse_email_capture(r#"{"email":"jane@x.com","confirmed":false}"#),
            Err(ExtractionError::Unconfirmed)
        ));
        assert!(matches!(
            parse_email_capture(r#"{"confirmed":true}"#),
            Err(ExtractionError::MissingEmail)
        ));
        assert!(matches!(
            parse_email_capture(r#"{"email":"jane at x dot com","confirmed":true}"#),
            Err(ExtractionError::InvalidEmail(_))
        ));
        assert!(matches!(
            parse_email_capture("{email: jane"),
            Err(ExtractionError::Malformed(_))
        ));
    }

    #[test]
    fn goodbye_detection_ignores_case() {
        assert!(contains_goodbye("Thanks Jane! You're All Set."));
        assert!(contains_goodbye("... GOODBYE"));
        assert!(!contains_goodbye("Could you spell that email for me?"));
    }

    #[test]
    fn greeting_uses_contact_name() {
        assert_eq!(
            greeting(Some("Jane")).as_deref(),
            Some("Start the call by saying: \"Hello, is this Jane?\"")
        );
        assert_eq!(greeting(None), None);
        assert!(farewell(Some("Jane")).contains("Thank Jane"));
    }
}
