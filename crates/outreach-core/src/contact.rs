//! Contact records and their outreach status.

use crate::error::LedgerError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ledger column headers, in file order.
pub const COLUMN_NAME: &str = "Name";
pub const COLUMN_PHONE: &str = "Phone Number";
pub const COLUMN_EMAIL: &str = "Email";
pub const COLUMN_STATUS: &str = "Status";
pub const HEADERS: [&str; 4] = [COLUMN_NAME, COLUMN_PHONE, COLUMN_EMAIL, COLUMN_STATUS];

/// Where a contact is in the outreach lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContactStatus {
    Pending,
    CallInitiated,
    EmailCollected,
    CallFailed,
    #[serde(rename = "CallCompleted-EmailCollected")]
    CallCompletedEmailCollected,
    #[serde(rename = "CallCompleted-NotInterested")]
    CallCompletedNotInterested,
}

impl ContactStatus {
    /// Canonical ledger spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::CallInitiated => "CallInitiated",
            Self::EmailCollected => "EmailCollected",
            Self::CallFailed => "CallFailed",
            Self::CallCompletedEmailCollected => "CallCompleted-EmailCollected",
            Self::CallCompletedNotInterested => "CallCompleted-NotInterested",
        }
    }

    /// Final status once the provider reports the call completed.
    pub fn completed(email_collected: bool) -> Self {
        if email_collected {
            Self::CallCompletedEmailCollected
        } else {
            Self::CallCompletedNotInterested
        }
    }
}

impl fmt::Display for ContactStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContactStatus {
    type Err = LedgerError;

    /// Accepts the canonical names plus the older spaced spellings
    /// ("Call Completed - Email Collected"). Empty means `Pending`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key: String = s
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '_')
            .collect::<String>()
            .to_ascii_lowercase();
        match key.as_str() {
            "" | "pending" => Ok(Self::Pending),
            "callinitiated" => Ok(Self::CallInitiated),
            "emailcollected" => Ok(Self::EmailCollected),
            "callfailed" => Ok(Self::CallFailed),
            "callcompletedemailcollected" => Ok(Self::CallCompletedEmailCollected),
            "callcompletednotinterested" => Ok(Self::CallCompletedNotInterested),
            _ => Err(LedgerError::UnknownStatus(s.to_string())),
        }
    }
}

/// One ledger row. `phone_number` is the only join key between the ledger
/// and in-flight sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub name: String,
    pub phone_number: String,
    pub email: Option<String>,
    pub status: ContactStatus,
}

impl ContactRecord {
    pub fn new(name: impl Into<String>, phone_number: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            phone_number: phone_number.into(),
            email: None,
            status: ContactStatus::Pending,
        }
    }

    /// Apply every `Some` field of the update.
    pub fn apply(&mut self, update: &ContactUpdate) {
        if let Some(ref name) = update.name {
            self.name = name.clone();
        }
        if let Some(ref email) = update.email {
            self.email = Some(email.clone());
        }
        if let Some(status) = update.status {
            self.status = status;
        }
    }

    /// First field of `update` this record does not reflect, if any.
    pub fn mismatch(&self, update: &ContactUpdate) -> Option<String> {
        if let Some(ref name) = update.name {
            if &self.name != name {
                return Some(format!("name is '{}', expected '{}'", self.name, name));
            }
        }
        if let Some(ref email) = update.email {
            if self.email.as_deref() != Some(email.as_str()) {
                return Some(format!("email is {:?}, expected '{}'", self.email, email));
            }
        }
        if let Some(status) = update.status {
            if self.status != status {
                return Some(format!("status is {}, expected {}", self.status, status));
            }
        }
        None
    }
}

/// Field updates for a single contact. `None` leaves the field as is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub status: Option<ContactStatus>,
}

impl ContactUpdate {
    pub fn status(status: ContactStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Captured email plus the `EmailCollected` status.
    pub fn email_collected(email: impl Into<String>) -> Self {
        Self {
            email: Some(email.into()),
            status: Some(ContactStatus::EmailCollected),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_canonical_and_legacy_spellings() {
        assert_eq!(
            "CallCompleted-EmailCollected".parse::<ContactStatus>().unwrap(),
            ContactStatus::CallCompletedEmailCollected
        );
        assert_eq!(
            "Call Completed - Not Interested".parse::<ContactStatus>().unwrap(),
            ContactStatus::CallCompletedNotInterested
        );
        assert_eq!(
            "Email Collected".parse::<ContactStatus>().unwrap(),
            ContactStatus::EmailCollected
        );
        assert_eq!("".parse::<ContactStatus>().unwrap(), ContactStatus::Pending);
        assert!("Voicemail".parse::<ContactStatus>().is_err());
    }

    #[test]
    fn apply_touches_only_requested_fields() {
        let mut record = ContactRecord::new("Jane", "+15550000");
        record.apply(&ContactUpdate::status(ContactStatus::CallInitiated));
        assert_eq!(record.name, "Jane");
        assert_eq!(record.email, None);
        assert_eq!(record.status, ContactStatus::CallInitiated);
        assert!(record
            .mismatch(&ContactUpdate::status(ContactStatus::CallInitiated))
            .is_none());
        assert!(record
            .mismatch(&ContactUpdate::email_collected("jane@x.com"))
            .is_some());
    }
}
