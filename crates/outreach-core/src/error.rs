//! Error types for the outreach core

use thiserror::Error;

/// Result type alias for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result type alias for call-control operations
pub type TelephonyResult<T> = Result<T, TelephonyError>;

/// Failures reading or mutating the contact ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("No contact found with phone number {0}")]
    ContactNotFound(String),

    #[error("Phone number {0} appears on more than one ledger row")]
    DuplicatePhoneNumber(String),

    #[error("Post-write verification failed for {phone}: {detail}")]
    VerificationFailed { phone: String, detail: String },

    #[error("Ledger is missing the '{0}' column")]
    MissingColumn(&'static str),

    #[error("Ledger has unsupported column '{0}'")]
    UnexpectedColumn(String),

    #[error("Unknown contact status '{0}'")]
    UnknownStatus(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures talking to the telephony provider (placing, listing, or ending calls)
#[derive(Error, Debug)]
pub enum TelephonyError {
    #[error("Call-control request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Provider returned {status}: {body}")]
    Provider { status: u16, body: String },

    #[error("Provider response did not include a call identifier")]
    MissingCallId,

    #[error("Configuration error: {0}")]
    Config(String),
}
