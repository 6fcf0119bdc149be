//! Final ledger status from the provider's status callback.

use crate::contact::{ContactStatus, ContactUpdate};
use crate::ledger::ContactLedger;
use crate::registry::SessionRegistry;
use tracing::{debug, error, info, warn};

/// Provider call status, as far as the ledger cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderCallStatus {
    Completed,
    /// `failed`, `busy`, `no-answer`, `canceled`.
    Unreached,
    InProgress,
}

impl ProviderCallStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "completed" => Self::Completed,
            "failed" | "busy" | "no-answer" | "canceled" => Self::Unreached,
            _ => Self::InProgress,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Non-terminal status; nothing to do.
    Ignored,
    /// No session for this call id (never ours, or already reconciled).
    UnknownCall,
    /// Session had no linked contact; it was dropped without a ledger write.
    NoContact,
    Recorded {
        phone: String,
        status: ContactStatus,
    },
    LedgerFailed {
        phone: String,
    },
}

/// Apply a status callback: write the terminal ledger status (checking
/// whether an email was already captured) and drop the session.
///
/// The callback carries the provider's own call id, so only an exact
/// registry key matches.
pub async fn reconcile_call_status(
    ledger: &ContactLedger,
    registry: &SessionRegistry,
    call_id: &str,
    raw_status: &str,
) -> Reconciliation {
    let status = ProviderCallStatus::parse(raw_status);
    if status == ProviderCallStatus::InProgress {
        debug!(call_id, status = raw_status, "Call progress");
        return Reconciliation::Ignored;
    }

    let Some(session) = registry.get(call_id) else {
        info!(call_id, status = raw_status, "Status for unknown call ignored");
        return Reconciliation::UnknownCall;
    };
    registry.remove(session.key());

    let Some(contact) = session.contact() else {
        warn!(call_id, "Session ended without a linked contact");
        return Reconciliation::NoContact;
    };
    let phone = contact.phone_number;

    let final_status = match status {
        ProviderCallStatus::Completed => {
            let recorded = match ledger.get_status(&phone).await {
                Ok(s) => s == Some(ContactStatus::EmailCollected),
                Err(e) => {
                    warn!(phone = %phone, error = %e, "Ledger status lookup failed");
                    false
                }
            };
            ContactStatus::completed(recorded || session.email_collected())
        }
        _ => ContactStatus::CallFailed,
    };

    match ledger
        .try_update_by_phone_number(&phone, &ContactUpdate::status(final_status))
        .await
    {
        Ok(()) => {
            info!(call_id, phone = %phone, status = %final_status, "🏁 Call outcome recorded");
            Reconciliation::Recorded {
                phone,
                status: final_status,
            }
        }
        Err(e) => {
            error!(call_id, phone = %phone, error = %e, "Could not record call outcome");
            Reconciliation::LedgerFailed { phone }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ContactRef;

    fn ledger_with(dir: &tempfile::TempDir, status: &str) -> ContactLedger {
        let path = dir.path().join("contacts.csv");
        std::fs::write(
            &path,
            format!("Name,Phone Number,Email,Status\nJane,+15550000,,{}\n", status),
        )
        .unwrap();
        ContactLedger::open(path)
    }

    #[tokio::test]
    async fn completed_without_extraction_is_not_interested() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_with(&dir, "CallInitiated");
        let registry = SessionRegistry::default();
        registry.create("CA1", Some(ContactRef::new("Jane", "+15550000")));

        let outcome = reconcile_call_status(&ledger, &registry, "CA1", "completed").await;
        assert_eq!(
            outcome,
            Reconciliation::Recorded {
                phone: "+15550000".into(),
                status: ContactStatus::CallCompletedNotInterested
            }
        );
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn completed_after_capture_keeps_email_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_with(&dir, "EmailCollected");
        let registry = SessionRegistry::default();
        registry.create("CA1", Some(ContactRef::new("Jane", "+15550000")));

        reconcile_call_status(&ledger, &registry, "CA1", "completed").await;
        assert_eq!(
            ledger.get_status("+15550000").await.unwrap(),
            Some(ContactStatus::CallCompletedEmailCollected)
        );
    }

    #[tokio::test]
    async fn busy_counts_as_failed_and_repeats_are_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ledger_with(&dir, "CallInitiated");
        let registry = SessionRegistry::default();
        registry.create("CA1", Some(ContactRef::new("Jane", "+15550000")));

        assert_eq!(
            reconcile_call_status(&ledger, &registry, "CA1", "ringing").await,
            Reconciliation::Ignored
        );
        reconcile_call_status(&ledger, &registry, "CA1", "busy").await;
        assert_eq!(
            ledger.get_status("+15550000").await.unwrap(),
            Some(ContactStatus::CallFailed)
        );
        assert_eq!(
            reconcile_call_status(&ledger, &registry, "CA1", "completed").await,
            Reconciliation::UnknownCall
        );
    }

    #[tokio::test]
    async fn callbacks_match_call_ids_exactly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("contacts.csv");
        std::fs::write(
            &path,
            "Name,Phone Number,Email,Status\n\
             Jane,+15550000,,Call Initiated\n\
             Bob,+15550001,,Call Initiated\n",
        )
        .unwrap();
        let ledger = ContactLedger::open(&path);
        let registry = SessionRegistry::default();
        registry.create("CA12345678aaaa", Some(ContactRef::new("Jane", "+15550000")));
        registry.create("CA12345678bbbb", Some(ContactRef::new("Bob", "+15550001")));
        let before = std::fs::read(&path).unwrap();

        // Shares a ten-character prefix with both sessions.
        assert_eq!(
            reconcile_call_status(&ledger, &registry, "CA12345678cccc", "failed").await,
            Reconciliation::UnknownCall
        );
        assert_eq!(std::fs::read(&path).unwrap(), before);
        assert_eq!(registry.len(), 2);

        reconcile_call_status(&ledger, &registry, "CA12345678bbbb", "failed").await;
        assert_eq!(
            ledger.get_status("+15550001").await.unwrap(),
            Some(ContactStatus::CallFailed)
        );
        assert_eq!(
            ledger.get_status("+15550000").await.unwrap(),
            Some(ContactStatus::CallInitiated)
        );
        assert!(registry.get("CA12345678aaaa").is_some());
    }
}
