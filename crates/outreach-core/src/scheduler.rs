//! Call Queue Scheduler - dials ledger contacts one after another at a fixed pace.
//!
//! The next dial waits only for the previous placement attempt, not for the
//! conversation, so the interval bounds the dial rate and nothing more.

use crate::contact::{ContactStatus, ContactUpdate};
use crate::error::LedgerResult;
use crate::ledger::ContactLedger;
use crate::registry::{ContactRef, SessionRegistry};
use crate::telephony::CallControl;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Tally of one pass over the ledger.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueueReport {
    pub dialed: usize,
    pub failed: usize,
    /// Rows not in `Pending` or without a phone number.
    pub skipped: usize,
}

pub struct CallQueue {
    ledger: Arc<ContactLedger>,
    calls: Arc<dyn CallControl>,
    registry: SessionRegistry,
    interval: Duration,
}

impl CallQueue {
    pub fn new(
        ledger: Arc<ContactLedger>,
        calls: Arc<dyn CallControl>,
        registry: SessionRegistry,
        interval: Duration,
    ) -> Self {
        Self {
            ledger,
            calls,
            registry,
            interval,
        }
    }

    /// One pass over the ledger. Only a failure to read the ledger aborts it;
    /// dial and status-write failures are logged and the queue moves on.
    pub async fn run(&self) -> LedgerResult<QueueReport> {
        let contacts = self.ledger.read_all().await?;
        let mut report = QueueReport::default();
        let due: Vec<_> = contacts
            .into_iter()
            .filter(|c| {
                let due = c.status == ContactStatus::Pending && !c.phone_number.is_empty();
                if !due {
                    report.skipped += 1;
                }
                due
            })
            .collect();

        info!(due = due.len(), skipped = report.skipped, "📋 Call queue started");

        for (i, contact) in due.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.interval).await;
            }
            let phone = contact.phone_number.as_str();

            let status = match self.calls.place_call(phone).await {
                Ok(call_id) => {
                    self.registry.create(
                        &call_id,
                        Some(ContactRef::new(&contact.name, phone)),
                    );
                    report.dialed += 1;
                    info!(call_id = %call_id, phone, name = %contact.name, "Call initiated");
                    ContactStatus::CallInitiated
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(phone, error = %e, "Dial failed");
                    ContactStatus::CallFailed
                }
            };

            if let Err(e) = self
                .ledger
                .try_update_by_phone_number(phone, &ContactUpdate::status(status))
                .await
            {
                error!(phone, %status, error = %e, "Could not record dial outcome");
            }
        }

        info!(
            dialed = report.dialed,
            failed = report.failed,
            "📋 Call queue finished"
        );
        Ok(report)
    }
}
