//! Outreach core: contact ledger, session registry, call control and pacing.
//! Shared by the voice session driver and the gateway.

pub mod config;
pub mod contact;
pub mod error;
pub mod ledger;
pub mod link;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod telephony;
pub mod termination;

pub use config::OutreachConfig;
pub use contact::{ContactRecord, ContactStatus, ContactUpdate};
pub use error::{LedgerError, LedgerResult, TelephonyError, TelephonyResult};
pub use ledger::{
    ContactLedger, DirectWriter, EscalatingWriter, FileStore, LedgerStore, LedgerWriter,
    VerifiedWriter,
};
pub use link::{Duplex, OutboundFrame, SocketLink};
pub use registry::{fuzzy_id_match, CallSession, ContactRef, SessionRegistry, Speaker, TurnRecord};
pub use scheduler::{CallQueue, QueueReport};
pub use status::{reconcile_call_status, ProviderCallStatus, Reconciliation};
pub use telephony::{connect_stream_twiml, CallControl, TwilioClient, TwilioCredentials};
pub use termination::{TerminationCoordinator, TerminationOutcome};
