//! Call Termination Coordinator.
//!
//! Ends a call at the provider, then closes both sockets locally. Several
//! signals may ask for the same call to end; only the first does anything.
//! Provider failures are logged and not retried.

use crate::registry::{fuzzy_id_match, CallSession};
use crate::telephony::CallControl;
use std::sync::Arc;
use tracing::{info, warn};

/// How many recent provider calls are scanned when only a stream id is known.
pub const RECENT_CALL_SCAN: usize = 20;

/// What happened on the provider side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationOutcome {
    /// Another trigger already ended this session.
    AlreadyTerminating,
    Completed { call_id: String },
    /// No call id could be resolved; only local sockets were closed.
    Unresolved,
    /// The provider rejected or never answered the completion request.
    ProviderFailed { call_id: String },
}

#[derive(Clone)]
pub struct TerminationCoordinator {
    calls: Arc<dyn CallControl>,
    fuzzy_matching: bool,
}

impl TerminationCoordinator {
    pub fn new(calls: Arc<dyn CallControl>, fuzzy_matching: bool) -> Self {
        Self {
            calls,
            fuzzy_matching,
        }
    }

    /// End `session`. Idempotent.
    pub async fn end_call(&self, session: &CallSession) -> TerminationOutcome {
        if !session.begin_termination() {
            return TerminationOutcome::AlreadyTerminating;
        }

        let outcome = match self.resolve_call_id(session).await {
            Some(call_id) => match self.calls.complete_call(&call_id).await {
                Ok(()) => {
                    info!(call_id = %call_id, "🔚 Call ended");
                    TerminationOutcome::Completed { call_id }
                }
                Err(e) => {
                    warn!(call_id = %call_id, error = %e, "Provider refused call termination");
                    TerminationOutcome::ProviderFailed { call_id }
                }
            },
            None => {
                warn!(
                    key = session.key(),
                    "No call id resolved; provider-side termination skipped"
                );
                TerminationOutcome::Unresolved
            }
        };

        if let Some(ai) = session.ai_link() {
            ai.close();
        }
        if let Some(media) = session.media_link() {
            media.close();
        }
        outcome
    }

    async fn resolve_call_id(&self, session: &CallSession) -> Option<String> {
        if let Some(call_id) = session.call_sid() {
            return Some(call_id);
        }
        if !self.fuzzy_matching {
            return None;
        }
        let stream_id = session.stream_sid()?;
        let recent = match self.calls.list_recent_calls(RECENT_CALL_SCAN).await {
            Ok(ids) => ids,
            Err(e) => {
                warn!(stream_id = %stream_id, error = %e, "Listing recent calls failed");
                return None;
            }
        };
        let mut hits = recent.into_iter().filter(|id| fuzzy_id_match(&stream_id, id));
        match (hits.next(), hits.next()) {
            (Some(id), None) => {
                info!(stream_id = %stream_id, call_id = %id, "Resolved call id from stream id");
                Some(id)
            }
            (Some(_), Some(_)) => {
                warn!(stream_id = %stream_id, "Several recent calls match stream id; refusing to guess");
                None
            }
            _ => None,
        }
    }
}
