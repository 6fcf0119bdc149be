//! Per-call session driver.
//!
//! Owns one call's two sockets for its whole life: opens the AI side, feeds
//! every inbound message and timer into the [`Conversation`], and carries
//! out the effects it returns (socket sends, ledger writes, termination).
//! Errors stay inside the call; nothing here can take down another session.

use crate::conversation::{
    Conversation, ConversationState, ConversationTimings, Effect, SocketSide, Timer,
};
use crate::error::VoiceResult;
use crate::persona;
use crate::protocol::{MediaEvent, ServerEvent, StreamStart};
use crate::realtime::AiConnector;
use crate::relay::{AudioRelay, RelayStats};
use outreach_core::contact::ContactUpdate;
use outreach_core::ledger::ContactLedger;
use outreach_core::link::{Duplex, SocketLink};
use outreach_core::registry::{CallSession, SessionRegistry};
use outreach_core::termination::TerminationCoordinator;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};

/// Shared collaborators for every call.
pub struct SessionContext {
    pub registry: SessionRegistry,
    pub ledger: Arc<ContactLedger>,
    pub terminator: TerminationCoordinator,
    pub connector: Arc<dyn AiConnector>,
    pub timings: ConversationTimings,
    pub voice: String,
}

/// How a call's session ended.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    /// Registry key, if the media stream ever identified itself.
    pub key: Option<String>,
    pub final_state: ConversationState,
    pub email_collected: bool,
    pub relay: RelayStats,
    pub turns: usize,
}

enum Internal {
    Timer(Timer),
    Persisted(bool),
}

struct MediaSession {
    ctx: Arc<SessionContext>,
    conversation: Conversation,
    relay: AudioRelay,
    session: Option<Arc<CallSession>>,
    media_link: SocketLink,
    ai_link: SocketLink,
    internal_tx: mpsc::UnboundedSender<Internal>,
}

/// Run one call from media-stream open to termination.
///
/// Fails only if the AI socket cannot be opened; the media socket is closed
/// in that case.
pub async fn run_media_session(
    ctx: Arc<SessionContext>,
    media: Duplex,
) -> VoiceResult<SessionSummary> {
    let Duplex {
        link: media_link,
        inbound: media_inbound,
    } = media;

    let ai = match ctx.connector.connect().await {
        Ok(ai) => ai,
        Err(e) => {
            warn!(error = %e, "❌ AI socket could not be opened, dropping media stream");
            media_link.close();
            return Err(e);
        }
    };
    let Duplex {
        link: ai_link,
        inbound: ai_inbound,
    } = ai;

    let (internal_tx, mut internal_rx) = mpsc::unbounded_channel();
    let mut driver = MediaSession {
        conversation: Conversation::new(persona::session_profile(&ctx.voice), ctx.timings),
        relay: AudioRelay::new(media_link.clone(), ai_link.clone()),
        session: None,
        media_link,
        ai_link,
        internal_tx,
        ctx,
    };

    let mut media_inbound = ReceiverStream::new(media_inbound);
    let mut ai_inbound = ReceiverStream::new(ai_inbound);
    let mut media_open = true;
    let mut ai_open = true;

    let effects = driver.conversation.on_ai_open();
    driver.apply(effects).await;

    while !driver.conversation.is_closed() {
        let effects = tokio::select! {
            message = media_inbound.next(), if media_open => match message {
                Some(text) => driver.on_media_text(&text),
                None => {
                    media_open = false;
                    driver.media_link.mark_closed();
                    driver.conversation.on_socket_closed(SocketSide::Telephony)
                }
            },
            message = ai_inbound.next(), if ai_open => match message {
                Some(text) => driver.on_ai_text(&text),
                None => {
                    ai_open = false;
                    driver.ai_link.mark_closed();
                    driver.conversation.on_socket_closed(SocketSide::Ai)
                }
            },
            Some(internal) = internal_rx.recv() => match internal {
                Internal::Timer(timer) => driver.conversation.on_timer(timer),
                Internal::Persisted(saved) => driver.conversation.on_email_persisted(saved),
            },
        };
        driver.apply(effects).await;
    }

    Ok(driver.finish())
}

impl MediaSession {
    fn on_media_text(&mut self, text: &str) -> Vec<Effect> {
        let event = match MediaEvent::parse(text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Dropping malformed media event");
                return Vec::new();
            }
        };
        match event {
            MediaEvent::Media { media } => {
                self.relay.forward_caller_audio(&media.payload);
                Vec::new()
            }
            MediaEvent::Start { start } => {
                self.attach(start);
                Vec::new()
            }
            MediaEvent::Stop {} => self.conversation.on_socket_closed(SocketSide::Telephony),
            MediaEvent::Connected {} => {
                debug!("Media stream connected");
                Vec::new()
            }
            MediaEvent::Mark {} | MediaEvent::Other => Vec::new(),
        }
    }

    fn on_ai_text(&mut self, text: &str) -> Vec<Effect> {
        match ServerEvent::parse(text) {
            Ok(event) => self.conversation.on_server_event(event),
            Err(e) => {
                warn!(error = %e, "Dropping malformed AI event");
                Vec::new()
            }
        }
    }

    /// Bind this stream to its registry session.
    fn attach(&mut self, start: StreamStart) {
        let session = self
            .ctx
            .registry
            .attach_stream(&start.stream_sid, start.call_sid.as_deref());
        session.set_ai_link(self.ai_link.clone());
        session.set_media_link(self.media_link.clone());
        self.relay.set_stream_sid(&start.stream_sid);

        let contact = session.contact();
        info!(
            stream_id = %start.stream_sid,
            call_id = session.call_sid().as_deref().unwrap_or(""),
            contact = contact.as_ref().map(|c| c.name.as_str()).unwrap_or(""),
            "🔗 Media stream attached"
        );
        if contact.is_none() {
            warn!(stream_id = %start.stream_sid, "No contact linked; continuing without context");
        }
        self.conversation.set_contact_name(contact.map(|c| c.name));
        self.session = Some(session);
    }

    async fn apply(&mut self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::SendAi(event) => {
                    if !self.ai_link.send_text(event.to_string()) {
                        debug!("AI event dropped, socket not open");
                    }
                }
                Effect::RelayAudio(delta) => {
                    self.relay.forward_assistant_audio(&delta);
                }
                Effect::Schedule { after, timer } => {
                    let tx = self.internal_tx.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(after).await;
                        let _ = tx.send(Internal::Timer(timer));
                    });
                }
                Effect::PersistEmail { email } => {
                    let tx = self.internal_tx.clone();
                    let ledger = Arc::clone(&self.ctx.ledger);
                    let session = self.session.clone();
                    tokio::spawn(async move {
                        let saved = persist_email(&ledger, session.as_deref(), &email).await;
                        let _ = tx.send(Internal::Persisted(saved));
                    });
                }
                Effect::RecordTurn { speaker, text } => match self.session {
                    Some(ref session) => session.record_turn(speaker, text),
                    None => debug!("Turn before stream start not recorded"),
                },
                Effect::Terminate => {
                    if let Some(ref session) = self.session {
                        let outcome = self.ctx.terminator.end_call(session).await;
                        debug!(?outcome, "Termination finished");
                    }
                    self.relay.propagate_close();
                    self.conversation.on_terminated();
                }
            }
        }
    }

    fn finish(self) -> SessionSummary {
        let key = self.session.as_ref().map(|s| s.key().to_string());
        if let Some(ref session) = self.session {
            // Dialed sessions wait for the status callback; provisional ones
            // have nothing to reconcile.
            if session.contact().is_none() {
                self.ctx.registry.remove(session.key());
            }
        }
        let summary = SessionSummary {
            key,
            final_state: self.conversation.state(),
            email_collected: self.conversation.email_collected(),
            relay: self.relay.stats(),
            turns: self.session.as_ref().map(|s| s.transcript().len()).unwrap_or(0),
        };
        info!(
            key = summary.key.as_deref().unwrap_or(""),
            email_collected = summary.email_collected,
            turns = summary.turns,
            "📴 Session finished"
        );
        summary
    }
}

/// Write a confirmed email for the session's contact (primary writer, then
/// fallback). Marks the session on success.
async fn persist_email(ledger: &ContactLedger, session: Option<&CallSession>, email: &str) -> bool {
    let Some(session) = session else {
        warn!("Email captured before the media stream identified its call");
        return false;
    };
    let Some(contact) = session.contact() else {
        warn!(key = session.key(), "Email captured but no contact is linked to this call");
        return false;
    };
    let saved = ledger
        .update_by_phone_number(&contact.phone_number, &ContactUpdate::email_collected(email))
        .await;
    if saved {
        session.mark_email_collected();
        info!(phone = %contact.phone_number, "💾 Email saved to ledger");
    }
    saved
}
