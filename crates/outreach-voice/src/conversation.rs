//! Conversation state machine for one call's AI socket.
//!
//! Drives the handshake (configure → greet), interprets the model's events,
//! and decides when a captured email is written and when the call ends.
//! It performs no I/O: every input returns a list of [`Effect`]s for the
//! session driver to carry out, which keeps each transition testable.
//!
//! ```text
//! Connecting → ConfiguringSession → AwaitingGreeting → Conversing ⇄ ExtractionPending
//!                                                          ↓
//!                                              Closing → Closed
//! ```
//!
//! Termination is requested by several independent signals (goodbye phrase
//! after a capture, the post-capture timer, either socket closing). The first
//! one moves to `Closing`; later ones are ignored.

use crate::persona::{self, COLLECT_EMAIL};
use crate::protocol::{self, FunctionCall, ServerEvent, SessionProfile};
use outreach_core::config::OutreachConfig;
use outreach_core::registry::Speaker;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Where the conversation is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversationState {
    Connecting,
    ConfiguringSession,
    AwaitingGreeting,
    Conversing,
    /// A confirmed email is being written to the ledger.
    ExtractionPending,
    Closing,
    Closed,
}

/// Delayed inputs the machine asks the driver to deliver later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timer {
    SendSessionConfig,
    RequestGreeting,
    Terminate,
}

/// Which socket went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketSide {
    Telephony,
    Ai,
}

/// Work for the session driver.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a JSON event on the AI socket.
    SendAi(Value),
    /// Forward an assistant audio chunk (base64) to the caller.
    RelayAudio(String),
    Schedule { after: Duration, timer: Timer },
    /// Write the captured email; report back through `on_email_persisted`.
    PersistEmail { email: String },
    RecordTurn { speaker: Speaker, text: String },
    /// End the call. Report back through `on_terminated`.
    Terminate,
}

/// Fixed delays of the call script.
#[derive(Debug, Clone, Copy)]
pub struct ConversationTimings {
    /// After the AI socket opens, before `session.update`.
    pub session_config_delay: Duration,
    /// After `session.updated`, before the greeting is requested.
    pub greeting_delay: Duration,
    /// After a capture is saved, before the call is ended regardless.
    pub extraction_grace: Duration,
    /// After a goodbye phrase, so the current sentence can finish.
    pub goodbye_grace: Duration,
}

impl Default for ConversationTimings {
    fn default() -> Self {
        Self {
            session_config_delay: Duration::from_millis(1000),
            greeting_delay: Duration::from_millis(1000),
            extraction_grace: Duration::from_secs(7),
            goodbye_grace: Duration::from_secs(5),
        }
    }
}

impl From<&OutreachConfig> for ConversationTimings {
    fn from(config: &OutreachConfig) -> Self {
        Self {
            session_config_delay: Duration::from_millis(config.session_config_delay_ms),
            greeting_delay: Duration::from_millis(config.greeting_delay_ms),
            extraction_grace: Duration::from_secs(config.extraction_grace_secs),
            goodbye_grace: Duration::from_secs(config.goodbye_grace_secs),
        }
    }
}

pub struct Conversation {
    state: ConversationState,
    timings: ConversationTimings,
    profile: SessionProfile,
    contact_name: Option<String>,
    email_collected: bool,
    /// Function call awaiting its ledger write.
    pending_call_id: Option<String>,
    /// Assistant text of the response in progress.
    response_text: String,
    /// Post-capture timer is pending.
    termination_scheduled: bool,
    goodbye_scheduled: bool,
}

impl Conversation {
    pub fn new(profile: SessionProfile, timings: ConversationTimings) -> Self {
        Self {
            state: ConversationState::Connecting,
            timings,
            profile,
            contact_name: None,
            email_collected: false,
            pending_call_id: None,
            response_text: String::new(),
            termination_scheduled: false,
            goodbye_scheduled: false,
        }
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn email_collected(&self) -> bool {
        self.email_collected
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConversationState::Closed
    }

    /// Name used in the greeting and farewell. May arrive after connect.
    pub fn set_contact_name(&mut self, name: Option<String>) {
        if name.is_some() {
            self.contact_name = name;
        }
    }

    fn is_ending(&self) -> bool {
        matches!(
            self.state,
            ConversationState::Closing | ConversationState::Closed
        )
    }

    /// The AI socket is open.
    pub fn on_ai_open(&mut self) -> Vec<Effect> {
        if self.state != ConversationState::Connecting {
            return Vec::new();
        }
        self.state = ConversationState::ConfiguringSession;
        vec![Effect::Schedule {
            after: self.timings.session_config_delay,
            timer: Timer::SendSessionConfig,
        }]
    }

    pub fn on_timer(&mut self, timer: Timer) -> Vec<Effect> {
        match (self.state, timer) {
            (ConversationState::ConfiguringSession, Timer::SendSessionConfig) => {
                info!("🎛️ Sending session configuration");
                vec![Effect::SendAi(protocol::session_update(&self.profile))]
            }
            (ConversationState::AwaitingGreeting, Timer::RequestGreeting) => {
                let instructions = persona::greeting(self.contact_name.as_deref());
                info!(named = instructions.is_some(), "👋 Requesting greeting");
                vec![Effect::SendAi(protocol::response_create(
                    instructions.as_deref(),
                ))]
            }
            (_, Timer::Terminate) if !self.is_ending() => {
                self.begin_closing("scheduled termination")
            }
            (state, timer) => {
                debug!(?state, ?timer, "Stale timer ignored");
                Vec::new()
            }
        }
    }

    pub fn on_server_event(&mut self, event: ServerEvent) -> Vec<Effect> {
        if self.state == ConversationState::Closed {
            return Vec::new();
        }

        match event {
            ServerEvent::SessionUpdated {} => {
                if self.state != ConversationState::ConfiguringSession {
                    return Vec::new();
                }
                info!("✅ Session configured");
                self.state = ConversationState::AwaitingGreeting;
                vec![Effect::Schedule {
                    after: self.timings.greeting_delay,
                    timer: Timer::RequestGreeting,
                }]
            }
            ServerEvent::AudioDelta { delta } => {
                self.mark_talking();
                vec![Effect::RelayAudio(delta)]
            }
            ServerEvent::TextDelta { delta } | ServerEvent::AudioTranscriptDelta { delta } => {
                self.mark_talking();
                self.response_text.push_str(&delta);
                self.check_goodbye()
            }
            ServerEvent::SpeechStarted {} => {
                debug!("🎤 Caller speaking");
                self.mark_talking();
                Vec::new()
            }
            ServerEvent::SpeechStopped {} => {
                debug!("🤫 Caller stopped");
                Vec::new()
            }
            ServerEvent::InputTranscript { transcript } => vec![Effect::RecordTurn {
                speaker: Speaker::Caller,
                text: transcript,
            }],
            ServerEvent::ResponseDone { response } => {
                self.mark_talking();
                debug!(status = response.status.as_deref().unwrap_or(""), "Response done");
                let mut effects = Vec::new();
                let text = std::mem::take(&mut self.response_text);
                if !text.trim().is_empty() {
                    effects.push(Effect::RecordTurn {
                        speaker: Speaker::Assistant,
                        text,
                    });
                }
                if let Some(call) = response.function_call(COLLECT_EMAIL) {
                    effects.extend(self.on_capture(call));
                }
                effects
            }
            ServerEvent::Error { error } => {
                warn!(
                    kind = error.kind.as_deref().unwrap_or(""),
                    code = error.code.as_deref().unwrap_or(""),
                    message = error.message.as_deref().unwrap_or(""),
                    "AI reported an error"
                );
                Vec::new()
            }
            ServerEvent::SessionCreated {} | ServerEvent::ResponseCreated {} | ServerEvent::Other => {
                Vec::new()
            }
        }
    }

    /// First sign of a live exchange ends the greeting wait.
    fn mark_talking(&mut self) {
        if self.state == ConversationState::AwaitingGreeting {
            self.state = ConversationState::Conversing;
        }
    }

    fn check_goodbye(&mut self) -> Vec<Effect> {
        if !self.email_collected
            || self.goodbye_scheduled
            || self.is_ending()
            || !persona::contains_goodbye(&self.response_text)
        {
            return Vec::new();
        }
        info!("👋 Goodbye detected after capture, ending shortly");
        self.goodbye_scheduled = true;
        vec![Effect::Schedule {
            after: self.timings.goodbye_grace,
            timer: Timer::Terminate,
        }]
    }

    fn on_capture(&mut self, call: &FunctionCall) -> Vec<Effect> {
        match self.state {
            ConversationState::Conversing => {}
            ConversationState::ExtractionPending => {
                return vec![Effect::SendAi(protocol::function_call_output(
                    &call.call_id,
                    false,
                    "An email address is already being saved",
                ))];
            }
            _ => {
                debug!(state = ?self.state, "Capture outside conversation ignored");
                return Vec::new();
            }
        }

        if self.email_collected {
            return vec![Effect::SendAi(protocol::function_call_output(
                &call.call_id,
                true,
                "Email already saved",
            ))];
        }

        match persona::parse_email_capture(&call.arguments) {
            Ok(capture) => {
                info!("📧 Confirmed email captured");
                self.state = ConversationState::ExtractionPending;
                self.pending_call_id = Some(call.call_id.clone());
                vec![Effect::PersistEmail {
                    email: capture.email,
                }]
            }
            Err(e) => {
                info!(reason = %e, "Email capture rejected, asking to retry");
                vec![
                    Effect::SendAi(protocol::function_call_output(
                        &call.call_id,
                        false,
                        persona::rejection_message(&e),
                    )),
                    Effect::SendAi(protocol::response_create(None)),
                ]
            }
        }
    }

    /// Outcome of a `PersistEmail` effect.
    pub fn on_email_persisted(&mut self, saved: bool) -> Vec<Effect> {
        if self.state != ConversationState::ExtractionPending {
            return Vec::new();
        }
        self.state = ConversationState::Conversing;
        let call_id = self.pending_call_id.take().unwrap_or_default();
        let name = self.contact_name.as_deref();

        let mut effects = if saved {
            self.email_collected = true;
            vec![
                Effect::SendAi(protocol::function_call_output(
                    &call_id,
                    true,
                    "Email saved successfully",
                )),
                Effect::SendAi(protocol::response_create(Some(&persona::farewell(name)))),
            ]
        } else {
            warn!("Email could not be saved, closing the call without success");
            vec![
                Effect::SendAi(protocol::function_call_output(
                    &call_id,
                    false,
                    "Failed to save email",
                )),
                Effect::SendAi(protocol::response_create(Some(
                    &persona::save_failed_close(name),
                ))),
            ]
        };

        if !self.termination_scheduled {
            self.termination_scheduled = true;
            effects.push(Effect::Schedule {
                after: self.timings.extraction_grace,
                timer: Timer::Terminate,
            });
        }
        effects
    }

    pub fn on_socket_closed(&mut self, side: SocketSide) -> Vec<Effect> {
        if self.is_ending() {
            return Vec::new();
        }
        let reason = match side {
            SocketSide::Telephony => "telephony socket closed",
            SocketSide::Ai => "AI socket closed",
        };
        self.begin_closing(reason)
    }

    fn begin_closing(&mut self, reason: &str) -> Vec<Effect> {
        info!(reason, "🔚 Closing conversation");
        self.state = ConversationState::Closing;
        vec![Effect::Terminate]
    }

    /// The termination coordinator has run.
    pub fn on_terminated(&mut self) {
        self.state = ConversationState::Closed;
    }
}
