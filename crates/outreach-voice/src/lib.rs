//! # Outreach Voice - per-call conversation engine
//!
//! Bridges a telephony media stream to a realtime conversational AI socket
//! and runs the outreach script over it.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        Session Driver                          │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────────┐   │
//! │  │ Media stream │ ⇄ │ Audio Relay  │ ⇄ │ Realtime AI sock │   │
//! │  │  (µ-law)     │   │ (passthrough)│   │ (tokio-tungsten) │   │
//! │  └──────────────┘   └──────────────┘   └──────────────────┘   │
//! │         ↓                                       ↓              │
//! │  ┌──────────────┐   effects   ┌──────────────────────────┐    │
//! │  │ Ledger write │ ←────────── │ Conversation state machine│   │
//! │  │ Termination  │             │  (configure→greet→capture)│   │
//! │  └──────────────┘             └──────────────────────────┘    │
//! └───────────────────────────────────────────────────────────────┘
//! ```

pub mod conversation;
pub mod error;
pub mod persona;
pub mod protocol;
pub mod realtime;
pub mod relay;
pub mod session;

pub use conversation::{
    Conversation, ConversationState, ConversationTimings, Effect, SocketSide, Timer,
};
pub use error::{ExtractionError, VoiceError, VoiceResult};
pub use persona::{contains_goodbye, parse_email_capture, EmailCapture, COLLECT_EMAIL, GOODBYE_PHRASES};
pub use protocol::{MediaEvent, ServerEvent, SessionProfile};
pub use realtime::{AiConnector, RealtimeConnector};
pub use relay::{AudioRelay, RelayStats};
pub use session::{run_media_session, SessionContext, SessionSummary};
