//! Audio Relay - moves µ-law frames between the caller and the model.
//!
//! One inbound message yields at most one outbound message. Payloads are
//! passed through untouched. A frame for a socket that is not open is
//! dropped and counted, never queued.

use crate::protocol;
use outreach_core::link::SocketLink;
use tracing::{debug, trace};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub caller_forwarded: u64,
    pub caller_dropped: u64,
    pub assistant_forwarded: u64,
    pub assistant_dropped: u64,
}

pub struct AudioRelay {
    media: SocketLink,
    ai: SocketLink,
    stream_sid: Option<String>,
    stats: RelayStats,
}

impl AudioRelay {
    pub fn new(media: SocketLink, ai: SocketLink) -> Self {
        Self {
            media,
            ai,
            stream_sid: None,
            stats: RelayStats::default(),
        }
    }

    /// Outbound media frames must carry the stream id from the `start` event.
    pub fn set_stream_sid(&mut self, stream_sid: impl Into<String>) {
        self.stream_sid = Some(stream_sid.into());
    }

    pub fn stream_sid(&self) -> Option<&str> {
        self.stream_sid.as_deref()
    }

    /// Caller → model.
    pub fn forward_caller_audio(&mut self, payload: &str) -> bool {
        let sent = self.ai.is_open()
            && self
                .ai
                .send_text(protocol::input_audio_append(payload).to_string());
        if sent {
            self.stats.caller_forwarded += 1;
        } else {
            self.stats.caller_dropped += 1;
            trace!("Caller frame dropped, AI socket not open");
        }
        sent
    }

    /// Model → caller. Dropped until the stream id is known.
    pub fn forward_assistant_audio(&mut self, delta: &str) -> bool {
        let sent = match self.stream_sid.as_deref() {
            Some(sid) if self.media.is_open() => self
                .media
                .send_text(protocol::media_frame(sid, delta).to_string()),
            _ => false,
        };
        if sent {
            self.stats.assistant_forwarded += 1;
        } else {
            self.stats.assistant_dropped += 1;
            trace!("Assistant frame dropped, media socket not ready");
        }
        sent
    }

    /// One side went away; try to take the other down with it.
    pub fn propagate_close(&self) {
        debug!(stats = ?self.stats, "Relay closing both sockets");
        self.ai.close();
        self.media.close();
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }
}
