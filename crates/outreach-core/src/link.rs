//! Outbound half of a websocket as seen by the rest of the system.
//!
//! A [`SocketLink`] is a cheap clonable handle over a bounded channel that a
//! writer task drains into the real socket. Sends never block: a closed or
//! full link drops the frame and reports `false`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// What the writer task should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    Text(String),
    Close,
}

#[derive(Debug, Clone)]
pub struct SocketLink {
    tx: mpsc::Sender<OutboundFrame>,
    open: Arc<AtomicBool>,
}

impl SocketLink {
    /// New link plus the receiver its writer task should drain.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let link = Self {
            tx,
            open: Arc::new(AtomicBool::new(true)),
        };
        (link, rx)
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Queue a text frame. Returns `false` if it was dropped.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.tx.try_send(OutboundFrame::Text(text.into())) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Outbound socket queue full, frame dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.mark_closed();
                false
            }
        }
    }

    /// Ask the writer to close the socket. Idempotent.
    pub fn close(&self) {
        if self.open.swap(false, Ordering::AcqRel) {
            let _ = self.tx.try_send(OutboundFrame::Close);
        }
    }

    /// Record that the peer already closed; no close frame is sent.
    pub fn mark_closed(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// A socket as the session driver sees it: outbound link plus inbound text.
#[derive(Debug)]
pub struct Duplex {
    pub link: SocketLink,
    pub inbound: mpsc::Receiver<String>,
}

impl Duplex {
    /// In-memory duplex and the far ends: what was sent on `link`, and a
    /// sender that feeds `inbound`.
    pub fn pair(capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>, mpsc::Sender<String>) {
        let (link, outbound) = SocketLink::channel(capacity);
        let (inbound_tx, inbound) = mpsc::channel(capacity.max(1));
        (Self { link, inbound }, outbound, inbound_tx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn close_is_sent_once_and_blocks_further_text() {
        let (link, mut rx) = SocketLink::channel(8);
        assert!(link.send_text("a"));
        link.close();
        link.close();
        assert!(!link.send_text("b"));

        assert_eq!(rx.recv().await, Some(OutboundFrame::Text("a".into())));
        assert_eq!(rx.recv().await, Some(OutboundFrame::Close));
        drop(link);
        assert_eq!(rx.recv().await, None);
    }

    #[test]
    fn dropped_receiver_reads_as_closed() {
        let (link, rx) = SocketLink::channel(1);
        drop(rx);
        assert!(!link.is_open());
        assert!(!link.send_text("x"));
    }
}
