//! Media-stream WebSocket: adapts an axum socket to the session driver's
//! [`Duplex`] and runs one call on it.

use crate::routes::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use outreach_core::link::{Duplex, OutboundFrame, SocketLink};
use outreach_voice::realtime::SOCKET_BUFFER;
use outreach_voice::{run_media_session, SessionContext};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

pub async fn media_stream(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    let sessions = Arc::clone(&state.sessions);
    ws.on_upgrade(move |socket| serve_media_socket(socket, sessions))
}

async fn serve_media_socket(socket: WebSocket, sessions: Arc<SessionContext>) {
    info!("📞 Media stream connected");
    let (mut sink, mut stream) = socket.split();
    let (link, mut outbound) = SocketLink::channel(SOCKET_BUFFER);
    let (inbound_tx, inbound) = mpsc::channel(SOCKET_BUFFER);

    let writer_link = link.clone();
    tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            match frame {
                OutboundFrame::Text(text) => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        debug!(error = %e, "Media stream send failed");
                        break;
                    }
                }
                OutboundFrame::Close => {
                    let _ = sink.close().await;
                    break;
                }
            }
        }
        writer_link.mark_closed();
    });

    let reader_link = link.clone();
    tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            match message {
                Ok(Message::Text(text)) => {
                    if inbound_tx.send(text).await.is_err() {
                        break;
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "Media stream error");
                    break;
                }
            }
        }
        reader_link.mark_closed();
    });

    match run_media_session(sessions, Duplex { link, inbound }).await {
        Ok(summary) => debug!(?summary, "Media stream done"),
        Err(e) => warn!(error = %e, "Media stream ended without a conversation"),
    }
}
