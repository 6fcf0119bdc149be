//! Realtime AI socket connector.
//!
//! [`RealtimeConnector`] opens the provider websocket and splits it into a
//! [`Duplex`]: a writer task drains the outbound link, a reader task forwards
//! text frames. When the socket ends, the inbound channel closes.

use crate::error::{VoiceError, VoiceResult};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use outreach_core::link::{Duplex, OutboundFrame, SocketLink};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Frames buffered per direction before sends start dropping.
pub const SOCKET_BUFFER: usize = 512;

/// Opens the conversational AI socket for one call.
#[async_trait]
pub trait AiConnector: Send + Sync {
    async fn connect(&self) -> VoiceResult<Duplex>;
}

pub struct RealtimeConnector {
    endpoint: String,
    api_key: String,
}

impl RealtimeConnector {
    /// `endpoint` includes the model query, e.g. `wss://…/v1/realtime?model=…`.
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>) -> VoiceResult<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(VoiceError::Config("realtime API key is not set".to_string()));
        }
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
        })
    }
}

#[async_trait]
impl AiConnector for RealtimeConnector {
    async fn connect(&self) -> VoiceResult<Duplex> {
        let mut request = self.endpoint.as_str().into_client_request()?;
        let auth = HeaderValue::from_str(&format!("Bearer {}", self.api_key))
            .map_err(|e| VoiceError::Config(format!("invalid API key header: {}", e)))?;
        request.headers_mut().insert("Authorization", auth);
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        let (ws, _response) = tokio_tungstenite::connect_async(request).await?;
        info!("🔌 Connected to realtime AI");

        let (mut sink, mut stream) = ws.split();
        let (link, mut outbound) = SocketLink::channel(SOCKET_BUFFER);
        let (inbound_tx, inbound) = mpsc::channel(SOCKET_BUFFER);

        let writer_link = link.clone();
        tokio::spawn(async move {
            while let Some(frame) = outbound.recv().await {
                match frame {
                    OutboundFrame::Text(text) => {
                        if let Err(e) = sink.send(Message::text(text)).await {
                            warn!(error = %e, "Realtime send failed");
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
            debug!("Realtime writer finished");
        });

        let reader_link = link.clone();
        tokio::spawn(async move {
            while let Some(message) = stream.next().await {
                match message {
                    Ok(Message::Text(text)) => {
                        if inbound_tx.send(text.as_str().to_owned()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        debug!(?frame, "Realtime socket closed by peer");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Realtime socket error");
                        break;
                    }
                }
            }
            reader_link.mark_closed();
        });

        Ok(Duplex { link, inbound })
    }
}
