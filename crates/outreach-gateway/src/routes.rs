//! HTTP surface: health, the call-control webhook that hands the call to
//! the media stream, the status callback, and the media-stream upgrade.

use crate::media;
use axum::{
    body::Body,
    extract::{rejection::FormRejection, Form, State},
    http::{header, HeaderMap, Request},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use outreach_core::{
    connect_stream_twiml, reconcile_call_status, ContactLedger, OutreachConfig, SessionRegistry,
};
use outreach_voice::SessionContext;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<OutreachConfig>,
    pub registry: SessionRegistry,
    pub ledger: Arc<ContactLedger>,
    pub sessions: Arc<SessionContext>,
}

/// Status callback form fields (the provider posts many more).
#[derive(Debug, Deserialize)]
struct StatusCallback {
    #[serde(rename = "CallSid", default)]
    call_sid: String,
    #[serde(rename = "CallStatus", default)]
    call_status: String,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/webhook/voice", get(voice_webhook).post(voice_webhook))
        .route("/webhook/status", post(status_webhook))
        .route("/media-stream", get(media::media_stream))
        .with_state(state)
        .layer(middleware::from_fn(log_request))
}

async fn log_request(request: Request<Body>, next: Next) -> Response {
    debug!(method = %request.method(), path = request.uri().path(), "Request");
    next.run(request).await
}

async fn health() -> &'static str {
    "OK"
}

/// Answers the provider's voice webhook with stream-connect TwiML pointing
/// at this host's media-stream socket.
async fn voice_webhook(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let host = headers.get(header::HOST).and_then(|h| h.to_str().ok());
    let stream_url = state.config.media_stream_url(host);
    info!(stream_url = %stream_url, "📲 Call answered, connecting media stream");
    (
        [(header::CONTENT_TYPE, "text/xml")],
        connect_stream_twiml(&stream_url),
    )
}

/// Always acknowledged, even when the form is unusable or the call unknown.
async fn status_webhook(
    State(state): State<AppState>,
    form: Result<Form<StatusCallback>, FormRejection>,
) -> Json<serde_json::Value> {
    match form {
        Ok(Form(callback)) if !callback.call_sid.is_empty() => {
            let outcome = reconcile_call_status(
                &state.ledger,
                &state.registry,
                &callback.call_sid,
                &callback.call_status,
            )
            .await;
            debug!(call_id = %callback.call_sid, ?outcome, "Status callback handled");
        }
        Ok(_) => warn!("Status callback without CallSid"),
        Err(e) => warn!(error = %e, "Unreadable status callback"),
    }
    Json(serde_json::json!({ "received": true }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use outreach_core::link::Duplex;
    use outreach_core::{
        CallControl, ContactRef, ContactStatus, TelephonyResult, TerminationCoordinator,
    };
    use outreach_voice::{AiConnector, ConversationTimings, VoiceError, VoiceResult};
    use tower::ServiceExt;

    struct NoCalls;

    #[async_trait]
    impl CallControl for NoCalls {
        async fn place_call(&self, _to: &str) -> TelephonyResult<String> {
            Ok("CA0".into())
        }
        async fn complete_call(&self, _call_id: &str) -> TelephonyResult<()> {
            Ok(())
        }
        async fn list_recent_calls(&self, _limit: usize) -> TelephonyResult<Vec<String>> {
            Ok(Vec::new())
        }
    }

    struct NoAi;

    #[async_trait]
    impl AiConnector for NoAi {
        async fn connect(&self) -> VoiceResult<Duplex> {
            Err(VoiceError::RealtimeConnect("offline".into()))
        }
    }

    fn test_state(dir: &tempfile::TempDir) -> AppState {
        std::fs::write(
            dir.path().join("outreach.toml"),
            "base_url = \"https://calls.example.com\"\n",
        )
        .unwrap();
        let config = OutreachConfig::load_from(&dir.path().join("outreach")).unwrap();
        let contacts = dir.path().join("contacts.csv");
        std::fs::write(
            &contacts,
            "Name,Phone Number,Email,Status\nJane,+15550000,,CallInitiated\n",
        )
        .unwrap();

        let registry = SessionRegistry::default();
        let ledger = Arc::new(ContactLedger::open(&contacts));
        let sessions = Arc::new(SessionContext {
            registry: registry.clone(),
            ledger: Arc::clone(&ledger),
            terminator: TerminationCoordinator::new(Arc::new(NoCalls), true),
            connector: Arc::new(NoAi),
            timings: ConversationTimings::default(),
            voice: config.voice.clone(),
        });
        AppState {
            config: Arc::new(config),
            registry,
            ledger,
            sessions,
        }
    }

    async fn body_string(res: Response) -> String {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn status_request(form: &'static str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/webhook/status")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));
        let req = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_string(res).await, "OK");
    }

    #[tokio::test]
    async fn voice_webhook_streams_to_request_host() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));
        let req = Request::builder()
            .method("POST")
            .uri("/webhook/voice")
            .header(header::HOST, "abc.ngrok.io")
            .body(Body::empty())
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/xml");
        let body = body_string(res).await;
        assert!(body.contains(r#"<Stream url="wss://abc.ngrok.io/media-stream""#));
        assert!(body.contains("<Connect>"));
    }

    #[tokio::test]
    async fn voice_webhook_falls_back_to_base_url() {
        let dir = tempfile::tempdir().unwrap();
        let app = router(test_state(&dir));
        let req = Request::builder()
            .method("POST")
            .uri("/webhook/voice")
            .body(Body::empty())
            .unwrap();
        let body = body_string(app.oneshot(req).await.unwrap()).await;
        assert!(body.contains("wss://calls.example.com/media-stream"));
    }

    #[tokio::test]
    async fn status_webhook_records_failed_call() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        state
            .registry
            .create("CA123", Some(ContactRef::new("Jane", "+15550000")));
        let app = router(state.clone());

        let res = app
            .oneshot(status_request("CallSid=CA123&CallStatus=no-answer&To=%2B15550000"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_string(res).await).unwrap();
        assert_eq!(body["received"], true);

        assert_eq!(
            state.ledger.get_status("+15550000").await.unwrap(),
            Some(ContactStatus::CallFailed)
        );
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn status_webhook_acknowledges_unknown_and_garbled_callbacks() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);
        let before = std::fs::read(dir.path().join("contacts.csv")).unwrap();

        for form in ["CallSid=CAunknown&CallStatus=completed", "nonsense", ""] {
            let res = router(state.clone()).oneshot(status_request(form)).await.unwrap();
            assert_eq!(res.status(), StatusCode::OK);
            assert!(body_string(res).await.contains("\"received\":true"));
        }
        assert_eq!(std::fs::read(dir.path().join("contacts.csv")).unwrap(), before);
    }
}
