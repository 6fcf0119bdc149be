//! Outreach Gateway - process bootstrap.
//!
//! Loads configuration, prepares the contact ledger, wires the shared
//! session registry into the HTTP/WebSocket surface, then starts the call
//! queue and the stale-session sweeper in the background.

mod media;
mod routes;

use anyhow::{bail, Context};
use outreach_core::{
    CallControl, CallQueue, ContactLedger, OutreachConfig, SessionRegistry,
    TerminationCoordinator, TwilioClient, TwilioCredentials,
};
use outreach_voice::{ConversationTimings, RealtimeConnector, SessionContext};
use routes::AppState;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the sweeper looks for sessions that outlived their TTL.
const SWEEP_EVERY: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = OutreachConfig::load().context("loading configuration")?;
    log_environment(&config);

    let missing = config.missing_required();
    if !missing.is_empty() {
        bail!("missing required settings: {}", missing.join(", "));
    }

    let ledger = Arc::new(ContactLedger::open(&config.contacts_path));
    ledger
        .ensure_initialized()
        .await
        .with_context(|| format!("preparing contact ledger at {}", config.contacts_path))?;

    let registry = SessionRegistry::new(config.fuzzy_id_matching);
    let calls: Arc<dyn CallControl> = Arc::new(TwilioClient::new(
        TwilioCredentials {
            account_sid: config.twilio_account_sid.clone(),
            auth_token: config.twilio_auth_token.clone(),
            from_number: config.twilio_phone_number.clone(),
        },
        config.base_url.clone(),
    )?);
    let connector = RealtimeConnector::new(config.realtime_endpoint(), config.openai_api_key.clone())?;

    let sessions = Arc::new(SessionContext {
        registry: registry.clone(),
        ledger: Arc::clone(&ledger),
        terminator: TerminationCoordinator::new(Arc::clone(&calls), config.fuzzy_id_matching),
        connector: Arc::new(connector),
        timings: ConversationTimings::from(&config),
        voice: config.voice.clone(),
    });

    let state = AppState {
        config: Arc::new(config.clone()),
        registry: registry.clone(),
        ledger: Arc::clone(&ledger),
        sessions,
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_addr())
        .await
        .with_context(|| format!("binding {}", config.bind_addr()))?;
    info!(addr = %config.bind_addr(), "🚀 Outreach gateway listening");

    spawn_session_sweeper(registry.clone(), config.session_ttl());
    if config.autostart_queue {
        spawn_call_queue(CallQueue::new(
            ledger,
            calls,
            registry,
            config.call_interval(),
        ));
    } else {
        info!("Call queue autostart disabled");
    }

    axum::serve(listener, app).await.context("serving HTTP")?;
    Ok(())
}

fn log_environment(config: &OutreachConfig) {
    info!("🔧 Environment check");
    info!(base_url = %config.base_url, "  Public base URL");
    info!(from = %config.twilio_phone_number, "  Originating number");
    info!(port = config.port, "  Port");
    info!(contacts = %config.contacts_path, "  Contact ledger");
    for key in config.missing_required() {
        warn!(key, "  Not set");
    }
}

fn spawn_call_queue(queue: CallQueue) {
    tokio::spawn(async move {
        match queue.run().await {
            Ok(report) => info!(
                dialed = report.dialed,
                failed = report.failed,
                skipped = report.skipped,
                "📋 Call queue finished"
            ),
            Err(e) => error!(error = %e, "Call queue stopped: ledger unreadable"),
        }
    });
}

/// Drops sessions that never received a terminal status callback.
fn spawn_session_sweeper(registry: SessionRegistry, ttl: Duration) {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(30));
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_EVERY);
        loop {
            tick.tick().await;
            let reaped = registry.reap_stale(ttl);
            if !reaped.is_empty() {
                info!(count = reaped.len(), remaining = registry.len(), "🧹 Stale sessions removed");
            }
        }
    });
}
