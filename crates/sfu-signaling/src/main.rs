//! SFU Signaling Coordinator
//!
//! WebSocket signaling server in front of an external media engine.
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Initialize Prometheus metrics recorder
//! 4. Create the media engine worker and router
//! 5. Start the engine event forwarder
//! 6. Bind the listener (fail fast) and serve
//! 7. Wait for shutdown signal, then close every live session

#![warn(clippy::pedantic)]

use std::sync::Arc;

use sfu_signaling::auth::WebhookAuth;
use sfu_signaling::config::Config;
use sfu_signaling::directory::SessionDirectory;
use sfu_signaling::dispatcher::Dispatcher;
use sfu_signaling::engine::http::HttpMediaEngine;
use sfu_signaling::engine::{default_media_codecs, EngineClient};
use sfu_signaling::events::{spawn_event_forwarder, EngineEventHub};
use sfu_signaling::observability::{init_metrics_recorder, HealthState};
use sfu_signaling::server::{build_router, AppState};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting SFU signaling coordinator");

    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        bind_address = %config.bind_address,
        media_engine_url = %config.media_engine_url,
        listen_ip = %config.listen_ip,
        peer_mailbox_size = config.peer_mailbox_size,
        "Configuration loaded successfully"
    );

    // Must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to initialize metrics recorder");
        e
    })?;

    let health_state = Arc::new(HealthState::new());

    let media_engine = HttpMediaEngine::new(
        &config.media_engine_url,
        config.media_engine_token.clone(),
        config.media_engine_request_timeout,
    )?;

    let engine = EngineClient::bootstrap(
        Arc::new(media_engine),
        &default_media_codecs(),
        config.transport_options(),
    )
    .await
    .map_err(|e| {
        error!(error = %e, "Failed to create media engine router");
        e
    })?;
    info!(router_id = %engine.router_id(), "Media engine router created");
    health_state.set_ready();

    let dispatcher = Dispatcher::new(engine, SessionDirectory::new());
    let events = EngineEventHub::default();
    let shutdown_token = CancellationToken::new();

    let forwarder_token = shutdown_token.child_token();
    let forwarder = spawn_event_forwarder(
        &events,
        dispatcher.directory().clone(),
        forwarder_token.clone(),
    );

    let webhook_auth = match &config.engine_webhook_token {
        Some(token) => Some(Arc::new(WebhookAuth::new(token)?)),
        None => {
            warn!("SFU_ENGINE_WEBHOOK_TOKEN not set, engine closure events are disabled");
            None
        }
    };

    let app = build_router(AppState {
        dispatcher: dispatcher.clone(),
        health: Arc::clone(&health_state),
        events,
        webhook_auth,
        metrics: Some(prometheus_handle),
        peer_mailbox_size: config.peer_mailbox_size,
        shutdown_token: shutdown_token.clone(),
    });

    // Bind listener BEFORE serving to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %config.bind_address, "Failed to bind listener");
            e
        })?;
    info!(addr = %config.bind_address, "Signaling server listening");

    let serve_health = Arc::clone(&health_state);
    let serve_token = shutdown_token.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received, initiating graceful shutdown...");

            // Mark as not ready immediately so no new peers are accepted
            serve_health.set_draining();
            serve_token.cancel();
        })
        .await
        .map_err(|e| {
            error!(error = %e, "Signaling server failed");
            e
        })?;

    match tokio::time::timeout(config.shutdown_grace_period, dispatcher.close_all_sessions()).await
    {
        Ok(closed) => info!(closed, "Peer sessions closed"),
        Err(_) => warn!(
            grace_period_seconds = config.shutdown_grace_period.as_secs(),
            "Timed out closing peer sessions"
        ),
    }

    forwarder_token.cancel();
    if let Err(e) = forwarder.await {
        warn!(error = %e, "Engine event forwarder task failed");
    }

    info!("SFU signaling coordinator shutdown complete");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "sfu_signaling=debug,sfu=debug,tower_http=debug".into());

    let json = std::env::var("SFU_LOG_FORMAT").is_ok_and(|format| format == "json");
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        #[expect(
            clippy::expect_used,
            reason = "Signal handler installation is critical - panic is appropriate if it fails"
        )]
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
