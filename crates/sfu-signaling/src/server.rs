//! HTTP server: WebSocket signaling endpoint, engine webhooks, health and
//! metrics.
//!
//! # Routes
//!
//! - `GET /ws` - client signaling (WebSocket upgrade)
//! - `POST /engine/events` - closure events reported by the media engine,
//!   behind a bearer token; not served when no token is configured
//! - `GET /health`, `GET /ready` - probes
//! - `GET /metrics` - Prometheus exposition (when a recorder is installed)
//!
//! # Connection flow
//!
//! Each upgraded socket is split into a writer task (drains the session's
//! outbound channel) and a reader loop feeding a [`PeerActor`]. When the
//! socket closes the handler closes the session itself, so teardown never
//! waits behind an action the actor is still processing.

use crate::actors::{PeerActor, PeerActorHandle};
use crate::auth::{require_webhook_token, WebhookAuth};
use crate::dispatcher::Dispatcher;
use crate::engine::EngineEvent;
use crate::errors::SfuError;
use crate::events::EngineEventHub;
use crate::observability::{health_router, HealthState};
use crate::protocol::{parse_envelope, ErrorResponse, ServerMessage};
use crate::session::PeerSession;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, instrument, warn};

/// Outbound queue per connection (replies and notifications).
pub const OUTBOUND_BUFFER: usize = 64;

/// Application state shared by all handlers.
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub health: Arc<HealthState>,
    pub events: EngineEventHub,
    /// Engine webhook verifier. `None` leaves `/engine/events` unrouted.
    pub webhook_auth: Option<Arc<WebhookAuth>>,
    pub metrics: Option<PrometheusHandle>,
    pub peer_mailbox_size: usize,
    /// Parent of every connection's cancellation token.
    pub shutdown_token: CancellationToken,
}

/// Build the application router.
pub fn build_router(state: AppState) -> Router {
    let health = health_router(Arc::clone(&state.health));

    let mut app = Router::new().route("/ws", get(ws_handler));

    if let Some(auth) = state.webhook_auth.clone() {
        let webhook = Router::new()
            .route("/engine/events", post(engine_event_handler))
            .route_layer(middleware::from_fn_with_state(auth, require_webhook_token));
        app = app.merge(webhook);
    }

    if let Some(handle) = state.metrics.clone() {
        app = app.route(
            "/metrics",
            get(move || {
                let handle = handle.clone();
                async move { handle.render() }
            }),
        );
    }

    app.with_state(state)
        .merge(health)
        .layer(TraceLayer::new_for_http())
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    if !state.health.is_ready() {
        debug!(target: "sfu.server", "Rejecting connection, not ready");
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn engine_event_handler(
    State(state): State<AppState>,
    Json(event): Json<EngineEvent>,
) -> StatusCode {
    let subscribers = state.events.publish(event.clone());
    if subscribers == 0 {
        warn!(target: "sfu.server", event = event.as_str(), "Engine event has no forwarder");
    } else {
        debug!(target: "sfu.server", ?event, "Engine event accepted");
    }
    StatusCode::ACCEPTED
}

#[instrument(skip_all, name = "sfu.server.connection")]
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (sink, stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
    let writer = tokio::spawn(run_writer(sink, outbound_rx));

    let session = match state.dispatcher.open_session(outbound_tx).await {
        Ok(session) => session,
        Err(e) => {
            warn!(target: "sfu.server", error = %e, "Failed to open peer session");
            writer.abort();
            return;
        }
    };

    let cancel_token = state.shutdown_token.child_token();
    let (actor, _actor_task) = PeerActor::spawn(
        Arc::clone(&session),
        state.dispatcher.clone(),
        cancel_token.clone(),
        state.peer_mailbox_size,
    );

    read_frames(stream, &session, &actor, &cancel_token).await;

    state.dispatcher.close_session(&session).await;
    actor.cancel();
    info!(target: "sfu.server", peer_id = %session.id(), "Connection closed");

    // The writer flushes what is queued and exits once the actor drops its
    // session reference.
    drop(writer);
}

/// Feed text frames to the actor until the peer goes away.
///
/// Delivery never waits on the actor, so a close frame is seen even while
/// an engine call is in flight.
async fn read_frames(
    mut stream: SplitStream<WebSocket>,
    session: &PeerSession,
    actor: &PeerActorHandle,
    cancel_token: &CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    let action = parse_envelope(&text).ok().map(|envelope| envelope.action);
                    match actor.try_deliver(text) {
                        Ok(()) => {}
                        Err(e @ SfuError::Busy(_)) => {
                            debug!(
                                target: "sfu.server",
                                peer_id = %session.id(),
                                depth = actor.mailbox_depth(),
                                "Peer mailbox full, rejecting frame"
                            );
                            session.notify(ServerMessage::Error(ErrorResponse::new(action, &e)));
                        }
                        Err(_) => break,
                    }
                }
                Some(Ok(Message::Binary(_))) => {
                    let error = SfuError::Protocol("binary frames are not supported".to_string());
                    session.notify(ServerMessage::Error(ErrorResponse::new(None, &error)));
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                Some(Err(e)) => {
                    debug!(
                        target: "sfu.server",
                        peer_id = %session.id(),
                        error = %e,
                        "WebSocket read failed"
                    );
                    break;
                }
            },
        }
    }
}

/// Drain the outbound channel into the socket.
async fn run_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<ServerMessage>,
) {
    while let Some(message) = outbound.recv().await {
        let text = match message.to_text() {
            Ok(text) => text,
            Err(e) => {
                warn!(target: "sfu.server", error = %e, "Dropping unserializable message");
                continue;
            }
        };
        if sink.send(Message::Text(text)).await.is_err() {
            break;
        }
    }
    if let Err(e) = sink.close().await {
        debug!(target: "sfu.server", error = %e, "WebSocket close failed");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::directory::SessionDirectory;
    use crate::engine::mock::MockMediaEngine;
    use crate::engine::{default_media_codecs, EngineClient, ListenIp, WebRtcTransportOptions};
    use axum::body::Body;
    use axum::http::{header, Request};
    use secrecy::SecretString;
    use tower::ServiceExt;

    const WEBHOOK_TOKEN: &str = "engine-hook-token";

    fn webhook_request(authorization: Option<&str>, body: &'static str) -> Request<Body> {
        let mut request = Request::builder()
            .method("POST")
            .uri("/engine/events")
            .header("content-type", "application/json");
        if let Some(value) = authorization {
            request = request.header(header::AUTHORIZATION, value);
        }
        request.body(Body::from(body)).unwrap()
    }

    async fn state() -> AppState {
        let engine = EngineClient::bootstrap(
            Arc::new(MockMediaEngine::new()),
            &default_media_codecs(),
            WebRtcTransportOptions {
                listen_ips: vec![ListenIp {
                    ip: "127.0.0.1".parse().unwrap(),
                    announced_ip: None,
                }],
                enable_udp: true,
                enable_tcp: false,
                prefer_udp: true,
            },
        )
        .await
        .unwrap();

        let health = Arc::new(HealthState::new());
        health.set_ready();

        AppState {
            dispatcher: Dispatcher::new(engine, SessionDirectory::new()),
            health,
            events: EngineEventHub::default(),
            webhook_auth: Some(Arc::new(
                WebhookAuth::new(&SecretString::from(WEBHOOK_TOKEN.to_string())).unwrap(),
            )),
            metrics: None,
            peer_mailbox_size: 8,
            shutdown_token: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_engine_event_is_published() {
        let state = state().await;
        let mut receiver = state.events.subscribe();
        let app = build_router(state);

        let response = app
            .oneshot(webhook_request(
                Some("Bearer engine-hook-token"),
                r#"{"event":"producerClosed","data":{"producerId":"p1"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(
            receiver.try_recv().unwrap(),
            EngineEvent::ProducerClosed {
                producer_id: "p1".into(),
            }
        );
    }

    #[tokio::test]
    async fn test_unauthenticated_engine_event_is_rejected() {
        let state = state().await;
        let mut receiver = state.events.subscribe();
        let app = build_router(state);

        for authorization in [None, Some("Bearer wrong-token")] {
            let response = app
                .clone()
                .oneshot(webhook_request(
                    authorization,
                    r#"{"event":"producerClosed","data":{"producerId":"p1"}}"#,
                ))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }

        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_webhook_not_served_without_token() {
        let mut state = state().await;
        state.webhook_auth = None;
        let app = build_router(state);

        let response = app
            .oneshot(webhook_request(
                None,
                r#"{"event":"producerClosed","data":{"producerId":"p1"}}"#,
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_engine_event_is_rejected() {
        let app = build_router(state().await);

        let response = app
            .oneshot(webhook_request(
                Some("Bearer engine-hook-token"),
                r#"{"event":"routerExploded","data":{}}"#,
            ))
            .await
            .unwrap();

        assert!(response.status().is_client_error());
        assert_ne!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_health_routes_are_merged() {
        let state = state().await;
        let health = Arc::clone(&state.health);
        let app = build_router(state);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        health.set_draining();
        let response = app
            .oneshot(Request::builder().uri("/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_route_absent_without_recorder() {
        let app = build_router(state().await);

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
