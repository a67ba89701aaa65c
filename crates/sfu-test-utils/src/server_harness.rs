//! Test server harness for E2E testing
//!
//! Provides `TestSfuServer` for spawning real signaling server instances in
//! tests, backed by a [`MockMediaEngine`].

use secrecy::SecretString;
use sfu_signaling::auth::WebhookAuth;
use sfu_signaling::directory::SessionDirectory;
use sfu_signaling::dispatcher::Dispatcher;
use sfu_signaling::engine::mock::MockMediaEngine;
use sfu_signaling::engine::{
    default_media_codecs, EngineClient, EngineEvent, ListenIp, MediaEngine,
    WebRtcTransportOptions,
};
use sfu_signaling::events::{spawn_event_forwarder, EngineEventHub};
use sfu_signaling::observability::HealthState;
use sfu_signaling::server::{build_router, AppState};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Mailbox size used by test servers.
pub const TEST_PEER_MAILBOX_SIZE: usize = 16;

/// Bearer token test servers expect on `POST /engine/events`.
pub const TEST_WEBHOOK_TOKEN: &str = "test-engine-webhook-token";

/// Test harness for spawning the signaling server in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_peer_gets_identity() -> Result<(), anyhow::Error> {
///     let server = TestSfuServer::spawn(Arc::new(MockMediaEngine::new())).await?;
///     let peer = TestPeer::connect(&server.ws_url()).await?;
///     assert!(!peer.peer_id().is_empty());
///     Ok(())
/// }
/// ```
pub struct TestSfuServer {
    addr: SocketAddr,
    engine: Arc<MockMediaEngine>,
    dispatcher: Dispatcher,
    events: EngineEventHub,
    health: Arc<HealthState>,
    shutdown_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestSfuServer {
    /// Spawn a new test server instance.
    ///
    /// The server will:
    /// - Create a worker and router on `engine`
    /// - Start the engine event forwarder
    /// - Bind to a random available port (127.0.0.1:0)
    /// - Start the HTTP server in the background
    pub async fn spawn(engine: Arc<MockMediaEngine>) -> Result<Self, anyhow::Error> {
        let media_engine: Arc<dyn MediaEngine> = engine.clone();
        let client = EngineClient::bootstrap(
            media_engine,
            &default_media_codecs(),
            WebRtcTransportOptions {
                listen_ips: vec![ListenIp {
                    ip: "127.0.0.1".parse()?,
                    announced_ip: None,
                }],
                enable_udp: true,
                enable_tcp: true,
                prefer_udp: true,
            },
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bootstrap engine: {}", e))?;

        let dispatcher = Dispatcher::new(client, SessionDirectory::new());
        let events = EngineEventHub::default();
        let health = Arc::new(HealthState::new());
        health.set_ready();
        let shutdown_token = CancellationToken::new();
        let webhook_auth = WebhookAuth::new(&SecretString::from(TEST_WEBHOOK_TOKEN.to_string()))
            .map_err(|e| anyhow::anyhow!("Failed to create webhook auth: {}", e))?;

        spawn_event_forwarder(
            &events,
            dispatcher.directory().clone(),
            shutdown_token.child_token(),
        );

        let app = build_router(AppState {
            dispatcher: dispatcher.clone(),
            health: Arc::clone(&health),
            events: events.clone(),
            webhook_auth: Some(Arc::new(webhook_auth)),
            metrics: None,
            peer_mailbox_size: TEST_PEER_MAILBOX_SIZE,
            shutdown_token: shutdown_token.clone(),
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            engine,
            dispatcher,
            events,
            health,
            shutdown_token,
            _handle: handle,
        })
    }

    /// Base HTTP URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket signaling URL.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The mock engine behind the server.
    pub fn engine(&self) -> &MockMediaEngine {
        &self.engine
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// URL of the engine webhook route.
    pub fn engine_events_url(&self) -> String {
        format!("http://{}/engine/events", self.addr)
    }

    /// Publish an engine event directly, bypassing the webhook route.
    pub fn publish(&self, event: EngineEvent) -> usize {
        self.events.publish(event)
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.dispatcher.directory().len().await
    }

    /// Poll until `session_count() == expected` or `timeout` elapses.
    pub async fn wait_for_sessions(
        &self,
        expected: usize,
        timeout: std::time::Duration,
    ) -> Result<(), anyhow::Error> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let count = self.session_count().await;
            if count == expected {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("expected {} sessions, found {}", expected, count);
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    }
}

impl Drop for TestSfuServer {
    fn drop(&mut self) {
        self.shutdown_token.cancel();
        self._handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_server_spawns_successfully() -> Result<(), anyhow::Error> {
        let engine = Arc::new(MockMediaEngine::new());
        let server = TestSfuServer::spawn(Arc::clone(&engine)).await?;

        assert!(server.url().starts_with("http://127.0.0.1:"));
        assert!(server.ws_url().ends_with("/ws"));
        assert_eq!(engine.call_count("create_worker"), 1);
        assert_eq!(engine.call_count("create_router"), 1);
        assert_eq!(server.session_count().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_multiple_servers_different_ports() -> Result<(), anyhow::Error> {
        let server1 = TestSfuServer::spawn(Arc::new(MockMediaEngine::new())).await?;
        let server2 = TestSfuServer::spawn(Arc::new(MockMediaEngine::new())).await?;

        assert_ne!(server1.addr(), server2.addr());
        Ok(())
    }
}
