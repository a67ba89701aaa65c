//! Peer session: one connected client and the media resources it owns.
//!
//! # State machine
//!
//! ```text
//! Open -> Active -> Closing -> Closed
//! ```
//!
//! Operations run only while `Active`. Closing may start while an operation
//! is suspended on an engine call; when that call returns, registering its
//! result fails with `SessionClosed` and the fresh engine handle is closed
//! on the spot, so nothing outlives the session.

use crate::directory::SessionDirectory;
use crate::engine::{ConsumerInfo, EngineClient, TransportParams};
use crate::errors::SfuError;
use crate::protocol::ServerMessage;
use crate::registry::{
    ConsumerEntry, ProducerEntry, ResourceRegistry, Teardown, TransportState,
};
use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId, TransportId};

use serde_json::Value;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::{mpsc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum SessionState {
    /// Created, identity not yet sent.
    Open = 0,
    /// Accepting actions.
    Active = 1,
    /// Teardown in progress.
    Closing = 2,
    Closed = 3,
}

impl SessionState {
    const fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Open,
            1 => SessionState::Active,
            2 => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }
}

/// A connected peer.
pub struct PeerSession {
    id: PeerId,
    state: AtomicU8,
    registry: RwLock<ResourceRegistry>,
    outbound: mpsc::Sender<ServerMessage>,
}

impl std::fmt::Debug for PeerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerSession")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl PeerSession {
    /// Create a session in `Open` state. Messages for the client go to
    /// `outbound`.
    #[must_use]
    pub fn new(id: PeerId, outbound: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            state: AtomicU8::new(SessionState::Open as u8),
            registry: RwLock::new(ResourceRegistry::new()),
            outbound,
        }
    }

    #[must_use]
    pub fn id(&self) -> PeerId {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// `Open -> Active`. Returns false if the session already moved on.
    pub fn activate(&self) -> bool {
        self.state
            .compare_exchange(
                SessionState::Open as u8,
                SessionState::Active as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    fn ensure_active(&self) -> Result<(), SfuError> {
        if self.state() == SessionState::Active {
            Ok(())
        } else {
            Err(SfuError::SessionClosed)
        }
    }

    /// Shared view of the registry.
    pub async fn registry(&self) -> RwLockReadGuard<'_, ResourceRegistry> {
        self.registry.read().await
    }

    /// Exclusive view of the registry (engine event handling).
    pub async fn registry_mut(&self) -> RwLockWriteGuard<'_, ResourceRegistry> {
        self.registry.write().await
    }

    /// Queue a message for the client, waiting for channel capacity.
    ///
    /// # Errors
    ///
    /// `Internal` if the connection writer is gone.
    pub async fn send(&self, message: ServerMessage) -> Result<(), SfuError> {
        self.outbound
            .send(message)
            .await
            .map_err(|e| SfuError::Internal(format!("outbound channel closed: {e}")))
    }

    /// Queue an unsolicited notification without waiting.
    ///
    /// Returns false if the channel is full or closed.
    pub fn notify(&self, message: ServerMessage) -> bool {
        match self.outbound.try_send(message) {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    target: "sfu.peer",
                    peer_id = %self.id,
                    error = %e,
                    "Dropped notification for peer"
                );
                false
            }
        }
    }

    /// Transport lookup for operations that need a usable transport.
    async fn usable_transport(&self, transport_id: &TransportId) -> Result<(), SfuError> {
        let registry = self.registry.read().await;
        if registry.is_closed() {
            return Err(SfuError::SessionClosed);
        }
        match registry.find_transport(transport_id)?.state {
            TransportState::Closed => Err(SfuError::InvalidState(format!(
                "Transport {transport_id} is closed"
            ))),
            TransportState::Created | TransportState::Connected => Ok(()),
        }
    }

    /// Close engine handles that could not be registered.
    async fn discard(&self, engine: &EngineClient, orphans: Teardown) {
        debug!(
            target: "sfu.peer",
            peer_id = %self.id,
            ?orphans,
            "Closing unregistered engine resources"
        );
        orphans.run(engine).await;
    }

    /// Create a WebRTC transport and register it.
    ///
    /// # Errors
    ///
    /// `SessionClosed` if not active (or closed while the engine call was
    /// in flight), `Engine` on engine failure.
    pub async fn create_transport(
        &self,
        engine: &EngineClient,
    ) -> Result<TransportParams, SfuError> {
        self.ensure_active()?;

        let params = engine.create_transport().await?;
        let registered = self.registry.write().await.add_transport(params.id.clone());
        if let Err(e) = registered {
            self.discard(
                engine,
                Teardown {
                    transports: vec![params.id],
                    ..Teardown::default()
                },
            )
            .await;
            return Err(e);
        }

        debug!(
            target: "sfu.peer",
            peer_id = %self.id,
            transport_id = %params.id,
            "Transport created"
        );
        Ok(params)
    }

    /// Complete DTLS setup on one of this peer's transports.
    ///
    /// Connecting an already connected transport is passed to the engine
    /// again.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown or foreign transport, `InvalidState` for a
    /// closed one, `Engine` on engine failure.
    pub async fn connect_transport(
        &self,
        engine: &EngineClient,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), SfuError> {
        self.ensure_active()?;
        self.usable_transport(transport_id).await?;

        engine
            .connect_transport(transport_id, dtls_parameters)
            .await?;

        self.ensure_active()?;
        self.registry
            .write()
            .await
            .mark_transport_connected(transport_id)?;

        debug!(
            target: "sfu.peer",
            peer_id = %self.id,
            transport_id = %transport_id,
            "Transport connected"
        );
        Ok(())
    }

    /// Start sending media on one of this peer's transports.
    ///
    /// # Errors
    ///
    /// Same as [`Self::connect_transport`].
    pub async fn produce(
        &self,
        engine: &EngineClient,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<ProducerId, SfuError> {
        self.ensure_active()?;
        self.usable_transport(transport_id).await?;

        let producer = engine.produce(transport_id, kind, rtp_parameters).await?;
        let registered = self.registry.write().await.add_producer(ProducerEntry {
            id: producer.id.clone(),
            kind: producer.kind,
            transport_id: transport_id.clone(),
        });
        if let Err(e) = registered {
            self.discard(
                engine,
                Teardown {
                    producers: vec![producer.id],
                    ..Teardown::default()
                },
            )
            .await;
            return Err(e);
        }

        info!(
            target: "sfu.peer",
            peer_id = %self.id,
            producer_id = %producer.id,
            kind = %producer.kind,
            "Producer created"
        );
        Ok(producer.id)
    }

    /// Subscribe to another peer's producer.
    ///
    /// The consumer is created paused and resumed before it is registered,
    /// so a client is never handed a paused consumer.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the transport is not ours, the producing peer has
    ///   disconnected, or the producer is gone (also checked after resume)
    /// - `InvalidState` if the transport is closed
    /// - `Engine` if consume or resume fails
    pub async fn consume(
        &self,
        engine: &EngineClient,
        directory: &SessionDirectory,
        transport_id: &TransportId,
        producer_peer_id: &PeerId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerInfo, SfuError> {
        self.ensure_active()?;
        self.usable_transport(transport_id).await?;

        let producer_session = directory.lookup(producer_peer_id).await?;
        producer_session
            .registry
            .read()
            .await
            .find_producer(producer_id)?;

        let consumer = engine
            .consume(transport_id, producer_id, rtp_capabilities)
            .await?;
        let orphan = || Teardown {
            consumers: vec![consumer.id.clone()],
            ..Teardown::default()
        };

        if let Err(e) = engine.resume_consumer(&consumer.id).await {
            self.discard(engine, orphan()).await;
            return Err(e);
        }

        // The producer may have closed while we were waiting on the engine.
        let still_producing = producer_session
            .registry
            .read()
            .await
            .find_producer(producer_id)
            .is_ok();
        if !still_producing {
            self.discard(engine, orphan()).await;
            return Err(SfuError::NotFound(format!(
                "Producer {producer_id} not found"
            )));
        }

        let registered = self.registry.write().await.add_consumer(ConsumerEntry {
            id: consumer.id.clone(),
            producer_id: producer_id.clone(),
            kind: consumer.kind,
            transport_id: transport_id.clone(),
        });
        if let Err(e) = registered {
            self.discard(engine, orphan()).await;
            return Err(e);
        }

        info!(
            target: "sfu.peer",
            peer_id = %self.id,
            consumer_id = %consumer.id,
            producer_id = %producer_id,
            producer_peer_id = %producer_peer_id,
            "Consumer created"
        );
        Ok(consumer)
    }

    /// Close the session and every resource it owns.
    ///
    /// Safe to call while an operation is in flight. Returns false if the
    /// session was already closing.
    pub async fn close(&self, engine: &EngineClient, directory: &SessionDirectory) -> bool {
        let previous = self
            .state
            .fetch_max(SessionState::Closing as u8, Ordering::SeqCst);
        if SessionState::from_u8(previous) >= SessionState::Closing {
            return false;
        }

        let teardown = self.registry.write().await.close_all();
        let failures = teardown.run(engine).await;
        directory.unregister(&self.id).await;
        self.state
            .store(SessionState::Closed as u8, Ordering::SeqCst);

        info!(
            target: "sfu.peer",
            peer_id = %self.id,
            teardown_failures = failures,
            "Peer session closed"
        );
        true
    }

    /// Remove consumers fed by a closed producer. Returns the removed ids.
    pub async fn drop_consumers_of(&self, producer_id: &ProducerId) -> Vec<ConsumerId> {
        self.registry
            .write()
            .await
            .remove_consumers_of(producer_id)
            .into_iter()
            .map(|c| c.id)
            .collect()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::engine::mock::MockMediaEngine;
    use crate::engine::{default_media_codecs, ListenIp, WebRtcTransportOptions};
    use serde_json::json;
    use std::sync::Arc;

    struct Fixture {
        engine: Arc<MockMediaEngine>,
        client: EngineClient,
        directory: SessionDirectory,
    }

    async fn fixture() -> Fixture {
        let engine = Arc::new(MockMediaEngine::new());
        let client = EngineClient::bootstrap(
            engine.clone(),
            &default_media_codecs(),
            WebRtcTransportOptions {
                listen_ips: vec![ListenIp {
                    ip: "0.0.0.0".parse().unwrap(),
                    announced_ip: None,
                }],
                enable_udp: true,
                enable_tcp: true,
                prefer_udp: true,
            },
        )
        .await
        .unwrap();
        Fixture {
            engine,
            client,
            directory: SessionDirectory::new(),
        }
    }

    async fn active_peer(directory: &SessionDirectory) -> Arc<PeerSession> {
        let (tx, _rx) = mpsc::channel(8);
        let session = Arc::new(PeerSession::new(PeerId::new(), tx));
        directory.register(Arc::clone(&session)).await.unwrap();
        assert!(session.activate());
        session
    }

    #[tokio::test]
    async fn test_operations_require_active_state() {
        let f = fixture().await;
        let (tx, _rx) = mpsc::channel(8);
        let session = PeerSession::new(PeerId::new(), tx);

        assert_eq!(
            session.create_transport(&f.client).await.unwrap_err(),
            SfuError::SessionClosed
        );
        assert_eq!(f.engine.call_count("create_transport"), 0);
    }

    #[tokio::test]
    async fn test_produce_then_consume_across_peers() {
        let f = fixture().await;
        let alice = active_peer(&f.directory).await;
        let bob = active_peer(&f.directory).await;

        let send = alice.create_transport(&f.client).await.unwrap();
        alice
            .connect_transport(&f.client, &send.id, &json!({"role": "client"}))
            .await
            .unwrap();
        let producer_id = alice
            .produce(&f.client, &send.id, MediaKind::Audio, &json!({}))
            .await
            .unwrap();

        let recv = bob.create_transport(&f.client).await.unwrap();
        let consumer = bob
            .consume(
                &f.client,
                &f.directory,
                &recv.id,
                &alice.id(),
                &producer_id,
                &json!({}),
            )
            .await
            .unwrap();

        assert_eq!(consumer.producer_id, producer_id);
        assert_eq!(consumer.kind, MediaKind::Audio);
        assert_eq!(f.engine.consumer_paused(&consumer.id), Some(false));
        assert_eq!(bob.registry().await.consumers().len(), 1);
    }

    #[tokio::test]
    async fn test_foreign_transport_is_not_found() {
        let f = fixture().await;
        let alice = active_peer(&f.directory).await;
        let bob = active_peer(&f.directory).await;
        let alice_transport = alice.create_transport(&f.client).await.unwrap();

        let err = bob
            .connect_transport(&f.client, &alice_transport.id, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::NotFound(_)));

        let err = bob
            .produce(&f.client, &alice_transport.id, MediaKind::Video, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::NotFound(_)));
        assert_eq!(f.engine.call_count("produce"), 0);
    }

    #[tokio::test]
    async fn test_closed_transport_is_invalid_state() {
        let f = fixture().await;
        let alice = active_peer(&f.directory).await;
        let bob = active_peer(&f.directory).await;
        let send = alice.create_transport(&f.client).await.unwrap();
        let producer_id = alice
            .produce(&f.client, &send.id, MediaKind::Audio, &json!({}))
            .await
            .unwrap();
        let recv = bob.create_transport(&f.client).await.unwrap();

        bob.registry_mut()
            .await
            .mark_transport_closed(&recv.id)
            .unwrap();

        let err = bob
            .connect_transport(&f.client, &recv.id, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::InvalidState(_)), "got {err:?}");

        let err = bob
            .produce(&f.client, &recv.id, MediaKind::Video, &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::InvalidState(_)), "got {err:?}");

        let err = bob
            .consume(
                &f.client,
                &f.directory,
                &recv.id,
                &alice.id(),
                &producer_id,
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::InvalidState(_)), "got {err:?}");

        assert_eq!(f.engine.call_count("connect_transport"), 0);
        assert_eq!(f.engine.call_count("produce"), 1);
        assert_eq!(f.engine.call_count("consume"), 0);
    }

    #[tokio::test]
    async fn test_consume_from_absent_peer_is_not_found() {
        let f = fixture().await;
        let bob = active_peer(&f.directory).await;
        let recv = bob.create_transport(&f.client).await.unwrap();

        let err = bob
            .consume(
                &f.client,
                &f.directory,
                &recv.id,
                &PeerId::new(),
                &ProducerId::from("p"),
                &json!({}),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SfuError::NotFound(_)));
        assert_eq!(f.engine.call_count("consume"), 0);
    }

    #[tokio::test]
    async fn test_resume_failure_closes_consumer() {
        let f = fixture().await;
        let alice = active_peer(&f.directory).await;
        let send = alice.create_transport(&f.client).await.unwrap();
        let producer_id = alice
            .produce(&f.client, &send.id, MediaKind::Audio, &json!({}))
            .await
            .unwrap();

        f.engine.fail_next("resume_consumer");
        let err = alice
            .consume(
                &f.client,
                &f.directory,
                &send.id,
                &alice.id(),
                &producer_id,
                &json!({}),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, SfuError::Engine(_)));
        assert_eq!(f.engine.call_count("close_consumer"), 1);
        assert!(alice.registry().await.consumers().is_empty());
    }

    #[tokio::test]
    async fn test_close_empties_registry_and_is_idempotent() {
        let f = fixture().await;
        let alice = active_peer(&f.directory).await;
        let send = alice.create_transport(&f.client).await.unwrap();
        alice
            .produce(&f.client, &send.id, MediaKind::Video, &json!({}))
            .await
            .unwrap();

        assert!(alice.close(&f.client, &f.directory).await);
        assert_eq!(alice.state(), SessionState::Closed);
        assert!(alice.registry().await.is_empty());
        assert!(f.directory.lookup(&alice.id()).await.is_err());
        assert_eq!(f.engine.open_handle_count(), 0);

        assert!(!alice.close(&f.client, &f.directory).await);
        assert_eq!(f.engine.call_count("close_transport"), 1);
    }

    #[tokio::test]
    async fn test_close_during_in_flight_create_closes_late_transport() {
        let f = fixture().await;
        let alice = active_peer(&f.directory).await;
        let hold = f.engine.hold("create_transport");

        let in_flight = {
            let alice = Arc::clone(&alice);
            let client = f.client.clone();
            tokio::spawn(async move { alice.create_transport(&client).await })
        };

        hold.entered().await;
        assert!(alice.close(&f.client, &f.directory).await);
        hold.release();

        let err = in_flight.await.unwrap().unwrap_err();
        assert_eq!(err, SfuError::SessionClosed);
        assert_eq!(f.engine.call_count("close_transport"), 1);
        assert_eq!(f.engine.open_handle_count(), 0);
    }

    #[tokio::test]
    async fn test_producer_closed_during_consume_is_not_found() {
        let f = fixture().await;
        let alice = active_peer(&f.directory).await;
        let bob = active_peer(&f.directory).await;
        let send = alice.create_transport(&f.client).await.unwrap();
        let producer_id = alice
            .produce(&f.client, &send.id, MediaKind::Audio, &json!({}))
            .await
            .unwrap();
        let recv = bob.create_transport(&f.client).await.unwrap();

        let hold = f.engine.hold("resume_consumer");
        let in_flight = {
            let bob = Arc::clone(&bob);
            let client = f.client.clone();
            let directory = f.directory.clone();
            let alice_id = alice.id();
            let producer_id = producer_id.clone();
            let recv_id = recv.id.clone();
            tokio::spawn(async move {
                bob.consume(
                    &client,
                    &directory,
                    &recv_id,
                    &alice_id,
                    &producer_id,
                    &json!({}),
                )
                .await
            })
        };

        hold.entered().await;
        alice.close(&f.client, &f.directory).await;
        hold.release();

        let err = in_flight.await.unwrap().unwrap_err();
        assert!(matches!(err, SfuError::NotFound(_)));
        assert!(bob.registry().await.consumers().is_empty());
    }
}
