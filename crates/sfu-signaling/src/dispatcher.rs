//! Action dispatcher.
//!
//! Decodes inbound frames, runs the matching peer session operation and
//! queues the reply. Every failure is answered with an `error` frame; none
//! ends the connection.

use crate::directory::SessionDirectory;
use crate::engine::EngineClient;
use crate::errors::SfuError;
use crate::observability::metrics;
use crate::protocol::{
    parse_envelope, Action, ClientRequest, ConsumeRequest, ConsumedResponse, ErrorResponse,
    ServerMessage,
};
use crate::session::{PeerSession, SessionState};
use crate::types::PeerId;

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Routes client actions to peer sessions.
///
/// Cheap to clone; clones share the engine client and directory.
#[derive(Clone)]
pub struct Dispatcher {
    engine: EngineClient,
    directory: SessionDirectory,
}

impl Dispatcher {
    #[must_use]
    pub fn new(engine: EngineClient, directory: SessionDirectory) -> Self {
        Self { engine, directory }
    }

    #[must_use]
    pub fn engine(&self) -> &EngineClient {
        &self.engine
    }

    #[must_use]
    pub fn directory(&self) -> &SessionDirectory {
        &self.directory
    }

    /// Create and register a session for a new connection, then send the
    /// client its identity.
    ///
    /// # Errors
    ///
    /// `DuplicateIdentity` on an id collision, `Internal` if the outbound
    /// channel is already closed.
    #[instrument(skip_all, name = "sfu.dispatcher.open_session")]
    pub async fn open_session(
        &self,
        outbound: mpsc::Sender<ServerMessage>,
    ) -> Result<Arc<PeerSession>, SfuError> {
        let session = Arc::new(PeerSession::new(PeerId::new(), outbound));
        self.directory.register(Arc::clone(&session)).await?;

        if let Err(e) = session.send(ServerMessage::PeerId(session.id())).await {
            self.directory.unregister(&session.id()).await;
            return Err(e);
        }
        session.activate();

        info!(target: "sfu.dispatcher", peer_id = %session.id(), "Peer session opened");
        Ok(session)
    }

    /// Handle one inbound text frame.
    ///
    /// # Errors
    ///
    /// Only when the reply cannot be queued (connection writer gone).
    #[instrument(skip_all, name = "sfu.dispatcher.dispatch", fields(peer_id = %session.id()))]
    pub async fn dispatch(&self, session: &PeerSession, text: &str) -> Result<(), SfuError> {
        let start = Instant::now();

        let envelope = match parse_envelope(text) {
            Ok(envelope) => envelope,
            Err(e) => {
                metrics::record_action("invalid", e.metric_label());
                return self.reply_error(session, None, &e).await;
            }
        };

        let action_name = envelope.action.clone();
        let (label, result) = match envelope.into_request() {
            Ok(request) => {
                let label = request.action().as_str();
                (label, self.handle(session, request).await)
            }
            Err(e) => {
                let label = Action::from_name(&action_name).map_or("unknown", |a| a.as_str());
                (label, Err(e))
            }
        };

        match result {
            Ok(reply) => {
                metrics::record_action(label, "success");
                debug!(
                    target: "sfu.dispatcher",
                    peer_id = %session.id(),
                    action = label,
                    elapsed_ms = start.elapsed().as_millis(),
                    "Action handled"
                );
                match reply {
                    Some(message) => session.send(message).await,
                    None => Ok(()),
                }
            }
            Err(e) => {
                metrics::record_action(label, e.metric_label());
                self.reply_error(session, Some(action_name), &e).await
            }
        }
    }

    async fn handle(
        &self,
        session: &PeerSession,
        request: ClientRequest,
    ) -> Result<Option<ServerMessage>, SfuError> {
        match request {
            ClientRequest::GetRouterRtpCapabilities => {
                if session.state() != SessionState::Active {
                    return Err(SfuError::SessionClosed);
                }
                Ok(Some(ServerMessage::RouterRtpCapabilities(
                    self.engine.router_rtp_capabilities().clone(),
                )))
            }
            ClientRequest::CreateTransport => {
                let params = session.create_transport(&self.engine).await?;
                Ok(Some(ServerMessage::TransportCreated(params)))
            }
            ClientRequest::ConnectTransport(req) => {
                session
                    .connect_transport(&self.engine, &req.transport_id, &req.dtls_parameters)
                    .await?;
                Ok(None)
            }
            ClientRequest::Produce(req) => {
                let id = session
                    .produce(&self.engine, &req.transport_id, req.kind, &req.rtp_parameters)
                    .await?;
                Ok(Some(ServerMessage::Produced { id }))
            }
            ClientRequest::Consume(req) => self.consume(session, req).await.map(Some),
        }
    }

    async fn consume(
        &self,
        session: &PeerSession,
        req: ConsumeRequest,
    ) -> Result<ServerMessage, SfuError> {
        let producer_peer_id = Uuid::parse_str(&req.producer_peer_id)
            .map(PeerId)
            .map_err(|_| SfuError::NotFound(format!("Peer {} not found", req.producer_peer_id)))?;

        let consumer = session
            .consume(
                &self.engine,
                &self.directory,
                &req.transport_id,
                &producer_peer_id,
                &req.producer_id,
                &req.rtp_capabilities,
            )
            .await?;

        Ok(ServerMessage::Consumed(ConsumedResponse {
            id: consumer.id,
            producer_id: consumer.producer_id,
            kind: consumer.kind,
            rtp_parameters: consumer.rtp_parameters,
        }))
    }

    async fn reply_error(
        &self,
        session: &PeerSession,
        action: Option<String>,
        error: &SfuError,
    ) -> Result<(), SfuError> {
        match error {
            SfuError::Engine(_) | SfuError::Internal(_) => warn!(
                target: "sfu.dispatcher",
                peer_id = %session.id(),
                action = action.as_deref().unwrap_or(""),
                error = %error,
                "Action failed"
            ),
            _ => debug!(
                target: "sfu.dispatcher",
                peer_id = %session.id(),
                action = action.as_deref().unwrap_or(""),
                error = %error,
                "Action rejected"
            ),
        }

        session
            .send(ServerMessage::Error(ErrorResponse::new(action, error)))
            .await
    }

    /// Tear down a session. Idempotent.
    pub async fn close_session(&self, session: &PeerSession) -> bool {
        session.close(&self.engine, &self.directory).await
    }

    /// Close every registered session (shutdown).
    pub async fn close_all_sessions(&self) -> usize {
        let sessions = self.directory.sessions().await;
        let mut closed = 0;
        for session in sessions {
            if self.close_session(&session).await {
                closed += 1;
            }
        }
        info!(target: "sfu.dispatcher", closed, "All peer sessions closed");
        closed
    }
}
