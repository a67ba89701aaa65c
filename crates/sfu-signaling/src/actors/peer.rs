//! `PeerActor` - sequential action processing for one connection.
//!
//! # Lifecycle
//!
//! 1. Spawned by the WebSocket handler right after the session is opened
//! 2. Runs until its mailbox closes, it is cancelled, or the connection
//!    writer goes away
//! 3. Session teardown is not the actor's job: the connection handler
//!    closes the session directly so a slow engine call cannot delay it

use super::metrics::MailboxMonitor;
use crate::dispatcher::Dispatcher;
use crate::errors::SfuError;
use crate::session::PeerSession;
use crate::types::PeerId;

use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Messages accepted by a `PeerActor`.
#[derive(Debug)]
pub enum PeerMessage {
    /// Text frame received from the client.
    Inbound { text: String },
    /// Liveness check; answered once all earlier frames are handled.
    Ping { respond_to: oneshot::Sender<()> },
}

/// Handle to a `PeerActor`.
#[derive(Clone, Debug)]
pub struct PeerActorHandle {
    sender: mpsc::Sender<PeerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    peer_id: PeerId,
}

impl PeerActorHandle {
    #[must_use]
    pub fn peer_id(&self) -> PeerId {
        self.peer_id
    }

    /// Queue an inbound frame without waiting.
    ///
    /// The connection reader must keep watching the socket while an action
    /// is in flight, so a full mailbox is refused instead of awaited.
    ///
    /// # Errors
    ///
    /// `Busy` if the mailbox is full, `Internal` if the actor has stopped.
    pub fn try_deliver(&self, text: String) -> Result<(), SfuError> {
        self.mailbox.record_enqueue();
        self.sender
            .try_send(PeerMessage::Inbound { text })
            .map_err(|e| {
                self.mailbox.record_rejected();
                match e {
                    TrySendError::Full(_) => {
                        SfuError::Busy("Too many requests in flight".to_string())
                    }
                    TrySendError::Closed(_) => {
                        SfuError::Internal("channel send failed: actor stopped".to_string())
                    }
                }
            })
    }

    /// Wait until every frame queued before this call has been handled.
    ///
    /// # Errors
    ///
    /// `Internal` if the actor has stopped.
    pub async fn ping(&self) -> Result<(), SfuError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(PeerMessage::Ping { respond_to: tx })
            .await
            .map_err(|e| SfuError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| SfuError::Internal(format!("response receive failed: {e}")))
    }

    /// Current mailbox depth.
    #[must_use]
    pub fn mailbox_depth(&self) -> usize {
        self.mailbox.current_depth()
    }

    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `PeerActor` implementation.
pub struct PeerActor {
    session: Arc<PeerSession>,
    dispatcher: Dispatcher,
    receiver: mpsc::Receiver<PeerMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl PeerActor {
    /// Spawn an actor for `session`.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session: Arc<PeerSession>,
        dispatcher: Dispatcher,
        cancel_token: CancellationToken,
        mailbox_size: usize,
    ) -> (PeerActorHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(mailbox_size.max(1));
        let peer_id = session.id();
        let mailbox = Arc::new(MailboxMonitor::new(peer_id));

        let actor = Self {
            session,
            dispatcher,
            receiver,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = PeerActorHandle {
            sender,
            cancel_token,
            mailbox,
            peer_id,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sfu.actor.peer", fields(peer_id = %self.session.id()))]
    async fn run(mut self) {
        debug!(target: "sfu.peer", peer_id = %self.session.id(), "PeerActor started");

        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sfu.peer",
                        peer_id = %self.session.id(),
                        "PeerActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            let should_exit = self.handle_message(message).await;
                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "sfu.peer",
                                peer_id = %self.session.id(),
                                "PeerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sfu.peer",
            peer_id = %self.session.id(),
            messages_processed = self.mailbox.messages_processed(),
            peak_mailbox_depth = self.mailbox.peak_depth(),
            "PeerActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: PeerMessage) -> bool {
        match message {
            PeerMessage::Inbound { text } => {
                let result = self.dispatcher.dispatch(&self.session, &text).await;
                self.mailbox.record_dequeue();

                if let Err(e) = result {
                    warn!(
                        target: "sfu.peer",
                        peer_id = %self.session.id(),
                        error = %e,
                        "Connection writer gone, stopping PeerActor"
                    );
                    return true;
                }
                false
            }
            PeerMessage::Ping { respond_to } => {
                let _ = respond_to.send(());
                false
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::directory::SessionDirectory;
    use crate::engine::mock::MockMediaEngine;
    use crate::engine::{default_media_codecs, EngineClient, ListenIp, WebRtcTransportOptions};
    use crate::protocol::ServerMessage;
    use std::time::Duration;

    async fn dispatcher(engine: Arc<MockMediaEngine>) -> Dispatcher {
        let client = EngineClient::bootstrap(
            engine,
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
        Dispatcher::new(client, SessionDirectory::new())
    }

    #[tokio::test]
    async fn test_frames_are_processed_in_order() {
        let dispatcher = dispatcher(Arc::new(MockMediaEngine::new())).await;
        let (tx, mut rx) = mpsc::channel(16);
        let session = dispatcher.open_session(tx).await.unwrap();
        rx.recv().await.unwrap();

        let (handle, _task) =
            PeerActor::spawn(session, dispatcher, CancellationToken::new(), 8);

        handle
            .try_deliver(r#"{"action":"createTransport"}"#.to_string())
            .unwrap();
        handle
            .try_deliver(r#"{"action":"getRouterRtpCapabilities"}"#.to_string())
            .unwrap();
        handle.ping().await.unwrap();

        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::TransportCreated(_)
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::RouterRtpCapabilities(_)
        ));
        assert_eq!(handle.mailbox_depth(), 0);
    }

    #[tokio::test]
    async fn test_actor_stops_on_cancel() {
        let dispatcher = dispatcher(Arc::new(MockMediaEngine::new())).await;
        let (tx, _rx) = mpsc::channel(16);
        let session = dispatcher.open_session(tx).await.unwrap();

        let (handle, task) = PeerActor::spawn(session, dispatcher, CancellationToken::new(), 8);
        handle.cancel();
        assert!(handle.is_cancelled());

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            handle.try_deliver("{}".to_string()),
            Err(SfuError::Internal(_))
        ));
    }

    #[tokio::test]
    async fn test_actor_stops_when_writer_is_gone() {
        let dispatcher = dispatcher(Arc::new(MockMediaEngine::new())).await;
        let (tx, rx) = mpsc::channel(16);
        let session = dispatcher.open_session(tx).await.unwrap();
        drop(rx);

        let (handle, task) = PeerActor::spawn(session, dispatcher, CancellationToken::new(), 8);
        handle
            .try_deliver(r#"{"action":"getRouterRtpCapabilities"}"#.to_string())
            .unwrap();

        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_full_mailbox_is_busy() {
        let engine = Arc::new(MockMediaEngine::new());
        let dispatcher = dispatcher(Arc::clone(&engine)).await;
        let (tx, mut rx) = mpsc::channel(16);
        let session = dispatcher.open_session(tx).await.unwrap();
        rx.recv().await.unwrap();

        let hold = engine.hold("create_transport");
        let (handle, _task) = PeerActor::spawn(session, dispatcher, CancellationToken::new(), 1);

        // First frame is taken by the actor and parks in the engine
        handle
            .try_deliver(r#"{"action":"createTransport"}"#.to_string())
            .unwrap();
        hold.entered().await;

        // Second fills the mailbox, third is refused
        handle
            .try_deliver(r#"{"action":"getRouterRtpCapabilities"}"#.to_string())
            .unwrap();
        let err = handle
            .try_deliver(r#"{"action":"getRouterRtpCapabilities"}"#.to_string())
            .unwrap_err();
        assert!(matches!(err, SfuError::Busy(_)));
        assert_eq!(handle.mailbox_depth(), 2);

        hold.release();
        handle.ping().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::TransportCreated(_)
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ServerMessage::RouterRtpCapabilities(_)
        ));
    }
}
