//! Engine closure events.
//!
//! The media engine reports producers, consumers and transports it closed on
//! its own (a producing peer's track ended, a transport failed ICE, ...).
//! Events are published on an [`EngineEventHub`] and applied to the session
//! directory by a forwarder task; every client that loses a consumer this
//! way receives `consumerClosed`.

use crate::directory::SessionDirectory;
use crate::engine::EngineEvent;
use crate::observability::metrics;
use crate::protocol::ServerMessage;
use crate::registry::ConsumerEntry;
use crate::session::PeerSession;
use crate::types::{ConsumerId, ProducerId, TransportId};

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default event buffer per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcast hub for engine events. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EngineEventHub {
    sender: broadcast::Sender<EngineEvent>,
}

impl Default for EngineEventHub {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

impl EngineEventHub {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event. Returns the number of subscribers reached.
    pub fn publish(&self, event: EngineEvent) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.sender.subscribe()
    }
}

/// Apply one event to every registered session.
///
/// Returns the number of `consumerClosed` notifications queued.
pub async fn apply_event(directory: &SessionDirectory, event: &EngineEvent) -> usize {
    metrics::record_engine_event(event.as_str());
    let sessions = directory.sessions().await;

    match event {
        EngineEvent::ProducerClosed { producer_id } => {
            for session in &sessions {
                if session.registry_mut().await.remove_producer(producer_id).is_some() {
                    debug!(
                        target: "sfu.engine",
                        peer_id = %session.id(),
                        producer_id = %producer_id,
                        "Producer closed by engine"
                    );
                }
            }
            drop_consumers_of(&sessions, producer_id).await
        }
        EngineEvent::ConsumerClosed { consumer_id } => {
            consumer_closed(&sessions, consumer_id).await
        }
        EngineEvent::TransportClosed { transport_id } => {
            transport_closed(&sessions, transport_id).await
        }
    }
}

async fn drop_consumers_of(sessions: &[Arc<PeerSession>], producer_id: &ProducerId) -> usize {
    let mut notified = 0;
    for session in sessions {
        for consumer_id in session.drop_consumers_of(producer_id).await {
            notified += notify_closed(session, consumer_id, producer_id.clone());
        }
    }
    notified
}

async fn consumer_closed(sessions: &[Arc<PeerSession>], consumer_id: &ConsumerId) -> usize {
    for session in sessions {
        let removed = session.registry_mut().await.remove_consumer(consumer_id);
        if let Some(consumer) = removed {
            return notify_closed(session, consumer.id, consumer.producer_id);
        }
    }
    0
}

async fn transport_closed(sessions: &[Arc<PeerSession>], transport_id: &TransportId) -> usize {
    for session in sessions {
        let dropped = session
            .registry_mut()
            .await
            .mark_transport_closed(transport_id);
        let Some((producers, consumers)) = dropped else {
            continue;
        };

        info!(
            target: "sfu.engine",
            peer_id = %session.id(),
            transport_id = %transport_id,
            producers = producers.len(),
            consumers = consumers.len(),
            "Transport closed by engine"
        );

        let mut notified: usize = consumers
            .into_iter()
            .map(|ConsumerEntry { id, producer_id, .. }| notify_closed(session, id, producer_id))
            .sum();
        for producer in producers {
            notified += drop_consumers_of(sessions, &producer.id).await;
        }
        return notified;
    }
    0
}

fn notify_closed(session: &PeerSession, consumer_id: ConsumerId, producer_id: ProducerId) -> usize {
    debug!(
        target: "sfu.engine",
        peer_id = %session.id(),
        consumer_id = %consumer_id,
        producer_id = %producer_id,
        "Consumer closed by engine"
    );
    usize::from(session.notify(ServerMessage::ConsumerClosed {
        consumer_id,
        producer_id,
    }))
}

/// Spawn the task applying hub events to the directory until cancelled.
pub fn spawn_event_forwarder(
    hub: &EngineEventHub,
    directory: SessionDirectory,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    let receiver = hub.subscribe();
    tokio::spawn(run_forwarder(receiver, directory, cancel_token))
}

#[instrument(skip_all, name = "sfu.engine.event_forwarder")]
async fn run_forwarder(
    mut receiver: broadcast::Receiver<EngineEvent>,
    directory: SessionDirectory,
    cancel_token: CancellationToken,
) {
    debug!(target: "sfu.engine", "Engine event forwarder started");

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => break,
            received = receiver.recv() => match received {
                Ok(event) => {
                    apply_event(&directory, &event).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(target: "sfu.engine", skipped, "Engine event forwarder lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    debug!(target: "sfu.engine", "Engine event forwarder stopped");
}
