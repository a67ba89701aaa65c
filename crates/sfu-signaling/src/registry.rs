//! Per-peer resource registry.
//!
//! Holds every transport, producer and consumer a peer owns, in creation
//! order. The registry is the only thing that knows which engine handles a
//! session is responsible for closing, so it is also where teardown starts:
//! [`ResourceRegistry::close_all`] detaches every handle under the caller's
//! lock and returns a [`Teardown`] that performs the engine closes outside
//! of it.

use crate::engine::EngineClient;
use crate::errors::SfuError;
use crate::observability::metrics;
use crate::types::{ConsumerId, MediaKind, ProducerId, TransportId};

use tracing::{debug, warn};

/// Lifecycle of a WebRTC transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Created,
    Connected,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEntry {
    pub id: TransportId,
    pub state: TransportState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducerEntry {
    pub id: ProducerId,
    pub kind: MediaKind,
    pub transport_id: TransportId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerEntry {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub transport_id: TransportId,
}

/// Resources owned by one peer.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    transports: Vec<TransportEntry>,
    producers: Vec<ProducerEntry>,
    consumers: Vec<ConsumerEntry>,
    closed: bool,
}

impl ResourceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// True once `close_all` has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transports.is_empty() && self.producers.is_empty() && self.consumers.is_empty()
    }

    #[must_use]
    pub fn transports(&self) -> &[TransportEntry] {
        &self.transports
    }

    #[must_use]
    pub fn producers(&self) -> &[ProducerEntry] {
        &self.producers
    }

    #[must_use]
    pub fn consumers(&self) -> &[ConsumerEntry] {
        &self.consumers
    }

    fn ensure_open(&self) -> Result<(), SfuError> {
        if self.closed {
            Err(SfuError::SessionClosed)
        } else {
            Ok(())
        }
    }

    /// Register a new transport in `Created` state.
    ///
    /// # Errors
    ///
    /// `SessionClosed` after `close_all`, `DuplicateResource` if the id is
    /// already registered.
    pub fn add_transport(&mut self, id: TransportId) -> Result<(), SfuError> {
        self.ensure_open()?;
        if self.transports.iter().any(|t| t.id == id) {
            return Err(SfuError::DuplicateResource(format!(
                "Transport {id} already registered"
            )));
        }
        self.transports.push(TransportEntry {
            id,
            state: TransportState::Created,
        });
        Ok(())
    }

    /// # Errors
    ///
    /// Same as [`Self::add_transport`].
    pub fn add_producer(&mut self, entry: ProducerEntry) -> Result<(), SfuError> {
        self.ensure_open()?;
        if self.producers.iter().any(|p| p.id == entry.id) {
            return Err(SfuError::DuplicateResource(format!(
                "Producer {} already registered",
                entry.id
            )));
        }
        self.producers.push(entry);
        Ok(())
    }

    /// # Errors
    ///
    /// Same as [`Self::add_transport`].
    pub fn add_consumer(&mut self, entry: ConsumerEntry) -> Result<(), SfuError> {
        self.ensure_open()?;
        if self.consumers.iter().any(|c| c.id == entry.id) {
            return Err(SfuError::DuplicateResource(format!(
                "Consumer {} already registered",
                entry.id
            )));
        }
        self.consumers.push(entry);
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` if this peer does not own the transport.
    pub fn find_transport(&self, id: &TransportId) -> Result<&TransportEntry, SfuError> {
        self.transports
            .iter()
            .find(|t| &t.id == id)
            .ok_or_else(|| SfuError::NotFound(format!("Transport {id} not found")))
    }

    /// # Errors
    ///
    /// `NotFound` if this peer does not own the producer.
    pub fn find_producer(&self, id: &ProducerId) -> Result<&ProducerEntry, SfuError> {
        self.producers
            .iter()
            .find(|p| &p.id == id)
            .ok_or_else(|| SfuError::NotFound(format!("Producer {id} not found")))
    }

    /// Move a transport to `Connected`.
    ///
    /// # Errors
    ///
    /// `NotFound` if absent, `InvalidState` if it has been closed meanwhile.
    pub fn mark_transport_connected(&mut self, id: &TransportId) -> Result<(), SfuError> {
        let entry = self
            .transports
            .iter_mut()
            .find(|t| &t.id == id)
            .ok_or_else(|| SfuError::NotFound(format!("Transport {id} not found")))?;
        if entry.state == TransportState::Closed {
            return Err(SfuError::InvalidState(format!("Transport {id} is closed")));
        }
        entry.state = TransportState::Connected;
        Ok(())
    }

    /// Mark a transport closed by the engine.
    ///
    /// The engine closes everything carried by a transport along with it, so
    /// producers and consumers on it are dropped and returned. `None` if the
    /// transport is unknown or already closed.
    pub fn mark_transport_closed(
        &mut self,
        id: &TransportId,
    ) -> Option<(Vec<ProducerEntry>, Vec<ConsumerEntry>)> {
        let entry = self
            .transports
            .iter_mut()
            .find(|t| &t.id == id && t.state != TransportState::Closed)?;
        entry.state = TransportState::Closed;

        let (dropped_producers, producers) = std::mem::take(&mut self.producers)
            .into_iter()
            .partition(|p| &p.transport_id == id);
        self.producers = producers;

        let (dropped_consumers, consumers) = std::mem::take(&mut self.consumers)
            .into_iter()
            .partition(|c| &c.transport_id == id);
        self.consumers = consumers;

        Some((dropped_producers, dropped_consumers))
    }

    pub fn remove_producer(&mut self, id: &ProducerId) -> Option<ProducerEntry> {
        let index = self.producers.iter().position(|p| &p.id == id)?;
        Some(self.producers.remove(index))
    }

    pub fn remove_consumer(&mut self, id: &ConsumerId) -> Option<ConsumerEntry> {
        let index = self.consumers.iter().position(|c| &c.id == id)?;
        Some(self.consumers.remove(index))
    }

    /// Drop every consumer fed by `producer_id`.
    pub fn remove_consumers_of(&mut self, producer_id: &ProducerId) -> Vec<ConsumerEntry> {
        let (removed, kept) = std::mem::take(&mut self.consumers)
            .into_iter()
            .partition(|c| &c.producer_id == producer_id);
        self.consumers = kept;
        removed
    }

    /// Detach every handle and refuse further registrations.
    ///
    /// Returns an empty teardown when called again.
    pub fn close_all(&mut self) -> Teardown {
        if self.closed {
            return Teardown::default();
        }
        self.closed = true;

        Teardown {
            consumers: std::mem::take(&mut self.consumers)
                .into_iter()
                .map(|c| c.id)
                .collect(),
            producers: std::mem::take(&mut self.producers)
                .into_iter()
                .map(|p| p.id)
                .collect(),
            transports: std::mem::take(&mut self.transports)
                .into_iter()
                .filter(|t| t.state != TransportState::Closed)
                .map(|t| t.id)
                .collect(),
        }
    }
}

/// Engine handles detached from a registry, awaiting close.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Teardown {
    pub consumers: Vec<ConsumerId>,
    pub producers: Vec<ProducerId>,
    pub transports: Vec<TransportId>,
}

impl Teardown {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.consumers.is_empty() && self.producers.is_empty() && self.transports.is_empty()
    }

    /// Close consumers, then producers, then transports.
    ///
    /// Failures are logged and counted but do not stop the teardown.
    /// Returns the number of failed closes.
    pub async fn run(self, engine: &EngineClient) -> usize {
        let mut failures = 0;

        for id in &self.consumers {
            if let Err(e) = engine.close_consumer(id).await {
                failures += 1;
                teardown_failed("consumer", id.as_str(), &e);
            }
        }
        for id in &self.producers {
            if let Err(e) = engine.close_producer(id).await {
                failures += 1;
                teardown_failed("producer", id.as_str(), &e);
            }
        }
        for id in &self.transports {
            if let Err(e) = engine.close_transport(id).await {
                failures += 1;
                teardown_failed("transport", id.as_str(), &e);
            }
        }

        debug!(
            target: "sfu.peer",
            consumers = self.consumers.len(),
            producers = self.producers.len(),
            transports = self.transports.len(),
            failures,
            "Teardown complete"
        );
        failures
    }
}

fn teardown_failed(resource: &'static str, id: &str, error: &SfuError) {
    metrics::record_teardown_error(resource);
    warn!(
        target: "sfu.peer",
        resource,
        id,
        error = %error,
        "Failed to close resource during teardown"
    );
}
