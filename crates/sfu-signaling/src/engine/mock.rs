//! In-memory media engine for tests.
//!
//! Tracks every handle it hands out, records calls in order, and supports
//! one-shot failure injection and holding a call open until released (for
//! close-while-in-flight tests).

use super::{
    ConsumerInfo, EngineError, EngineEvent, MediaEngine, ProducerInfo, RouterInfo,
    RtpCodecCapability, TransportParams, WebRtcTransportOptions,
};
use crate::types::{ConsumerId, MediaKind, ProducerId, RouterId, TransportId, WorkerId};

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct MockTransport {
    connected: bool,
    closed: bool,
}

#[derive(Debug, Clone)]
struct MockProducer {
    kind: MediaKind,
    closed: bool,
}

#[derive(Debug, Clone)]
struct MockConsumer {
    producer_id: ProducerId,
    paused: bool,
    closed: bool,
}

#[derive(Default)]
struct MockState {
    calls: Vec<String>,
    fail_next: HashSet<String>,
    fail_always: HashSet<String>,
    holds: HashMap<String, MockHold>,
    transports: HashMap<TransportId, MockTransport>,
    producers: HashMap<ProducerId, MockProducer>,
    consumers: HashMap<ConsumerId, MockConsumer>,
}

/// Handle to a held engine operation.
///
/// The next call of the held operation signals `entered` and then waits
/// until `release` is called.
#[derive(Clone, Default)]
pub struct MockHold {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl MockHold {
    /// Wait until the held call has started.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    /// Let the held call complete.
    pub fn release(&self) {
        self.release.notify_one();
    }
}

/// Mock media engine.
#[derive(Default)]
pub struct MockMediaEngine {
    state: Mutex<MockState>,
}

impl MockMediaEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next call of `operation` only.
    pub fn fail_next(&self, operation: &str) {
        self.state().fail_next.insert(operation.to_string());
    }

    /// Fail every call of `operation`.
    pub fn fail_always(&self, operation: &str) {
        self.state().fail_always.insert(operation.to_string());
    }

    /// Hold the next call of `operation` until released.
    pub fn hold(&self, operation: &str) -> MockHold {
        let hold = MockHold::default();
        self.state()
            .holds
            .insert(operation.to_string(), hold.clone());
        hold
    }

    /// All operations invoked so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state().calls.clone()
    }

    /// Number of times `operation` was invoked.
    pub fn call_count(&self, operation: &str) -> usize {
        self.state()
            .calls
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    /// `Some(paused)` for a known consumer.
    pub fn consumer_paused(&self, consumer_id: &ConsumerId) -> Option<bool> {
        self.state().consumers.get(consumer_id).map(|c| c.paused)
    }

    pub fn transport_connected(&self, transport_id: &TransportId) -> Option<bool> {
        self.state().transports.get(transport_id).map(|t| t.connected)
    }

    pub fn transport_closed(&self, transport_id: &TransportId) -> bool {
        self.state()
            .transports
            .get(transport_id)
            .is_some_and(|t| t.closed)
    }

    pub fn producer_closed(&self, producer_id: &ProducerId) -> bool {
        self.state()
            .producers
            .get(producer_id)
            .is_some_and(|p| p.closed)
    }

    pub fn consumer_closed(&self, consumer_id: &ConsumerId) -> bool {
        self.state()
            .consumers
            .get(consumer_id)
            .is_some_and(|c| c.closed)
    }

    /// Handles that were created and are not yet closed.
    pub fn open_handle_count(&self) -> usize {
        let state = self.state();
        state.transports.values().filter(|t| !t.closed).count()
            + state.producers.values().filter(|p| !p.closed).count()
            + state.consumers.values().filter(|c| !c.closed).count()
    }

    /// Close a producer from the engine side, returning the event the
    /// engine would emit.
    pub fn close_producer_externally(&self, producer_id: &ProducerId) -> EngineEvent {
        let mut state = self.state();
        if let Some(producer) = state.producers.get_mut(producer_id) {
            producer.closed = true;
        }
        for consumer in state.consumers.values_mut() {
            if &consumer.producer_id == producer_id {
                consumer.closed = true;
            }
        }
        EngineEvent::ProducerClosed {
            producer_id: producer_id.clone(),
        }
    }

    /// Record the call and apply any injected failure or hold.
    async fn enter(&self, operation: &str) -> Result<(), EngineError> {
        let hold = {
            let mut state = self.state();
            state.calls.push(operation.to_string());

            let fail = state.fail_next.remove(operation) || state.fail_always.contains(operation);
            if fail {
                return Err(EngineError::Rejected(format!(
                    "injected failure for {operation}"
                )));
            }
            state.holds.remove(operation)
        };

        if let Some(hold) = hold {
            hold.entered.notify_one();
            hold.release.notified().await;
        }
        Ok(())
    }
}

fn new_id(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

#[async_trait]
impl MediaEngine for MockMediaEngine {
    async fn create_worker(&self) -> Result<WorkerId, EngineError> {
        self.enter("create_worker").await?;
        Ok(WorkerId(new_id("worker")))
    }

    async fn create_router(
        &self,
        _worker_id: &WorkerId,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<RouterInfo, EngineError> {
        self.enter("create_router").await?;

        let codecs: Vec<Value> = media_codecs
            .iter()
            .zip(100u8..)
            .map(|(codec, payload_type)| {
                let mut entry = json!({
                    "kind": codec.kind,
                    "mimeType": codec.mime_type,
                    "clockRate": codec.clock_rate,
                    "preferredPayloadType": payload_type,
                });
                if let (Some(channels), Some(obj)) = (codec.channels, entry.as_object_mut()) {
                    obj.insert("channels".to_string(), json!(channels));
                }
                entry
            })
            .collect();

        Ok(RouterInfo {
            id: RouterId(new_id("router")),
            rtp_capabilities: json!({ "codecs": codecs, "headerExtensions": [] }),
        })
    }

    async fn create_webrtc_transport(
        &self,
        _router_id: &RouterId,
        options: &WebRtcTransportOptions,
    ) -> Result<TransportParams, EngineError> {
        self.enter("create_transport").await?;

        let id = TransportId(new_id("transport"));
        let candidates: Vec<Value> = options
            .listen_ips
            .iter()
            .map(|listen| {
                let address = listen
                    .announced_ip
                    .clone()
                    .unwrap_or_else(|| listen.ip.to_string());
                json!({
                    "foundation": "udpcandidate",
                    "ip": address,
                    "port": 40000,
                    "priority": 1_076_302_079u32,
                    "protocol": "udp",
                    "type": "host",
                })
            })
            .collect();

        self.state().transports.insert(
            id.clone(),
            MockTransport {
                connected: false,
                closed: false,
            },
        );

        Ok(TransportParams {
            id,
            ice_parameters: json!({
                "usernameFragment": new_id("ufrag"),
                "password": new_id("pwd"),
                "iceLite": true,
            }),
            ice_candidates: Value::Array(candidates),
            dtls_parameters: json!({
                "role": "auto",
                "fingerprints": [{"algorithm": "sha-256", "value": "00:11:22"}],
            }),
        })
    }

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        _dtls_parameters: &Value,
    ) -> Result<(), EngineError> {
        self.enter("connect_transport").await?;

        let mut state = self.state();
        match state.transports.get_mut(transport_id) {
            Some(transport) if !transport.closed => {
                transport.connected = true;
                Ok(())
            }
            _ => Err(EngineError::Rejected(format!(
                "transport {transport_id} not open"
            ))),
        }
    }

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        _rtp_parameters: &Value,
    ) -> Result<ProducerInfo, EngineError> {
        self.enter("produce").await?;

        let mut state = self.state();
        if !state
            .transports
            .get(transport_id)
            .is_some_and(|t| !t.closed)
        {
            return Err(EngineError::Rejected(format!(
                "transport {transport_id} not open"
            )));
        }

        let id = ProducerId(new_id("producer"));
        state
            .producers
            .insert(id.clone(), MockProducer { kind, closed: false });
        Ok(ProducerInfo { id, kind })
    }

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        _rtp_capabilities: &Value,
        paused: bool,
    ) -> Result<ConsumerInfo, EngineError> {
        self.enter("consume").await?;

        let mut state = self.state();
        if !state
            .transports
            .get(transport_id)
            .is_some_and(|t| !t.closed)
        {
            return Err(EngineError::Rejected(format!(
                "transport {transport_id} not open"
            )));
        }
        let kind = match state.producers.get(producer_id) {
            Some(producer) if !producer.closed => producer.kind,
            _ => {
                return Err(EngineError::Rejected(format!(
                    "producer {producer_id} not open"
                )))
            }
        };

        let id = ConsumerId(new_id("consumer"));
        state.consumers.insert(
            id.clone(),
            MockConsumer {
                producer_id: producer_id.clone(),
                paused,
                closed: false,
            },
        );

        Ok(ConsumerInfo {
            id,
            producer_id: producer_id.clone(),
            kind,
            rtp_parameters: json!({
                "mid": "0",
                "codecs": [],
                "encodings": [{"ssrc": 11_111_111u32}],
            }),
        })
    }

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError> {
        self.enter("resume_consumer").await?;

        let mut state = self.state();
        match state.consumers.get_mut(consumer_id) {
            Some(consumer) if !consumer.closed => {
                consumer.paused = false;
                Ok(())
            }
            _ => Err(EngineError::Rejected(format!(
                "consumer {consumer_id} not open"
            ))),
        }
    }

    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), EngineError> {
        self.enter("close_transport").await?;
        if let Some(transport) = self.state().transports.get_mut(transport_id) {
            transport.closed = true;
        }
        Ok(())
    }

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), EngineError> {
        self.enter("close_producer").await?;
        if let Some(producer) = self.state().producers.get_mut(producer_id) {
            producer.closed = true;
        }
        Ok(())
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError> {
        self.enter("close_consumer").await?;
        if let Some(consumer) = self.state().consumers.get_mut(consumer_id) {
            consumer.closed = true;
        }
        Ok(())
    }
}
