//! Media engine boundary.
//!
//! The signaling core never touches RTP, ICE or DTLS itself. Everything that
//! does is owned by an external media engine (an SFU) reached through the
//! [`MediaEngine`] trait:
//!
//! - [`http`] - `HttpMediaEngine`, client for a remote engine control API
//! - [`mock`] - `MockMediaEngine`, in-memory engine for tests
//!
//! [`EngineClient`] wraps a `MediaEngine` together with the process-wide
//! router negotiated at startup. It performs no retries: engine failures
//! surface as [`SfuError::Engine`] exactly once.

pub mod http;
pub mod mock;

use crate::errors::SfuError;
use crate::observability::metrics;
use crate::types::{
    ConsumerId, MediaKind, ProducerId, RouterId, TransportId, WorkerId,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors surfaced by a media engine implementation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The request never produced a response (connect/timeout/IO).
    #[error("engine request failed: {0}")]
    Request(String),

    /// The engine answered with a non-success status.
    #[error("engine returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The engine answered with a body we could not decode.
    #[error("invalid engine response: {0}")]
    Decode(String),

    /// The engine refused the operation (unknown handle, closed handle, ...).
    #[error("engine rejected operation: {0}")]
    Rejected(String),
}

impl From<EngineError> for SfuError {
    fn from(err: EngineError) -> Self {
        SfuError::Engine(err.to_string())
    }
}

/// Codec the router is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RtpCodecCapability {
    pub kind: MediaKind,
    pub mime_type: String,
    pub clock_rate: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channels: Option<u8>,
}

/// Fixed router codec list: Opus stereo audio and VP8 video.
#[must_use]
pub fn default_media_codecs() -> Vec<RtpCodecCapability> {
    vec![
        RtpCodecCapability {
            kind: MediaKind::Audio,
            mime_type: "audio/opus".to_string(),
            clock_rate: 48000,
            channels: Some(2),
        },
        RtpCodecCapability {
            kind: MediaKind::Video,
            mime_type: "video/VP8".to_string(),
            clock_rate: 90000,
            channels: None,
        },
    ]
}

/// Listen address for WebRTC transports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenIp {
    pub ip: IpAddr,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub announced_ip: Option<String>,
}

/// Fixed configuration every WebRTC transport is created with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebRtcTransportOptions {
    pub listen_ips: Vec<ListenIp>,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,
}

/// Router created at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterInfo {
    pub id: RouterId,
    pub rtp_capabilities: Value,
}

/// Connection parameters of a freshly created WebRTC transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportParams {
    pub id: TransportId,
    pub ice_parameters: Value,
    pub ice_candidates: Value,
    pub dtls_parameters: Value,
}

/// Producer as reported by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProducerInfo {
    pub id: ProducerId,
    pub kind: MediaKind,
}

/// Consumer as reported by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerInfo {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// Closure notifications emitted by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum EngineEvent {
    ProducerClosed { producer_id: ProducerId },
    ConsumerClosed { consumer_id: ConsumerId },
    TransportClosed { transport_id: TransportId },
}

impl EngineEvent {
    /// Bounded label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            EngineEvent::ProducerClosed { .. } => "producer_closed",
            EngineEvent::ConsumerClosed { .. } => "consumer_closed",
            EngineEvent::TransportClosed { .. } => "transport_closed",
        }
    }
}

/// Operations the signaling core needs from a media engine.
#[async_trait]
pub trait MediaEngine: Send + Sync {
    async fn create_worker(&self) -> Result<WorkerId, EngineError>;

    async fn create_router(
        &self,
        worker_id: &WorkerId,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<RouterInfo, EngineError>;

    async fn create_webrtc_transport(
        &self,
        router_id: &RouterId,
        options: &WebRtcTransportOptions,
    ) -> Result<TransportParams, EngineError>;

    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), EngineError>;

    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<ProducerInfo, EngineError>;

    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
        paused: bool,
    ) -> Result<ConsumerInfo, EngineError>;

    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError>;

    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), EngineError>;

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), EngineError>;

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError>;
}

/// Media engine client bound to the process-wide router.
///
/// Cheap to clone; all clones share the engine and router.
#[derive(Clone)]
pub struct EngineClient {
    engine: Arc<dyn MediaEngine>,
    router: Arc<RouterInfo>,
    transport_options: Arc<WebRtcTransportOptions>,
}

impl EngineClient {
    /// Create the worker and router once and bind a client to them.
    ///
    /// # Errors
    ///
    /// Returns `SfuError::Engine` if worker or router creation fails.
    pub async fn bootstrap(
        engine: Arc<dyn MediaEngine>,
        media_codecs: &[RtpCodecCapability],
        transport_options: WebRtcTransportOptions,
    ) -> Result<Self, SfuError> {
        let worker_id = timed("create_worker", engine.create_worker()).await?;
        let router = timed("create_router", engine.create_router(&worker_id, media_codecs)).await?;

        info!(
            target: "sfu.engine",
            worker_id = %worker_id,
            router_id = %router.id,
            codecs = media_codecs.len(),
            "Media engine router created"
        );

        Ok(Self {
            engine,
            router: Arc::new(router),
            transport_options: Arc::new(transport_options),
        })
    }

    /// Router identifier.
    #[must_use]
    pub fn router_id(&self) -> &RouterId {
        &self.router.id
    }

    /// Router RTP capabilities negotiated at startup.
    #[must_use]
    pub fn router_rtp_capabilities(&self) -> &Value {
        &self.router.rtp_capabilities
    }

    /// Create a WebRTC transport with the fixed transport configuration.
    pub async fn create_transport(&self) -> Result<TransportParams, SfuError> {
        timed(
            "create_transport",
            self.engine
                .create_webrtc_transport(&self.router.id, &self.transport_options),
        )
        .await
    }

    pub async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), SfuError> {
        timed(
            "connect_transport",
            self.engine.connect_transport(transport_id, dtls_parameters),
        )
        .await
    }

    pub async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<ProducerInfo, SfuError> {
        timed(
            "produce",
            self.engine.produce(transport_id, kind, rtp_parameters),
        )
        .await
    }

    /// Create a consumer. The core always asks for a paused consumer and
    /// resumes it explicitly.
    pub async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
    ) -> Result<ConsumerInfo, SfuError> {
        timed(
            "consume",
            self.engine
                .consume(transport_id, producer_id, rtp_capabilities, true),
        )
        .await
    }

    pub async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SfuError> {
        timed("resume_consumer", self.engine.resume_consumer(consumer_id)).await
    }

    pub async fn close_transport(&self, transport_id: &TransportId) -> Result<(), SfuError> {
        timed("close_transport", self.engine.close_transport(transport_id)).await
    }

    pub async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), SfuError> {
        timed("close_producer", self.engine.close_producer(producer_id)).await
    }

    pub async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), SfuError> {
        timed("close_consumer", self.engine.close_consumer(consumer_id)).await
    }
}

/// Run one engine call, recording its latency and outcome.
async fn timed<T, F>(operation: &'static str, call: F) -> Result<T, SfuError>
where
    F: Future<Output = Result<T, EngineError>>,
{
    let start = Instant::now();
    let result = call.await;
    let elapsed = start.elapsed();

    match &result {
        Ok(_) => {
            metrics::record_engine_call(operation, "success", elapsed);
            debug!(
                target: "sfu.engine",
                operation,
                elapsed_ms = elapsed.as_millis(),
                "Engine call succeeded"
            );
        }
        Err(e) => {
            metrics::record_engine_call(operation, "error", elapsed);
            warn!(
                target: "sfu.engine",
                operation,
                elapsed_ms = elapsed.as_millis(),
                error = %e,
                "Engine call failed"
            );
        }
    }

    result.map_err(SfuError::from)
}
