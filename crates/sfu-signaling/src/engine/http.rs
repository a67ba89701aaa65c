//! HTTP client for a media engine control API.
//!
//! Each [`MediaEngine`] operation maps to one JSON request:
//!
//! | operation | request |
//! |---|---|
//! | `create_worker` | `POST /workers` |
//! | `create_router` | `POST /workers/{id}/routers` |
//! | `create_webrtc_transport` | `POST /routers/{id}/webrtc-transports` |
//! | `connect_transport` | `POST /transports/{id}/connect` |
//! | `produce` | `POST /transports/{id}/producers` |
//! | `consume` | `POST /transports/{id}/consumers` |
//! | `resume_consumer` | `POST /consumers/{id}/resume` |
//! | `close_*` | `DELETE /transports/{id}`, `/producers/{id}`, `/consumers/{id}` |
//!
//! Non-2xx responses become [`EngineError::Status`]. A 404 on `DELETE` is
//! treated as already closed.

use super::{
    ConsumerInfo, EngineError, MediaEngine, ProducerInfo, RouterInfo, RtpCodecCapability,
    TransportParams, WebRtcTransportOptions,
};
use crate::types::{ConsumerId, MediaKind, ProducerId, RouterId, TransportId, WorkerId};

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, instrument, warn};

/// Connect timeout for engine requests in seconds.
const ENGINE_CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Deserialize)]
struct WorkerResponse {
    id: WorkerId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateRouterRequest<'a> {
    media_codecs: &'a [RtpCodecCapability],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConnectRequest<'a> {
    dtls_parameters: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProduceRequest<'a> {
    kind: MediaKind,
    rtp_parameters: &'a Value,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConsumeRequest<'a> {
    producer_id: &'a ProducerId,
    rtp_capabilities: &'a Value,
    paused: bool,
}

/// Media engine reached over HTTP.
#[derive(Clone)]
pub struct HttpMediaEngine {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
}

impl HttpMediaEngine {
    /// Create a new engine client.
    ///
    /// `request_timeout` of `None` leaves engine calls unbounded.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Request` if the HTTP client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<SecretString>,
        request_timeout: Option<Duration>,
    ) -> Result<Self, EngineError> {
        let mut builder =
            Client::builder().connect_timeout(Duration::from_secs(ENGINE_CONNECT_TIMEOUT_SECS));
        if let Some(timeout) = request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| {
            error!(target: "sfu.engine", error = %e, "Failed to build HTTP client");
            EngineError::Request(e.to_string())
        })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base_url, path);
        let builder = self.client.request(method, url);
        match &self.token {
            Some(token) => builder.bearer_auth(token.expose_secret()),
            None => builder,
        }
    }

    async fn execute(
        &self,
        path: &str,
        builder: RequestBuilder,
    ) -> Result<Response, EngineError> {
        let response = builder.send().await.map_err(|e| {
            warn!(target: "sfu.engine", path, error = %e, "Engine request failed");
            EngineError::Request(e.to_string())
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        warn!(
            target: "sfu.engine",
            path,
            status = %status,
            body = %message,
            "Engine returned error status"
        );
        Err(EngineError::Status {
            status: status.as_u16(),
            message,
        })
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, EngineError>
    where
        B: Serialize + Sync + ?Sized,
        R: DeserializeOwned,
    {
        let builder = self.request(Method::POST, path).json(body);
        let response = self.execute(path, builder).await?;
        response.json().await.map_err(|e| {
            warn!(target: "sfu.engine", path, error = %e, "Failed to parse engine response");
            EngineError::Decode(e.to_string())
        })
    }

    async fn post_no_content<B>(&self, path: &str, body: &B) -> Result<(), EngineError>
    where
        B: Serialize + Sync + ?Sized,
    {
        let builder = self.request(Method::POST, path).json(body);
        self.execute(path, builder).await.map(|_| ())
    }

    async fn delete(&self, path: &str) -> Result<(), EngineError> {
        let builder = self.request(Method::DELETE, path);
        match self.execute(path, builder).await {
            Ok(_) => Ok(()),
            Err(EngineError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl MediaEngine for HttpMediaEngine {
    #[instrument(skip_all, name = "engine.create_worker")]
    async fn create_worker(&self) -> Result<WorkerId, EngineError> {
        let response: WorkerResponse = self.post("/workers", &json!({})).await?;
        Ok(response.id)
    }

    #[instrument(skip_all, name = "engine.create_router", fields(worker_id = %worker_id))]
    async fn create_router(
        &self,
        worker_id: &WorkerId,
        media_codecs: &[RtpCodecCapability],
    ) -> Result<RouterInfo, EngineError> {
        let body = CreateRouterRequest { media_codecs };
        self.post(&format!("/workers/{worker_id}/routers"), &body)
            .await
    }

    #[instrument(skip_all, name = "engine.create_transport", fields(router_id = %router_id))]
    async fn create_webrtc_transport(
        &self,
        router_id: &RouterId,
        options: &WebRtcTransportOptions,
    ) -> Result<TransportParams, EngineError> {
        self.post(&format!("/routers/{router_id}/webrtc-transports"), options)
            .await
    }

    #[instrument(skip_all, name = "engine.connect_transport", fields(transport_id = %transport_id))]
    async fn connect_transport(
        &self,
        transport_id: &TransportId,
        dtls_parameters: &Value,
    ) -> Result<(), EngineError> {
        let body = ConnectRequest { dtls_parameters };
        self.post_no_content(&format!("/transports/{transport_id}/connect"), &body)
            .await
    }

    #[instrument(
        skip_all,
        name = "engine.produce",
        fields(transport_id = %transport_id, kind = %kind)
    )]
    async fn produce(
        &self,
        transport_id: &TransportId,
        kind: MediaKind,
        rtp_parameters: &Value,
    ) -> Result<ProducerInfo, EngineError> {
        let body = ProduceRequest {
            kind,
            rtp_parameters,
        };
        self.post(&format!("/transports/{transport_id}/producers"), &body)
            .await
    }

    #[instrument(
        skip_all,
        name = "engine.consume",
        fields(transport_id = %transport_id, producer_id = %producer_id)
    )]
    async fn consume(
        &self,
        transport_id: &TransportId,
        producer_id: &ProducerId,
        rtp_capabilities: &Value,
        paused: bool,
    ) -> Result<ConsumerInfo, EngineError> {
        let body = ConsumeRequest {
            producer_id,
            rtp_capabilities,
            paused,
        };
        self.post(&format!("/transports/{transport_id}/consumers"), &body)
            .await
    }

    #[instrument(skip_all, name = "engine.resume_consumer", fields(consumer_id = %consumer_id))]
    async fn resume_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError> {
        self.post_no_content(&format!("/consumers/{consumer_id}/resume"), &json!({}))
            .await
    }

    async fn close_transport(&self, transport_id: &TransportId) -> Result<(), EngineError> {
        self.delete(&format!("/transports/{transport_id}")).await
    }

    async fn close_producer(&self, producer_id: &ProducerId) -> Result<(), EngineError> {
        self.delete(&format!("/producers/{producer_id}")).await
    }

    async fn close_consumer(&self, consumer_id: &ConsumerId) -> Result<(), EngineError> {
        self.delete(&format!("/consumers/{consumer_id}")).await
    }
}
