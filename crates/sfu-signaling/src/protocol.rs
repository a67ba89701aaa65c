//! Client wire protocol.
//!
//! Every frame is a JSON text message `{"action": <name>, "data": <payload>}`.
//! Inbound frames are decoded in two steps: the envelope first, so the
//! action name is known even when its payload is bad, then the payload into
//! a typed [`ClientRequest`]. Unknown payload fields are rejected.

use crate::engine::TransportParams;
use crate::errors::SfuError;
use crate::types::{ConsumerId, MediaKind, PeerId, ProducerId, TransportId};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Actions a client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    GetRouterRtpCapabilities,
    CreateTransport,
    ConnectTransport,
    Produce,
    Consume,
}

impl Action {
    /// Look up an action by wire name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "getRouterRtpCapabilities" => Some(Action::GetRouterRtpCapabilities),
            "createTransport" => Some(Action::CreateTransport),
            "connectTransport" => Some(Action::ConnectTransport),
            "produce" => Some(Action::Produce),
            "consume" => Some(Action::Consume),
            _ => None,
        }
    }

    /// Wire name, also used as a metric label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Action::GetRouterRtpCapabilities => "getRouterRtpCapabilities",
            Action::CreateTransport => "createTransport",
            Action::ConnectTransport => "connectTransport",
            Action::Produce => "produce",
            Action::Consume => "consume",
        }
    }
}

/// Undecoded inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub action: String,
    pub data: Value,
}

/// `connectTransport` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConnectTransportRequest {
    pub transport_id: TransportId,
    pub dtls_parameters: Value,
}

/// `produce` payload.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProduceRequest {
    pub transport_id: TransportId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// `consume` payload.
///
/// `producer_peer_id` stays a string: an id that is not a UUID simply names
/// no connected peer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConsumeRequest {
    pub transport_id: TransportId,
    pub producer_peer_id: String,
    pub producer_id: ProducerId,
    pub rtp_capabilities: Value,
}

/// Decoded client action.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    GetRouterRtpCapabilities,
    CreateTransport,
    ConnectTransport(ConnectTransportRequest),
    Produce(ProduceRequest),
    Consume(ConsumeRequest),
}

impl ClientRequest {
    #[must_use]
    pub const fn action(&self) -> Action {
        match self {
            ClientRequest::GetRouterRtpCapabilities => Action::GetRouterRtpCapabilities,
            ClientRequest::CreateTransport => Action::CreateTransport,
            ClientRequest::ConnectTransport(_) => Action::ConnectTransport,
            ClientRequest::Produce(_) => Action::Produce,
            ClientRequest::Consume(_) => Action::Consume,
        }
    }
}

/// Decode the `{action, data}` envelope.
///
/// # Errors
///
/// `Protocol` if the frame is not a JSON object or `action` is not a string.
pub fn parse_envelope(text: &str) -> Result<Envelope, SfuError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| SfuError::Protocol(format!("Invalid JSON: {e}")))?;

    let Value::Object(mut object) = value else {
        return Err(SfuError::Protocol(
            "Message must be a JSON object".to_string(),
        ));
    };

    let action = match object.remove("action") {
        Some(Value::String(action)) => action,
        Some(_) => {
            return Err(SfuError::Protocol("Field 'action' must be a string".to_string()))
        }
        None => return Err(SfuError::Protocol("Missing field 'action'".to_string())),
    };

    Ok(Envelope {
        action,
        data: object.remove("data").unwrap_or(Value::Null),
    })
}

impl Envelope {
    /// Decode the payload for this envelope's action.
    ///
    /// Actions without a payload accept a missing, `null` or empty-object
    /// `data`.
    ///
    /// # Errors
    ///
    /// `UnknownAction` for names outside the protocol, `Protocol` when the
    /// payload does not match the action.
    pub fn into_request(self) -> Result<ClientRequest, SfuError> {
        let action = Action::from_name(&self.action)
            .ok_or_else(|| SfuError::UnknownAction(self.action.clone()))?;

        match action {
            Action::GetRouterRtpCapabilities => {
                expect_no_data(&self.data)?;
                Ok(ClientRequest::GetRouterRtpCapabilities)
            }
            Action::CreateTransport => {
                expect_no_data(&self.data)?;
                Ok(ClientRequest::CreateTransport)
            }
            Action::ConnectTransport => {
                decode(action, self.data).map(ClientRequest::ConnectTransport)
            }
            Action::Produce => decode(action, self.data).map(ClientRequest::Produce),
            Action::Consume => decode(action, self.data).map(ClientRequest::Consume),
        }
    }
}

fn expect_no_data(data: &Value) -> Result<(), SfuError> {
    match data {
        Value::Null => Ok(()),
        Value::Object(fields) if fields.is_empty() => Ok(()),
        _ => Err(SfuError::Protocol("Action takes no data".to_string())),
    }
}

fn decode<T: DeserializeOwned>(action: Action, data: Value) -> Result<T, SfuError> {
    serde_json::from_value(data)
        .map_err(|e| SfuError::Protocol(format!("Invalid data for {}: {e}", action.as_str())))
}

/// `consumed` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumedResponse {
    pub id: ConsumerId,
    pub producer_id: ProducerId,
    pub kind: MediaKind,
    pub rtp_parameters: Value,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    /// Action that failed; `null` when the frame had no readable action.
    pub action: Option<String>,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    #[must_use]
    pub fn new(action: Option<String>, error: &SfuError) -> Self {
        Self {
            action,
            code: error.error_code().to_string(),
            message: error.client_message(),
        }
    }
}

/// Outbound frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "action",
    content = "data",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Identity assigned on connect.
    PeerId(PeerId),
    RouterRtpCapabilities(Value),
    TransportCreated(TransportParams),
    Produced { id: ProducerId },
    Consumed(ConsumedResponse),
    /// A consumer was closed by the engine (its producer went away).
    ConsumerClosed {
        consumer_id: ConsumerId,
        producer_id: ProducerId,
    },
    Error(ErrorResponse),
}

impl ServerMessage {
    /// Encode as a text frame.
    ///
    /// # Errors
    ///
    /// `Internal` if serialization fails.
    pub fn to_text(&self) -> Result<String, SfuError> {
        serde_json::to_string(self)
            .map_err(|e| SfuError::Internal(format!("Failed to encode message: {e}")))
    }
}
