//! Signaling error types.
//!
//! Every error maps to a stable wire `code` sent back to the client in an
//! `error` reply. Engine and internal details are logged server-side but not
//! exposed to clients.

use thiserror::Error;

/// Signaling coordinator error type.
///
/// Wire codes:
/// - `Protocol`: `ProtocolError`
/// - `UnknownAction`: `UnknownAction`
/// - `NotFound`: `NotFound`
/// - `DuplicateResource`, `DuplicateIdentity`: same name
/// - `InvalidState`: `InvalidState`
/// - `SessionClosed`: `SessionClosed`
/// - `Busy`: `Busy`
/// - `Engine`: `EngineError`
/// - `Internal`: `InternalError`
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SfuError {
    /// Malformed inbound message (not an object, missing action, bad data).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Action name is not part of the protocol.
    #[error("Unknown action: {0}")]
    UnknownAction(String),

    /// Resource, peer or producer absent (or owned by another peer).
    #[error("Not found: {0}")]
    NotFound(String),

    /// A resource with the same id is already registered.
    #[error("Duplicate resource: {0}")]
    DuplicateResource(String),

    /// A session with the same peer id is already registered.
    #[error("Duplicate identity: {0}")]
    DuplicateIdentity(String),

    /// Operation against a resource in the wrong state (e.g. Closed).
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// The peer session is closing or closed.
    #[error("Session closed")]
    SessionClosed,

    /// The peer's mailbox is full; the frame was not processed.
    #[error("Busy: {0}")]
    Busy(String),

    /// Opaque failure surfaced by the media engine.
    #[error("Engine error: {0}")]
    Engine(String),

    /// Internal error (channel failures and the like).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SfuError {
    /// Returns the wire error code for this error.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            SfuError::Protocol(_) => "ProtocolError",
            SfuError::UnknownAction(_) => "UnknownAction",
            SfuError::NotFound(_) => "NotFound",
            SfuError::DuplicateResource(_) => "DuplicateResource",
            SfuError::DuplicateIdentity(_) => "DuplicateIdentity",
            SfuError::InvalidState(_) => "InvalidState",
            SfuError::SessionClosed => "SessionClosed",
            SfuError::Busy(_) => "Busy",
            SfuError::Engine(_) => "EngineError",
            SfuError::Internal(_) => "InternalError",
        }
    }

    /// Returns a client-safe error message (no engine or internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SfuError::Engine(_) => "Media engine request failed".to_string(),
            SfuError::Internal(_) => "An internal error occurred".to_string(),
            SfuError::SessionClosed => "Session is closed".to_string(),
            SfuError::Protocol(msg)
            | SfuError::UnknownAction(msg)
            | SfuError::NotFound(msg)
            | SfuError::DuplicateResource(msg)
            | SfuError::DuplicateIdentity(msg)
            | SfuError::InvalidState(msg)
            | SfuError::Busy(msg) => msg.clone(),
        }
    }

    /// Bounded label for the `status` metric dimension.
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            SfuError::Protocol(_) => "protocol_error",
            SfuError::UnknownAction(_) => "unknown_action",
            SfuError::NotFound(_) => "not_found",
            SfuError::DuplicateResource(_) | SfuError::DuplicateIdentity(_) => "duplicate",
            SfuError::InvalidState(_) => "invalid_state",
            SfuError::SessionClosed => "session_closed",
            SfuError::Busy(_) => "busy",
            SfuError::Engine(_) => "engine_error",
            SfuError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(SfuError::Protocol("x".into()).error_code(), "ProtocolError");
        assert_eq!(
            SfuError::UnknownAction("fly".into()).error_code(),
            "UnknownAction"
        );
        assert_eq!(SfuError::NotFound("t1".into()).error_code(), "NotFound");
        assert_eq!(
            SfuError::DuplicateResource("t1".into()).error_code(),
            "DuplicateResource"
        );
        assert_eq!(
            SfuError::DuplicateIdentity("p1".into()).error_code(),
            "DuplicateIdentity"
        );
        assert_eq!(
            SfuError::InvalidState("closed".into()).error_code(),
            "InvalidState"
        );
        assert_eq!(SfuError::SessionClosed.error_code(), "SessionClosed");
        assert_eq!(SfuError::Busy("full".into()).error_code(), "Busy");
        assert_eq!(SfuError::Engine("boom".into()).error_code(), "EngineError");
        assert_eq!(
            SfuError::Internal("chan".into()).error_code(),
            "InternalError"
        );
    }

    #[test]
    fn test_client_messages_hide_engine_details() {
        let engine_err = SfuError::Engine("500 from http://10.0.0.7:4000/workers".to_string());
        assert!(!engine_err.client_message().contains("10.0.0.7"));
        assert_eq!(engine_err.client_message(), "Media engine request failed");

        let internal = SfuError::Internal("channel send failed: closed".to_string());
        assert_eq!(internal.client_message(), "An internal error occurred");
    }

    #[test]
    fn test_client_message_passes_validation_details() {
        let err = SfuError::NotFound("Transport not found".to_string());
        assert_eq!(err.client_message(), "Transport not found");
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", SfuError::Engine("timeout".to_string())),
            "Engine error: timeout"
        );
        assert_eq!(format!("{}", SfuError::SessionClosed), "Session closed");
    }
}
