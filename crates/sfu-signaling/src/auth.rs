//! Bearer-token check for the engine webhook.
//!
//! The media engine authenticates `POST /engine/events` with a shared secret:
//!
//! ```text
//! Authorization: Bearer <SFU_ENGINE_WEBHOOK_TOKEN>
//! ```
//!
//! The presented token is compared in constant time through
//! `ring::hmac::verify` against a tag of the configured token computed under
//! a per-process random key.

use crate::errors::SfuError;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use ring::{hmac, rand};
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Verifier for the engine webhook token.
pub struct WebhookAuth {
    key: hmac::Key,
    expected_tag: Vec<u8>,
}

impl fmt::Debug for WebhookAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebhookAuth").finish_non_exhaustive()
    }
}

impl WebhookAuth {
    /// # Errors
    ///
    /// `Internal` if the system random source fails.
    pub fn new(token: &SecretString) -> Result<Self, SfuError> {
        let rng = rand::SystemRandom::new();
        let key = hmac::Key::generate(hmac::HMAC_SHA256, &rng)
            .map_err(|_| SfuError::Internal("Failed to generate webhook key".to_string()))?;
        let expected_tag = hmac::sign(&key, token.expose_secret().as_bytes())
            .as_ref()
            .to_vec();

        Ok(Self { key, expected_tag })
    }

    /// Whether `presented` matches the configured token.
    #[must_use]
    pub fn verify(&self, presented: &str) -> bool {
        hmac::verify(&self.key, presented.as_bytes(), &self.expected_tag).is_ok()
    }
}

fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

fn unauthorized() -> Response {
    (StatusCode::UNAUTHORIZED, [(header::WWW_AUTHENTICATE, "Bearer")]).into_response()
}

/// Reject webhook requests without the configured bearer token.
///
/// Runs before the body is read, so an unauthenticated request never
/// reaches the event hub.
#[instrument(skip_all, name = "sfu.server.webhook_auth")]
pub async fn require_webhook_token(
    State(auth): State<Arc<WebhookAuth>>,
    req: Request,
    next: Next,
) -> Response {
    let authorized = match bearer_token(&req) {
        Some(token) => auth.verify(token),
        None => {
            debug!(target: "sfu.server", "Missing webhook bearer token");
            false
        }
    };

    if !authorized {
        debug!(target: "sfu.server", "Rejected engine webhook request");
        return unauthorized();
    }

    next.run(req).await
}
