//! Signaling server configuration.
//!
//! Configuration is loaded from environment variables. The media engine
//! token and the engine webhook token are redacted in Debug output.

use crate::engine::{ListenIp, WebRtcTransportOptions};

use secrecy::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP/WebSocket bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3000";

/// Default address WebRTC transports listen on.
pub const DEFAULT_LISTEN_IP: &str = "0.0.0.0";

/// Default per-peer mailbox capacity.
pub const DEFAULT_PEER_MAILBOX_SIZE: usize = 64;

/// Default time allowed for closing sessions on shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 5;

/// Signaling server configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP/WebSocket bind address (default: "0.0.0.0:3000").
    pub bind_address: SocketAddr,

    /// Base URL of the media engine control API.
    pub media_engine_url: String,

    /// Bearer token for the media engine control API.
    pub media_engine_token: Option<SecretString>,

    /// Per-request timeout for engine calls. `None` waits indefinitely.
    pub media_engine_request_timeout: Option<Duration>,

    /// Bearer token the engine presents on `POST /engine/events`. The
    /// webhook route is not served without it.
    pub engine_webhook_token: Option<SecretString>,

    /// Address WebRTC transports bind to.
    pub listen_ip: IpAddr,

    /// Public address advertised in ICE candidates, if different.
    pub announced_ip: Option<String>,

    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub prefer_udp: bool,

    /// Inbound frames buffered per peer before the reader waits.
    pub peer_mailbox_size: usize,

    /// Upper bound on session teardown during shutdown.
    pub shutdown_grace_period: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("media_engine_url", &self.media_engine_url)
            .field(
                "media_engine_token",
                &self.media_engine_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field(
                "media_engine_request_timeout",
                &self.media_engine_request_timeout,
            )
            .field(
                "engine_webhook_token",
                &self.engine_webhook_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("listen_ip", &self.listen_ip)
            .field("announced_ip", &self.announced_ip)
            .field("enable_udp", &self.enable_udp)
            .field("enable_tcp", &self.enable_tcp)
            .field("prefer_udp", &self.prefer_udp)
            .field("peer_mailbox_size", &self.peer_mailbox_size)
            .field("shutdown_grace_period", &self.shutdown_grace_period)
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}"))),
        None => Ok(default),
    }
}

/// Parse a variable, falling back to a textual default.
fn parse_or<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: &str,
) -> Result<T, ConfigError> {
    let raw = vars.get(name).map_or(default, String::as_str);
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue(format!("{name}={raw}")))
}

fn parse_bool(
    vars: &HashMap<String, String>,
    name: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(name).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if matches!(v.as_str(), "true" | "1" | "yes") => Ok(true),
        Some(v) if matches!(v.as_str(), "false" | "0" | "no") => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!("{name}={v}"))),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// `MissingEnvVar` if `MEDIA_ENGINE_URL` is unset, `InvalidValue` for
    /// any value that does not parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let media_engine_url = vars
            .get("MEDIA_ENGINE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("MEDIA_ENGINE_URL".to_string()))?
            .trim()
            .to_string();

        let media_engine_token = vars
            .get("MEDIA_ENGINE_TOKEN")
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.clone()));

        let engine_webhook_token = vars
            .get("SFU_ENGINE_WEBHOOK_TOKEN")
            .filter(|v| !v.is_empty())
            .map(|v| SecretString::from(v.clone()));

        let bind_address: SocketAddr = parse_or(vars, "SFU_BIND_ADDRESS", DEFAULT_BIND_ADDRESS)?;

        let media_engine_request_timeout = match vars.get("MEDIA_ENGINE_REQUEST_TIMEOUT_SECONDS") {
            Some(raw) => {
                let seconds: u64 = raw.trim().parse().map_err(|_| {
                    ConfigError::InvalidValue(format!(
                        "MEDIA_ENGINE_REQUEST_TIMEOUT_SECONDS={raw}"
                    ))
                })?;
                // Zero disables the timeout
                (seconds > 0).then(|| Duration::from_secs(seconds))
            }
            None => None,
        };

        let listen_ip: IpAddr = parse_or(vars, "SFU_LISTEN_IP", DEFAULT_LISTEN_IP)?;

        let announced_ip = vars
            .get("SFU_ANNOUNCED_IP")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());

        let enable_udp = parse_bool(vars, "SFU_ENABLE_UDP", true)?;
        let enable_tcp = parse_bool(vars, "SFU_ENABLE_TCP", true)?;
        let prefer_udp = parse_bool(vars, "SFU_PREFER_UDP", true)?;
        if !enable_udp && !enable_tcp {
            return Err(ConfigError::InvalidValue(
                "at least one of SFU_ENABLE_UDP and SFU_ENABLE_TCP must be true".to_string(),
            ));
        }

        let peer_mailbox_size =
            parse_var(vars, "SFU_PEER_MAILBOX_SIZE", DEFAULT_PEER_MAILBOX_SIZE)?;
        if peer_mailbox_size == 0 {
            return Err(ConfigError::InvalidValue(
                "SFU_PEER_MAILBOX_SIZE must be greater than zero".to_string(),
            ));
        }

        let shutdown_grace_period = Duration::from_secs(parse_var(
            vars,
            "SFU_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?);

        Ok(Self {
            bind_address,
            media_engine_url,
            media_engine_token,
            media_engine_request_timeout,
            engine_webhook_token,
            listen_ip,
            announced_ip,
            enable_udp,
            enable_tcp,
            prefer_udp,
            peer_mailbox_size,
            shutdown_grace_period,
        })
    }

    /// Transport options every WebRTC transport is created with.
    #[must_use]
    pub fn transport_options(&self) -> WebRtcTransportOptions {
        WebRtcTransportOptions {
            listen_ips: vec![ListenIp {
                ip: self.listen_ip,
                announced_ip: self.announced_ip.clone(),
            }],
            enable_udp: self.enable_udp,
            enable_tcp: self.enable_tcp,
            prefer_udp: self.prefer_udp,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "MEDIA_ENGINE_URL".to_string(),
            "http://engine:4000".to_string(),
        )])
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert_eq!(config.bind_address.to_string(), DEFAULT_BIND_ADDRESS);
        assert_eq!(config.listen_ip.to_string(), DEFAULT_LISTEN_IP);
        assert_eq!(config.media_engine_url, "http://engine:4000");
        assert!(config.media_engine_token.is_none());
        assert!(config.media_engine_request_timeout.is_none());
        assert!(config.engine_webhook_token.is_none());
        assert!(config.announced_ip.is_none());
        assert!(config.enable_udp && config.enable_tcp && config.prefer_udp);
        assert_eq!(config.peer_mailbox_size, DEFAULT_PEER_MAILBOX_SIZE);
        assert_eq!(
            config.shutdown_grace_period,
            Duration::from_secs(DEFAULT_SHUTDOWN_GRACE_SECONDS)
        );
    }

    #[test]
    fn test_missing_engine_url() {
        let err = Config::from_vars(&HashMap::new()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::MissingEnvVar("MEDIA_ENGINE_URL".to_string())
        );
    }

    #[test]
    fn test_overrides() {
        let mut vars = base_vars();
        vars.insert("SFU_BIND_ADDRESS".to_string(), "127.0.0.1:8443".to_string());
        vars.insert("MEDIA_ENGINE_TOKEN".to_string(), "s3cret".to_string());
        vars.insert(
            "MEDIA_ENGINE_REQUEST_TIMEOUT_SECONDS".to_string(),
            "15".to_string(),
        );
        vars.insert("SFU_LISTEN_IP".to_string(), "10.0.0.5".to_string());
        vars.insert("SFU_ANNOUNCED_IP".to_string(), "203.0.113.9".to_string());
        vars.insert("SFU_ENABLE_TCP".to_string(), "false".to_string());
        vars.insert("SFU_PEER_MAILBOX_SIZE".to_string(), "8".to_string());
        vars.insert("SFU_ENGINE_WEBHOOK_TOKEN".to_string(), "hook".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(config.bind_address.port(), 8443);
        assert_eq!(
            config.media_engine_token.as_ref().unwrap().expose_secret(),
            "s3cret"
        );
        assert_eq!(
            config.media_engine_request_timeout,
            Some(Duration::from_secs(15))
        );
        assert!(!config.enable_tcp);
        assert_eq!(config.peer_mailbox_size, 8);
        assert_eq!(
            config.engine_webhook_token.as_ref().unwrap().expose_secret(),
            "hook"
        );

        let options = config.transport_options();
        assert_eq!(options.listen_ips.len(), 1);
        assert_eq!(
            options.listen_ips.first().unwrap().announced_ip.as_deref(),
            Some("203.0.113.9")
        );
        assert!(!options.enable_tcp);
    }

    #[test]
    fn test_zero_timeout_disables_timeout() {
        let mut vars = base_vars();
        vars.insert(
            "MEDIA_ENGINE_REQUEST_TIMEOUT_SECONDS".to_string(),
            "0".to_string(),
        );
        let config = Config::from_vars(&vars).unwrap();
        assert!(config.media_engine_request_timeout.is_none());
    }

    #[test]
    fn test_invalid_values() {
        for (name, value) in [
            ("SFU_BIND_ADDRESS", "not-an-address"),
            ("SFU_LISTEN_IP", "999.1.1.1"),
            ("SFU_ENABLE_UDP", "maybe"),
            ("SFU_PEER_MAILBOX_SIZE", "-3"),
            ("SFU_PEER_MAILBOX_SIZE", "0"),
            ("MEDIA_ENGINE_REQUEST_TIMEOUT_SECONDS", "soon"),
            ("SFU_SHUTDOWN_GRACE_SECONDS", "1.5"),
        ] {
            let mut vars = base_vars();
            vars.insert(name.to_string(), value.to_string());
            assert!(
                matches!(Config::from_vars(&vars), Err(ConfigError::InvalidValue(_))),
                "{name}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_udp_and_tcp_cannot_both_be_disabled() {
        let mut vars = base_vars();
        vars.insert("SFU_ENABLE_UDP".to_string(), "0".to_string());
        vars.insert("SFU_ENABLE_TCP".to_string(), "no".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_token() {
        let mut vars = base_vars();
        vars.insert("MEDIA_ENGINE_TOKEN".to_string(), "super-secret".to_string());
        vars.insert("SFU_ENGINE_WEBHOOK_TOKEN".to_string(), "hook-secret".to_string());
        let config = Config::from_vars(&vars).unwrap();

        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("hook-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
