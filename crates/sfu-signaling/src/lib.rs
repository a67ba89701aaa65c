//! SFU Signaling Coordinator Library
//!
//! Signaling layer of a selective forwarding unit. Clients connect over
//! WebSocket and negotiate WebRTC transports, producers and consumers; the
//! media itself is handled by an external media engine that this crate drives
//! through the [`engine::MediaEngine`] trait.
//!
//! # Architecture
//!
//! ```text
//! WebSocket connection (server)
//! ├── writer task (drains the session's outbound channel)
//! └── PeerActor (one per connection, sequential action processing)
//!     └── Dispatcher
//!         ├── PeerSession (state machine + ResourceRegistry)
//!         ├── SessionDirectory (peer id -> session, shared)
//!         └── EngineClient (worker + router, shared)
//! ```
//!
//! Engine closure events arrive on `POST /engine/events`, authenticated with
//! a shared bearer token, and are fanned out to affected sessions by the
//! [`events`] forwarder.
//!
//! # Key Design Decisions
//!
//! - **No global state**: the directory is owned and injected into the dispatcher
//! - **Errors never close a connection**: every failure becomes an `error` reply
//! - **Consumers start paused**: `consumed` is sent only after the engine resumed it
//! - **Teardown is best-effort**: close failures are logged and counted
//!
//! # Modules
//!
//! - [`actors`] - Per-connection actor and mailbox monitoring
//! - [`auth`] - Engine webhook token check
//! - [`config`] - Service configuration from environment
//! - [`dispatcher`] - Action routing and reply handling
//! - [`engine`] - Media engine abstraction, HTTP adapter and mock
//! - [`errors`] - Error types with wire codes
//! - [`protocol`] - Client wire messages

pub mod actors;
pub mod auth;
pub mod config;
pub mod directory;
pub mod dispatcher;
pub mod engine;
pub mod errors;
pub mod events;
pub mod observability;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod types;
