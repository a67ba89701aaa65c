//! # SFU Test Utilities
//!
//! Shared test utilities for the SFU signaling coordinator.
//!
//! This crate provides:
//! - Server test harness (`TestSfuServer`, real router on a random port)
//! - WebSocket test client (`TestPeer`)
//! - RTP/DTLS payload fixtures
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sfu_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> Result<(), anyhow::Error> {
//!     let server = TestSfuServer::spawn(Arc::new(MockMediaEngine::new())).await?;
//!     let mut alice = TestPeer::connect(&server.ws_url()).await?;
//!
//!     let transport_id = alice.create_transport().await?;
//!     let producer_id = alice.produce(&transport_id, "audio").await?;
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod server_harness;
pub mod ws_client;

// Re-export commonly used items
pub use fixtures::*;
pub use server_harness::*;
pub use sfu_signaling::engine::mock::MockMediaEngine;
pub use ws_client::*;
