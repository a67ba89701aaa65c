//! Per-peer actor.
//!
//! Each connection gets one [`PeerActor`] that owns the inbound side of the
//! peer: frames are queued in its mailbox and handed to the dispatcher one
//! at a time, so a peer's actions never interleave.
//!
//! ```text
//! WebSocket reader --text--> PeerActor mailbox --> Dispatcher --> PeerSession
//!                                                       |
//! WebSocket writer <------ outbound channel <-----------+
//! ```

pub mod metrics;
pub mod peer;

pub use metrics::{MailboxLevel, MailboxMonitor};
pub use peer::{PeerActor, PeerActorHandle, PeerMessage};
