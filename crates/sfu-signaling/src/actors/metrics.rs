//! Peer mailbox depth monitoring.
//!
//! | Level | Depth |
//! |-------|-------|
//! | Normal | <= 16 |
//! | Warning | 17-48 |
//! | Critical | > 48 |

use crate::types::PeerId;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, warn};

/// Depth up to which a peer mailbox is considered healthy.
pub const PEER_MAILBOX_NORMAL: usize = 16;
/// Depth above which a peer mailbox is critical.
pub const PEER_MAILBOX_WARNING: usize = 48;

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

impl MailboxLevel {
    #[must_use]
    pub const fn for_depth(depth: usize) -> Self {
        if depth > PEER_MAILBOX_WARNING {
            MailboxLevel::Critical
        } else if depth > PEER_MAILBOX_NORMAL {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Queue depth tracking for one peer's mailbox.
///
/// Shared between the handle (enqueue) and the actor (dequeue).
#[derive(Debug)]
pub struct MailboxMonitor {
    peer_id: PeerId,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(peer_id: PeerId) -> Self {
        Self {
            peer_id,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a frame entering the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        match MailboxLevel::for_depth(new_depth) {
            MailboxLevel::Critical => warn!(
                target: "sfu.peer",
                peer_id = %self.peer_id,
                depth = new_depth,
                threshold = PEER_MAILBOX_WARNING,
                "Peer mailbox depth critical"
            ),
            // Log once when crossing into the warning band
            MailboxLevel::Warning if new_depth == PEER_MAILBOX_NORMAL + 1 => debug!(
                target: "sfu.peer",
                peer_id = %self.peer_id,
                depth = new_depth,
                "Peer mailbox depth elevated"
            ),
            _ => {}
        }
    }

    /// Undo an enqueue whose send was refused.
    pub fn record_rejected(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
    }

    /// Record a frame leaving the mailbox after processing.
    pub fn record_dequeue(&self) {
        // Saturate so a dequeue without a matching enqueue cannot wrap
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        MailboxLevel::for_depth(self.current_depth())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_levels() {
        assert_eq!(MailboxLevel::for_depth(0), MailboxLevel::Normal);
        assert_eq!(MailboxLevel::for_depth(16), MailboxLevel::Normal);
        assert_eq!(MailboxLevel::for_depth(17), MailboxLevel::Warning);
        assert_eq!(MailboxLevel::for_depth(48), MailboxLevel::Warning);
        assert_eq!(MailboxLevel::for_depth(49), MailboxLevel::Critical);
    }

    #[test]
    fn test_enqueue_dequeue_tracks_depth_and_peak() {
        let monitor = MailboxMonitor::new(PeerId::new());

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);

        monitor.record_dequeue();
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 1);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 2);
    }

    #[test]
    fn test_rejected_enqueue_is_not_counted_as_processed() {
        let monitor = MailboxMonitor::new(PeerId::new());
        monitor.record_enqueue();
        monitor.record_rejected();

        assert_eq!(monitor.current_depth(), 0);
        assert_eq!(monitor.messages_processed(), 0);
    }

    #[test]
    fn test_dequeue_on_empty_mailbox_saturates() {
        let monitor = MailboxMonitor::new(PeerId::new());
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_critical_level() {
        let monitor = MailboxMonitor::new(PeerId::new());
        for _ in 0..=PEER_MAILBOX_WARNING {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }
}
