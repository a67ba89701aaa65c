//! Directory of live peer sessions.
//!
//! Owned explicitly by the dispatcher and shared by handle; there is no
//! global registry. Only fully constructed sessions are ever inserted.

use crate::errors::SfuError;
use crate::observability::metrics;
use crate::session::PeerSession;
use crate::types::PeerId;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Map from peer identity to session. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SessionDirectory {
    sessions: Arc<RwLock<HashMap<PeerId, Arc<PeerSession>>>>,
}

impl SessionDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session under its own id.
    ///
    /// # Errors
    ///
    /// `DuplicateIdentity` if a session with the same id is registered.
    pub async fn register(&self, session: Arc<PeerSession>) -> Result<(), SfuError> {
        let peer_id = session.id();
        let mut sessions = self.sessions.write().await;
        if sessions.contains_key(&peer_id) {
            return Err(SfuError::DuplicateIdentity(format!(
                "Peer {peer_id} already registered"
            )));
        }
        sessions.insert(peer_id, session);
        metrics::set_sessions_active(sessions.len());

        debug!(
            target: "sfu.directory",
            peer_id = %peer_id,
            sessions = sessions.len(),
            "Session registered"
        );
        Ok(())
    }

    /// # Errors
    ///
    /// `NotFound` if no session has this id.
    pub async fn lookup(&self, peer_id: &PeerId) -> Result<Arc<PeerSession>, SfuError> {
        self.sessions
            .read()
            .await
            .get(peer_id)
            .cloned()
            .ok_or_else(|| SfuError::NotFound(format!("Peer {peer_id} not found")))
    }

    /// Remove a session. No-op if absent.
    pub async fn unregister(&self, peer_id: &PeerId) {
        let mut sessions = self.sessions.write().await;
        if sessions.remove(peer_id).is_some() {
            metrics::set_sessions_active(sessions.len());
            debug!(
                target: "sfu.directory",
                peer_id = %peer_id,
                sessions = sessions.len(),
                "Session unregistered"
            );
        }
    }

    /// Snapshot of every registered session.
    pub async fn sessions(&self) -> Vec<Arc<PeerSession>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn session(id: PeerId) -> Arc<PeerSession> {
        let (tx, _rx) = mpsc::channel(1);
        Arc::new(PeerSession::new(id, tx))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let directory = SessionDirectory::new();
        let id = PeerId::new();
        directory.register(session(id)).await.unwrap();

        assert_eq!(directory.lookup(&id).await.unwrap().id(), id);
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_duplicate_identity_rejected() {
        let directory = SessionDirectory::new();
        let id = PeerId::new();
        directory.register(session(id)).await.unwrap();

        let err = directory.register(session(id)).await.unwrap_err();
        assert_eq!(err.error_code(), "DuplicateIdentity");
        assert_eq!(directory.len().await, 1);
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        let directory = SessionDirectory::new();
        let id = PeerId::new();
        directory.register(session(id)).await.unwrap();

        directory.unregister(&id).await;
        directory.unregister(&id).await;

        assert!(directory.is_empty().await);
        assert!(matches!(
            directory.lookup(&id).await,
            Err(SfuError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let directory = SessionDirectory::new();
        let other = directory.clone();
        directory.register(session(PeerId::new())).await.unwrap();
        assert_eq!(other.sessions().await.len(), 1);
    }
}
