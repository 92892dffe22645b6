//! Port for the peer syncer.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Peers that must report synced before a network counts as synced.
pub const MIN_SYNCED_PEERS: usize = 5;

/// One connected peer and its sync state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    /// The peer's address.
    pub address: String,
    /// Whether the peer reports itself synced.
    pub synced: bool,
}

/// Port for the peer syncer of one network.
#[async_trait]
pub trait Syncer: Send + Sync {
    /// Currently connected peers.
    ///
    /// # Errors
    /// Returns an error if the syncer is unreachable.
    async fn peers(&self) -> Result<Vec<Peer>>;

    /// Whether the network counts as synced: at least
    /// [`MIN_SYNCED_PEERS`] peers report synced.
    async fn is_synced(&self) -> bool {
        self.peers()
            .await
            .map(|peers| peers.iter().filter(|p| p.synced).count() >= MIN_SYNCED_PEERS)
            .unwrap_or(false)
    }

    /// Whether the process has any network peers at all. Failures observed
    /// while peerless are not charged to the host.
    async fn has_peers(&self) -> bool {
        self.peers().await.map(|peers| !peers.is_empty()).unwrap_or(false)
    }
}
