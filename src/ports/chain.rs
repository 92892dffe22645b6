//! Port for the blockchain client.
//!
//! A [`ChainSource`] instance is scoped to a single network. The core pulls
//! batches of block updates until caught up, then follows the event stream;
//! on a reorg it resumes from the tip committed in its own store and trusts
//! the chain source to reapply.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::types::primitives::{BlockId, Currency, HostKey};
use crate::types::ChainTip;

/// An opaque transaction as understood by the chain client and the wallet.
/// The core shuttles these between the wallet (funding, signing), the RHP
/// contract formation RPC, and the transaction pool without interpreting
/// them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainTransaction(pub serde_json::Value);

/// A host announcement parsed out of a block: a v1 arbitrary-data entry or
/// a v2 attestation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostAnnouncement {
    /// The announcing host's public key.
    pub public_key: HostKey,
    /// Announced network address (`host:port`).
    pub net_address: String,
    /// Announced siamux addresses (v2 announcements only).
    pub siamux_addresses: Vec<String>,
    /// Whether this is a v2 attestation.
    pub v2: bool,
}

/// One applied block with the announcements it carried.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockUpdate {
    /// Block height.
    pub height: u64,
    /// Block identifier.
    pub block_id: BlockId,
    /// Block timestamp.
    pub timestamp: DateTime<Utc>,
    /// Announcements parsed from the block, possibly empty.
    pub announcements: Vec<HostAnnouncement>,
}

/// Streamed chain notifications once the catch-up loop has drained.
#[derive(Debug, Clone)]
pub enum ChainEvent {
    /// A block was applied at the tip.
    Applied(BlockUpdate),
    /// The chain reorganized; resume pulling from the stored tip.
    Reorged {
        /// The new chain tip after the reorg.
        tip: ChainTip,
    },
}

/// Port for the blockchain client of one network.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// The chain's current tip.
    ///
    /// # Errors
    /// Returns an error if the chain client is unreachable.
    async fn tip_state(&self) -> Result<ChainTip>;

    /// Block updates after `tip`, up to `max` blocks. An empty result means
    /// the core is caught up.
    ///
    /// # Errors
    /// Returns an error if the chain client is unreachable or the tip is
    /// unknown (deep reorg); the caller restarts from its stored tip.
    async fn updates_since(&self, tip: Option<&ChainTip>, max: usize) -> Result<Vec<BlockUpdate>>;

    /// Subscribe to streamed tip updates and reorg notifications.
    fn subscribe(&self) -> broadcast::Receiver<ChainEvent>;

    /// The recommended transaction fee per byte.
    ///
    /// # Errors
    /// Returns an error if the chain client is unreachable.
    async fn recommended_fee(&self) -> Result<Currency>;

    /// Transactions currently in the pool.
    ///
    /// # Errors
    /// Returns an error if the chain client is unreachable.
    async fn pool_transactions(&self) -> Result<Vec<ChainTransaction>>;

    /// Broadcast a transaction set (e.g. a funded contract formation).
    ///
    /// # Errors
    /// Returns an error if the set is rejected or the client unreachable.
    async fn broadcast_transaction_set(&self, txns: Vec<ChainTransaction>) -> Result<()>;
}
