//! The pull-based update feed consumed by the portal.
//!
//! At-least-once delivery: a batch stays pending, with the same random ID,
//! until the consumer finalizes it. Only finalization advances the rows'
//! `fetched` timestamps, so a consumer crash between receive and finalize
//! causes redelivery rather than loss.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::host_store::HostStore;
use crate::error::Result;
use crate::ports::store::{FeedPersistence, HostPersistence};
use crate::types::primitives::BatchId;
use crate::types::{FeedHost, UpdateBatch};

/// Most rows of each kind per batch.
const BATCH_LIMIT: i64 = 1_000;

/// Row IDs of a delivered but unacknowledged batch.
#[derive(Debug, Clone)]
struct PendingBatch {
    batch: UpdateBatch,
    host_ids: Vec<i64>,
    scan_ids: Vec<i64>,
    benchmark_ids: Vec<i64>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// UPDATE FEED
// ═══════════════════════════════════════════════════════════════════════════════

/// The acknowledged delta feed over all networks of this store.
#[derive(Debug)]
pub struct UpdateFeed<P> {
    persistence: Arc<P>,
    stores: Vec<Arc<HostStore<P>>>,
    pending: Mutex<Option<PendingBatch>>,
}

impl<P> UpdateFeed<P>
where
    P: HostPersistence + FeedPersistence,
{
    /// Create a feed over the shared persistence and the per-network
    /// stores (used to augment host rows with collision counts and cached
    /// locations).
    #[must_use]
    pub fn new(persistence: Arc<P>, stores: Vec<Arc<HostStore<P>>>) -> Self {
        Self {
            persistence,
            stores,
            pending: Mutex::new(None),
        }
    }

    /// The current batch of changed rows.
    ///
    /// While a batch is pending it is redelivered unchanged, same ID;
    /// a fresh batch with a fresh random ID is built only after the
    /// previous one was finalized.
    ///
    /// # Errors
    /// Returns an error if the delta queries fail.
    #[instrument(skip(self))]
    pub async fn recent_updates(&self) -> Result<UpdateBatch> {
        let mut pending = self.pending.lock().await;
        if let Some(existing) = pending.as_ref() {
            debug!(id = %existing.batch.id, "Redelivering pending batch");
            return Ok(existing.batch.clone());
        }

        let hosts = self.persistence.dirty_hosts(BATCH_LIMIT).await?;
        let host_ids: Vec<i64> = hosts.iter().map(|h| h.id).collect();
        let scans = self.persistence.dirty_scans(&host_ids, BATCH_LIMIT).await?;
        let benchmarks = self
            .persistence
            .dirty_benchmarks(&host_ids, BATCH_LIMIT)
            .await?;

        let mut feed_hosts = Vec::with_capacity(hosts.len());
        for host in hosts {
            let store = self.stores.iter().find(|s| s.network() == host.network);
            let active_hosts = match store {
                Some(store) => {
                    store
                        .active_hosts_in_subnet(&host.ip_nets, Some(host.public_key))
                        .await
                }
                None => 0,
            };
            let location = match store {
                Some(store) => store.location(host.public_key).await?,
                None => None,
            };
            feed_hosts.push(FeedHost {
                host,
                active_hosts,
                location,
            });
        }

        let batch = UpdateBatch {
            id: BatchId::random(),
            hosts: feed_hosts,
            scans,
            benchmarks,
        };

        if !batch.is_empty() {
            let scan_ids = batch.scans.iter().map(|s| s.id).collect();
            let benchmark_ids = batch.benchmarks.iter().map(|b| b.id).collect();
            *pending = Some(PendingBatch {
                batch: batch.clone(),
                host_ids,
                scan_ids,
                benchmark_ids,
            });
            debug!(
                id = %batch.id,
                hosts = batch.hosts.len(),
                scans = batch.scans.len(),
                benchmarks = batch.benchmarks.len(),
                "Built update batch"
            );
        }
        Ok(batch)
    }

    /// Acknowledge a delivered batch. An unknown or stale ID is ignored.
    ///
    /// # Errors
    /// Returns an error if persisting the acknowledgement fails; the batch
    /// stays pending in that case.
    #[instrument(skip(self), fields(id = %id))]
    pub async fn finalize(&self, id: BatchId) -> Result<bool> {
        let mut pending = self.pending.lock().await;
        let Some(current) = pending.as_ref() else {
            debug!("No pending batch to finalize");
            return Ok(false);
        };
        if current.batch.id != id {
            debug!(pending = %current.batch.id, "Stale finalize ignored");
            return Ok(false);
        }

        self.persistence
            .mark_fetched(
                &current.host_ids,
                &current.scan_ids,
                &current.benchmark_ids,
                Utc::now(),
            )
            .await?;
        info!(
            hosts = current.host_ids.len(),
            scans = current.scan_ids.len(),
            benchmarks = current.benchmark_ids.len(),
            "Finalized update batch"
        );
        *pending = None;
        Ok(true)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use parking_lot::RwLock;

    use super::*;
    use crate::filters::domains::BlockedDomains;
    use crate::filters::gouging::SharedPriceLimits;
    use crate::store::memory::MemoryPersistence;
    use crate::types::host::HostScan;
    use crate::types::primitives::{HostKey, Network};
    use crate::types::Host;

    fn fixture() -> (Arc<HostStore<MemoryPersistence>>, UpdateFeed<MemoryPersistence>) {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = Arc::new(HostStore::new(
            Network::Mainnet,
            "eu-test",
            Arc::clone(&persistence),
            Arc::new(RwLock::new(BlockedDomains::default())),
            SharedPriceLimits::default(),
        ));
        let feed = UpdateFeed::new(persistence, vec![Arc::clone(&store)]);
        (store, feed)
    }

    fn announced(byte: u8) -> Host {
        Host::announced(
            Network::Mainnet,
            HostKey::new([byte; 32]),
            format!("host-{byte}.example:9982"),
            false,
            Utc::now(),
            1_000,
        )
    }

    #[tokio::test]
    async fn feed_round_trip_drains_rows() {
        let (store, feed) = fixture();
        store.update(announced(1)).await.unwrap();
        store.update(announced(2)).await.unwrap();

        // Back-to-back calls redeliver the same batch under the same ID.
        let first = feed.recent_updates().await.unwrap();
        assert_eq!(first.hosts.len(), 2);
        let second = feed.recent_updates().await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.hosts.len(), 2);

        assert!(feed.finalize(first.id).await.unwrap());

        let third = feed.recent_updates().await.unwrap();
        assert!(third.is_empty());
    }

    #[tokio::test]
    async fn unfinalized_rows_reappear() {
        let (store, feed) = fixture();
        store.update(announced(1)).await.unwrap();

        let batch = feed.recent_updates().await.unwrap();
        assert_eq!(batch.hosts.len(), 1);

        // Consumer crashed: no finalize. The same row comes back.
        let again = feed.recent_updates().await.unwrap();
        assert_eq!(again.hosts.len(), 1);
        assert_eq!(again.id, batch.id);
    }

    #[tokio::test]
    async fn stale_finalize_is_ignored() {
        let (store, feed) = fixture();
        store.update(announced(1)).await.unwrap();

        let batch = feed.recent_updates().await.unwrap();
        assert!(!feed.finalize(BatchId::random()).await.unwrap());

        // Correct ID still drains.
        assert!(feed.finalize(batch.id).await.unwrap());
        assert!(feed.recent_updates().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scans_of_batched_hosts_are_excluded() {
        let (store, feed) = fixture();
        let host = store.update(announced(1)).await.unwrap();
        store
            .append_scan(
                HostScan {
                    id: 0,
                    network: host.network,
                    node: "eu-test".into(),
                    public_key: host.public_key,
                    timestamp: Utc::now(),
                    success: true,
                    latency_ms: Some(12.0),
                    error: None,
                    settings: None,
                },
                true,
            )
            .await
            .unwrap();

        let batch = feed.recent_updates().await.unwrap();
        // The host row is in the batch, so its scan must not be duplicated.
        assert_eq!(batch.hosts.len(), 1);
        assert!(batch.scans.is_empty());

        feed.finalize(batch.id).await.unwrap();

        // The excluded scan row was not acknowledged with the batch; once
        // its host row is clean it surfaces on its own.
        let batch = feed.recent_updates().await.unwrap();
        assert!(batch.hosts.is_empty());
        assert_eq!(batch.scans.len(), 1);
    }

    #[tokio::test]
    async fn writes_after_delivery_surface_in_the_next_batch() {
        let (store, feed) = fixture();
        store.update(announced(1)).await.unwrap();

        let first = feed.recent_updates().await.unwrap();
        store.update(announced(2)).await.unwrap();
        feed.finalize(first.id).await.unwrap();

        let second = feed.recent_updates().await.unwrap();
        assert_eq!(second.hosts.len(), 1);
        assert_eq!(
            second.hosts[0].host.public_key,
            HostKey::new([2; 32])
        );
    }
}
