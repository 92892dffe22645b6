//! Chain subscription and host discovery.
//!
//! On startup the subscriber pulls block updates in batches of 1000 from
//! the stored tip until caught up, committing hosts and tip per batch in
//! one transaction. Once drained it follows the chain source's event
//! stream, buffering streamed blocks and committing at least every three
//! seconds. A reorg (or a lagging stream) sends it back to the catch-up
//! loop: it resumes from its own committed tip and trusts the chain
//! source to reapply.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, InfraError, Result};
use crate::filters::subnets::{is_local, split_host_port};
use crate::ports::chain::{BlockUpdate, ChainEvent, ChainSource, HostAnnouncement};
use crate::ports::resolver::NetResolver;
use crate::ports::store::HostPersistence;
use crate::ports::syncer::Syncer;
use crate::scheduler::Scheduler;
use crate::store::HostStore;
use crate::types::primitives::HostKey;
use crate::types::{ChainTip, Host};

/// Blocks pulled per catch-up request.
const CATCH_UP_BATCH: usize = 1_000;

/// Streamed blocks are committed at least this often.
const STREAM_COMMIT_INTERVAL: Duration = Duration::from_secs(3);

/// Pause before retrying after a chain or database error.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Why the follow loop returned.
enum FollowExit {
    Cancelled,
    Resync,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN SUBSCRIBER
// ═══════════════════════════════════════════════════════════════════════════════

/// Drives one network's host discovery off its chain source.
pub struct ChainSubscriber<P> {
    chain: Arc<dyn ChainSource>,
    store: Arc<HostStore<P>>,
    scheduler: Arc<Scheduler<P>>,
    syncer: Arc<dyn Syncer>,
    resolver: Arc<dyn NetResolver>,
}

impl<P> std::fmt::Debug for ChainSubscriber<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSubscriber").finish_non_exhaustive()
    }
}

impl<P> ChainSubscriber<P>
where
    P: HostPersistence + Send + Sync + 'static,
{
    /// Wire a subscriber to its network's components.
    #[must_use]
    pub fn new(
        chain: Arc<dyn ChainSource>,
        store: Arc<HostStore<P>>,
        scheduler: Arc<Scheduler<P>>,
        syncer: Arc<dyn Syncer>,
        resolver: Arc<dyn NetResolver>,
    ) -> Self {
        Self {
            chain,
            store,
            scheduler,
            syncer,
            resolver,
        }
    }

    /// Run until cancelled: catch up, follow the stream, resync on reorg.
    #[instrument(skip(self, token), fields(network = %self.store.network()))]
    pub async fn run(&self, token: CancellationToken) {
        loop {
            if token.is_cancelled() {
                return;
            }
            match self.catch_up(&token).await {
                Ok(()) => {}
                Err(e) if e.is_cancellation() => return,
                Err(e) => {
                    warn!(error = %e, "Chain catch-up failed, retrying");
                    tokio::select! {
                        () = token.cancelled() => return,
                        () = sleep(RETRY_DELAY) => continue,
                    }
                }
            }

            match self.follow(&token).await {
                Ok(FollowExit::Cancelled) => return,
                Ok(FollowExit::Resync) => {}
                Err(e) if e.is_cancellation() => return,
                Err(e) => {
                    warn!(error = %e, "Chain stream failed, resyncing");
                    tokio::select! {
                        () = token.cancelled() => return,
                        () = sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }
    }

    /// Pull batches from the stored tip until the source reports no more.
    async fn catch_up(&self, token: &CancellationToken) -> Result<()> {
        loop {
            if token.is_cancelled() {
                return Err(AppError::ShutdownRequested);
            }
            let tip = self.store.tip().await?;
            let updates = self.chain.updates_since(tip.as_ref(), CATCH_UP_BATCH).await?;
            if updates.is_empty() {
                info!(
                    height = tip.map_or(0, |t| t.height),
                    "Chain caught up"
                );
                return Ok(());
            }
            self.apply(updates).await?;
        }
    }

    /// Follow streamed tip events, committing buffered blocks on a timer.
    async fn follow(&self, token: &CancellationToken) -> Result<FollowExit> {
        let mut events = self.chain.subscribe();
        let mut pending: Vec<BlockUpdate> = Vec::new();
        let mut flush = tokio::time::interval(STREAM_COMMIT_INTERVAL);
        flush.tick().await;

        loop {
            tokio::select! {
                () = token.cancelled() => {
                    // Flush what we have; shutdown must not lose blocks.
                    if !pending.is_empty() {
                        if let Err(e) = self.apply(std::mem::take(&mut pending)).await {
                            warn!(error = %e, "Failed to flush pending blocks on shutdown");
                        }
                    }
                    return Ok(FollowExit::Cancelled);
                }
                _ = flush.tick() => {
                    if !pending.is_empty() {
                        self.apply(std::mem::take(&mut pending)).await?;
                    }
                }
                event = events.recv() => match event {
                    Ok(ChainEvent::Applied(update)) => pending.push(update),
                    Ok(ChainEvent::Reorged { tip }) => {
                        // Buffered blocks may sit on the losing fork.
                        pending.clear();
                        info!(height = tip.height, "Reorg observed, resyncing from stored tip");
                        return Ok(FollowExit::Resync);
                    }
                    Err(RecvError::Lagged(missed)) => {
                        debug!(missed, "Chain stream lagged, resyncing");
                        if !pending.is_empty() {
                            self.apply(std::mem::take(&mut pending)).await?;
                        }
                        return Ok(FollowExit::Resync);
                    }
                    Err(RecvError::Closed) => {
                        return Err(
                            InfraError::Rpc("chain event stream closed".into()).into()
                        );
                    }
                },
            }
        }
    }

    /// Stage every parseable announcement of a batch, commit hosts and tip
    /// in one transaction, and enqueue the discovered hosts when synced.
    async fn apply(&self, updates: Vec<BlockUpdate>) -> Result<()> {
        let Some(last) = updates.last() else {
            return Ok(());
        };
        let tip = ChainTip {
            network: self.store.network(),
            height: last.height,
            block_id: last.block_id,
        };

        let mut staged: Vec<Host> = Vec::new();
        let mut index: HashMap<HostKey, usize> = HashMap::new();
        for block in &updates {
            // Unusable announcements are skipped without a trace.
            let valid: Vec<&HostAnnouncement> = block
                .announcements
                .iter()
                .filter(|announcement| valid_announcement(announcement))
                .collect();
            // Resolve the block's announcements concurrently; a slow zone
            // must not stall the whole batch.
            let resolutions = join_all(
                valid
                    .iter()
                    .map(|announcement| self.resolve(announcement)),
            )
            .await;
            for (announcement, resolved) in valid.into_iter().zip(resolutions) {
                let host = self
                    .store
                    .stage_announcement(announcement, block.height, block.timestamp, &resolved)
                    .await;
                match index.get(&host.public_key) {
                    Some(&at) => staged[at] = host,
                    None => {
                        index.insert(host.public_key, staged.len());
                        staged.push(host);
                    }
                }
            }
        }

        let announced = staged.len();
        let committed = self.store.commit_chain(staged, tip).await?;
        debug!(
            height = tip.height,
            blocks = updates.len(),
            announced,
            "Committed chain batch"
        );

        if announced > 0 && self.syncer.is_synced().await {
            for host in &committed {
                if host.blocked {
                    continue;
                }
                if let Err(e) = self.scheduler.queue_scan(host.public_key).await {
                    debug!(host = %host.public_key, error = %e, "Failed to enqueue discovered host");
                }
            }
        }
        Ok(())
    }

    async fn resolve(&self, announcement: &HostAnnouncement) -> Vec<IpAddr> {
        match self.resolver.resolve(&announcement.net_address).await {
            Ok(ips) => ips,
            Err(e) => {
                debug!(
                    address = %announcement.net_address,
                    error = %e,
                    "Announcement resolution failed"
                );
                Vec::new()
            }
        }
    }
}

/// Whether an announcement carries a usable, non-local net address.
fn valid_announcement(announcement: &HostAnnouncement) -> bool {
    let Some((host, port)) = split_host_port(&announcement.net_address) else {
        return false;
    };
    if host.is_empty() || port == 0 {
        return false;
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_local(ip) {
            return false;
        }
    }
    if announcement.v2 && announcement.siamux_addresses.is_empty() {
        return false;
    }
    true
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::primitives::HostKey;

    fn announcement(net_address: &str) -> HostAnnouncement {
        HostAnnouncement {
            public_key: HostKey::new([1; 32]),
            net_address: net_address.into(),
            siamux_addresses: Vec::new(),
            v2: false,
        }
    }

    #[test]
    fn public_addresses_are_accepted() {
        assert!(valid_announcement(&announcement("1.2.3.4:9982")));
        assert!(valid_announcement(&announcement("host.example.com:9982")));
    }

    #[test]
    fn local_and_malformed_addresses_are_rejected() {
        for bad in [
            "127.0.0.1:9982",
            "10.0.0.1:9982",
            "192.168.1.5:9982",
            "[::1]:9982",
            "no-port",
            ":9982",
            "1.2.3.4:0",
        ] {
            assert!(!valid_announcement(&announcement(bad)), "{bad}");
        }
    }

    #[test]
    fn v2_announcement_needs_siamux_addresses() {
        let mut ann = announcement("1.2.3.4:9982");
        ann.v2 = true;
        assert!(!valid_announcement(&ann));
        ann.siamux_addresses = vec!["1.2.3.4:9983".into()];
        assert!(valid_announcement(&ann));
    }
}
