//! Node assembly and lifecycle.
//!
//! A [`Node`] wires one store, scheduler and chain subscriber per observed
//! network over a shared persistence backend, plus the cross-network
//! pieces: the update feed, its HTTP surface, the price-limit maintainer
//! and the record pruner. Everything runs as a tokio task listening on one
//! cancellation token; `run` returns once every task has drained after
//! cancellation.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::api::{self, ApiState, NetworkHealth};
use crate::chain::ChainSubscriber;
use crate::config::Settings;
use crate::error::Result;
use crate::exchange::PriceLimitMaintainer;
use crate::filters::domains::BlockedDomains;
use crate::filters::gouging::SharedPriceLimits;
use crate::ports::chain::ChainSource;
use crate::ports::geo::GeoLocator;
use crate::ports::oracle::ExchangeRateSource;
use crate::ports::resolver::NetResolver;
use crate::ports::rhp::RhpClient;
use crate::ports::store::{FeedPersistence, HostPersistence};
use crate::ports::syncer::Syncer;
use crate::ports::wallet::Wallet;
use crate::scheduler::{Scheduler, WorkerContext};
use crate::store::{HostStore, UpdateFeed};
use crate::types::Network;

/// The external collaborators of one observed network.
pub struct NetworkAdapters {
    /// The network these adapters serve.
    pub network: Network,
    /// Chain daemon client.
    pub chain: Arc<dyn ChainSource>,
    /// Wallet daemon client.
    pub wallet: Arc<dyn Wallet>,
    /// Peer syncer client.
    pub syncer: Arc<dyn Syncer>,
    /// RHP transports.
    pub rhp: Arc<dyn RhpClient>,
}

impl std::fmt::Debug for NetworkAdapters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkAdapters")
            .field("network", &self.network)
            .finish_non_exhaustive()
    }
}

/// One observed network, fully wired.
pub struct NetworkStack<P> {
    /// The network's host store.
    pub store: Arc<HostStore<P>>,
    /// The network's scheduler.
    pub scheduler: Arc<Scheduler<P>>,
    /// The network's chain subscriber.
    pub subscriber: Arc<ChainSubscriber<P>>,
    /// The network's peer syncer, for the health report.
    pub syncer: Arc<dyn Syncer>,
}

impl<P> std::fmt::Debug for NetworkStack<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkStack").finish_non_exhaustive()
    }
}

/// The assembled observation node.
pub struct Node<P> {
    settings: Settings,
    stacks: Vec<NetworkStack<P>>,
    feed: Arc<UpdateFeed<P>>,
    limits: SharedPriceLimits,
    oracle: Arc<dyn ExchangeRateSource>,
}

impl<P> std::fmt::Debug for Node<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("networks", &self.stacks.len())
            .finish_non_exhaustive()
    }
}

impl<P> Node<P>
where
    P: HostPersistence + FeedPersistence + Send + Sync + 'static,
{
    /// Wire every component and load the persisted state into memory.
    ///
    /// # Errors
    /// Returns an error if the blocked domains or host maps cannot be
    /// loaded.
    pub async fn build(
        settings: Settings,
        persistence: Arc<P>,
        adapters: Vec<NetworkAdapters>,
        resolver: Arc<dyn NetResolver>,
        geo: Arc<dyn GeoLocator>,
        oracle: Arc<dyn ExchangeRateSource>,
    ) -> Result<Self> {
        let rules = persistence.load_blocked_domains().await?;
        let blocked = Arc::new(RwLock::new(BlockedDomains::new(&rules)));
        let limits = SharedPriceLimits::default();

        let mut stacks = Vec::with_capacity(adapters.len());
        for adapter in adapters {
            let store = Arc::new(HostStore::new(
                adapter.network,
                settings.node.name.clone(),
                Arc::clone(&persistence),
                Arc::clone(&blocked),
                limits.clone(),
            ));
            let loaded = store.load().await?;
            info!(network = %adapter.network, hosts = loaded, "Network store ready");

            let ctx = Arc::new(WorkerContext {
                store: Arc::clone(&store),
                rhp: Arc::clone(&adapter.rhp),
                chain: Arc::clone(&adapter.chain),
                wallet: Arc::clone(&adapter.wallet),
                syncer: Arc::clone(&adapter.syncer),
                resolver: Arc::clone(&resolver),
                geo: Arc::clone(&geo),
                limits: limits.clone(),
                settings: settings.scanner.clone(),
            });
            let scheduler = Arc::new(Scheduler::new(ctx));
            let subscriber = Arc::new(ChainSubscriber::new(
                adapter.chain,
                Arc::clone(&store),
                Arc::clone(&scheduler),
                Arc::clone(&adapter.syncer),
                Arc::clone(&resolver),
            ));
            stacks.push(NetworkStack {
                store,
                scheduler,
                subscriber,
                syncer: adapter.syncer,
            });
        }

        let stores = stacks.iter().map(|s| Arc::clone(&s.store)).collect();
        let feed = Arc::new(UpdateFeed::new(persistence, stores));

        Ok(Self {
            settings,
            stacks,
            feed,
            limits,
            oracle,
        })
    }

    /// The update feed, for embedding or tests.
    #[must_use]
    pub fn feed(&self) -> &Arc<UpdateFeed<P>> {
        &self.feed
    }

    /// The per-network stacks.
    #[must_use]
    pub fn stacks(&self) -> &[NetworkStack<P>] {
        &self.stacks
    }

    /// Run every loop until the token is cancelled, then drain.
    ///
    /// # Errors
    /// Returns an error if the feed listener cannot bind.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let mut tasks = JoinSet::new();

        // Limits first: a zeroed limit set would fail every gouging check.
        let maintainer = PriceLimitMaintainer::new(
            Arc::clone(&self.oracle),
            self.limits.clone(),
            self.settings.limits.clone(),
        );
        tasks.spawn(maintainer.run(token.clone()));

        for stack in &self.stacks {
            let subscriber = Arc::clone(&stack.subscriber);
            let sub_token = token.clone();
            tasks.spawn(async move { subscriber.run(sub_token).await });

            tasks.spawn(Scheduler::run(Arc::clone(&stack.scheduler), token.clone()));

            let scheduler = Arc::clone(&stack.scheduler);
            let sweep_interval = self.settings.scanner.sweep_interval();
            let sweep_token = token.clone();
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        () = sweep_token.cancelled() => return,
                        () = sleep(sweep_interval) => {}
                    }
                    if let Err(e) = scheduler.sweep().await {
                        warn!(error = %e, "Queue sweep failed");
                    }
                }
            });

            let store = Arc::clone(&stack.store);
            let prune = self.settings.prune.clone();
            let prune_token = token.clone();
            tasks.spawn(async move {
                loop {
                    tokio::select! {
                        () = prune_token.cancelled() => return,
                        () = sleep(prune.interval()) => {}
                    }
                    match store
                        .prune(prune.scan_max_age(), prune.benchmark_max_age(), prune.chunk)
                        .await
                    {
                        Ok(deleted) if deleted > 0 => {
                            info!(network = %store.network(), deleted, "Pruned probe records");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "Prune pass failed"),
                    }
                }
            });
        }

        let state = Arc::new(ApiState {
            feed: Arc::clone(&self.feed),
            networks: self
                .stacks
                .iter()
                .map(|stack| NetworkHealth {
                    store: Arc::clone(&stack.store),
                    syncer: Arc::clone(&stack.syncer),
                })
                .collect(),
        });
        let listen = self.settings.portal.listen.clone();
        let api_token = token.clone();
        let fatal = token.clone();
        tasks.spawn(async move {
            if let Err(e) = api::serve(state, &listen, api_token).await {
                error!(error = %e, "Feed listener failed");
                fatal.cancel();
            }
        });

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if !e.is_cancelled() {
                    warn!(error = %e, "Task ended abnormally");
                }
            }
        }
        info!("Node stopped");
        Ok(())
    }
}
