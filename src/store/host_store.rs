//! The host store: durable, transactional home for hosts and their probe
//! history, plus the authoritative in-memory map.
//!
//! The store exclusively owns host mutation. Workers read a snapshot,
//! perform their I/O, and submit a single result record back; the store
//! persists first and mirrors into the map only on success, under one
//! coarse async mutex that linearizes every write of the network.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use moka::sync::Cache as MokaCache;
use parking_lot::RwLock;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use super::registry::HostRegistry;
use crate::error::{DomainError, Result};
use crate::filters::domains::BlockedDomains;
use crate::filters::gouging::SharedPriceLimits;
use crate::filters::subnets;
use crate::ports::chain::HostAnnouncement;
use crate::ports::geo::GeoLocation;
use crate::ports::store::HostPersistence;
use crate::score;
use crate::types::primitives::{HostKey, Network};
use crate::types::{ChainTip, Host, HostBenchmark, HostLocation, HostScan, PriceChange};

/// TTL of the cached failed-probe aggregates.
const FAILED_PROBE_TTL: Duration = Duration::from_secs(60);

/// Capacity of the failed-probe cache.
const FAILED_PROBE_CAPACITY: u64 = 100_000;

/// Upper bound on prune loop iterations per pass.
const MAX_PRUNE_ROUNDS: u32 = 1_000;

/// Which probe aggregate a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ProbeKind {
    Scan,
    Benchmark,
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// The host store of one network.
#[derive(Debug)]
pub struct HostStore<P> {
    network: Network,
    node: String,
    persistence: Arc<P>,
    registry: Mutex<HostRegistry>,
    blocked: Arc<RwLock<BlockedDomains>>,
    limits: SharedPriceLimits,
    failed_probes: MokaCache<(HostKey, ProbeKind), u64>,
}

impl<P> HostStore<P>
where
    P: HostPersistence,
{
    /// Create a store over a persistence backend.
    ///
    /// The blocked-domain set and the price limits are shared with the
    /// other networks' stores and the maintenance loops.
    #[must_use]
    pub fn new(
        network: Network,
        node: impl Into<String>,
        persistence: Arc<P>,
        blocked: Arc<RwLock<BlockedDomains>>,
        limits: SharedPriceLimits,
    ) -> Self {
        Self {
            network,
            node: node.into(),
            persistence,
            registry: Mutex::new(HostRegistry::new()),
            blocked,
            limits,
            failed_probes: MokaCache::builder()
                .max_capacity(FAILED_PROBE_CAPACITY)
                .time_to_live(FAILED_PROBE_TTL)
                .build(),
        }
    }

    /// The store's network.
    #[must_use]
    pub const fn network(&self) -> Network {
        self.network
    }

    /// The observing node's name, stamped onto scans and benchmarks.
    #[must_use]
    pub fn node(&self) -> &str {
        &self.node
    }

    /// The shared persistence backend.
    #[must_use]
    pub fn persistence(&self) -> &Arc<P> {
        &self.persistence
    }

    /// Load all hosts of this network into the in-memory map.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    #[instrument(skip(self), fields(network = %self.network))]
    pub async fn load(&self) -> Result<usize> {
        let hosts = self.persistence.load_hosts(self.network).await?;
        let mut registry = self.registry.lock().await;
        let count = hosts.len();
        for host in hosts {
            registry.upsert(host);
        }
        info!(hosts = count, "Loaded hosts into memory");
        Ok(count)
    }

    /// Snapshot one host.
    pub async fn host(&self, key: HostKey) -> Option<Host> {
        self.registry.lock().await.snapshot(&key)
    }

    /// Snapshot every host, for sweep passes.
    pub async fn hosts(&self) -> Vec<Host> {
        self.registry.lock().await.iter().cloned().collect()
    }

    /// Number of known hosts.
    pub async fn host_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Number of online hosts.
    pub async fn online_count(&self) -> usize {
        self.registry.lock().await.online()
    }

    /// Count the online hosts sharing any of the given subnets, excluding
    /// the asking host.
    pub async fn active_hosts_in_subnet(
        &self,
        ip_nets: &[String],
        exclude: Option<HostKey>,
    ) -> usize {
        self.registry.lock().await.active_in_subnets(ip_nets, exclude)
    }

    /// Upsert a host: recompute its score, persist, then mirror into the
    /// map and the active-subnet cache.
    ///
    /// # Errors
    /// Returns an error if persistence fails; the map is left untouched.
    #[instrument(skip(self, host), fields(network = %self.network, host = %host.public_key))]
    pub async fn update(&self, mut host: Host) -> Result<Host> {
        host.score = score::compute(&host, &self.limits.snapshot(), Utc::now());
        let mut registry = self.registry.lock().await;
        let id = self.persistence.upsert_host(&host).await?;
        host.id = id;
        registry.upsert(host.clone());
        Ok(host)
    }

    /// Refresh a host right before scanning it: decay interactions against
    /// the tip, replace `ip_nets` if resolution moved, and re-evaluate the
    /// blocked flag with the fresh addresses.
    ///
    /// # Errors
    /// Returns [`DomainError::HostNotFound`] for an unknown key, or a
    /// persistence error.
    pub async fn prepare_scan(
        &self,
        key: HostKey,
        tip_height: u64,
        resolved: &[IpAddr],
    ) -> Result<Host> {
        let mut host = self
            .host(key)
            .await
            .ok_or_else(|| DomainError::HostNotFound(key.to_hex()))?;

        host.decay_interactions(tip_height);

        let nets = subnets::ip_nets(resolved);
        if !nets.is_empty() && nets != host.ip_nets {
            host.ip_nets = nets;
            host.last_ip_change = Utc::now();
        }
        host.blocked = self
            .blocked
            .read()
            .is_blocked(&host.net_address, resolved);

        self.update(host).await
    }

    /// Append a scan: fold it into the aggregate, persist the scan row,
    /// journal a price change when the tracked fields moved, then upsert
    /// the host. Returns `None` for a replayed timestamp.
    ///
    /// `count_failure` is false while the process has no network peers, so
    /// connectivity problems on our side are not charged to the host.
    ///
    /// # Errors
    /// Returns an error if the host is unknown or persistence fails.
    #[instrument(skip(self, scan), fields(network = %self.network, host = %scan.public_key, success = scan.success))]
    pub async fn append_scan(&self, scan: HostScan, count_failure: bool) -> Result<Option<Host>> {
        let key = scan.public_key;
        let mut host = self
            .host(key)
            .await
            .ok_or_else(|| DomainError::HostNotFound(key.to_hex()))?;

        let fingerprint = host.price_fingerprint();
        let success = scan.success;
        let observed_at = scan.timestamp;
        if !host.apply_scan(scan.clone()) {
            debug!("Replayed scan dropped");
            return Ok(None);
        }
        if success {
            host.successes += 1.0;
        } else if count_failure {
            host.failures += 1.0;
        }

        self.persistence.insert_scan(&scan).await?;
        if success && host.price_fingerprint() != fingerprint {
            let change = PriceChange::observed(&host, observed_at);
            self.persistence.insert_price_change(&change).await?;
        }
        let host = self.update(host).await?;
        self.failed_probes.invalidate(&(key, ProbeKind::Scan));
        Ok(Some(host))
    }

    /// Append a benchmark, mirroring [`Self::append_scan`].
    ///
    /// # Errors
    /// Returns an error if the host is unknown or persistence fails.
    #[instrument(skip(self, benchmark), fields(network = %self.network, host = %benchmark.public_key, success = benchmark.success))]
    pub async fn append_benchmark(
        &self,
        benchmark: HostBenchmark,
        count_failure: bool,
    ) -> Result<Option<Host>> {
        let key = benchmark.public_key;
        let mut host = self
            .host(key)
            .await
            .ok_or_else(|| DomainError::HostNotFound(key.to_hex()))?;

        let success = benchmark.success;
        if !host.apply_benchmark(benchmark.clone()) {
            debug!("Replayed benchmark dropped");
            return Ok(None);
        }
        if success {
            host.successes += 1.0;
        } else if count_failure {
            host.failures += 1.0;
        }

        self.persistence.insert_benchmark(&benchmark).await?;
        let host = self.update(host).await?;
        self.failed_probes.invalidate(&(key, ProbeKind::Benchmark));
        Ok(Some(host))
    }

    /// Persist the revision of a freshly formed or refreshed benchmark
    /// contract. A revision from the wrong generation is rejected.
    ///
    /// # Errors
    /// Returns an error if the host is unknown, the generation mismatches,
    /// or persistence fails.
    pub async fn set_revision(
        &self,
        key: HostKey,
        revision: crate::types::StoredRevision,
    ) -> Result<()> {
        use crate::types::{HostProtocol, StoredRevision};

        let mut host = self
            .host(key)
            .await
            .ok_or_else(|| DomainError::HostNotFound(key.to_hex()))?;
        match (&mut host.protocol, revision) {
            (HostProtocol::V1 { revision, .. }, StoredRevision::V1(rev)) => {
                *revision = Some(rev);
            }
            (HostProtocol::V2 { revision, .. }, StoredRevision::V2(rev)) => {
                *revision = Some(rev);
            }
            _ => {
                return Err(DomainError::ProtocolViolation(
                    "contract revision generation does not match the host".into(),
                )
                .into());
            }
        }
        self.update(host).await?;
        Ok(())
    }

    /// Failed scans since the newest successful one, cached briefly so the
    /// queue sweep does not hammer the aggregate query.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn last_failed_scans(&self, key: HostKey) -> Result<u64> {
        if let Some(count) = self.failed_probes.get(&(key, ProbeKind::Scan)) {
            return Ok(count);
        }
        let count = self.persistence.last_failed_scans(self.network, key).await?;
        self.failed_probes.insert((key, ProbeKind::Scan), count);
        Ok(count)
    }

    /// Failed benchmarks since the newest successful one, cached briefly.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn last_failed_benchmarks(&self, key: HostKey) -> Result<u64> {
        if let Some(count) = self.failed_probes.get(&(key, ProbeKind::Benchmark)) {
            return Ok(count);
        }
        let count = self
            .persistence
            .last_failed_benchmarks(self.network, key)
            .await?;
        self.failed_probes.insert((key, ProbeKind::Benchmark), count);
        Ok(count)
    }

    // ── Chain ingestion ───────────────────────────────────────────────────────

    /// Build the updated host row for an announcement without persisting:
    /// the chain subscriber stages a whole batch, then commits it with the
    /// tip in one transaction.
    pub async fn stage_announcement(
        &self,
        announcement: &HostAnnouncement,
        height: u64,
        block_time: DateTime<Utc>,
        resolved: &[IpAddr],
    ) -> Host {
        let mut host = match self.host(announcement.public_key).await {
            Some(existing) => existing,
            None => Host::announced(
                self.network,
                announcement.public_key,
                announcement.net_address.clone(),
                announcement.v2,
                block_time,
                height,
            ),
        };

        host.net_address = announcement.net_address.clone();
        if announcement.v2 {
            host.siamux_addresses = announcement.siamux_addresses.clone();
            if !host.protocol.is_v2() {
                host.protocol = crate::types::HostProtocol::empty(true);
            }
        }

        let nets = subnets::ip_nets(resolved);
        if !nets.is_empty() && nets != host.ip_nets {
            host.ip_nets = nets;
            host.last_ip_change = block_time;
        }
        host.blocked = self
            .blocked
            .read()
            .is_blocked(&host.net_address, resolved);
        host.score = score::compute(&host, &self.limits.snapshot(), Utc::now());
        host
    }

    /// Commit a batch of staged host rows and the new tip in one
    /// transaction, then mirror into the map.
    ///
    /// # Errors
    /// Returns an error after the backend rolled back; nothing is mirrored
    /// and the subscriber retries from the stored tip.
    #[instrument(skip(self, hosts), fields(network = %self.network, hosts = hosts.len(), height = tip.height))]
    pub async fn commit_chain(&self, mut hosts: Vec<Host>, tip: ChainTip) -> Result<Vec<Host>> {
        let mut registry = self.registry.lock().await;
        let ids = self.persistence.commit_chain_batch(&hosts, tip).await?;
        for (host, id) in hosts.iter_mut().zip(ids) {
            host.id = id;
            registry.upsert(host.clone());
        }
        Ok(hosts)
    }

    /// The committed chain tip, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn tip(&self) -> Result<Option<ChainTip>> {
        self.persistence.tip(self.network).await
    }

    // ── Blocked domains ───────────────────────────────────────────────────────

    /// Whether an address is blocked under the current rules.
    #[must_use]
    pub fn is_blocked_address(&self, net_address: &str, resolved: &[IpAddr]) -> bool {
        self.blocked.read().is_blocked(net_address, resolved)
    }

    /// Replace the blocked-domain rules, persist them, and re-evaluate
    /// every host's blocked flag. Returns how many hosts flipped.
    ///
    /// # Errors
    /// Returns an error if persistence fails.
    #[instrument(skip(self, rules), fields(network = %self.network, rules = rules.len()))]
    pub async fn replace_blocked_domains(&self, rules: Vec<String>) -> Result<usize> {
        self.persistence.replace_blocked_domains(&rules).await?;
        self.blocked.write().replace(&rules);

        let hosts = self.hosts().await;
        let mut flipped = 0;
        for mut host in hosts {
            let blocked = self.is_blocked_address(&host.net_address, &[]);
            if blocked != host.blocked {
                host.blocked = blocked;
                self.update(host).await?;
                flipped += 1;
            }
        }
        if flipped > 0 {
            info!(flipped, "Blocked-domain update flipped hosts");
        }
        Ok(flipped)
    }

    // ── Geolocation ───────────────────────────────────────────────────────────

    /// Cache a freshly fetched location for a host.
    ///
    /// # Errors
    /// Returns an error if persistence fails.
    pub async fn cache_location(&self, key: HostKey, location: GeoLocation) -> Result<()> {
        let row = HostLocation {
            network: self.network,
            public_key: key,
            country: location.country,
            region: location.region,
            city: location.city,
            latitude: location.latitude,
            longitude: location.longitude,
            fetched_at: Utc::now(),
        };
        self.persistence.upsert_location(&row).await
    }

    /// A host's cached location, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    pub async fn location(&self, key: HostKey) -> Result<Option<HostLocation>> {
        self.persistence.location(self.network, key).await
    }

    // ── Pruning ───────────────────────────────────────────────────────────────

    /// Delete expired scans and benchmarks in bounded chunks until none
    /// remain. Returns the total rows deleted.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    #[instrument(skip(self), fields(network = %self.network))]
    pub async fn prune(
        &self,
        scan_max_age: Duration,
        benchmark_max_age: Duration,
        chunk: i64,
    ) -> Result<u64> {
        let now = Utc::now();
        let scan_cutoff = now - TimeDelta::from_std(scan_max_age).unwrap_or(TimeDelta::MAX);
        let benchmark_cutoff =
            now - TimeDelta::from_std(benchmark_max_age).unwrap_or(TimeDelta::MAX);

        let mut total = 0u64;
        for _ in 0..MAX_PRUNE_ROUNDS {
            let deleted = self
                .persistence
                .prune(self.network, scan_cutoff, benchmark_cutoff, chunk)
                .await?;
            total += deleted;
            if deleted == 0 {
                break;
            }
        }
        if total > 0 {
            debug!(deleted = total, "Pruned expired probe records");
        }
        Ok(total)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
