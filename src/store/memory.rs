//! In-memory implementation of the persistence ports.
//!
//! Backs tests and ephemeral runs without a database. Row IDs are dense
//! and ascending like the PostgreSQL backend's, and the `modified`/
//! `fetched` bookkeeping matches it, so the update feed behaves
//! identically over either backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use crate::error::Result;
use crate::ports::store::{FeedPersistence, HostPersistence};
use crate::types::primitives::HostKey;
use crate::types::{
    ChainTip, Host, HostBenchmark, HostLocation, HostScan, Network, PriceChange,
};

#[derive(Debug, Clone)]
struct Tracked<T> {
    row: T,
    modified: DateTime<Utc>,
    fetched: DateTime<Utc>,
}

impl<T> Tracked<T> {
    fn new(row: T) -> Self {
        Self {
            row,
            modified: Utc::now(),
            fetched: epoch(),
        }
    }

    fn dirty(&self) -> bool {
        self.modified > self.fetched
    }
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(0, 0).single().unwrap_or_default()
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    hosts: HashMap<(Network, HostKey), Tracked<Host>>,
    scans: Vec<Tracked<HostScan>>,
    benchmarks: Vec<Tracked<HostBenchmark>>,
    price_changes: Vec<PriceChange>,
    tips: HashMap<Network, ChainTip>,
    domains: Vec<String>,
    locations: HashMap<(Network, HostKey), HostLocation>,
}

impl Inner {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn upsert_host(&mut self, host: &Host) -> i64 {
        let key = (host.network, host.public_key);
        let id = self
            .hosts
            .get(&key)
            .map(|t| t.row.id)
            .filter(|&id| id != 0)
            .unwrap_or_else(|| self.next_id());
        let mut row = host.clone();
        row.id = id;
        let fetched = self.hosts.get(&key).map_or_else(epoch, |t| t.fetched);
        self.hosts.insert(
            key,
            Tracked {
                row,
                modified: Utc::now(),
                fetched,
            },
        );
        id
    }
}

/// In-memory persistence for tests and ephemeral runs.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    inner: Mutex<Inner>,
}

impl MemoryPersistence {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All appended price-journal rows, for assertions.
    #[must_use]
    pub fn price_changes(&self) -> Vec<PriceChange> {
        self.inner.lock().price_changes.clone()
    }

    /// Total persisted scan rows, for assertions.
    #[must_use]
    pub fn scan_count(&self) -> usize {
        self.inner.lock().scans.len()
    }

    /// Total persisted benchmark rows, for assertions.
    #[must_use]
    pub fn benchmark_count(&self) -> usize {
        self.inner.lock().benchmarks.len()
    }
}

#[async_trait]
impl HostPersistence for MemoryPersistence {
    async fn load_hosts(&self, network: Network) -> Result<Vec<Host>> {
        let inner = self.inner.lock();
        Ok(inner
            .hosts
            .values()
            .filter(|t| t.row.network == network)
            .map(|t| t.row.clone())
            .collect())
    }

    async fn upsert_host(&self, host: &Host) -> Result<i64> {
        Ok(self.inner.lock().upsert_host(host))
    }

    async fn commit_chain_batch(&self, hosts: &[Host], tip: ChainTip) -> Result<Vec<i64>> {
        let mut inner = self.inner.lock();
        let ids = hosts.iter().map(|h| inner.upsert_host(h)).collect();
        inner.tips.insert(tip.network, tip);
        Ok(ids)
    }

    async fn insert_scan(&self, scan: &HostScan) -> Result<i64> {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        let mut row = scan.clone();
        row.id = id;
        inner.scans.push(Tracked::new(row));
        Ok(id)
    }

    async fn insert_benchmark(&self, benchmark: &HostBenchmark) -> Result<i64> {
        let mut inner = self.inner.lock();
        let id = inner.next_id();
        let mut row = benchmark.clone();
        row.id = id;
        inner.benchmarks.push(Tracked::new(row));
        Ok(id)
    }

    async fn insert_price_change(&self, change: &PriceChange) -> Result<()> {
        self.inner.lock().price_changes.push(change.clone());
        Ok(())
    }

    async fn tip(&self, network: Network) -> Result<Option<ChainTip>> {
        Ok(self.inner.lock().tips.get(&network).copied())
    }

    async fn last_failed_scans(&self, network: Network, host: HostKey) -> Result<u64> {
        let inner = self.inner.lock();
        let newest_success = inner
            .scans
            .iter()
            .filter(|t| {
                t.row.network == network && t.row.public_key == host && t.row.success
            })
            .map(|t| t.row.timestamp)
            .max();
        let count = inner
            .scans
            .iter()
            .filter(|t| t.row.network == network && t.row.public_key == host && !t.row.success)
            .filter(|t| newest_success.is_none_or(|at| t.row.timestamp > at))
            .count();
        Ok(count as u64)
    }

    async fn last_failed_benchmarks(&self, network: Network, host: HostKey) -> Result<u64> {
        let inner = self.inner.lock();
        let newest_success = inner
            .benchmarks
            .iter()
            .filter(|t| {
                t.row.network == network && t.row.public_key == host && t.row.success
            })
            .map(|t| t.row.timestamp)
            .max();
        let count = inner
            .benchmarks
            .iter()
            .filter(|t| t.row.network == network && t.row.public_key == host && !t.row.success)
            .filter(|t| newest_success.is_none_or(|at| t.row.timestamp > at))
            .count();
        Ok(count as u64)
    }

    async fn load_blocked_domains(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().domains.clone())
    }

    async fn replace_blocked_domains(&self, domains: &[String]) -> Result<()> {
        self.inner.lock().domains = domains.to_vec();
        Ok(())
    }

    async fn upsert_location(&self, location: &HostLocation) -> Result<()> {
        self.inner
            .lock()
            .locations
            .insert((location.network, location.public_key), location.clone());
        Ok(())
    }

    async fn location(&self, network: Network, host: HostKey) -> Result<Option<HostLocation>> {
        Ok(self.inner.lock().locations.get(&(network, host)).cloned())
    }

    async fn prune(
        &self,
        network: Network,
        scan_cutoff: DateTime<Utc>,
        benchmark_cutoff: DateTime<Utc>,
        chunk: i64,
    ) -> Result<u64> {
        let mut inner = self.inner.lock();
        let mut deleted = 0u64;
        let mut budget = usize::try_from(chunk).unwrap_or(usize::MAX);

        let scans = std::mem::take(&mut inner.scans);
        inner.scans = scans
            .into_iter()
            .filter(|t| {
                let expired = t.row.network == network && t.row.timestamp < scan_cutoff;
                if expired && budget > 0 {
                    budget -= 1;
                    deleted += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        let mut budget = usize::try_from(chunk).unwrap_or(usize::MAX);
        let benchmarks = std::mem::take(&mut inner.benchmarks);
        inner.benchmarks = benchmarks
            .into_iter()
            .filter(|t| {
                let expired = t.row.network == network && t.row.timestamp < benchmark_cutoff;
                if expired && budget > 0 {
                    budget -= 1;
                    deleted += 1;
                    false
                } else {
                    true
                }
            })
            .collect();

        Ok(deleted)
    }
}

#[async_trait]
impl FeedPersistence for MemoryPersistence {
    async fn dirty_hosts(&self, limit: i64) -> Result<Vec<Host>> {
        let inner = self.inner.lock();
        let mut hosts: Vec<Host> = inner
            .hosts
            .values()
            .filter(|t| t.dirty())
            .map(|t| t.row.clone())
            .collect();
        hosts.sort_by_key(|h| h.id);
        hosts.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(hosts)
    }

    async fn dirty_scans(&self, exclude_host_ids: &[i64], limit: i64) -> Result<Vec<HostScan>> {
        let inner = self.inner.lock();
        let excluded: Vec<(Network, HostKey)> = inner
            .hosts
            .values()
            .filter(|t| exclude_host_ids.contains(&t.row.id))
            .map(|t| (t.row.network, t.row.public_key))
            .collect();
        let mut scans: Vec<HostScan> = inner
            .scans
            .iter()
            .filter(|t| t.dirty())
            .filter(|t| !excluded.contains(&(t.row.network, t.row.public_key)))
            .map(|t| t.row.clone())
            .collect();
        scans.sort_by_key(|s| s.id);
        scans.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(scans)
    }

    async fn dirty_benchmarks(
        &self,
        exclude_host_ids: &[i64],
        limit: i64,
    ) -> Result<Vec<HostBenchmark>> {
        let inner = self.inner.lock();
        let excluded: Vec<(Network, HostKey)> = inner
            .hosts
            .values()
            .filter(|t| exclude_host_ids.contains(&t.row.id))
            .map(|t| (t.row.network, t.row.public_key))
            .collect();
        let mut benchmarks: Vec<HostBenchmark> = inner
            .benchmarks
            .iter()
            .filter(|t| t.dirty())
            .filter(|t| !excluded.contains(&(t.row.network, t.row.public_key)))
            .map(|t| t.row.clone())
            .collect();
        benchmarks.sort_by_key(|b| b.id);
        benchmarks.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(benchmarks)
    }

    async fn mark_fetched(
        &self,
        host_ids: &[i64],
        scan_ids: &[i64],
        benchmark_ids: &[i64],
        fetched: DateTime<Utc>,
    ) -> Result<()> {
        let mut inner = self.inner.lock();
        for tracked in inner.hosts.values_mut() {
            if host_ids.contains(&tracked.row.id) {
                tracked.fetched = fetched;
            }
        }
        for tracked in &mut inner.scans {
            if scan_ids.contains(&tracked.row.id) {
                tracked.fetched = fetched;
            }
        }
        for tracked in &mut inner.benchmarks {
            if benchmark_ids.contains(&tracked.row.id) {
                tracked.fetched = fetched;
            }
        }
        Ok(())
    }
}
