//! Storage port traits for the host store and the update feed.
//!
//! [`crate::store::postgres::PostgresPersistence`] implements both against
//! PostgreSQL; tests use in-memory mocks. The `modified`/`fetched` pair on
//! every row drives the delta feed: `modified` advances on each write,
//! `fetched` only on an acknowledged batch.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{
    ChainTip, Host, HostBenchmark, HostLocation, HostScan, Network, PriceChange,
};
use crate::types::primitives::HostKey;

// ═══════════════════════════════════════════════════════════════════════════════
// HOST PERSISTENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for the durable side of the host store.
#[async_trait]
pub trait HostPersistence: Send + Sync {
    /// Load every host of a network into memory at startup.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn load_hosts(&self, network: Network) -> Result<Vec<Host>>;

    /// Upsert one host row in its own transaction and bump `modified`.
    /// Returns the row ID.
    ///
    /// # Errors
    /// Returns an error if the database operation fails; the in-memory map
    /// must not be updated in that case.
    async fn upsert_host(&self, host: &Host) -> Result<i64>;

    /// Apply a batch of chain-discovered host rows and the new tip in a
    /// single transaction. Returns the row IDs in input order.
    ///
    /// # Errors
    /// Returns an error after rolling back; the caller retries from its
    /// stored tip.
    async fn commit_chain_batch(&self, hosts: &[Host], tip: ChainTip) -> Result<Vec<i64>>;

    /// Insert one scan row. Returns the row ID.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn insert_scan(&self, scan: &HostScan) -> Result<i64>;

    /// Insert one benchmark row. Returns the row ID.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn insert_benchmark(&self, benchmark: &HostBenchmark) -> Result<i64>;

    /// Append a price-journal row.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn insert_price_change(&self, change: &PriceChange) -> Result<()>;

    /// The committed chain tip of a network, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn tip(&self, network: Network) -> Result<Option<ChainTip>>;

    /// Failed scans strictly more recent than the newest successful one
    /// (all failures if none ever succeeded).
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn last_failed_scans(&self, network: Network, host: HostKey) -> Result<u64>;

    /// Failed benchmarks strictly more recent than the newest successful
    /// one.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn last_failed_benchmarks(&self, network: Network, host: HostKey) -> Result<u64>;

    /// Load the blocked-domain rule strings.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn load_blocked_domains(&self) -> Result<Vec<String>>;

    /// Replace the blocked-domain rule strings.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn replace_blocked_domains(&self, domains: &[String]) -> Result<()>;

    /// Upsert a host's cached geolocation.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn upsert_location(&self, location: &HostLocation) -> Result<()>;

    /// A host's cached geolocation, if any.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn location(&self, network: Network, host: HostKey) -> Result<Option<HostLocation>>;

    /// Delete scans older than `scan_cutoff` and benchmarks older than
    /// `benchmark_cutoff`, at most `chunk` rows per table per call.
    /// Returns the number of rows deleted.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn prune(
        &self,
        network: Network,
        scan_cutoff: DateTime<Utc>,
        benchmark_cutoff: DateTime<Utc>,
        chunk: i64,
    ) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEED PERSISTENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Port for the delta queries behind the update feed.
#[async_trait]
pub trait FeedPersistence: Send + Sync {
    /// Hosts whose row changed since their last acknowledgement, ascending
    /// by row ID, at most `limit`.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn dirty_hosts(&self, limit: i64) -> Result<Vec<Host>>;

    /// Changed scans whose host row is not among `exclude_host_ids`,
    /// ascending by row ID, at most `limit`.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn dirty_scans(&self, exclude_host_ids: &[i64], limit: i64) -> Result<Vec<HostScan>>;

    /// Changed benchmarks whose host row is not among `exclude_host_ids`,
    /// ascending by row ID, at most `limit`.
    ///
    /// # Errors
    /// Returns an error if the database query fails.
    async fn dirty_benchmarks(
        &self,
        exclude_host_ids: &[i64],
        limit: i64,
    ) -> Result<Vec<HostBenchmark>>;

    /// Acknowledge the rows of a finalized batch by setting their
    /// `fetched` timestamp.
    ///
    /// # Errors
    /// Returns an error if the database operation fails.
    async fn mark_fetched(
        &self,
        host_ids: &[i64],
        scan_ids: &[i64],
        benchmark_ids: &[i64],
        fetched: DateTime<Utc>,
    ) -> Result<()>;
}
