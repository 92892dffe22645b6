//! PostgreSQL implementation of the persistence ports using SQLx.
//!
//! # Type Conversions
//!
//! PostgreSQL uses signed integers for numeric columns while the domain
//! uses unsigned types. These casts are safe because:
//! - Block heights and row IDs won't exceed `i64::MAX`
//! - Storage sizes reported by hosts stay far below `i64::MAX` bytes
//! - Durations are stored as whole seconds
#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap
)]

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::FromRow;
use tracing::{debug, instrument};

use crate::error::{InfraError, Result};
use crate::ports::store::{FeedPersistence, HostPersistence};
use crate::types::primitives::{BlockId, HostKey, Network};
use crate::types::protocol::{HostProtocol, ProtocolSnapshot};
use crate::types::{
    ChainTip, Host, HostBenchmark, HostLocation, HostScan, PriceChange,
};

// ═══════════════════════════════════════════════════════════════════════════════
// POSTGRES PERSISTENCE
// ═══════════════════════════════════════════════════════════════════════════════

/// PostgreSQL-backed persistence.
#[derive(Debug, Clone)]
pub struct PostgresPersistence {
    pool: PgPool,
}

impl PostgresPersistence {
    /// Create a new backend over the given connection pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations.
    ///
    /// # Errors
    /// Returns an error if migrations fail.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| InfraError::Internal(format!("migration error: {e}")))?;
        Ok(())
    }

    /// Attach the bounded in-memory histories to freshly loaded host rows.
    async fn attach_histories(&self, network: Network, hosts: &mut [Host]) -> Result<()> {
        let scans = sqlx::query_as::<_, ScanRow>(
            r"
            SELECT id, network, node, public_key, ran_at, success, latency_ms, error, settings
            FROM (
                SELECT s.*, ROW_NUMBER() OVER (
                    PARTITION BY s.public_key ORDER BY s.ran_at DESC
                ) AS rn
                FROM hdb_scans s
                WHERE s.network = $1
            ) ranked
            WHERE rn <= 2
            ORDER BY public_key, ran_at DESC
            ",
        )
        .bind(network.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let benchmarks = sqlx::query_as::<_, BenchmarkRow>(
            r"
            SELECT id, network, node, public_key, ran_at, success,
                   upload_speed, download_speed, ttfb_ms, error
            FROM (
                SELECT b.*, ROW_NUMBER() OVER (
                    PARTITION BY b.public_key ORDER BY b.ran_at DESC
                ) AS rn
                FROM hdb_benchmarks b
                WHERE b.network = $1
            ) ranked
            WHERE rn <= 1
            ORDER BY public_key, ran_at DESC
            ",
        )
        .bind(network.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        for host in hosts.iter_mut() {
            host.scan_history = scans
                .iter()
                .filter(|s| s.public_key.as_slice() == host.public_key.as_slice())
                .cloned()
                .map(HostScan::try_from)
                .collect::<std::result::Result<_, _>>()?;
            host.benchmark_history = benchmarks
                .iter()
                .filter(|b| b.public_key.as_slice() == host.public_key.as_slice())
                .cloned()
                .map(HostBenchmark::try_from)
                .collect::<std::result::Result<_, _>>()?;
        }
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROW TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, FromRow)]
struct HostRow {
    id: i64,
    network: String,
    public_key: Vec<u8>,
    first_seen: DateTime<Utc>,
    known_since: i64,
    blocked: bool,
    v2: bool,
    net_address: String,
    uptime: i64,
    downtime: i64,
    last_seen: Option<DateTime<Utc>>,
    ip_nets: Vec<String>,
    last_ip_change: DateTime<Utc>,
    siamux_addresses: Vec<String>,
    successes: f64,
    failures: f64,
    last_update: i64,
    total_scans: i64,
    settings: Option<Vec<u8>>,
    revision: Option<Vec<u8>>,
    score: Vec<u8>,
}

impl TryFrom<HostRow> for Host {
    type Error = InfraError;

    fn try_from(row: HostRow) -> std::result::Result<Self, Self::Error> {
        let protocol = HostProtocol::from_blobs(
            row.v2,
            row.settings.as_deref(),
            row.revision.as_deref(),
        )
        .map_err(|e| InfraError::Internal(format!("invalid protocol blob in DB: {e}")))?;
        Ok(Host {
            id: row.id,
            network: parse_network(&row.network)?,
            public_key: parse_key(&row.public_key)?,
            first_seen: row.first_seen,
            known_since: row.known_since as u64,
            net_address: row.net_address,
            siamux_addresses: row.siamux_addresses,
            ip_nets: row.ip_nets,
            last_ip_change: row.last_ip_change,
            blocked: row.blocked,
            uptime: Duration::from_secs(row.uptime as u64),
            downtime: Duration::from_secs(row.downtime as u64),
            last_seen: row.last_seen,
            total_scans: row.total_scans as u64,
            scan_history: Vec::new(),
            benchmark_history: Vec::new(),
            protocol,
            successes: row.successes,
            failures: row.failures,
            last_update: row.last_update as u64,
            score: serde_json::from_slice(&row.score)
                .map_err(|e| InfraError::Internal(format!("invalid score blob in DB: {e}")))?,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct ScanRow {
    id: i64,
    network: String,
    node: String,
    public_key: Vec<u8>,
    ran_at: DateTime<Utc>,
    success: bool,
    latency_ms: Option<f64>,
    error: Option<String>,
    settings: Option<Vec<u8>>,
}

impl TryFrom<ScanRow> for HostScan {
    type Error = InfraError;

    fn try_from(row: ScanRow) -> std::result::Result<Self, Self::Error> {
        let settings = row
            .settings
            .as_deref()
            .map(ProtocolSnapshot::decode)
            .transpose()
            .map_err(|e| InfraError::Internal(format!("invalid settings blob in DB: {e}")))?;
        Ok(HostScan {
            id: row.id,
            network: parse_network(&row.network)?,
            node: row.node,
            public_key: parse_key(&row.public_key)?,
            timestamp: row.ran_at,
            success: row.success,
            latency_ms: row.latency_ms,
            error: row.error,
            settings,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
struct BenchmarkRow {
    id: i64,
    network: String,
    node: String,
    public_key: Vec<u8>,
    ran_at: DateTime<Utc>,
    success: bool,
    upload_speed: f64,
    download_speed: f64,
    ttfb_ms: f64,
    error: Option<String>,
}

impl TryFrom<BenchmarkRow> for HostBenchmark {
    type Error = InfraError;

    fn try_from(row: BenchmarkRow) -> std::result::Result<Self, Self::Error> {
        Ok(HostBenchmark {
            id: row.id,
            network: parse_network(&row.network)?,
            node: row.node,
            public_key: parse_key(&row.public_key)?,
            timestamp: row.ran_at,
            success: row.success,
            upload_speed: row.upload_speed,
            download_speed: row.download_speed,
            ttfb_ms: row.ttfb_ms,
            error: row.error,
        })
    }
}

#[derive(Debug, FromRow)]
struct LocationRow {
    network: String,
    public_key: Vec<u8>,
    country: String,
    region: String,
    city: String,
    latitude: f64,
    longitude: f64,
    fetched_at: DateTime<Utc>,
}

impl TryFrom<LocationRow> for HostLocation {
    type Error = InfraError;

    fn try_from(row: LocationRow) -> std::result::Result<Self, Self::Error> {
        Ok(HostLocation {
            network: parse_network(&row.network)?,
            public_key: parse_key(&row.public_key)?,
            country: row.country,
            region: row.region,
            city: row.city,
            latitude: row.latitude,
            longitude: row.longitude,
            fetched_at: row.fetched_at,
        })
    }
}

fn parse_network(raw: &str) -> std::result::Result<Network, InfraError> {
    raw.parse()
        .map_err(|_| InfraError::Internal(format!("unknown network in DB: {raw}")))
}

fn parse_key(raw: &[u8]) -> std::result::Result<HostKey, InfraError> {
    HostKey::from_slice(raw)
        .map_err(|_| InfraError::Internal("invalid public key length in DB".into()))
}

fn encode_host_blobs(host: &Host) -> Result<(Option<Vec<u8>>, Option<Vec<u8>>, Vec<u8>)> {
    let settings = host.protocol.snapshot().map(|s| s.encode()).transpose()?;
    let revision = host
        .protocol
        .stored_revision()
        .map(|r| r.encode())
        .transpose()?;
    let score = serde_json::to_vec(&host.score).map_err(InfraError::Serialization)?;
    Ok((settings, revision, score))
}

/// The host upsert, shared by the single-row path and the chain batch.
const UPSERT_HOST_SQL: &str = r"
    INSERT INTO hdb_hosts (
        network, public_key, first_seen, known_since, blocked, v2,
        net_address, uptime, downtime, last_seen, ip_nets, last_ip_change,
        siamux_addresses, successes, failures, last_update, total_scans,
        settings, revision, score, modified
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
            $15, $16, $17, $18, $19, $20, NOW())
    ON CONFLICT (network, public_key) DO UPDATE SET
        blocked = EXCLUDED.blocked,
        v2 = EXCLUDED.v2,
        net_address = EXCLUDED.net_address,
        uptime = EXCLUDED.uptime,
        downtime = EXCLUDED.downtime,
        last_seen = EXCLUDED.last_seen,
        ip_nets = EXCLUDED.ip_nets,
        last_ip_change = EXCLUDED.last_ip_change,
        siamux_addresses = EXCLUDED.siamux_addresses,
        successes = EXCLUDED.successes,
        failures = EXCLUDED.failures,
        last_update = EXCLUDED.last_update,
        total_scans = EXCLUDED.total_scans,
        settings = EXCLUDED.settings,
        revision = EXCLUDED.revision,
        score = EXCLUDED.score,
        modified = NOW()
    RETURNING id
";

async fn upsert_host_on<'e, E>(executor: E, host: &Host) -> Result<i64>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let (settings, revision, score) = encode_host_blobs(host)?;
    let id: i64 = sqlx::query_scalar(UPSERT_HOST_SQL)
        .bind(host.network.as_str())
        .bind(host.public_key.as_slice())
        .bind(host.first_seen)
        .bind(host.known_since as i64)
        .bind(host.blocked)
        .bind(host.protocol.is_v2())
        .bind(&host.net_address)
        .bind(host.uptime.as_secs() as i64)
        .bind(host.downtime.as_secs() as i64)
        .bind(host.last_seen)
        .bind(&host.ip_nets)
        .bind(host.last_ip_change)
        .bind(&host.siamux_addresses)
        .bind(host.successes)
        .bind(host.failures)
        .bind(host.last_update as i64)
        .bind(host.total_scans as i64)
        .bind(settings)
        .bind(revision)
        .bind(score)
        .fetch_one(executor)
        .await
        .map_err(InfraError::Database)?;
    Ok(id)
}

// ═══════════════════════════════════════════════════════════════════════════════
// HOST PERSISTENCE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl HostPersistence for PostgresPersistence {
    #[instrument(skip(self), fields(network = %network))]
    async fn load_hosts(&self, network: Network) -> Result<Vec<Host>> {
        let rows = sqlx::query_as::<_, HostRow>(
            r"
            SELECT id, network, public_key, first_seen, known_since, blocked, v2,
                   net_address, uptime, downtime, last_seen, ip_nets, last_ip_change,
                   siamux_addresses, successes, failures, last_update, total_scans,
                   settings, revision, score
            FROM hdb_hosts
            WHERE network = $1
            ORDER BY id ASC
            ",
        )
        .bind(network.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let mut hosts: Vec<Host> = rows
            .into_iter()
            .map(Host::try_from)
            .collect::<std::result::Result<_, _>>()?;
        self.attach_histories(network, &mut hosts).await?;
        debug!(hosts = hosts.len(), "Loaded host rows");
        Ok(hosts)
    }

    async fn upsert_host(&self, host: &Host) -> Result<i64> {
        upsert_host_on(&self.pool, host).await
    }

    #[instrument(skip(self, hosts), fields(hosts = hosts.len(), height = tip.height))]
    async fn commit_chain_batch(&self, hosts: &[Host], tip: ChainTip) -> Result<Vec<i64>> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;

        let mut ids = Vec::with_capacity(hosts.len());
        for host in hosts {
            ids.push(upsert_host_on(&mut *tx, host).await?);
        }

        sqlx::query(
            r"
            INSERT INTO hdb_tip (network, height, bid)
            VALUES ($1, $2, $3)
            ON CONFLICT (network) DO UPDATE SET
                height = EXCLUDED.height,
                bid = EXCLUDED.bid
            ",
        )
        .bind(tip.network.as_str())
        .bind(tip.height as i64)
        .bind(tip.block_id.as_slice())
        .execute(&mut *tx)
        .await
        .map_err(InfraError::Database)?;

        tx.commit().await.map_err(InfraError::Database)?;
        Ok(ids)
    }

    async fn insert_scan(&self, scan: &HostScan) -> Result<i64> {
        let settings = scan.settings.as_ref().map(ProtocolSnapshot::encode).transpose()?;
        let id = sqlx::query_scalar(
            r"
            INSERT INTO hdb_scans (
                network, node, public_key, ran_at, success, latency_ms, error,
                settings, modified
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            RETURNING id
            ",
        )
        .bind(scan.network.as_str())
        .bind(&scan.node)
        .bind(scan.public_key.as_slice())
        .bind(scan.timestamp)
        .bind(scan.success)
        .bind(scan.latency_ms)
        .bind(&scan.error)
        .bind(settings)
        .fetch_one(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(id)
    }

    async fn insert_benchmark(&self, benchmark: &HostBenchmark) -> Result<i64> {
        let id = sqlx::query_scalar(
            r"
            INSERT INTO hdb_benchmarks (
                network, node, public_key, ran_at, success, upload_speed,
                download_speed, ttfb_ms, error, modified
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW())
            RETURNING id
            ",
        )
        .bind(benchmark.network.as_str())
        .bind(&benchmark.node)
        .bind(benchmark.public_key.as_slice())
        .bind(benchmark.timestamp)
        .bind(benchmark.success)
        .bind(benchmark.upload_speed)
        .bind(benchmark.download_speed)
        .bind(benchmark.ttfb_ms)
        .bind(&benchmark.error)
        .fetch_one(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(id)
    }

    async fn insert_price_change(&self, change: &PriceChange) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO hdb_price_changes (
                network, public_key, changed_at, remaining_storage, total_storage,
                collateral, storage_price, upload_price, download_price
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ",
        )
        .bind(change.network.as_str())
        .bind(change.public_key.as_slice())
        .bind(change.changed_at)
        .bind(change.remaining_storage as i64)
        .bind(change.total_storage as i64)
        .bind(change.collateral.to_bigdecimal())
        .bind(change.storage_price.to_bigdecimal())
        .bind(change.upload_price.to_bigdecimal())
        .bind(change.download_price.to_bigdecimal())
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    async fn tip(&self, network: Network) -> Result<Option<ChainTip>> {
        let row: Option<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT height, bid FROM hdb_tip WHERE network = $1")
                .bind(network.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(InfraError::Database)?;

        match row {
            Some((height, bid)) => {
                let block_id = BlockId::from_slice(&bid)
                    .map_err(|_| InfraError::Internal("invalid block id length in DB".into()))?;
                Ok(Some(ChainTip {
                    network,
                    height: height as u64,
                    block_id,
                }))
            }
            None => Ok(None),
        }
    }

    async fn last_failed_scans(&self, network: Network, host: HostKey) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM hdb_scans
            WHERE network = $1 AND public_key = $2 AND success = FALSE
              AND ran_at > COALESCE(
                  (SELECT MAX(ran_at) FROM hdb_scans
                   WHERE network = $1 AND public_key = $2 AND success = TRUE),
                  'epoch'::TIMESTAMPTZ
              )
            ",
        )
        .bind(network.as_str())
        .bind(host.as_slice())
        .fetch_one(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(count as u64)
    }

    async fn last_failed_benchmarks(&self, network: Network, host: HostKey) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*)
            FROM hdb_benchmarks
            WHERE network = $1 AND public_key = $2 AND success = FALSE
              AND ran_at > COALESCE(
                  (SELECT MAX(ran_at) FROM hdb_benchmarks
                   WHERE network = $1 AND public_key = $2 AND success = TRUE),
                  'epoch'::TIMESTAMPTZ
              )
            ",
        )
        .bind(network.as_str())
        .bind(host.as_slice())
        .fetch_one(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(count as u64)
    }

    async fn load_blocked_domains(&self) -> Result<Vec<String>> {
        let domains = sqlx::query_scalar("SELECT dom FROM hdb_domains ORDER BY dom")
            .fetch_all(&self.pool)
            .await
            .map_err(InfraError::Database)?;
        Ok(domains)
    }

    async fn replace_blocked_domains(&self, domains: &[String]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        sqlx::query("DELETE FROM hdb_domains")
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        for domain in domains {
            sqlx::query("INSERT INTO hdb_domains (dom) VALUES ($1) ON CONFLICT DO NOTHING")
                .bind(domain)
                .execute(&mut *tx)
                .await
                .map_err(InfraError::Database)?;
        }
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }

    async fn upsert_location(&self, location: &HostLocation) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO hdb_locations (
                network, public_key, country, region, city, latitude,
                longitude, fetched_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (network, public_key) DO UPDATE SET
                country = EXCLUDED.country,
                region = EXCLUDED.region,
                city = EXCLUDED.city,
                latitude = EXCLUDED.latitude,
                longitude = EXCLUDED.longitude,
                fetched_at = EXCLUDED.fetched_at
            ",
        )
        .bind(location.network.as_str())
        .bind(location.public_key.as_slice())
        .bind(&location.country)
        .bind(&location.region)
        .bind(&location.city)
        .bind(location.latitude)
        .bind(location.longitude)
        .bind(location.fetched_at)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;
        Ok(())
    }

    async fn location(&self, network: Network, host: HostKey) -> Result<Option<HostLocation>> {
        let row = sqlx::query_as::<_, LocationRow>(
            r"
            SELECT network, public_key, country, region, city, latitude,
                   longitude, fetched_at
            FROM hdb_locations
            WHERE network = $1 AND public_key = $2
            ",
        )
        .bind(network.as_str())
        .bind(host.as_slice())
        .fetch_optional(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        match row {
            Some(r) => Ok(Some(r.try_into()?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self), fields(network = %network))]
    async fn prune(
        &self,
        network: Network,
        scan_cutoff: DateTime<Utc>,
        benchmark_cutoff: DateTime<Utc>,
        chunk: i64,
    ) -> Result<u64> {
        let scans = sqlx::query(
            r"
            DELETE FROM hdb_scans
            WHERE id IN (
                SELECT id FROM hdb_scans
                WHERE network = $1 AND ran_at < $2
                ORDER BY id ASC
                LIMIT $3
            )
            ",
        )
        .bind(network.as_str())
        .bind(scan_cutoff)
        .bind(chunk)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let benchmarks = sqlx::query(
            r"
            DELETE FROM hdb_benchmarks
            WHERE id IN (
                SELECT id FROM hdb_benchmarks
                WHERE network = $1 AND ran_at < $2
                ORDER BY id ASC
                LIMIT $3
            )
            ",
        )
        .bind(network.as_str())
        .bind(benchmark_cutoff)
        .bind(chunk)
        .execute(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        Ok(scans.rows_affected() + benchmarks.rows_affected())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FEED PERSISTENCE IMPLEMENTATION
// ═══════════════════════════════════════════════════════════════════════════════

#[async_trait]
impl FeedPersistence for PostgresPersistence {
    async fn dirty_hosts(&self, limit: i64) -> Result<Vec<Host>> {
        let rows = sqlx::query_as::<_, HostRow>(
            r"
            SELECT id, network, public_key, first_seen, known_since, blocked, v2,
                   net_address, uptime, downtime, last_seen, ip_nets, last_ip_change,
                   siamux_addresses, successes, failures, last_update, total_scans,
                   settings, revision, score
            FROM hdb_hosts
            WHERE modified > fetched
            ORDER BY id ASC
            LIMIT $1
            ",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        let mut hosts: Vec<Host> = rows
            .into_iter()
            .map(Host::try_from)
            .collect::<std::result::Result<_, _>>()?;

        // Attach the hot histories per network so feed consumers see the
        // same aggregate the in-memory map holds.
        for network in [Network::Mainnet, Network::Zen] {
            let mut slice: Vec<Host> = hosts
                .iter()
                .filter(|h| h.network == network)
                .cloned()
                .collect();
            if slice.is_empty() {
                continue;
            }
            self.attach_histories(network, &mut slice).await?;
            for updated in slice {
                if let Some(original) = hosts
                    .iter_mut()
                    .find(|h| h.network == network && h.public_key == updated.public_key)
                {
                    *original = updated;
                }
            }
        }
        Ok(hosts)
    }

    async fn dirty_scans(&self, exclude_host_ids: &[i64], limit: i64) -> Result<Vec<HostScan>> {
        let rows = sqlx::query_as::<_, ScanRow>(
            r"
            SELECT s.id, s.network, s.node, s.public_key, s.ran_at, s.success,
                   s.latency_ms, s.error, s.settings
            FROM hdb_scans s
            WHERE s.modified > s.fetched
              AND NOT EXISTS (
                  SELECT 1 FROM hdb_hosts h
                  WHERE h.id = ANY($1)
                    AND h.network = s.network
                    AND h.public_key = s.public_key
              )
            ORDER BY s.id ASC
            LIMIT $2
            ",
        )
        .bind(exclude_host_ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter()
            .map(|r| HostScan::try_from(r).map_err(Into::into))
            .collect()
    }

    async fn dirty_benchmarks(
        &self,
        exclude_host_ids: &[i64],
        limit: i64,
    ) -> Result<Vec<HostBenchmark>> {
        let rows = sqlx::query_as::<_, BenchmarkRow>(
            r"
            SELECT b.id, b.network, b.node, b.public_key, b.ran_at, b.success,
                   b.upload_speed, b.download_speed, b.ttfb_ms, b.error
            FROM hdb_benchmarks b
            WHERE b.modified > b.fetched
              AND NOT EXISTS (
                  SELECT 1 FROM hdb_hosts h
                  WHERE h.id = ANY($1)
                    AND h.network = b.network
                    AND h.public_key = b.public_key
              )
            ORDER BY b.id ASC
            LIMIT $2
            ",
        )
        .bind(exclude_host_ids)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(InfraError::Database)?;

        rows.into_iter()
            .map(|r| HostBenchmark::try_from(r).map_err(Into::into))
            .collect()
    }

    async fn mark_fetched(
        &self,
        host_ids: &[i64],
        scan_ids: &[i64],
        benchmark_ids: &[i64],
        fetched: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(InfraError::Database)?;
        sqlx::query("UPDATE hdb_hosts SET fetched = $2 WHERE id = ANY($1)")
            .bind(host_ids)
            .bind(fetched)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        sqlx::query("UPDATE hdb_scans SET fetched = $2 WHERE id = ANY($1)")
            .bind(scan_ids)
            .bind(fetched)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        sqlx::query("UPDATE hdb_benchmarks SET fetched = $2 WHERE id = ANY($1)")
            .bind(benchmark_ids)
            .bind(fetched)
            .execute(&mut *tx)
            .await
            .map_err(InfraError::Database)?;
        tx.commit().await.map_err(InfraError::Database)?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
