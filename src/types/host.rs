//! Aggregate entities persisted by the host store.
//!
//! A [`Host`] owns a bounded in-memory slice of its probe history: the two
//! most recent scans and the single most recent benchmark. The full history
//! lives only in SQL. Tests must not assume a database join can reproduce
//! the in-memory view.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::primitives::{BatchId, BlockId, Currency, HostKey, Network};
use super::protocol::{HostProtocol, ProtocolSnapshot};
use crate::score::ScoreBreakdown;

/// Scans kept hot on the host aggregate.
pub const MAX_SCAN_HISTORY: usize = 2;

/// Benchmarks kept hot on the host aggregate.
pub const MAX_BENCHMARK_HISTORY: usize = 1;

/// Interaction decay factor applied per decay step.
const INTERACTION_DECAY: f64 = 0.9988;

/// Blocks per interaction decay step.
const INTERACTION_DECAY_STEP: u64 = 144;

// ═══════════════════════════════════════════════════════════════════════════════
// HOST
// ═══════════════════════════════════════════════════════════════════════════════

/// A storage provider observed on one network, keyed by
/// `(network, public_key)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Host {
    /// Dense per-store row ID; zero until first persisted.
    pub id: i64,
    /// Network the host was announced on.
    pub network: Network,
    /// The host's public key.
    pub public_key: HostKey,
    /// Timestamp of the block carrying the first announcement.
    pub first_seen: DateTime<Utc>,
    /// Height of the block carrying the first announcement.
    pub known_since: u64,
    /// Announced network address (`host:port`).
    pub net_address: String,
    /// Announced siamux addresses (v2 hosts).
    pub siamux_addresses: Vec<String>,
    /// Subnets the net address currently resolves into.
    pub ip_nets: Vec<String>,
    /// When `ip_nets` last changed.
    pub last_ip_change: DateTime<Utc>,
    /// Blocked manually or by a domain rule; never scanned while set.
    pub blocked: bool,
    /// Cumulative observed uptime.
    #[serde(with = "serde_duration_secs")]
    pub uptime: Duration,
    /// Cumulative observed downtime.
    #[serde(with = "serde_duration_secs")]
    pub downtime: Duration,
    /// Timestamp of the most recent successful scan, if any.
    pub last_seen: Option<DateTime<Utc>>,
    /// Total scans ever applied to this host.
    pub total_scans: u64,
    /// Newest-first scan history, at most [`MAX_SCAN_HISTORY`] entries.
    pub scan_history: Vec<HostScan>,
    /// Newest-first benchmark history, at most [`MAX_BENCHMARK_HISTORY`]
    /// entries.
    pub benchmark_history: Vec<HostBenchmark>,
    /// Protocol generation and latest observed snapshots.
    pub protocol: HostProtocol,
    /// Decayed count of successful interactions by this node.
    pub successes: f64,
    /// Decayed count of failed interactions by this node.
    pub failures: f64,
    /// Height at which interactions were last decayed.
    pub last_update: u64,
    /// Current score breakdown.
    pub score: ScoreBreakdown,
}

impl Host {
    /// Create a freshly announced host.
    #[must_use]
    pub fn announced(
        network: Network,
        public_key: HostKey,
        net_address: String,
        v2: bool,
        first_seen: DateTime<Utc>,
        known_since: u64,
    ) -> Self {
        Self {
            id: 0,
            network,
            public_key,
            first_seen,
            known_since,
            net_address,
            siamux_addresses: Vec::new(),
            ip_nets: Vec::new(),
            last_ip_change: first_seen,
            blocked: false,
            uptime: Duration::ZERO,
            downtime: Duration::ZERO,
            last_seen: None,
            total_scans: 0,
            scan_history: Vec::new(),
            benchmark_history: Vec::new(),
            protocol: HostProtocol::empty(v2),
            successes: 0.0,
            failures: 0.0,
            last_update: 0,
            score: ScoreBreakdown::default(),
        }
    }

    /// Whether this host speaks the v2 protocol generation.
    #[must_use]
    pub const fn is_v2(&self) -> bool {
        self.protocol.is_v2()
    }

    /// Whether the host counts as online: its two most recent scans both
    /// succeeded, or it has exactly one scan and that one succeeded.
    #[must_use]
    pub fn is_online(&self) -> bool {
        match self.scan_history.as_slice() {
            [] => false,
            [only] => only.success,
            [newest, previous, ..] => newest.success && previous.success,
        }
    }

    /// Timestamp of the most recent scan attempt, successful or not.
    #[must_use]
    pub fn last_scan_at(&self) -> Option<DateTime<Utc>> {
        self.scan_history.first().map(|s| s.timestamp)
    }

    /// Timestamp of the most recent benchmark attempt.
    #[must_use]
    pub fn last_benchmark_at(&self) -> Option<DateTime<Utc>> {
        self.benchmark_history.first().map(|b| b.timestamp)
    }

    /// Fold a scan into the aggregate: uptime/downtime accounting, history
    /// trim, `last_seen`, protocol snapshot.
    ///
    /// Returns `false` without touching anything when the scan's timestamp
    /// equals the newest recorded one, so replaying a delivery never
    /// double-counts an interval.
    pub fn apply_scan(&mut self, scan: HostScan) -> bool {
        if let Some(previous) = self.scan_history.first() {
            if previous.timestamp == scan.timestamp {
                return false;
            }
            let gap = (scan.timestamp - previous.timestamp)
                .to_std()
                .unwrap_or_default();
            if scan.success {
                self.uptime += gap;
            } else {
                self.downtime += gap;
            }
        }

        if scan.success {
            self.last_seen = Some(scan.timestamp);
            if let Some(snapshot) = scan.settings.clone() {
                self.protocol.apply_snapshot(snapshot);
            }
        }

        self.total_scans += 1;
        self.scan_history.insert(0, scan);
        self.scan_history.truncate(MAX_SCAN_HISTORY);
        true
    }

    /// Fold a benchmark into the aggregate.
    ///
    /// Returns `false` on a replayed timestamp, mirroring [`Self::apply_scan`].
    pub fn apply_benchmark(&mut self, benchmark: HostBenchmark) -> bool {
        if self
            .benchmark_history
            .first()
            .is_some_and(|previous| previous.timestamp == benchmark.timestamp)
        {
            return false;
        }
        self.benchmark_history.insert(0, benchmark);
        self.benchmark_history.truncate(MAX_BENCHMARK_HISTORY);
        true
    }

    /// Decay the interaction counters toward zero for the blocks elapsed
    /// since the last decay, then pin `last_update` to the tip.
    pub fn decay_interactions(&mut self, tip_height: u64) {
        if tip_height <= self.last_update {
            return;
        }
        let steps = (tip_height - self.last_update) / INTERACTION_DECAY_STEP;
        if steps > 0 {
            #[allow(clippy::cast_precision_loss)]
            let factor = INTERACTION_DECAY.powf(steps as f64);
            self.successes *= factor;
            self.failures *= factor;
        }
        self.last_update = tip_height;
    }

    /// The fields whose change appends a row to the price journal.
    #[must_use]
    pub fn price_fingerprint(&self) -> PriceFingerprint {
        PriceFingerprint {
            remaining_storage: self.protocol.remaining_storage(),
            total_storage: self.protocol.total_storage(),
            collateral: self.protocol.collateral(),
            storage_price: self.protocol.storage_price(),
            upload_price: self.protocol.upload_price(),
            download_price: self.protocol.download_price(),
        }
    }
}

/// The tracked pricing fields of a host, compared between scans to decide
/// whether to append a [`PriceChange`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriceFingerprint {
    /// Unused storage in bytes.
    pub remaining_storage: u64,
    /// Total storage in bytes.
    pub total_storage: u64,
    /// Collateral per byte per block.
    pub collateral: Currency,
    /// Storage price per byte per block.
    pub storage_price: Currency,
    /// Upload price per byte.
    pub upload_price: Currency,
    /// Download price per byte.
    pub download_price: Currency,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCANS & BENCHMARKS
// ═══════════════════════════════════════════════════════════════════════════════

/// A single reachability/settings probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostScan {
    /// Row ID; zero until persisted.
    pub id: i64,
    /// Network of the scanned host.
    pub network: Network,
    /// Name of the observing node.
    pub node: String,
    /// The scanned host.
    pub public_key: HostKey,
    /// When the scan ran.
    pub timestamp: DateTime<Utc>,
    /// Whether the primary settings RPC returned without error.
    pub success: bool,
    /// Round-trip latency of the primary RPC, in milliseconds.
    pub latency_ms: Option<f64>,
    /// Error string of the failed attempt.
    pub error: Option<String>,
    /// Settings observed by a successful scan.
    pub settings: Option<ProtocolSnapshot>,
}

/// A single upload/download throughput probe.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostBenchmark {
    /// Row ID; zero until persisted.
    pub id: i64,
    /// Network of the benchmarked host.
    pub network: Network,
    /// Name of the observing node.
    pub node: String,
    /// The benchmarked host.
    pub public_key: HostKey,
    /// When the benchmark ran.
    pub timestamp: DateTime<Utc>,
    /// Whether the full pipeline completed.
    pub success: bool,
    /// Observed upload throughput in bytes per second.
    pub upload_speed: f64,
    /// Observed download throughput in bytes per second.
    pub download_speed: f64,
    /// Time to first byte of the first read, in milliseconds.
    pub ttfb_ms: f64,
    /// Error string of the failed attempt.
    pub error: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE CHANGES, TIPS, LOCATIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// A row of the price journal, appended whenever a tracked pricing field
/// changes between scans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceChange {
    /// Network of the host.
    pub network: Network,
    /// The host whose prices changed.
    pub public_key: HostKey,
    /// When the change was observed.
    pub changed_at: DateTime<Utc>,
    /// Unused storage in bytes.
    pub remaining_storage: u64,
    /// Total storage in bytes.
    pub total_storage: u64,
    /// Collateral per byte per block.
    pub collateral: Currency,
    /// Storage price per byte per block.
    pub storage_price: Currency,
    /// Upload price per byte.
    pub upload_price: Currency,
    /// Download price per byte.
    pub download_price: Currency,
}

impl PriceChange {
    /// Build a journal row from a host's current fingerprint.
    #[must_use]
    pub fn observed(host: &Host, changed_at: DateTime<Utc>) -> Self {
        let fp = host.price_fingerprint();
        Self {
            network: host.network,
            public_key: host.public_key,
            changed_at,
            remaining_storage: fp.remaining_storage,
            total_storage: fp.total_storage,
            collateral: fp.collateral,
            storage_price: fp.storage_price,
            upload_price: fp.upload_price,
            download_price: fp.download_price,
        }
    }
}

/// The committed chain position per network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainTip {
    /// Network this tip belongs to.
    pub network: Network,
    /// Block height.
    pub height: u64,
    /// Block identifier.
    pub block_id: BlockId,
}

/// Best-effort geolocation of a host's address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostLocation {
    /// Network of the host.
    pub network: Network,
    /// The located host.
    pub public_key: HostKey,
    /// ISO country code.
    pub country: String,
    /// Region or state.
    pub region: String,
    /// City name.
    pub city: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// When the lookup ran.
    pub fetched_at: DateTime<Utc>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// UPDATE BATCHES
// ═══════════════════════════════════════════════════════════════════════════════

/// A host row as serialized into an update batch, augmented with the
/// portal-side fields that are derived rather than stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedHost {
    /// The host row.
    #[serde(flatten)]
    pub host: Host,
    /// Number of other currently-online hosts sharing a subnet.
    pub active_hosts: usize,
    /// Cached geolocation, if any.
    pub location: Option<HostLocation>,
}

/// One pull-delivered batch of changed rows, acknowledged by ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateBatch {
    /// Random batch identifier; echo it back to finalize.
    pub id: BatchId,
    /// Hosts whose row changed since the last acknowledged batch.
    pub hosts: Vec<FeedHost>,
    /// Changed scans whose host is not already in `hosts`.
    pub scans: Vec<HostScan>,
    /// Changed benchmarks whose host is not already in `hosts`.
    pub benchmarks: Vec<HostBenchmark>,
}

impl UpdateBatch {
    /// Whether the batch carries no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty() && self.scans.is_empty() && self.benchmarks.is_empty()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERDE HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

mod serde_duration_secs {
    //! Durations as whole seconds on the wire.

    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::types::protocol::HostSettings;

    fn host() -> Host {
        Host::announced(
            Network::Mainnet,
            HostKey::new([0xAA; 32]),
            "1.2.3.4:9982".into(),
            false,
            Utc::now(),
            1000,
        )
    }

    fn scan_at(host: &Host, at: DateTime<Utc>, success: bool) -> HostScan {
        HostScan {
            id: 0,
            network: host.network,
            node: "eu-test".into(),
            public_key: host.public_key,
            timestamp: at,
            success,
            latency_ms: Some(25.0),
            error: (!success).then(|| "connection refused".into()),
            settings: None,
        }
    }

    #[test]
    fn online_requires_two_recent_successes() {
        let mut h = host();
        let t0 = Utc::now();
        assert!(!h.is_online());

        assert!(h.apply_scan(scan_at(&h, t0, true)));
        assert!(h.is_online(), "single successful scan is online");

        assert!(h.apply_scan(scan_at(&h, t0 + TimeDelta::minutes(30), false)));
        assert!(!h.is_online(), "latest failure is offline");

        assert!(h.apply_scan(scan_at(&h, t0 + TimeDelta::minutes(60), true)));
        assert!(!h.is_online(), "one of last two failed");

        assert!(h.apply_scan(scan_at(&h, t0 + TimeDelta::minutes(90), true)));
        assert!(h.is_online(), "two most recent succeeded");
    }

    #[test]
    fn history_is_bounded_and_newest_first() {
        let mut h = host();
        let t0 = Utc::now();
        for i in 0..5 {
            h.apply_scan(scan_at(&h, t0 + TimeDelta::minutes(i * 30), true));
        }
        assert_eq!(h.scan_history.len(), MAX_SCAN_HISTORY);
        assert_eq!(h.total_scans, 5);
        assert!(h.scan_history[0].timestamp > h.scan_history[1].timestamp);
    }

    #[test]
    fn uptime_accounting_sums_gaps() {
        let mut h = host();
        let t0 = Utc::now();
        h.apply_scan(scan_at(&h, t0, true));
        h.apply_scan(scan_at(&h, t0 + TimeDelta::hours(1), true));
        h.apply_scan(scan_at(&h, t0 + TimeDelta::hours(2), false));
        h.apply_scan(scan_at(&h, t0 + TimeDelta::hours(3), true));

        assert_eq!(h.uptime, Duration::from_secs(2 * 3600));
        assert_eq!(h.downtime, Duration::from_secs(3600));
        assert_eq!(
            h.uptime + h.downtime,
            Duration::from_secs(3 * 3600),
            "uptime + downtime equals the sum of timestamp gaps"
        );
    }

    #[test]
    fn replayed_scan_does_not_double_count() {
        let mut h = host();
        let t0 = Utc::now();
        h.apply_scan(scan_at(&h, t0, true));
        let repeat = scan_at(&h, t0 + TimeDelta::hours(1), true);
        assert!(h.apply_scan(repeat.clone()));
        let uptime = h.uptime;
        let total = h.total_scans;

        assert!(!h.apply_scan(repeat), "replay is rejected");
        assert_eq!(h.uptime, uptime);
        assert_eq!(h.total_scans, total);
    }

    #[test]
    fn successful_scan_updates_last_seen_and_settings() {
        let mut h = host();
        let t0 = Utc::now();
        let mut scan = scan_at(&h, t0, true);
        scan.settings = Some(ProtocolSnapshot::V1 {
            settings: HostSettings {
                accepting_contracts: true,
                ..HostSettings::default()
            },
            price_table: None,
        });
        h.apply_scan(scan);
        assert_eq!(h.last_seen, Some(t0));
        assert!(h.protocol.accepting_contracts());

        h.apply_scan(scan_at(&h, t0 + TimeDelta::hours(1), false));
        assert_eq!(h.last_seen, Some(t0), "failure leaves last_seen alone");
    }

    #[test]
    fn interactions_decay_toward_zero() {
        let mut h = host();
        h.successes = 100.0;
        h.failures = 10.0;
        h.decay_interactions(144 * 10);
        assert!(h.successes < 100.0);
        assert!(h.failures < 10.0);
        assert_eq!(h.last_update, 1440);

        // Already at the tip: no further decay.
        let s = h.successes;
        h.decay_interactions(1440);
        assert!((h.successes - s).abs() < f64::EPSILON);
    }

    #[test]
    fn benchmark_history_keeps_one() {
        let mut h = host();
        let t0 = Utc::now();
        for i in 0..3 {
            h.apply_benchmark(HostBenchmark {
                id: 0,
                network: h.network,
                node: "eu-test".into(),
                public_key: h.public_key,
                timestamp: t0 + TimeDelta::hours(i),
                success: true,
                upload_speed: 10e6,
                download_speed: 50e6,
                ttfb_ms: 120.0,
                error: None,
            });
        }
        assert_eq!(h.benchmark_history.len(), MAX_BENCHMARK_HISTORY);
        assert_eq!(h.benchmark_history[0].timestamp, t0 + TimeDelta::hours(2));
    }
}
