//! The ten-factor score engine.
//!
//! Every factor is a float in `[0, 1]`; the total is their product, so a
//! single zero factor (dead version, not accepting contracts) zeroes the
//! host. The breakdown is recomputed by the store on every host write and
//! shipped to the portal inside the update feed.
//!
//! Factors fall in two groups:
//! - **scalar** factors derived from the host's advertised state (prices,
//!   storage, collateral, age, version, contracts)
//! - **interaction** factors derived from this node's observations (uptime,
//!   interactions, latency, benchmarks); the global breakdown averages these
//!   across observing nodes

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::filters::gouging::PriceLimits;
use crate::types::host::Host;
use crate::types::primitives::Currency;

/// Storage volume a single host is scored against (1 TiB).
const DATA_PER_HOST: f64 = (1_u64 << 40) as f64;

/// Contract duration in blocks assumed when pricing collateral.
const ESTIMATED_DURATION_BLOCKS: f64 = (144 * 30 * 6) as f64;

// ═══════════════════════════════════════════════════════════════════════════════
// SCORE BREAKDOWN
// ═══════════════════════════════════════════════════════════════════════════════

/// A host's composite quality score factored into ten independent parts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    /// How far prices sit below the configured maxima.
    pub prices: f64,
    /// Advertised unused storage against the 1 TiB target.
    pub storage: f64,
    /// Collateral offered relative to the storage price.
    pub collateral: f64,
    /// Decayed success/failure ratio of this node's probes.
    pub interactions: f64,
    /// Observed uptime ratio with forgiveness.
    pub uptime: f64,
    /// Time since first announcement.
    pub age: f64,
    /// Reported daemon version.
    pub version: f64,
    /// Average successful-scan latency.
    pub latency: f64,
    /// Most recent benchmark throughput.
    pub benchmarks: f64,
    /// Whether the host accepts contracts.
    pub contracts: f64,
    /// Product of all ten factors.
    pub total: f64,
}

impl Default for ScoreBreakdown {
    fn default() -> Self {
        Self {
            prices: 0.0,
            storage: 0.0,
            collateral: 0.0,
            interactions: 0.0,
            uptime: 0.0,
            age: 0.0,
            version: 0.0,
            latency: 0.0,
            benchmarks: 0.0,
            contracts: 0.0,
            total: 0.0,
        }
    }
}

impl ScoreBreakdown {
    /// Recompute the total as the product of the ten factors.
    fn with_total(mut self) -> Self {
        self.total = self.prices
            * self.storage
            * self.collateral
            * self.interactions
            * self.uptime
            * self.age
            * self.version
            * self.latency
            * self.benchmarks
            * self.contracts;
        self
    }

    /// Merge per-node breakdowns into the global view: the interaction
    /// factors are averaged across nodes, the scalar factors are taken from
    /// the host itself (`scalar`).
    #[must_use]
    pub fn global(scalar: &Self, per_node: &[Self]) -> Self {
        if per_node.is_empty() {
            return *scalar;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = per_node.len() as f64;
        Self {
            interactions: per_node.iter().map(|b| b.interactions).sum::<f64>() / n,
            uptime: per_node.iter().map(|b| b.uptime).sum::<f64>() / n,
            latency: per_node.iter().map(|b| b.latency).sum::<f64>() / n,
            benchmarks: per_node.iter().map(|b| b.benchmarks).sum::<f64>() / n,
            ..*scalar
        }
        .with_total()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENGINE
// ═══════════════════════════════════════════════════════════════════════════════

/// Compute the full breakdown for a host as observed by this node.
#[must_use]
pub fn compute(host: &Host, limits: &PriceLimits, now: DateTime<Utc>) -> ScoreBreakdown {
    ScoreBreakdown {
        prices: prices_score(host, limits),
        storage: storage_score(host.protocol.remaining_storage()),
        collateral: collateral_score(
            host.protocol.max_collateral(),
            host.protocol.collateral(),
            host.protocol.storage_price(),
        ),
        interactions: interactions_score(host.successes, host.failures),
        uptime: uptime_score(host, now),
        age: age_score(host.first_seen, now),
        version: version_score(host),
        latency: latency_score(host),
        benchmarks: benchmarks_score(host),
        contracts: if host.protocol.accepting_contracts() {
            1.0
        } else {
            0.0
        },
        total: 0.0,
    }
    .with_total()
}

/// Average of the three price sub-scores (download, upload, storage).
fn prices_score(host: &Host, limits: &PriceLimits) -> f64 {
    let sub = |actual: Currency, max: Currency| price_sub_score(actual, max);
    (sub(host.protocol.download_price(), limits.max_download_price)
        + sub(host.protocol.upload_price(), limits.max_upload_price)
        + sub(host.protocol.storage_price(), limits.max_storage_price))
        / 3.0
}

/// One price sub-score: a price at half the limit scores 0.5, cheaper prices
/// approach 1, dearer prices decay exponentially.
fn price_sub_score(actual: Currency, max: Currency) -> f64 {
    let half_max = max.to_f64() / 2.0;
    if half_max <= 0.0 {
        return if actual.is_zero() { 1.0 } else { 0.0 };
    }
    let ratio = actual.to_f64() / half_max;
    if (ratio - 1.0).abs() < f64::EPSILON {
        0.5
    } else if ratio > 1.0 {
        1.5 / 3.0_f64.powf(ratio)
    } else {
        (0.5 / ratio).min(1.0)
    }
}

/// Unused storage against the per-host data target.
fn storage_score(remaining_storage: u64) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let expected = 0.25 * remaining_storage as f64;
    if expected >= DATA_PER_HOST {
        1.0
    } else {
        (expected / DATA_PER_HOST).powi(2)
    }
}

/// Collateral offered relative to the storage price.
fn collateral_score(max_collateral: Currency, collateral: Currency, storage_price: Currency) -> f64 {
    if max_collateral.is_zero() || collateral.is_zero() {
        return 0.0;
    }
    let expected = max_collateral
        .to_f64()
        .min(collateral.to_f64() * DATA_PER_HOST * ESTIMATED_DURATION_BLOCKS)
        .max(1.0);
    let cutoff = 1.5 * storage_price.to_f64() * DATA_PER_HOST * ESTIMATED_DURATION_BLOCKS;
    if expected < cutoff {
        f64::MIN_POSITIVE
    } else if expected >= 4.0 * cutoff {
        1.0
    } else {
        (expected - cutoff) / (3.0 * cutoff)
    }
}

/// Decayed success/failure ratio, biased optimistic for young hosts.
fn interactions_score(successes: f64, failures: f64) -> f64 {
    ((30.0 + successes) / (31.0 + successes + failures)).powi(10)
}

/// Observed uptime ratio with forgiveness for rarely-scanned hosts.
fn uptime_score(host: &Host, now: DateTime<Utc>) -> f64 {
    let newest = host.scan_history.first();
    match host.total_scans {
        0 => return 0.25,
        1 => {
            return if newest.is_some_and(|s| s.success) {
                0.75
            } else {
                0.25
            };
        }
        2 => {
            let successes = host.scan_history.iter().filter(|s| s.success).count();
            return match successes {
                2 => 0.85,
                1 => 0.5,
                _ => 0.05,
            };
        }
        _ => {}
    }

    // Count the open interval since the last scan toward whichever state
    // that scan observed.
    let mut uptime = host.uptime.as_secs_f64();
    let mut downtime = host.downtime.as_secs_f64();
    if let Some(last) = newest {
        let open = (now - last.timestamp)
            .max(TimeDelta::zero())
            .as_seconds_f64();
        if last.success {
            uptime += open;
        } else {
            downtime += open;
        }
    }
    let total = uptime + downtime;
    if total <= 0.0 {
        return 0.25;
    }

    let mut ratio = uptime / total;
    if ratio >= 0.98 {
        ratio = 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let floor = 1.0 - 0.03 * host.total_scans as f64;
    ratio = ratio.max(floor).clamp(0.0, 1.0);
    ratio.powf(200.0 * (1.0 - ratio).min(0.30))
}

/// Piecewise weight decaying from 1 as the host's age shrinks below
/// successive day thresholds.
fn age_score(first_seen: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    const THRESHOLDS: [(i64, f64); 8] = [
        (1, 3.0),
        (2, 3.0),
        (4, 3.0),
        (8, 3.0),
        (16, 2.0),
        (32, 2.0),
        (64, 2.0),
        (128, 1.5),
    ];
    let age = now - first_seen;
    let mut weight = 1.0;
    for (days, divisor) in THRESHOLDS {
        if age < TimeDelta::days(days) {
            weight /= divisor;
        }
    }
    weight
}

/// Version table: anything below 1.5.9 is dead, below 1.6.0 heavily
/// penalized. v2 hosts report no daemon version and score 1.
fn version_score(host: &Host) -> f64 {
    let Some(version) = host.protocol.version() else {
        return if host.is_v2() { 1.0 } else { 0.0 };
    };
    let Ok(version) = semver::Version::parse(version.trim_start_matches('v')) else {
        return 0.0;
    };
    if version < semver::Version::new(1, 5, 9) {
        0.0
    } else if version < semver::Version::new(1, 6, 0) {
        0.10
    } else {
        1.0
    }
}

/// Average successful-scan latency in milliseconds, linear below one second.
fn latency_score(host: &Host) -> f64 {
    let latencies: Vec<f64> = host
        .scan_history
        .iter()
        .filter(|s| s.success)
        .filter_map(|s| s.latency_ms)
        .collect();
    if latencies.is_empty() {
        return 0.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let avg = latencies.iter().sum::<f64>() / latencies.len() as f64;
    if avg <= 0.0 || avg > 1000.0 {
        0.0
    } else if avg < 10.0 {
        1.0
    } else {
        (1000.0 - avg) / 1000.0
    }
}

/// Throughput of the most recent benchmark, upload and download clamped
/// linearly to their MB/s windows.
fn benchmarks_score(host: &Host) -> f64 {
    let Some(benchmark) = host.benchmark_history.first() else {
        return 0.0;
    };
    if !benchmark.success {
        return 0.0;
    }
    let clamp = |speed_bytes: f64, low_mb: f64, high_mb: f64| {
        let mb = speed_bytes / 1e6;
        ((mb - low_mb) / (high_mb - low_mb)).clamp(0.0, 1.0)
    };
    clamp(benchmark.upload_speed, 1.0, 50.0) * clamp(benchmark.download_speed, 1.0, 100.0)
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::types::host::{HostBenchmark, HostScan};
    use crate::types::primitives::{HostKey, Network};
    use crate::types::protocol::{HostSettings, ProtocolSnapshot};

    fn limits() -> PriceLimits {
        PriceLimits {
            max_contract_price: Currency::new(1_000_000),
            max_storage_price: Currency::new(1_000),
            max_upload_price: Currency::new(2_000),
            max_download_price: Currency::new(4_000),
            max_base_rpc_price: Currency::new(100),
            max_sector_access_price: Currency::new(100),
            min_contract_duration: 144 * 30 * 6,
        }
    }

    fn scored_host(settings: HostSettings) -> Host {
        let mut host = Host::announced(
            Network::Mainnet,
            HostKey::new([0xAA; 32]),
            "1.2.3.4:9982".into(),
            false,
            Utc::now() - TimeDelta::days(200),
            1000,
        );
        host.protocol.apply_snapshot(ProtocolSnapshot::V1 {
            settings,
            price_table: None,
        });
        host
    }

    fn scan(host: &Host, at: DateTime<Utc>, success: bool, latency_ms: f64) -> HostScan {
        HostScan {
            id: 0,
            network: host.network,
            node: "eu-test".into(),
            public_key: host.public_key,
            timestamp: at,
            success,
            latency_ms: Some(latency_ms),
            error: None,
            settings: None,
        }
    }

    #[test]
    fn prices_at_half_the_maxima_score_half() {
        let host = scored_host(HostSettings {
            storage_price: Currency::new(500),
            upload_price: Currency::new(1_000),
            download_price: Currency::new(2_000),
            ..HostSettings::default()
        });
        let score = prices_score(&host, &limits());
        assert!((score - 0.5).abs() < 1e-9, "got {score}");
    }

    #[rstest]
    #[case(0, 1.0)] // free is best
    #[case(250, 1.0)] // half the reference, capped at 1
    #[case(1_000, 0.16666666666666666)] // at the limit: 1.5 / 3^2
    fn price_sub_score_table(#[case] actual: u128, #[case] expected: f64) {
        let score = price_sub_score(Currency::new(actual), Currency::new(1_000));
        assert!((score - expected).abs() < 1e-9, "got {score}");
    }

    #[test]
    fn storage_score_saturates_at_one_tib_expected() {
        // 10 TiB remaining -> expected 2.5 TiB >= 1 TiB target.
        assert!((storage_score(10 << 40) - 1.0).abs() < f64::EPSILON);
        // Tiny host scores quadratically.
        let small = storage_score(1 << 40); // expected 0.25 TiB
        assert!((small - 0.0625).abs() < 1e-9, "got {small}");
        assert_eq!(storage_score(0), 0.0);
    }

    #[test]
    fn collateral_score_zeroes_without_collateral() {
        assert_eq!(
            collateral_score(Currency::ZERO, Currency::new(10), Currency::new(10)),
            0.0
        );
        assert_eq!(
            collateral_score(Currency::coins(10), Currency::ZERO, Currency::new(10)),
            0.0
        );
    }

    #[test]
    fn collateral_score_rewards_generous_hosts() {
        let storage_price = Currency::new(100);
        // Collateral far above 4x the cutoff.
        let generous = collateral_score(
            Currency::new(u128::MAX / 2),
            Currency::new(1_000),
            storage_price,
        );
        assert!((generous - 1.0).abs() < f64::EPSILON);
        // Collateral below the cutoff is almost-zero but positive.
        let stingy = collateral_score(Currency::new(1), Currency::new(1), storage_price);
        assert!(stingy > 0.0 && stingy < 1e-100);
    }

    #[test]
    fn interactions_score_starts_optimistic() {
        let fresh = interactions_score(0.0, 0.0);
        assert!((fresh - (30.0_f64 / 31.0).powi(10)).abs() < 1e-12);
        assert!(interactions_score(100.0, 0.0) > fresh);
        assert!(interactions_score(0.0, 100.0) < 0.01);
    }

    #[test]
    fn uptime_score_small_history_table() {
        let mut host = scored_host(HostSettings::default());
        let now = Utc::now();
        assert!((uptime_score(&host, now) - 0.25).abs() < f64::EPSILON);

        host.apply_scan(scan(&host, now - TimeDelta::minutes(30), true, 20.0));
        assert!((uptime_score(&host, now) - 0.75).abs() < f64::EPSILON);

        host.apply_scan(scan(&host, now - TimeDelta::minutes(15), false, 20.0));
        assert!((uptime_score(&host, now) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn uptime_score_nine_of_ten_scans() {
        // Nine successful scans spaced 1 h apart plus one failure 15 minutes
        // after the fourth, the last success 30 minutes ago. The floor is
        // 1 - 0.03 * 10 = 0.7; the observed ratio is 495/510 minutes.
        let mut host = scored_host(HostSettings::default());
        let now = Utc::now();
        let start = now - TimeDelta::minutes(30) - TimeDelta::hours(8);
        let attempts: [(i64, bool); 10] = [
            (0, true),
            (60, true),
            (120, true),
            (180, true),
            (195, false),
            (240, true),
            (300, true),
            (360, true),
            (420, true),
            (480, true),
        ];
        for (minutes, success) in attempts {
            host.apply_scan(scan(&host, start + TimeDelta::minutes(minutes), success, 20.0));
        }
        let score = uptime_score(&host, now);
        assert!(score > 0.72 && score < 0.95, "got {score}");
    }

    #[test]
    fn perfect_uptime_is_forgiven_to_one() {
        let mut host = scored_host(HostSettings::default());
        let now = Utc::now();
        for i in 0..10 {
            host.apply_scan(scan(&host, now - TimeDelta::hours(10 - i), true, 20.0));
        }
        assert!((uptime_score(&host, now) - 1.0).abs() < f64::EPSILON);
    }

    #[rstest]
    #[case(0, 1.0 / (3.0 * 3.0 * 3.0 * 3.0 * 2.0 * 2.0 * 2.0 * 1.5))]
    #[case(5, 1.0 / (3.0 * 2.0 * 2.0 * 2.0 * 1.5))]
    #[case(200, 1.0)]
    fn age_score_table(#[case] days: i64, #[case] expected: f64) {
        let now = Utc::now();
        let score = age_score(now - TimeDelta::days(days), now);
        assert!((score - expected).abs() < 1e-12, "got {score}");
    }

    #[rstest]
    #[case("1.5.8", 0.0)]
    #[case("1.5.9", 0.10)]
    #[case("1.6.0", 1.0)]
    #[case("2.0.1", 1.0)]
    #[case("garbage", 0.0)]
    fn version_score_table(#[case] version: &str, #[case] expected: f64) {
        let host = scored_host(HostSettings {
            version: version.into(),
            ..HostSettings::default()
        });
        let score = version_score(&host);
        assert!((score - expected).abs() < f64::EPSILON, "got {score}");
    }

    #[test]
    fn latency_score_windows() {
        let mut host = scored_host(HostSettings::default());
        let now = Utc::now();
        assert_eq!(latency_score(&host), 0.0);

        host.apply_scan(scan(&host, now - TimeDelta::minutes(2), true, 5.0));
        assert!((latency_score(&host) - 1.0).abs() < f64::EPSILON);

        host.apply_scan(scan(&host, now - TimeDelta::minutes(1), true, 495.0));
        // Average of 5 and 495 is 250ms.
        assert!((latency_score(&host) - 0.75).abs() < f64::EPSILON);

        host.apply_scan(scan(&host, now, true, 3000.0));
        host.apply_scan(scan(&host, now + TimeDelta::minutes(1), true, 3000.0));
        assert_eq!(latency_score(&host), 0.0);
    }

    #[test]
    fn benchmarks_score_clamps_linear_windows() {
        let mut host = scored_host(HostSettings::default());
        assert_eq!(benchmarks_score(&host), 0.0);

        host.apply_benchmark(HostBenchmark {
            id: 0,
            network: host.network,
            node: "eu-test".into(),
            public_key: host.public_key,
            timestamp: Utc::now(),
            success: true,
            upload_speed: 50e6,
            download_speed: 100e6,
            ttfb_ms: 80.0,
            error: None,
        });
        assert!((benchmarks_score(&host) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn s1_discovery_expectations() {
        // Settings declaring 10 TiB remaining, prices at half the maxima,
        // accepting contracts, observed by one 25ms successful scan.
        let mut host = scored_host(HostSettings {
            accepting_contracts: true,
            remaining_storage: 10 << 40,
            storage_price: Currency::new(500),
            upload_price: Currency::new(1_000),
            download_price: Currency::new(2_000),
            ..HostSettings::default()
        });
        let now = Utc::now();
        host.apply_scan(scan(&host, now, true, 25.0));

        let breakdown = compute(&host, &limits(), now);
        assert!((breakdown.prices - 0.5).abs() < 1e-9);
        assert!((breakdown.storage - 1.0).abs() < f64::EPSILON);
        assert!((breakdown.contracts - 1.0).abs() < f64::EPSILON);
        assert!((breakdown.uptime - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn global_breakdown_averages_interaction_factors() {
        let scalar = ScoreBreakdown {
            prices: 0.5,
            storage: 1.0,
            collateral: 1.0,
            age: 1.0,
            version: 1.0,
            contracts: 1.0,
            ..ScoreBreakdown::default()
        };
        let a = ScoreBreakdown {
            uptime: 1.0,
            interactions: 0.8,
            latency: 1.0,
            benchmarks: 0.5,
            ..scalar
        };
        let b = ScoreBreakdown {
            uptime: 0.5,
            interactions: 0.4,
            latency: 0.5,
            benchmarks: 0.0,
            ..scalar
        };
        let global = ScoreBreakdown::global(&scalar, &[a, b]);
        assert!((global.uptime - 0.75).abs() < f64::EPSILON);
        assert!((global.interactions - 0.6).abs() < f64::EPSILON);
        assert!((global.latency - 0.75).abs() < f64::EPSILON);
        assert!((global.benchmarks - 0.25).abs() < f64::EPSILON);
        assert!((global.prices - 0.5).abs() < f64::EPSILON);
    }

    proptest! {
        #[test]
        fn storage_score_is_monotonic(a in 0_u64..1 << 45, b in 0_u64..1 << 45) {
            let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
            prop_assert!(storage_score(lo) <= storage_score(hi));
        }

        #[test]
        fn interactions_score_never_rises_with_failures(
            successes in 0.0_f64..10_000.0,
            f_lo in 0.0_f64..10_000.0,
            f_hi in 0.0_f64..10_000.0,
        ) {
            let (lo, hi) = if f_lo <= f_hi { (f_lo, f_hi) } else { (f_hi, f_lo) };
            prop_assert!(
                interactions_score(successes, hi) <= interactions_score(successes, lo)
            );
        }

        #[test]
        fn latency_window_is_strictly_decreasing(a in 10.0_f64..1000.0, b in 10.0_f64..1000.0) {
            prop_assume!((a - b).abs() > 1e-6);
            let score = |avg: f64| (1000.0 - avg) / 1000.0;
            let (lo, hi) = if a < b { (a, b) } else { (b, a) };
            prop_assert!(score(hi) < score(lo));
        }
    }
}
