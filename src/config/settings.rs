//! Settings structs and loading logic.
//!
//! All settings have sensible defaults and can be overridden via
//! configuration files or environment variables.

use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// Identity of this observing node.
    pub node: NodeSettings,
    /// Database configuration.
    pub database: DatabaseSettings,
    /// Networks to observe and their daemon endpoints.
    pub networks: Vec<NetworkSettings>,
    /// Update-feed listener configuration.
    pub portal: PortalSettings,
    /// Scan/benchmark tunables.
    pub scanner: ScannerSettings,
    /// Fiat price ceilings behind the gouging checks.
    pub limits: LimitSettings,
    /// Exchange-rate source configuration.
    pub exchange: ExchangeSettings,
    /// IP geolocation service configuration.
    pub geolocation: GeoSettings,
    /// Record pruning configuration.
    pub prune: PruneSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Settings {
    /// Load settings from configuration files and environment variables.
    ///
    /// Files are loaded in this order (later overrides earlier):
    /// 1. `config/default.toml`
    /// 2. `config/{environment}.toml` (if exists)
    /// 3. Environment variables with `HOSTSCORE_` prefix
    ///
    /// # Errors
    /// Returns `ConfigError` if configuration is invalid or cannot be loaded.
    pub fn load(environment: &str) -> Result<Self, ConfigError> {
        let config_dir = std::env::var("CONFIG_DIR").unwrap_or_else(|_| "config".into());

        let builder = Config::builder()
            .set_default("node.name", "global")?
            .set_default("node.dir", "data")?
            .set_default("database.url", "postgres://localhost/hostscore")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 1)?
            .set_default("database.connect_timeout_ms", 5_000)?
            .set_default("networks", Vec::<String>::new())?
            .set_default("portal.listen", "127.0.0.1:9980")?
            .set_default("scanner.scan_timeout_ms", 30_000)?
            .set_default("scanner.benchmark_timeout_ms", 600_000)?
            .set_default("scanner.sweep_interval_ms", 30_000)?
            .set_default("scanner.contract_duration", 4_320)?
            .set_default("scanner.benchmark_size_bytes", 64 * 1024 * 1024)?
            .set_default("limits.max_contract_price_usd", 1.0)?
            .set_default("limits.max_storage_price_usd_tb_month", 5.0)?
            .set_default("limits.max_upload_price_usd_tb", 5.0)?
            .set_default("limits.max_download_price_usd_tb", 10.0)?
            .set_default("limits.max_base_rpc_price_usd", 0.01)?
            .set_default("limits.max_sector_access_price_usd", 0.01)?
            .set_default("limits.min_contract_duration", 25_920)?
            .set_default("limits.refresh_interval_ms", 600_000)?
            .set_default("exchange.url", "https://api.siacentral.com/v2/market/exchange-rate")?
            .set_default("exchange.refresh_interval_ms", 600_000)?
            .set_default("geolocation.url", "https://ipinfo.io")?
            .set_default("geolocation.token", "")?
            .set_default("prune.interval_ms", 3_600_000)?
            .set_default("prune.scan_max_age_secs", 7 * 24 * 3_600)?
            .set_default("prune.benchmark_max_age_secs", 28 * 24 * 3_600)?
            .set_default("prune.chunk", 1_000)?
            .set_default("logging.level", "info")?
            .set_default("logging.format", "compact")?
            .add_source(File::with_name(&format!("{config_dir}/default")).required(false))
            .add_source(File::with_name(&format!("{config_dir}/{environment}")).required(false))
            .add_source(
                Environment::with_prefix("HOSTSCORE")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Load settings from a specific file path.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()))
            .build()?
            .try_deserialize()
    }

    /// Validate settings and return any validation errors.
    ///
    /// # Errors
    /// Returns a list of validation error messages.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.node.name.is_empty() {
            errors.push("node.name cannot be empty".into());
        }
        if self.database.url.is_empty() {
            errors.push("database.url cannot be empty".into());
        }
        if self.database.max_connections == 0 {
            errors.push("database.max_connections must be non-zero".into());
        }
        if self.database.min_connections > self.database.max_connections {
            errors.push("database.min_connections cannot exceed max_connections".into());
        }
        if self.networks.is_empty() {
            errors.push("at least one network must be configured".into());
        }
        for network in &self.networks {
            if network.name.parse::<crate::types::Network>().is_err() {
                errors.push(format!("unknown network name: {}", network.name));
            }
            if network.chain_url.is_empty() {
                errors.push(format!("networks.{}.chain_url cannot be empty", network.name));
            }
        }
        if self.portal.listen.is_empty() {
            errors.push("portal.listen cannot be empty".into());
        }
        if self.scanner.benchmark_size_bytes == 0 {
            errors.push("scanner.benchmark_size_bytes must be non-zero".into());
        }
        if self.scanner.contract_duration == 0 {
            errors.push("scanner.contract_duration must be non-zero".into());
        }
        if self.limits.min_contract_duration == 0 {
            errors.push("limits.min_contract_duration must be non-zero".into());
        }
        if self.prune.chunk <= 0 {
            errors.push("prune.chunk must be positive".into());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Identity of this observing node.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeSettings {
    /// Node name stamped onto scans and benchmarks.
    pub name: String,
    /// Persistence directory (configuration, migrations state).
    pub dir: String,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// PostgreSQL connection URL.
    pub url: String,
    /// Maximum connections in the pool.
    pub max_connections: u32,
    /// Minimum connections to maintain.
    pub min_connections: u32,
    /// Connection timeout in milliseconds.
    pub connect_timeout_ms: u64,
}

impl DatabaseSettings {
    /// Get the connection timeout as a `Duration`.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// One observed network and the daemon endpoints serving it.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkSettings {
    /// Network name (`mainnet`, `zen`).
    pub name: String,
    /// Chain daemon base URL.
    pub chain_url: String,
    /// Wallet daemon base URL.
    pub wallet_url: String,
    /// Syncer daemon base URL.
    pub syncer_url: String,
    /// RHP session gateway base URL.
    pub rhp_url: String,
}

/// Update-feed listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalSettings {
    /// TCP address the feed listener binds to.
    pub listen: String,
}

/// Scan/benchmark tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct ScannerSettings {
    /// Per-scan deadline in milliseconds.
    pub scan_timeout_ms: u64,
    /// Whole-benchmark deadline in milliseconds.
    pub benchmark_timeout_ms: u64,
    /// Pause between queue sweeps in milliseconds.
    pub sweep_interval_ms: u64,
    /// Benchmark contract duration in blocks.
    pub contract_duration: u64,
    /// Bytes uploaded and downloaded per benchmark.
    pub benchmark_size_bytes: u64,
}

impl ScannerSettings {
    /// Get the scan deadline as a `Duration`.
    #[must_use]
    pub const fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }

    /// Get the benchmark deadline as a `Duration`.
    #[must_use]
    pub const fn benchmark_timeout(&self) -> Duration {
        Duration::from_millis(self.benchmark_timeout_ms)
    }

    /// Get the sweep interval as a `Duration`.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

/// Fiat price ceilings; converted into currency limits by the price-limit
/// maintainer as the exchange rate moves.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitSettings {
    /// Ceiling on the contract formation price, in USD.
    pub max_contract_price_usd: f64,
    /// Ceiling on the storage price, in USD per TB-month.
    pub max_storage_price_usd_tb_month: f64,
    /// Ceiling on the upload price, in USD per TB.
    pub max_upload_price_usd_tb: f64,
    /// Ceiling on the download price, in USD per TB.
    pub max_download_price_usd_tb: f64,
    /// Ceiling on the flat per-RPC price, in USD.
    pub max_base_rpc_price_usd: f64,
    /// Ceiling on the per-sector-access price, in USD.
    pub max_sector_access_price_usd: f64,
    /// Shortest maximum contract duration a host must accept, in blocks.
    pub min_contract_duration: u64,
    /// Pause between limit refreshes in milliseconds.
    pub refresh_interval_ms: u64,
}

impl LimitSettings {
    /// Get the refresh interval as a `Duration`.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// Exchange-rate source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeSettings {
    /// Exchange-rate endpoint URL.
    pub url: String,
    /// Pause between rate refreshes in milliseconds.
    pub refresh_interval_ms: u64,
}

impl ExchangeSettings {
    /// Get the refresh interval as a `Duration`.
    #[must_use]
    pub const fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }
}

/// IP geolocation service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GeoSettings {
    /// Geolocation service base URL.
    pub url: String,
    /// Access token for the service.
    pub token: String,
}

/// Record pruning configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PruneSettings {
    /// Pause between prune passes in milliseconds.
    pub interval_ms: u64,
    /// Scans older than this many seconds are deleted.
    pub scan_max_age_secs: u64,
    /// Benchmarks older than this many seconds are deleted.
    pub benchmark_max_age_secs: u64,
    /// Rows deleted per statement.
    pub chunk: i64,
}

impl PruneSettings {
    /// Get the prune interval as a `Duration`.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Get the scan retention window as a `Duration`.
    #[must_use]
    pub const fn scan_max_age(&self) -> Duration {
        Duration::from_secs(self.scan_max_age_secs)
    }

    /// Get the benchmark retention window as a `Duration`.
    #[must_use]
    pub const fn benchmark_max_age(&self) -> Duration {
        Duration::from_secs(self.benchmark_max_age_secs)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (`trace` through `error`).
    pub level: String,
    /// Output format: `compact` or `json`.
    pub format: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
