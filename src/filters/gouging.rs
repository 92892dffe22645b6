//! Price-gouging checks run before contract formation.
//!
//! Limits are process-wide configuration: initialized at startup from the
//! configured fiat targets, then refreshed by the price-limit maintainer as
//! the exchange rate moves. Readers snapshot under a lock; the checks are
//! pure functions over a snapshot.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::types::primitives::Currency;
use crate::types::protocol::{HostSettings, V2HostSettings};

/// Bytes in a TiB, the unit the bandwidth limits are quoted in.
const TIB: u128 = 1 << 40;

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE LIMITS
// ═══════════════════════════════════════════════════════════════════════════════

/// The dynamic price ceilings a host must stay under to be benchmarked.
///
/// Storage is per byte per block; upload/download are per byte. The
/// maintainer derives these from fiat targets divided by the current
/// exchange rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceLimits {
    /// Ceiling on the fixed contract formation price.
    pub max_contract_price: Currency,
    /// Ceiling on the storage price, per byte per block.
    pub max_storage_price: Currency,
    /// Ceiling on the upload price, per byte.
    pub max_upload_price: Currency,
    /// Ceiling on the download price, per byte.
    pub max_download_price: Currency,
    /// Ceiling on the flat per-RPC price.
    pub max_base_rpc_price: Currency,
    /// Ceiling on the per-sector-access price.
    pub max_sector_access_price: Currency,
    /// Shortest maximum contract duration a host must accept, in blocks.
    pub min_contract_duration: u64,
}

impl Default for PriceLimits {
    fn default() -> Self {
        Self {
            max_contract_price: Currency::ZERO,
            max_storage_price: Currency::ZERO,
            max_upload_price: Currency::ZERO,
            max_download_price: Currency::ZERO,
            max_base_rpc_price: Currency::ZERO,
            max_sector_access_price: Currency::ZERO,
            min_contract_duration: 144 * 30 * 6,
        }
    }
}

/// Shared, refreshable view of the current limits.
#[derive(Debug, Clone, Default)]
pub struct SharedPriceLimits {
    inner: Arc<RwLock<PriceLimits>>,
}

impl SharedPriceLimits {
    /// Wrap an initial limit set.
    #[must_use]
    pub fn new(limits: PriceLimits) -> Self {
        Self {
            inner: Arc::new(RwLock::new(limits)),
        }
    }

    /// Snapshot the current limits.
    #[must_use]
    pub fn snapshot(&self) -> PriceLimits {
        *self.inner.read()
    }

    /// Swap in refreshed limits.
    pub fn store(&self, limits: PriceLimits) {
        *self.inner.write() = limits;
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// GOUGING CHECKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Verify a v1 host's settings against the limits.
///
/// # Errors
/// Returns the first violation as a descriptive [`DomainError`].
pub fn check_v1(settings: &HostSettings, limits: &PriceLimits) -> Result<(), DomainError> {
    if !settings.accepting_contracts {
        return Err(DomainError::NotAcceptingContracts);
    }
    if settings.max_collateral.is_zero() {
        return Err(DomainError::Gouging("host offers no collateral".into()));
    }
    if settings.max_duration < limits.min_contract_duration {
        return Err(DomainError::Gouging(format!(
            "max contract duration {} below required {}",
            settings.max_duration, limits.min_contract_duration
        )));
    }
    check_price("contract price", settings.contract_price, limits.max_contract_price)?;
    check_price("storage price", settings.storage_price, limits.max_storage_price)?;
    check_price("upload price", settings.upload_price, limits.max_upload_price)?;
    check_price("download price", settings.download_price, limits.max_download_price)?;
    check_price("base RPC price", settings.base_rpc_price, limits.max_base_rpc_price)?;
    check_price(
        "sector access price",
        settings.sector_access_price,
        limits.max_sector_access_price,
    )?;
    check_price(
        "upload price per TiB",
        settings.upload_price.saturating_mul(TIB),
        limits.max_upload_price.saturating_mul(TIB),
    )?;
    check_price(
        "download price per TiB",
        settings.download_price.saturating_mul(TIB),
        limits.max_download_price.saturating_mul(TIB),
    )?;
    Ok(())
}

/// Verify a v2 host's settings against the limits.
///
/// # Errors
/// Returns the first violation as a descriptive [`DomainError`].
pub fn check_v2(settings: &V2HostSettings, limits: &PriceLimits) -> Result<(), DomainError> {
    if !settings.accepting_contracts {
        return Err(DomainError::NotAcceptingContracts);
    }
    if settings.max_collateral.is_zero() {
        return Err(DomainError::Gouging("host offers no collateral".into()));
    }
    if settings.max_contract_duration < limits.min_contract_duration {
        return Err(DomainError::Gouging(format!(
            "max contract duration {} below required {}",
            settings.max_contract_duration, limits.min_contract_duration
        )));
    }
    check_price(
        "contract price",
        settings.prices.contract_price,
        limits.max_contract_price,
    )?;
    check_price(
        "storage price",
        settings.prices.storage_price,
        limits.max_storage_price,
    )?;
    check_price("ingress price", settings.prices.ingress_price, limits.max_upload_price)?;
    check_price("egress price", settings.prices.egress_price, limits.max_download_price)?;
    check_price(
        "ingress price per TiB",
        settings.prices.ingress_price.saturating_mul(TIB),
        limits.max_upload_price.saturating_mul(TIB),
    )?;
    check_price(
        "egress price per TiB",
        settings.prices.egress_price.saturating_mul(TIB),
        limits.max_download_price.saturating_mul(TIB),
    )?;
    Ok(())
}

fn check_price(what: &str, actual: Currency, max: Currency) -> Result<(), DomainError> {
    if actual > max {
        return Err(DomainError::Gouging(format!(
            "{what} {actual} exceeds limit {max}"
        )));
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::protocol::V2Prices;

    fn limits() -> PriceLimits {
        PriceLimits {
            max_contract_price: Currency::new(1_000_000),
            max_storage_price: Currency::new(1_000),
            max_upload_price: Currency::new(2_000),
            max_download_price: Currency::new(4_000),
            max_base_rpc_price: Currency::new(100),
            max_sector_access_price: Currency::new(100),
            min_contract_duration: 4_320,
        }
    }

    fn good_v1() -> HostSettings {
        HostSettings {
            accepting_contracts: true,
            max_duration: 10_000,
            contract_price: Currency::new(500_000),
            storage_price: Currency::new(500),
            upload_price: Currency::new(1_000),
            download_price: Currency::new(2_000),
            base_rpc_price: Currency::new(10),
            sector_access_price: Currency::new(10),
            max_collateral: Currency::coins(100),
            collateral: Currency::new(200),
            ..HostSettings::default()
        }
    }

    #[test]
    fn compliant_v1_host_passes() {
        assert!(check_v1(&good_v1(), &limits()).is_ok());
    }

    #[test]
    fn not_accepting_contracts_is_rejected_first() {
        let settings = HostSettings {
            accepting_contracts: false,
            ..good_v1()
        };
        assert!(matches!(
            check_v1(&settings, &limits()),
            Err(DomainError::NotAcceptingContracts)
        ));
    }

    #[test]
    fn zero_max_collateral_fails_gouging() {
        let settings = HostSettings {
            max_collateral: Currency::ZERO,
            ..good_v1()
        };
        let err = check_v1(&settings, &limits()).unwrap_err();
        assert!(err.to_string().contains("collateral"));
    }

    #[test]
    fn overpriced_storage_is_named_in_the_error() {
        let settings = HostSettings {
            storage_price: Currency::new(5_000),
            ..good_v1()
        };
        let err = check_v1(&settings, &limits()).unwrap_err();
        assert!(err.to_string().contains("storage price"), "{err}");
    }

    #[test]
    fn short_max_duration_is_rejected() {
        let settings = HostSettings {
            max_duration: 100,
            ..good_v1()
        };
        let err = check_v1(&settings, &limits()).unwrap_err();
        assert!(err.to_string().contains("duration"), "{err}");
    }

    #[test]
    fn v2_checks_mirror_v1() {
        let settings = V2HostSettings {
            accepting_contracts: true,
            max_contract_duration: 10_000,
            max_collateral: Currency::coins(100),
            prices: V2Prices {
                contract_price: Currency::new(500_000),
                storage_price: Currency::new(500),
                ingress_price: Currency::new(1_000),
                egress_price: Currency::new(2_000),
                collateral: Currency::new(200),
            },
            ..V2HostSettings::default()
        };
        assert!(check_v2(&settings, &limits()).is_ok());

        let gouging = V2HostSettings {
            prices: V2Prices {
                egress_price: Currency::new(40_000),
                ..settings.prices.clone()
            },
            ..settings
        };
        let err = check_v2(&gouging, &limits()).unwrap_err();
        assert!(err.to_string().contains("egress"), "{err}");
    }

    #[test]
    fn shared_limits_snapshot_and_store() {
        let shared = SharedPriceLimits::new(limits());
        assert_eq!(shared.snapshot().max_storage_price, Currency::new(1_000));
        shared.store(PriceLimits {
            max_storage_price: Currency::new(9_999),
            ..limits()
        });
        assert_eq!(shared.snapshot().max_storage_price, Currency::new(9_999));
    }
}
