//! Exchange-rate client and the price-limit maintainer.
//!
//! The gouging limits are quoted in USD in the configuration; the
//! maintainer converts them into currency ceilings with the current
//! exchange rate and swaps them into the shared [`SharedPriceLimits`] on a
//! timer. Readers snapshot; nothing ever blocks on a refresh.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::LimitSettings;
use crate::error::{InfraError, Result};
use crate::filters::gouging::{PriceLimits, SharedPriceLimits};
use crate::ports::oracle::ExchangeRateSource;
use crate::types::primitives::Currency;

/// Base units per whole coin.
const COIN: f64 = 1e24;

/// Bytes per TB as the fiat targets quote it.
const BYTES_PER_TB: f64 = 1e12;

/// Blocks per month, for the storage price conversion.
const BLOCKS_PER_MONTH: f64 = 4_320.0;

// ═══════════════════════════════════════════════════════════════════════════════
// EXCHANGE-RATE CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct RateResponse {
    /// USD price of one coin.
    rate: f64,
}

/// reqwest-backed exchange-rate source.
#[derive(Debug)]
pub struct HttpExchangeRate {
    client: reqwest::Client,
    url: String,
}

impl HttpExchangeRate {
    /// Create a source over a rate endpoint URL.
    #[must_use]
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ExchangeRateSource for HttpExchangeRate {
    async fn usd_rate(&self) -> Result<f64> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(InfraError::Http)?
            .error_for_status()
            .map_err(InfraError::Http)?;
        let rate: RateResponse = response.json().await.map_err(InfraError::Http)?;
        if !rate.rate.is_finite() || rate.rate <= 0.0 {
            return Err(
                InfraError::Rpc(format!("non-positive exchange rate: {}", rate.rate).into())
                    .into(),
            );
        }
        Ok(rate.rate)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// PRICE-LIMIT MAINTAINER
// ═══════════════════════════════════════════════════════════════════════════════

/// Derive the currency ceilings from the fiat targets at a given rate
/// (USD per coin).
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn limits_from_rate(settings: &LimitSettings, usd_rate: f64) -> PriceLimits {
    let usd = |amount: f64| -> Currency {
        if usd_rate <= 0.0 || !amount.is_finite() {
            return Currency::ZERO;
        }
        Currency::new((amount / usd_rate * COIN) as u128)
    };

    PriceLimits {
        max_contract_price: usd(settings.max_contract_price_usd),
        max_storage_price: usd(
            settings.max_storage_price_usd_tb_month / BYTES_PER_TB / BLOCKS_PER_MONTH,
        ),
        max_upload_price: usd(settings.max_upload_price_usd_tb / BYTES_PER_TB),
        max_download_price: usd(settings.max_download_price_usd_tb / BYTES_PER_TB),
        max_base_rpc_price: usd(settings.max_base_rpc_price_usd),
        max_sector_access_price: usd(settings.max_sector_access_price_usd),
        min_contract_duration: settings.min_contract_duration,
    }
}

/// Refreshes the shared price limits from the exchange rate on a timer.
pub struct PriceLimitMaintainer {
    oracle: Arc<dyn ExchangeRateSource>,
    limits: SharedPriceLimits,
    settings: LimitSettings,
}

impl std::fmt::Debug for PriceLimitMaintainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceLimitMaintainer")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl PriceLimitMaintainer {
    /// Create a maintainer over the shared limits.
    #[must_use]
    pub fn new(
        oracle: Arc<dyn ExchangeRateSource>,
        limits: SharedPriceLimits,
        settings: LimitSettings,
    ) -> Self {
        Self {
            oracle,
            limits,
            settings,
        }
    }

    /// Fetch the rate once and swap refreshed limits in.
    ///
    /// # Errors
    /// Returns an error if the rate fetch fails; the previous limits stay
    /// in place.
    pub async fn refresh(&self) -> Result<()> {
        let rate = self.oracle.usd_rate().await?;
        let limits = limits_from_rate(&self.settings, rate);
        self.limits.store(limits);
        debug!(rate, "Refreshed price limits");
        Ok(())
    }

    /// Refresh immediately, then on the configured interval until
    /// cancelled.
    pub async fn run(self, token: CancellationToken) {
        if let Err(e) = self.refresh().await {
            warn!(error = %e, "Initial price-limit refresh failed");
        } else {
            info!("Price limits initialized from exchange rate");
        }
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                () = sleep(self.settings.refresh_interval()) => {}
            }
            if let Err(e) = self.refresh().await {
                warn!(error = %e, "Price-limit refresh failed, keeping previous limits");
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
