//! Port for the fiat exchange-rate source.

use async_trait::async_trait;

use crate::error::Result;

/// Port for the exchange-rate fetcher consumed by the price-limit
/// maintainer.
#[async_trait]
pub trait ExchangeRateSource: Send + Sync {
    /// The current USD price of one coin.
    ///
    /// # Errors
    /// Returns an error if the source is unreachable or returns a
    /// non-positive rate.
    async fn usd_rate(&self) -> Result<f64>;
}
