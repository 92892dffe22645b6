//! Port for the renter wallet.

use async_trait::async_trait;

use super::chain::ChainTransaction;
use crate::error::Result;
use crate::types::primitives::{Currency, HostKey};

/// Port for the wallet funding benchmark contracts, one per network.
#[async_trait]
pub trait Wallet: Send + Sync {
    /// The renter public key contracts are formed under.
    fn key(&self) -> HostKey;

    /// The renter payout address.
    ///
    /// # Errors
    /// Returns an error if the wallet is unreachable.
    async fn address(&self) -> Result<String>;

    /// Add inputs covering `amount` to the transaction.
    ///
    /// # Errors
    /// Returns [`crate::error::AppError::InsufficientBalance`] when the
    /// wallet cannot cover the amount; this aborts the benchmark without
    /// penalizing the host.
    async fn fund_transaction(
        &self,
        transaction: &mut ChainTransaction,
        amount: Currency,
    ) -> Result<()>;

    /// Sign the funded transaction.
    ///
    /// # Errors
    /// Returns an error if the wallet rejects the transaction.
    async fn sign_transaction(&self, transaction: &mut ChainTransaction) -> Result<()>;
}
