//! Port for the renter-host protocol transports.
//!
//! Each method opens a single authenticated session against the host and
//! performs one protocol-atomic RPC: settings and price tables for scans;
//! contract formation, account funding and sector transfer for benchmarks.
//! The v1 generation dials the v2 wire transport for settings, v3 for the
//! price table and sector RPCs; the v2 generation dials siamux and speaks
//! the v4 RPCs. Transport management is entirely the adapter's concern.

use async_trait::async_trait;

use super::chain::ChainTransaction;
use crate::error::Result;
use crate::types::primitives::{Currency, HostKey};
use crate::types::protocol::{
    ContractRevision, HostPriceTable, HostSettings, V2ContractRevision, V2HostSettings,
};

/// Parameters of a v1 contract formation.
#[derive(Debug, Clone)]
pub struct FormContractParams {
    /// Renter public key the contract is formed under.
    pub renter_key: HostKey,
    /// Renter payout address.
    pub renter_address: String,
    /// Renter funding put into the contract.
    pub funding: Currency,
    /// Host collateral demanded for the contract.
    pub collateral: Currency,
    /// Contract duration in blocks.
    pub duration: u64,
    /// Transaction fee included in the formation transaction.
    pub fee: Currency,
    /// The funded and signed formation transaction.
    pub transaction: ChainTransaction,
}

/// A formed v1 contract: the initial revision plus the transaction set to
/// broadcast.
#[derive(Debug, Clone)]
pub struct FormedContract {
    /// Initial contract revision.
    pub revision: ContractRevision,
    /// Signed transaction set for the pool.
    pub transaction_set: Vec<ChainTransaction>,
}

/// A formed v2 contract.
#[derive(Debug, Clone)]
pub struct FormedContractV2 {
    /// Initial contract revision.
    pub revision: V2ContractRevision,
    /// Signed transaction set for the pool.
    pub transaction_set: Vec<ChainTransaction>,
}

/// Port for the low-level RHP RPCs, one session per call.
#[async_trait]
pub trait RhpClient: Send + Sync {
    // ── v1 generation ─────────────────────────────────────────────────────────

    /// Fetch host settings over the v2 wire transport.
    ///
    /// # Errors
    /// Returns an error if the dial or the RPC fails.
    async fn settings(&self, net_address: &str, host_key: HostKey) -> Result<HostSettings>;

    /// Fetch a price table over the v3 transport, paying by contract when a
    /// revision is supplied.
    ///
    /// # Errors
    /// Returns an error if the dial or the RPC fails.
    async fn price_table(
        &self,
        net_address: &str,
        host_key: HostKey,
        payment: Option<&ContractRevision>,
    ) -> Result<HostPriceTable>;

    /// Form a new contract with the host.
    ///
    /// # Errors
    /// Returns an error if the host refuses or the session fails.
    async fn form_contract(
        &self,
        net_address: &str,
        host_key: HostKey,
        params: FormContractParams,
    ) -> Result<FormedContract>;

    /// Fetch the latest revision of an existing contract over v3.
    ///
    /// # Errors
    /// Returns an error if the contract is unknown or the session fails.
    async fn latest_revision(
        &self,
        net_address: &str,
        host_key: HostKey,
        contract_id: &str,
    ) -> Result<ContractRevision>;

    /// Fund the renter's ephemeral account from the contract.
    ///
    /// # Errors
    /// Returns an error if the payment is rejected or the session fails.
    async fn fund_account(
        &self,
        net_address: &str,
        host_key: HostKey,
        revision: &ContractRevision,
        price_table: &HostPriceTable,
        amount: Currency,
    ) -> Result<()>;

    /// Append one sector, paying by ephemeral account. Returns the sector
    /// root.
    ///
    /// # Errors
    /// Returns an error if the write is rejected or the session fails.
    async fn append_sector(
        &self,
        net_address: &str,
        host_key: HostKey,
        price_table: &HostPriceTable,
        sector: &[u8],
    ) -> Result<String>;

    /// Read one sector by root, paying by ephemeral account.
    ///
    /// # Errors
    /// Returns an error if the read is rejected or the session fails.
    async fn read_sector(
        &self,
        net_address: &str,
        host_key: HostKey,
        price_table: &HostPriceTable,
        root: &str,
    ) -> Result<Vec<u8>>;

    // ── v2 generation ─────────────────────────────────────────────────────────

    /// Fetch v2 host settings over siamux (v4 settings RPC).
    ///
    /// # Errors
    /// Returns an error if no siamux address answers.
    async fn settings_v2(
        &self,
        siamux_addresses: &[String],
        host_key: HostKey,
    ) -> Result<V2HostSettings>;

    /// Form a new v2 contract with the host.
    ///
    /// # Errors
    /// Returns an error if the host refuses or the session fails.
    async fn form_contract_v2(
        &self,
        siamux_addresses: &[String],
        host_key: HostKey,
        params: FormContractParams,
    ) -> Result<FormedContractV2>;

    /// Append one sector under a v2 contract. Returns the sector root and
    /// the revised contract.
    ///
    /// # Errors
    /// Returns an error if the write is rejected or the session fails.
    async fn append_sector_v2(
        &self,
        siamux_addresses: &[String],
        host_key: HostKey,
        revision: &V2ContractRevision,
        sector: &[u8],
    ) -> Result<(String, V2ContractRevision)>;

    /// Read one sector by root under a v2 contract.
    ///
    /// # Errors
    /// Returns an error if the read is rejected or the session fails.
    async fn read_sector_v2(
        &self,
        siamux_addresses: &[String],
        host_key: HostKey,
        revision: &V2ContractRevision,
        root: &str,
    ) -> Result<Vec<u8>>;
}
