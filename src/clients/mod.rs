//! HTTP adapters for the external daemons the core consumes: the chain
//! daemon, the wallet daemon, the peer syncer, and the RHP session
//! gateway.
//!
//! Each adapter is a thin, typed reqwest client over one daemon's JSON
//! API, implementing the matching port trait. All adapters share a single
//! `reqwest::Client` and are `Send + Sync`, so they can be cloned across
//! worker tasks freely.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{AppError, InfraError, Result};
use crate::ports::chain::{
    BlockUpdate, ChainEvent, ChainSource, ChainTransaction, HostAnnouncement,
};
use crate::ports::rhp::{FormContractParams, FormedContract, FormedContractV2, RhpClient};
use crate::ports::syncer::{Peer, Syncer};
use crate::ports::wallet::Wallet;
use crate::types::primitives::{BlockId, Currency, HostKey, Network};
use crate::types::protocol::{
    ContractRevision, HostPriceTable, HostSettings, V2ContractRevision, V2HostSettings,
};
use crate::types::ChainTip;

/// Timeout on every daemon request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Poll cadence of the chain event poller.
const EVENT_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Blocks pulled per event-poller request.
const EVENT_POLL_BATCH: usize = 100;

/// Capacity of the chain event channel.
const EVENT_CHANNEL_CAPACITY: usize = 1_024;

/// Build the shared HTTP client the adapters hang off.
///
/// # Errors
/// Returns an error if the TLS backend cannot be initialized.
pub fn http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AppError::Initialization(format!("http client: {e}")))
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if body.contains("insufficient balance") {
        return Err(AppError::InsufficientBalance(body));
    }
    Err(InfraError::Rpc(format!("daemon returned {status}: {body}").into()).into())
}

async fn get_json<T: DeserializeOwned>(client: &reqwest::Client, url: String) -> Result<T> {
    let response = client.get(&url).send().await.map_err(InfraError::Http)?;
    let response = check_status(response).await?;
    Ok(response.json().await.map_err(InfraError::Http)?)
}

async fn post_json<B: Serialize + Sync, T: DeserializeOwned>(
    client: &reqwest::Client,
    url: String,
    body: &B,
) -> Result<T> {
    let response = client
        .post(&url)
        .json(body)
        .send()
        .await
        .map_err(InfraError::Http)?;
    let response = check_status(response).await?;
    Ok(response.json().await.map_err(InfraError::Http)?)
}

// ═══════════════════════════════════════════════════════════════════════════════
// CHAIN DAEMON CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct TipResponse {
    height: u64,
    id: String,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    updates: Vec<UpdateEntry>,
}

#[derive(Debug, Deserialize)]
struct UpdateEntry {
    height: u64,
    id: String,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    announcements: Vec<HostAnnouncement>,
}

impl UpdateEntry {
    fn into_block_update(self) -> Result<BlockUpdate> {
        let block_id = BlockId::from_hex(&self.id)
            .map_err(|e| InfraError::Rpc(format!("invalid block id from daemon: {e}").into()))?;
        Ok(BlockUpdate {
            height: self.height,
            block_id,
            timestamp: self.timestamp,
            announcements: self.announcements,
        })
    }
}

#[derive(Debug, Deserialize)]
struct FeeResponse {
    fee: Currency,
}

#[derive(Debug, Deserialize)]
struct TxPoolResponse {
    transactions: Vec<ChainTransaction>,
}

/// Client for one network's chain daemon.
#[derive(Debug)]
pub struct DaemonChainClient {
    client: reqwest::Client,
    base_url: String,
    network: Network,
    events: broadcast::Sender<ChainEvent>,
    poll_tip: Mutex<Option<ChainTip>>,
}

impl DaemonChainClient {
    /// Create a client over a chain daemon base URL.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, network: Network) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            base_url: base_url.into(),
            network,
            events,
            poll_tip: Mutex::new(None),
        }
    }

    /// Poll the daemon for new blocks and feed them into the event
    /// channel until cancelled. Run this once per client.
    pub async fn run_event_poller(self: Arc<Self>, token: CancellationToken) {
        loop {
            tokio::select! {
                () = token.cancelled() => return,
                () = sleep(EVENT_POLL_INTERVAL) => {}
            }
            if let Err(e) = self.poll_once().await {
                if e.is_cancellation() {
                    return;
                }
                debug!(network = %self.network, error = %e, "Chain event poll failed");
            }
        }
    }

    async fn poll_once(&self) -> Result<()> {
        let since = *self.poll_tip.lock();
        let since = match since {
            Some(tip) => tip,
            None => {
                let tip = self.tip_state().await?;
                *self.poll_tip.lock() = Some(tip);
                return Ok(());
            }
        };

        match self.updates_since(Some(&since), EVENT_POLL_BATCH).await {
            Ok(updates) => {
                for update in updates {
                    let tip = ChainTip {
                        network: self.network,
                        height: update.height,
                        block_id: update.block_id,
                    };
                    // A closed channel only means nobody subscribed yet.
                    let _ = self.events.send(ChainEvent::Applied(update));
                    *self.poll_tip.lock() = Some(tip);
                }
                Ok(())
            }
            Err(e) => {
                // The daemon no longer knows our tip: the chain reorged
                // past it. Tell subscribers to resync and follow suit.
                let tip = self.tip_state().await?;
                *self.poll_tip.lock() = Some(tip);
                let _ = self.events.send(ChainEvent::Reorged { tip });
                warn!(network = %self.network, error = %e, "Tip rejected by daemon, emitted reorg");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ChainSource for DaemonChainClient {
    async fn tip_state(&self) -> Result<ChainTip> {
        let tip: TipResponse = get_json(&self.client, format!("{}/tip", self.base_url)).await?;
        let block_id = BlockId::from_hex(&tip.id)
            .map_err(|e| InfraError::Rpc(format!("invalid tip id from daemon: {e}").into()))?;
        Ok(ChainTip {
            network: self.network,
            height: tip.height,
            block_id,
        })
    }

    async fn updates_since(&self, tip: Option<&ChainTip>, max: usize) -> Result<Vec<BlockUpdate>> {
        let url = match tip {
            Some(tip) => format!(
                "{}/updates?height={}&id={}&max={max}",
                self.base_url, tip.height, tip.block_id
            ),
            None => format!("{}/updates?max={max}", self.base_url),
        };
        let response: UpdatesResponse = get_json(&self.client, url).await?;
        response
            .updates
            .into_iter()
            .map(UpdateEntry::into_block_update)
            .collect()
    }

    fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    async fn recommended_fee(&self) -> Result<Currency> {
        let fee: FeeResponse = get_json(&self.client, format!("{}/fee", self.base_url)).await?;
        Ok(fee.fee)
    }

    async fn pool_transactions(&self) -> Result<Vec<ChainTransaction>> {
        let pool: TxPoolResponse =
            get_json(&self.client, format!("{}/txpool", self.base_url)).await?;
        Ok(pool.transactions)
    }

    async fn broadcast_transaction_set(&self, txns: Vec<ChainTransaction>) -> Result<()> {
        #[derive(Serialize)]
        struct Broadcast {
            transactions: Vec<ChainTransaction>,
        }
        let _: serde_json::Value = post_json(
            &self.client,
            format!("{}/txpool/broadcast", self.base_url),
            &Broadcast { transactions: txns },
        )
        .await?;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALLET DAEMON CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Deserialize)]
struct WalletKeyResponse {
    key: HostKey,
}

#[derive(Debug, Deserialize)]
struct WalletAddressResponse {
    address: String,
}

#[derive(Debug, Serialize)]
struct FundRequest<'a> {
    transaction: &'a ChainTransaction,
    amount: Currency,
}

#[derive(Debug, Serialize)]
struct SignRequest<'a> {
    transaction: &'a ChainTransaction,
}

#[derive(Debug, Deserialize)]
struct TransactionResponse {
    transaction: ChainTransaction,
}

/// Client for one network's wallet daemon.
#[derive(Debug)]
pub struct DaemonWallet {
    client: reqwest::Client,
    base_url: String,
    key: HostKey,
}

impl DaemonWallet {
    /// Connect to the wallet daemon and cache its renter key.
    ///
    /// # Errors
    /// Returns an error if the daemon is unreachable.
    pub async fn connect(client: reqwest::Client, base_url: impl Into<String>) -> Result<Self> {
        let base_url = base_url.into();
        let key: WalletKeyResponse = get_json(&client, format!("{base_url}/key")).await?;
        Ok(Self {
            client,
            base_url,
            key: key.key,
        })
    }
}

#[async_trait]
impl Wallet for DaemonWallet {
    fn key(&self) -> HostKey {
        self.key
    }

    async fn address(&self) -> Result<String> {
        let address: WalletAddressResponse =
            get_json(&self.client, format!("{}/address", self.base_url)).await?;
        Ok(address.address)
    }

    async fn fund_transaction(
        &self,
        transaction: &mut ChainTransaction,
        amount: Currency,
    ) -> Result<()> {
        let funded: TransactionResponse = post_json(
            &self.client,
            format!("{}/fund", self.base_url),
            &FundRequest {
                transaction,
                amount,
            },
        )
        .await?;
        *transaction = funded.transaction;
        Ok(())
    }

    async fn sign_transaction(&self, transaction: &mut ChainTransaction) -> Result<()> {
        let signed: TransactionResponse = post_json(
            &self.client,
            format!("{}/sign", self.base_url),
            &SignRequest { transaction },
        )
        .await?;
        *transaction = signed.transaction;
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SYNCER DAEMON CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Client for one network's peer syncer.
#[derive(Debug)]
pub struct DaemonSyncer {
    client: reqwest::Client,
    base_url: String,
}

impl DaemonSyncer {
    /// Create a client over a syncer daemon base URL.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl Syncer for DaemonSyncer {
    async fn peers(&self) -> Result<Vec<Peer>> {
        get_json(&self.client, format!("{}/peers", self.base_url)).await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RHP SESSION GATEWAY CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Serialize)]
struct HostTarget<'a> {
    net_address: &'a str,
    public_key: HostKey,
}

#[derive(Debug, Serialize)]
struct SiamuxTarget<'a> {
    siamux_addresses: &'a [String],
    public_key: HostKey,
}

#[derive(Debug, Serialize)]
struct PriceTableRequest<'a> {
    net_address: &'a str,
    public_key: HostKey,
    payment: Option<&'a ContractRevision>,
}

#[derive(Debug, Serialize)]
struct FormRequest<'a> {
    net_address: &'a str,
    public_key: HostKey,
    renter_key: HostKey,
    renter_address: &'a str,
    funding: Currency,
    collateral: Currency,
    duration: u64,
    fee: Currency,
    transaction: &'a ChainTransaction,
}

#[derive(Debug, Deserialize)]
struct FormResponse {
    revision: ContractRevision,
    transaction_set: Vec<ChainTransaction>,
}

#[derive(Debug, Serialize)]
struct FormRequestV2<'a> {
    siamux_addresses: &'a [String],
    public_key: HostKey,
    renter_key: HostKey,
    renter_address: &'a str,
    funding: Currency,
    collateral: Currency,
    duration: u64,
    fee: Currency,
    transaction: &'a ChainTransaction,
}

#[derive(Debug, Deserialize)]
struct FormResponseV2 {
    revision: V2ContractRevision,
    transaction_set: Vec<ChainTransaction>,
}

#[derive(Debug, Serialize)]
struct RevisionRequest<'a> {
    net_address: &'a str,
    public_key: HostKey,
    contract_id: &'a str,
}

#[derive(Debug, Serialize)]
struct FundAccountRequest<'a> {
    net_address: &'a str,
    public_key: HostKey,
    revision: &'a ContractRevision,
    price_table: &'a HostPriceTable,
    amount: Currency,
}

#[derive(Debug, Serialize)]
struct AppendSectorRequest<'a> {
    net_address: &'a str,
    public_key: HostKey,
    price_table: &'a HostPriceTable,
    #[serde(with = "hex::serde")]
    sector: &'a [u8],
}

#[derive(Debug, Deserialize)]
struct AppendSectorResponse {
    root: String,
}

#[derive(Debug, Serialize)]
struct ReadSectorRequest<'a> {
    net_address: &'a str,
    public_key: HostKey,
    price_table: &'a HostPriceTable,
    root: &'a str,
}

#[derive(Debug, Deserialize)]
struct ReadSectorResponse {
    #[serde(with = "hex::serde")]
    sector: Vec<u8>,
}

#[derive(Debug, Serialize)]
struct AppendSectorRequestV2<'a> {
    siamux_addresses: &'a [String],
    public_key: HostKey,
    revision: &'a V2ContractRevision,
    #[serde(with = "hex::serde")]
    sector: &'a [u8],
}

#[derive(Debug, Deserialize)]
struct AppendSectorResponseV2 {
    root: String,
    revision: V2ContractRevision,
}

#[derive(Debug, Serialize)]
struct ReadSectorRequestV2<'a> {
    siamux_addresses: &'a [String],
    public_key: HostKey,
    revision: &'a V2ContractRevision,
    root: &'a str,
}

/// Client for the RHP session gateway, which owns the actual v2/v3/v4
/// transport dials and exposes each protocol-atomic RPC over HTTP.
#[derive(Debug)]
pub struct RhpGatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl RhpGatewayClient {
    /// Create a client over a gateway base URL.
    #[must_use]
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }
}

#[async_trait]
impl RhpClient for RhpGatewayClient {
    async fn settings(&self, net_address: &str, host_key: HostKey) -> Result<HostSettings> {
        post_json(
            &self.client,
            self.url("/settings"),
            &HostTarget {
                net_address,
                public_key: host_key,
            },
        )
        .await
    }

    async fn price_table(
        &self,
        net_address: &str,
        host_key: HostKey,
        payment: Option<&ContractRevision>,
    ) -> Result<HostPriceTable> {
        post_json(
            &self.client,
            self.url("/pricetable"),
            &PriceTableRequest {
                net_address,
                public_key: host_key,
                payment,
            },
        )
        .await
    }

    async fn form_contract(
        &self,
        net_address: &str,
        host_key: HostKey,
        params: FormContractParams,
    ) -> Result<FormedContract> {
        let response: FormResponse = post_json(
            &self.client,
            self.url("/contracts/form"),
            &FormRequest {
                net_address,
                public_key: host_key,
                renter_key: params.renter_key,
                renter_address: &params.renter_address,
                funding: params.funding,
                collateral: params.collateral,
                duration: params.duration,
                fee: params.fee,
                transaction: &params.transaction,
            },
        )
        .await?;
        Ok(FormedContract {
            revision: response.revision,
            transaction_set: response.transaction_set,
        })
    }

    async fn latest_revision(
        &self,
        net_address: &str,
        host_key: HostKey,
        contract_id: &str,
    ) -> Result<ContractRevision> {
        post_json(
            &self.client,
            self.url("/contracts/revision"),
            &RevisionRequest {
                net_address,
                public_key: host_key,
                contract_id,
            },
        )
        .await
    }

    async fn fund_account(
        &self,
        net_address: &str,
        host_key: HostKey,
        revision: &ContractRevision,
        price_table: &HostPriceTable,
        amount: Currency,
    ) -> Result<()> {
        let _: serde_json::Value = post_json(
            &self.client,
            self.url("/accounts/fund"),
            &FundAccountRequest {
                net_address,
                public_key: host_key,
                revision,
                price_table,
                amount,
            },
        )
        .await?;
        Ok(())
    }

    async fn append_sector(
        &self,
        net_address: &str,
        host_key: HostKey,
        price_table: &HostPriceTable,
        sector: &[u8],
    ) -> Result<String> {
        let response: AppendSectorResponse = post_json(
            &self.client,
            self.url("/sectors/append"),
            &AppendSectorRequest {
                net_address,
                public_key: host_key,
                price_table,
                sector,
            },
        )
        .await?;
        Ok(response.root)
    }

    async fn read_sector(
        &self,
        net_address: &str,
        host_key: HostKey,
        price_table: &HostPriceTable,
        root: &str,
    ) -> Result<Vec<u8>> {
        let response: ReadSectorResponse = post_json(
            &self.client,
            self.url("/sectors/read"),
            &ReadSectorRequest {
                net_address,
                public_key: host_key,
                price_table,
                root,
            },
        )
        .await?;
        Ok(response.sector)
    }

    async fn settings_v2(
        &self,
        siamux_addresses: &[String],
        host_key: HostKey,
    ) -> Result<V2HostSettings> {
        post_json(
            &self.client,
            self.url("/v2/settings"),
            &SiamuxTarget {
                siamux_addresses,
                public_key: host_key,
            },
        )
        .await
    }

    async fn form_contract_v2(
        &self,
        siamux_addresses: &[String],
        host_key: HostKey,
        params: FormContractParams,
    ) -> Result<FormedContractV2> {
        let response: FormResponseV2 = post_json(
            &self.client,
            self.url("/v2/contracts/form"),
            &FormRequestV2 {
                siamux_addresses,
                public_key: host_key,
                renter_key: params.renter_key,
                renter_address: &params.renter_address,
                funding: params.funding,
                collateral: params.collateral,
                duration: params.duration,
                fee: params.fee,
                transaction: &params.transaction,
            },
        )
        .await?;
        Ok(FormedContractV2 {
            revision: response.revision,
            transaction_set: response.transaction_set,
        })
    }

    async fn append_sector_v2(
        &self,
        siamux_addresses: &[String],
        host_key: HostKey,
        revision: &V2ContractRevision,
        sector: &[u8],
    ) -> Result<(String, V2ContractRevision)> {
        let response: AppendSectorResponseV2 = post_json(
            &self.client,
            self.url("/v2/sectors/append"),
            &AppendSectorRequestV2 {
                siamux_addresses,
                public_key: host_key,
                revision,
                sector,
            },
        )
        .await?;
        Ok((response.root, response.revision))
    }

    async fn read_sector_v2(
        &self,
        siamux_addresses: &[String],
        host_key: HostKey,
        revision: &V2ContractRevision,
        root: &str,
    ) -> Result<Vec<u8>> {
        let response: ReadSectorResponse = post_json(
            &self.client,
            self.url("/v2/sectors/read"),
            &ReadSectorRequestV2 {
                siamux_addresses,
                public_key: host_key,
                revision,
                root,
            },
        )
        .await?;
        Ok(response.sector)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
