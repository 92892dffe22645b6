//! Shared mocks and fixtures for the scenario tests.
//!
//! Every external collaborator has a scriptable in-memory stand-in; the
//! fixture wires them into a full per-network stack over the in-memory
//! persistence backend, so the scenario tests exercise the real
//! subscriber, scheduler and store code paths.

#![allow(dead_code)] // not every test file uses every helper

use std::collections::{HashMap, VecDeque};
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use hostscore::chain::ChainSubscriber;
use hostscore::config::ScannerSettings;
use hostscore::error::{AppError, InfraError, Result};
use hostscore::filters::domains::BlockedDomains;
use hostscore::filters::gouging::{PriceLimits, SharedPriceLimits};
use hostscore::ports::chain::{
    BlockUpdate, ChainEvent, ChainSource, ChainTransaction, HostAnnouncement,
};
use hostscore::ports::geo::{GeoLocation, GeoLocator};
use hostscore::ports::resolver::NetResolver;
use hostscore::ports::rhp::{FormContractParams, FormedContract, FormedContractV2, RhpClient};
use hostscore::ports::syncer::{Peer, Syncer};
use hostscore::ports::wallet::Wallet;
use hostscore::scheduler::{Scheduler, WorkerContext};
use hostscore::store::{HostStore, MemoryPersistence};
use hostscore::types::primitives::{BlockId, Currency, HostKey, Network};
use hostscore::types::protocol::{
    ContractRevision, HostPriceTable, HostSettings, V2ContractRevision, V2HostSettings,
};
use hostscore::types::ChainTip;

// ═══════════════════════════════════════════════════════════════════════════════
// MOCK CHAIN SOURCE
// ═══════════════════════════════════════════════════════════════════════════════

/// Scripted chain source: hand it batches of block updates, it serves them
/// through `updates_since` until drained.
pub struct MockChain {
    network: Network,
    batches: Mutex<VecDeque<Vec<BlockUpdate>>>,
    events: broadcast::Sender<ChainEvent>,
    /// Transaction sets broadcast by benchmark workers.
    pub broadcasts: Mutex<Vec<Vec<ChainTransaction>>>,
}

impl MockChain {
    pub fn new(network: Network) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            network,
            batches: Mutex::new(VecDeque::new()),
            events,
            broadcasts: Mutex::new(Vec::new()),
        }
    }

    pub fn push_batch(&self, batch: Vec<BlockUpdate>) {
        self.batches.lock().push_back(batch);
    }

    pub fn emit(&self, event: ChainEvent) {
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn tip_state(&self) -> Result<ChainTip> {
        Ok(ChainTip {
            network: self.network,
            height: 0,
            block_id: BlockId::new([0; 32]),
        })
    }

    async fn updates_since(
        &self,
        _tip: Option<&ChainTip>,
        _max: usize,
    ) -> Result<Vec<BlockUpdate>> {
        Ok(self.batches.lock().pop_front().unwrap_or_default())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChainEvent> {
        self.events.subscribe()
    }

    async fn recommended_fee(&self) -> Result<Currency> {
        Ok(Currency::new(10))
    }

    async fn pool_transactions(&self) -> Result<Vec<ChainTransaction>> {
        Ok(Vec::new())
    }

    async fn broadcast_transaction_set(&self, txns: Vec<ChainTransaction>) -> Result<()> {
        self.broadcasts.lock().push(txns);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// MOCK RHP CLIENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Scriptable RHP stand-in. Hosts answer with whatever settings the test
/// registered; everything else behaves like a tiny, perfectly honest host.
#[derive(Default)]
pub struct MockRhp {
    pub v1_settings: Mutex<HashMap<HostKey, HostSettings>>,
    pub v2_settings: Mutex<HashMap<HostKey, V2HostSettings>>,
    pub sectors: Mutex<HashMap<String, Vec<u8>>>,
    pub scans_served: Mutex<u32>,
    pub contracts_formed: Mutex<u32>,
    next_root: Mutex<u32>,
}

impl MockRhp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn serve_v1(&self, key: HostKey, settings: HostSettings) {
        self.v1_settings.lock().insert(key, settings);
    }

    fn price_table() -> HostPriceTable {
        HostPriceTable {
            uid: "pt-test".into(),
            validity_secs: 600,
            update_price_table_cost: Currency::new(1),
            fund_account_cost: Currency::new(1),
            write_base_cost: Currency::new(1),
            write_length_cost: Currency::new(1),
            read_base_cost: Currency::new(1),
            read_length_cost: Currency::new(1),
        }
    }

    fn unreachable() -> AppError {
        InfraError::Rpc("connection refused".into()).into()
    }
}

#[async_trait]
impl RhpClient for MockRhp {
    async fn settings(&self, _net_address: &str, host_key: HostKey) -> Result<HostSettings> {
        *self.scans_served.lock() += 1;
        self.v1_settings
            .lock()
            .get(&host_key)
            .cloned()
            .ok_or_else(Self::unreachable)
    }

    async fn price_table(
        &self,
        _net_address: &str,
        _host_key: HostKey,
        _payment: Option<&ContractRevision>,
    ) -> Result<HostPriceTable> {
        Ok(Self::price_table())
    }

    async fn form_contract(
        &self,
        _net_address: &str,
        _host_key: HostKey,
        params: FormContractParams,
    ) -> Result<FormedContract> {
        let mut formed = self.contracts_formed.lock();
        *formed += 1;
        Ok(FormedContract {
            revision: ContractRevision {
                contract_id: format!("{:064x}", *formed),
                revision_number: 1,
                window_start: 1_000_000,
                window_end: 1_000_144,
                renter_funds: params.funding,
            },
            transaction_set: vec![params.transaction],
        })
    }

    async fn latest_revision(
        &self,
        _net_address: &str,
        _host_key: HostKey,
        contract_id: &str,
    ) -> Result<ContractRevision> {
        Ok(ContractRevision {
            contract_id: contract_id.to_owned(),
            revision_number: 2,
            window_start: 1_000_000,
            window_end: 1_000_144,
            renter_funds: Currency::coins(1_000),
        })
    }

    async fn fund_account(
        &self,
        _net_address: &str,
        _host_key: HostKey,
        _revision: &ContractRevision,
        _price_table: &HostPriceTable,
        _amount: Currency,
    ) -> Result<()> {
        Ok(())
    }

    async fn append_sector(
        &self,
        _net_address: &str,
        _host_key: HostKey,
        _price_table: &HostPriceTable,
        sector: &[u8],
    ) -> Result<String> {
        let mut next = self.next_root.lock();
        *next += 1;
        let root = format!("root-{next}");
        self.sectors.lock().insert(root.clone(), sector.to_vec());
        Ok(root)
    }

    async fn read_sector(
        &self,
        _net_address: &str,
        _host_key: HostKey,
        _price_table: &HostPriceTable,
        root: &str,
    ) -> Result<Vec<u8>> {
        self.sectors
            .lock()
            .get(root)
            .cloned()
            .ok_or_else(|| InfraError::Rpc(format!("unknown sector root {root}").into()).into())
    }

    async fn settings_v2(
        &self,
        _siamux_addresses: &[String],
        host_key: HostKey,
    ) -> Result<V2HostSettings> {
        *self.scans_served.lock() += 1;
        self.v2_settings
            .lock()
            .get(&host_key)
            .cloned()
            .ok_or_else(Self::unreachable)
    }

    async fn form_contract_v2(
        &self,
        _siamux_addresses: &[String],
        _host_key: HostKey,
        params: FormContractParams,
    ) -> Result<FormedContractV2> {
        let mut formed = self.contracts_formed.lock();
        *formed += 1;
        Ok(FormedContractV2 {
            revision: V2ContractRevision {
                contract_id: format!("{:064x}", *formed),
                revision_number: 1,
                expiration_height: 1_000_000,
                renter_funds: params.funding,
            },
            transaction_set: vec![params.transaction],
        })
    }

    async fn append_sector_v2(
        &self,
        _siamux_addresses: &[String],
        _host_key: HostKey,
        revision: &V2ContractRevision,
        sector: &[u8],
    ) -> Result<(String, V2ContractRevision)> {
        let mut next = self.next_root.lock();
        *next += 1;
        let root = format!("root-{next}");
        self.sectors.lock().insert(root.clone(), sector.to_vec());
        let mut revised = revision.clone();
        revised.revision_number += 1;
        Ok((root, revised))
    }

    async fn read_sector_v2(
        &self,
        _siamux_addresses: &[String],
        _host_key: HostKey,
        _revision: &V2ContractRevision,
        root: &str,
    ) -> Result<Vec<u8>> {
        self.sectors
            .lock()
            .get(root)
            .cloned()
            .ok_or_else(|| InfraError::Rpc(format!("unknown sector root {root}").into()).into())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SMALL MOCKS
// ═══════════════════════════════════════════════════════════════════════════════

/// Syncer reporting a fixed, fully-synced peer count.
#[derive(Debug)]
pub struct StaticSyncer(pub usize);

#[async_trait]
impl Syncer for StaticSyncer {
    async fn peers(&self) -> Result<Vec<Peer>> {
        Ok((0..self.0)
            .map(|i| Peer {
                address: format!("peer-{i}:9981"),
                synced: true,
            })
            .collect())
    }
}

/// Resolver answering every hostname with one fixed public address.
#[derive(Debug)]
pub struct StaticResolver(pub IpAddr);

impl Default for StaticResolver {
    fn default() -> Self {
        Self("1.2.3.4".parse().expect("literal"))
    }
}

#[async_trait]
impl NetResolver for StaticResolver {
    async fn resolve(&self, _net_address: &str) -> Result<Vec<IpAddr>> {
        Ok(vec![self.0])
    }
}

/// Geolocator answering every host with the same location.
#[derive(Debug, Default)]
pub struct StaticGeo;

#[async_trait]
impl GeoLocator for StaticGeo {
    async fn locate(&self, _host: &str) -> Result<GeoLocation> {
        Ok(GeoLocation {
            country: "DE".into(),
            region: "Hesse".into(),
            city: "Frankfurt".into(),
            latitude: 50.1109,
            longitude: 8.6821,
        })
    }
}

/// Wallet that funds and signs everything, unless told it is broke.
pub struct MockWallet {
    key: HostKey,
    pub broke: Mutex<bool>,
}

impl MockWallet {
    pub fn new() -> Self {
        Self {
            key: HostKey::new([0xEE; 32]),
            broke: Mutex::new(false),
        }
    }
}

#[async_trait]
impl Wallet for MockWallet {
    fn key(&self) -> HostKey {
        self.key
    }

    async fn address(&self) -> Result<String> {
        Ok("addr:renter".into())
    }

    async fn fund_transaction(
        &self,
        _transaction: &mut ChainTransaction,
        amount: Currency,
    ) -> Result<()> {
        if *self.broke.lock() {
            return Err(AppError::InsufficientBalance(format!("need {amount}")));
        }
        Ok(())
    }

    async fn sign_transaction(&self, _transaction: &mut ChainTransaction) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FIXTURE
// ═══════════════════════════════════════════════════════════════════════════════

/// A fully wired single-network stack over in-memory persistence.
pub struct TestStack {
    pub persistence: Arc<MemoryPersistence>,
    pub store: Arc<HostStore<MemoryPersistence>>,
    pub scheduler: Arc<Scheduler<MemoryPersistence>>,
    pub subscriber: Arc<ChainSubscriber<MemoryPersistence>>,
    pub chain: Arc<MockChain>,
    pub rhp: Arc<MockRhp>,
    pub wallet: Arc<MockWallet>,
    pub limits: SharedPriceLimits,
    pub blocked: Arc<RwLock<BlockedDomains>>,
    pub token: CancellationToken,
}

impl TestStack {
    pub fn new() -> Self {
        let persistence = Arc::new(MemoryPersistence::new());
        let blocked = Arc::new(RwLock::new(BlockedDomains::default()));
        let limits = SharedPriceLimits::new(test_limits());
        let store = Arc::new(HostStore::new(
            Network::Mainnet,
            "eu-test",
            Arc::clone(&persistence),
            Arc::clone(&blocked),
            limits.clone(),
        ));

        let chain = Arc::new(MockChain::new(Network::Mainnet));
        let rhp = Arc::new(MockRhp::new());
        let wallet = Arc::new(MockWallet::new());
        let syncer: Arc<dyn Syncer> = Arc::new(StaticSyncer(6));
        let resolver: Arc<dyn NetResolver> = Arc::new(StaticResolver::default());

        let ctx = Arc::new(WorkerContext {
            store: Arc::clone(&store),
            rhp: Arc::clone(&rhp) as Arc<dyn RhpClient>,
            chain: Arc::clone(&chain) as Arc<dyn ChainSource>,
            wallet: Arc::clone(&wallet) as Arc<dyn Wallet>,
            syncer: Arc::clone(&syncer),
            resolver: Arc::clone(&resolver),
            geo: Arc::new(StaticGeo),
            limits: limits.clone(),
            settings: scanner_settings(),
        });
        let scheduler = Arc::new(Scheduler::new(ctx));
        let subscriber = Arc::new(ChainSubscriber::new(
            Arc::clone(&chain) as Arc<dyn ChainSource>,
            Arc::clone(&store),
            Arc::clone(&scheduler),
            syncer,
            resolver,
        ));

        Self {
            persistence,
            store,
            scheduler,
            subscriber,
            chain,
            rhp,
            wallet,
            limits,
            blocked,
            token: CancellationToken::new(),
        }
    }

    /// Spawn the subscriber and the dispatch loop.
    pub fn spawn_loops(&self) {
        let subscriber = Arc::clone(&self.subscriber);
        let token = self.token.clone();
        tokio::spawn(async move { subscriber.run(token).await });
        tokio::spawn(Scheduler::run(
            Arc::clone(&self.scheduler),
            self.token.clone(),
        ));
    }
}

/// Limits generous enough that test settings at "half the maxima" pass.
pub fn test_limits() -> PriceLimits {
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

/// One-sector benchmarks keep the scenario tests fast.
pub fn scanner_settings() -> ScannerSettings {
    ScannerSettings {
        scan_timeout_ms: 30_000,
        benchmark_timeout_ms: 600_000,
        sweep_interval_ms: 30_000,
        contract_duration: 4_320,
        benchmark_size_bytes: 1 << 22,
    }
}

/// Settings for a well-behaved host: prices at half the test maxima,
/// 10 TiB free, accepting contracts.
pub fn compliant_settings() -> HostSettings {
    HostSettings {
        accepting_contracts: true,
        max_duration: 10_000,
        remaining_storage: 10 << 40,
        total_storage: 20 << 40,
        contract_price: Currency::new(500_000),
        storage_price: Currency::new(500),
        upload_price: Currency::new(1_000),
        download_price: Currency::new(2_000),
        base_rpc_price: Currency::new(10),
        sector_access_price: Currency::new(10),
        collateral: Currency::new(1_000),
        max_collateral: Currency::coins(100),
        version: "1.6.0".into(),
    }
}

pub fn announcement(key: HostKey, net_address: &str) -> HostAnnouncement {
    HostAnnouncement {
        public_key: key,
        net_address: net_address.into(),
        siamux_addresses: Vec::new(),
        v2: false,
    }
}

pub fn block(height: u64, timestamp: DateTime<Utc>, announcements: Vec<HostAnnouncement>) -> BlockUpdate {
    let mut id = [0u8; 32];
    id[..8].copy_from_slice(&height.to_be_bytes());
    BlockUpdate {
        height,
        block_id: BlockId::new(id),
        timestamp,
        announcements,
    }
}

/// Poll a condition until it holds or the (virtual) patience runs out.
pub async fn wait_until<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..600 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    false
}
