//! Domain types for the observation core.
//!
//! Organized in three layers:
//! - [`primitives`] - validated newtypes (keys, currency, network, batch IDs)
//! - [`protocol`] - protocol snapshots observed from hosts (settings, price
//!   tables, contract revisions) and the v1/v2 sum type
//! - [`host`] - aggregate entities persisted by the store (hosts, scans,
//!   benchmarks, price changes, chain tips, update batches)

pub mod host;
pub mod primitives;
pub mod protocol;

pub use host::{
    ChainTip, FeedHost, Host, HostBenchmark, HostLocation, HostScan, PriceChange, UpdateBatch,
};
pub use primitives::{BatchId, BlockId, Currency, HostKey, Network};
pub use protocol::{
    ContractRevision, HostPriceTable, HostProtocol, HostSettings, ProtocolSnapshot,
    StoredRevision, V2ContractRevision, V2HostSettings, V2Prices,
};
