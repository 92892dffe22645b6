//! Port traits for everything the observation core consumes but does not
//! implement: the blockchain client, the RHP transports, the wallet, the
//! peer syncer, the persistence layer, DNS resolution, and the two outward
//! fetchers (exchange rate, geolocation).
//!
//! Production adapters live in [`crate::clients`] and
//! [`crate::store::postgres`]; tests substitute mocks.

pub mod chain;
pub mod geo;
pub mod oracle;
pub mod resolver;
pub mod rhp;
pub mod store;
pub mod syncer;
pub mod wallet;

pub use chain::{BlockUpdate, ChainEvent, ChainSource, ChainTransaction, HostAnnouncement};
pub use geo::{GeoLocation, GeoLocator};
pub use oracle::ExchangeRateSource;
pub use resolver::{DnsResolver, NetResolver};
pub use rhp::{FormedContract, FormedContractV2, RhpClient};
pub use store::{FeedPersistence, HostPersistence};
pub use syncer::{Peer, Syncer};
pub use wallet::Wallet;
