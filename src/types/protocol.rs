//! Protocol snapshots observed from hosts.
//!
//! A host speaks either the v1 protocol generation (settings + price table,
//! fetched over separate transports) or the v2 generation (a single settings
//! object). The store persists these as opaque blobs; only the scorer, the
//! gouging checks and the benchmark worker interpret the fields.
//!
//! The generation split is a sum type, [`HostProtocol`], rather than a bare
//! `v2` flag with parallel optional fields: a v1 host can never carry v2
//! settings and vice versa.

use serde::{Deserialize, Serialize};

use super::primitives::Currency;
use crate::error::{InfraError, Result};

/// The host's fixed storage unit (4 MiB).
pub const SECTOR_SIZE: u64 = 1 << 22;

// ═══════════════════════════════════════════════════════════════════════════════
// V1 SETTINGS & PRICE TABLE
// ═══════════════════════════════════════════════════════════════════════════════

/// Host settings published over the v1 settings RPC.
///
/// Prices are in base units: storage and collateral per byte per block,
/// bandwidth per byte.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostSettings {
    /// Whether the host is accepting new contracts.
    pub accepting_contracts: bool,
    /// Longest contract duration the host accepts, in blocks.
    pub max_duration: u64,
    /// Unused storage the host offers, in bytes.
    pub remaining_storage: u64,
    /// Total storage behind the host, in bytes.
    pub total_storage: u64,
    /// Fixed price of forming a contract.
    pub contract_price: Currency,
    /// Price per byte per block of stored data.
    pub storage_price: Currency,
    /// Price per byte uploaded to the host.
    pub upload_price: Currency,
    /// Price per byte downloaded from the host.
    pub download_price: Currency,
    /// Flat price per RPC.
    pub base_rpc_price: Currency,
    /// Price per sector access.
    pub sector_access_price: Currency,
    /// Collateral per byte per block the host locks for stored data.
    pub collateral: Currency,
    /// Most collateral the host locks into a single contract.
    pub max_collateral: Currency,
    /// Reported daemon version.
    pub version: String,
}

/// A host's signed, time-limited price schedule fetched over the v3
/// transport. Only the fields the benchmark worker pays with are kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostPriceTable {
    /// Price table identifier echoed when paying by contract.
    pub uid: String,
    /// Seconds the table remains valid after issue.
    pub validity_secs: u64,
    /// Price of updating the price table.
    pub update_price_table_cost: Currency,
    /// Price of funding an ephemeral account.
    pub fund_account_cost: Currency,
    /// Base price of a sector write.
    pub write_base_cost: Currency,
    /// Per-byte price of a sector write.
    pub write_length_cost: Currency,
    /// Base price of a sector read.
    pub read_base_cost: Currency,
    /// Per-byte price of a sector read.
    pub read_length_cost: Currency,
}

impl HostPriceTable {
    /// Estimated price of appending one full sector by ephemeral account.
    #[must_use]
    pub fn append_sector_cost(&self) -> Currency {
        self.write_base_cost
            .saturating_add(self.write_length_cost.saturating_mul(u128::from(SECTOR_SIZE)))
    }

    /// Estimated price of reading one full sector by ephemeral account.
    #[must_use]
    pub fn read_sector_cost(&self) -> Currency {
        self.read_base_cost
            .saturating_add(self.read_length_cost.saturating_mul(u128::from(SECTOR_SIZE)))
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// V2 SETTINGS
// ═══════════════════════════════════════════════════════════════════════════════

/// Prices inside a v2 settings object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2Prices {
    /// Fixed price of forming a contract.
    pub contract_price: Currency,
    /// Price per byte per block of stored data.
    pub storage_price: Currency,
    /// Price per byte uploaded (host ingress).
    pub ingress_price: Currency,
    /// Price per byte downloaded (host egress).
    pub egress_price: Currency,
    /// Collateral per byte per block the host risks for stored data.
    pub collateral: Currency,
}

impl V2Prices {
    /// Renter cost of writing one sector stored for `duration` blocks.
    #[must_use]
    pub fn renter_write_cost(&self, duration: u64) -> Currency {
        let sector = u128::from(SECTOR_SIZE);
        self.ingress_price.saturating_mul(sector).saturating_add(
            self.storage_price
                .saturating_mul(sector)
                .saturating_mul(u128::from(duration)),
        )
    }

    /// Renter cost of reading one sector back.
    #[must_use]
    pub fn renter_read_cost(&self) -> Currency {
        self.egress_price.saturating_mul(u128::from(SECTOR_SIZE))
    }

    /// Collateral the host risks on one stored sector.
    #[must_use]
    pub fn host_risked_collateral(&self, duration: u64) -> Currency {
        self.collateral
            .saturating_mul(u128::from(SECTOR_SIZE))
            .saturating_mul(u128::from(duration))
    }
}

/// Host settings published over the v4 settings RPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2HostSettings {
    /// Reported protocol release.
    pub release: String,
    /// Whether the host is accepting new contracts.
    pub accepting_contracts: bool,
    /// Longest contract duration the host accepts, in blocks.
    pub max_contract_duration: u64,
    /// Unused storage the host offers, in bytes.
    pub remaining_storage: u64,
    /// Total storage behind the host, in bytes.
    pub total_storage: u64,
    /// Most collateral the host locks into a single contract.
    pub max_collateral: Currency,
    /// Current price schedule.
    pub prices: V2Prices,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONTRACT REVISIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// The renter-side view of a formed v1 file contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractRevision {
    /// Contract identifier, lowercase hex.
    pub contract_id: String,
    /// Revision counter.
    pub revision_number: u64,
    /// Height at which the proof window opens.
    pub window_start: u64,
    /// Height at which the proof window closes.
    pub window_end: u64,
    /// Funds still spendable by the renter.
    pub renter_funds: Currency,
}

/// The renter-side view of a formed v2 file contract.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2ContractRevision {
    /// Contract identifier, lowercase hex.
    pub contract_id: String,
    /// Revision counter.
    pub revision_number: u64,
    /// Height at which the contract expires.
    pub expiration_height: u64,
    /// Funds still spendable by the renter.
    pub renter_funds: Currency,
}

// ═══════════════════════════════════════════════════════════════════════════════
// PROTOCOL SUM TYPE
// ═══════════════════════════════════════════════════════════════════════════════

/// What a scan observed: the settings half of the protocol state, without
/// any contract revision. This is the payload carried on scan rows and in
/// the `settings` blob column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "generation", rename_all = "lowercase")]
pub enum ProtocolSnapshot {
    /// v1 settings and, when the follow-up RPC succeeded, a price table.
    V1 {
        /// Settings from the v2 transport settings RPC.
        settings: HostSettings,
        /// Price table from the v3 transport, if fetched.
        price_table: Option<HostPriceTable>,
    },
    /// v2 settings from the v4 settings RPC.
    V2 {
        /// The single v2 settings object.
        settings: V2HostSettings,
    },
}

impl ProtocolSnapshot {
    /// Encode for the opaque `settings` blob column.
    ///
    /// # Errors
    /// Returns an error if JSON encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self).map_err(InfraError::Serialization)?)
    }

    /// Decode from the opaque `settings` blob column.
    ///
    /// # Errors
    /// Returns an error if the blob is not a valid snapshot.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(blob).map_err(InfraError::Serialization)?)
    }
}

/// A contract revision of either generation, persisted in the `revision`
/// blob column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "generation", rename_all = "lowercase")]
pub enum StoredRevision {
    /// A v1 file-contract revision.
    V1(ContractRevision),
    /// A v2 file-contract revision.
    V2(V2ContractRevision),
}

impl StoredRevision {
    /// Encode for the opaque `revision` blob column.
    ///
    /// # Errors
    /// Returns an error if JSON encoding fails.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self).map_err(InfraError::Serialization)?)
    }

    /// Decode from the opaque `revision` blob column.
    ///
    /// # Errors
    /// Returns an error if the blob is not a valid revision.
    pub fn decode(blob: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(blob).map_err(InfraError::Serialization)?)
    }
}

/// The full protocol state of a host: its latest observed settings plus the
/// revision of the benchmark contract, per generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "generation", rename_all = "lowercase")]
pub enum HostProtocol {
    /// v1 protocol generation.
    V1 {
        /// Most recent settings, if any scan succeeded.
        settings: Option<HostSettings>,
        /// Most recent price table, if fetched.
        price_table: Option<HostPriceTable>,
        /// Revision of the live benchmark contract, if one was formed.
        revision: Option<ContractRevision>,
    },
    /// v2 protocol generation.
    V2 {
        /// Most recent settings, if any scan succeeded.
        settings: Option<V2HostSettings>,
        /// Revision of the live benchmark contract, if one was formed.
        revision: Option<V2ContractRevision>,
    },
}

impl HostProtocol {
    /// An empty protocol state for a freshly announced host.
    #[must_use]
    pub const fn empty(v2: bool) -> Self {
        if v2 {
            Self::V2 {
                settings: None,
                revision: None,
            }
        } else {
            Self::V1 {
                settings: None,
                price_table: None,
                revision: None,
            }
        }
    }

    /// Whether this host speaks the v2 generation.
    #[must_use]
    pub const fn is_v2(&self) -> bool {
        matches!(self, Self::V2 { .. })
    }

    /// Fold a freshly scanned snapshot into the protocol state, preserving
    /// the contract revision. A generation flip (a v1 host upgrading)
    /// replaces the state wholesale.
    pub fn apply_snapshot(&mut self, snapshot: ProtocolSnapshot) {
        match (&mut *self, snapshot) {
            (
                Self::V1 {
                    settings,
                    price_table,
                    ..
                },
                ProtocolSnapshot::V1 {
                    settings: new_settings,
                    price_table: new_table,
                },
            ) => {
                *settings = Some(new_settings);
                if new_table.is_some() {
                    *price_table = new_table;
                }
            }
            (Self::V2 { settings, .. }, ProtocolSnapshot::V2 {
                settings: new_settings,
            }) => {
                *settings = Some(new_settings);
            }
            (
                this,
                ProtocolSnapshot::V1 {
                    settings,
                    price_table,
                },
            ) => {
                *this = Self::V1 {
                    settings: Some(settings),
                    price_table,
                    revision: None,
                };
            }
            (this, ProtocolSnapshot::V2 { settings }) => {
                *this = Self::V2 {
                    settings: Some(settings),
                    revision: None,
                };
            }
        }
    }

    /// The settings half of the state, for blob encoding and scan rows.
    #[must_use]
    pub fn snapshot(&self) -> Option<ProtocolSnapshot> {
        match self {
            Self::V1 {
                settings,
                price_table,
                ..
            } => settings.clone().map(|settings| ProtocolSnapshot::V1 {
                settings,
                price_table: price_table.clone(),
            }),
            Self::V2 { settings, .. } => settings
                .clone()
                .map(|settings| ProtocolSnapshot::V2 { settings }),
        }
    }

    /// The stored revision, if a benchmark contract exists.
    #[must_use]
    pub fn stored_revision(&self) -> Option<StoredRevision> {
        match self {
            Self::V1 { revision, .. } => revision.clone().map(StoredRevision::V1),
            Self::V2 { revision, .. } => revision.clone().map(StoredRevision::V2),
        }
    }

    /// Rebuild the protocol state from blob columns.
    ///
    /// # Errors
    /// Returns an error if either blob fails to decode.
    pub fn from_blobs(
        v2: bool,
        settings: Option<&[u8]>,
        revision: Option<&[u8]>,
    ) -> Result<Self> {
        let mut protocol = Self::empty(v2);
        if let Some(blob) = settings {
            protocol.apply_snapshot(ProtocolSnapshot::decode(blob)?);
        }
        if let Some(blob) = revision {
            match (&mut protocol, StoredRevision::decode(blob)?) {
                (Self::V1 { revision, .. }, StoredRevision::V1(rev)) => *revision = Some(rev),
                (Self::V2 { revision, .. }, StoredRevision::V2(rev)) => *revision = Some(rev),
                // A revision from the other generation is stale; drop it.
                _ => {}
            }
        }
        Ok(protocol)
    }

    // ── Accessors used by the scorer and the filters ──────────────────────────

    /// Whether the host currently advertises that it accepts contracts.
    #[must_use]
    pub fn accepting_contracts(&self) -> bool {
        match self {
            Self::V1 { settings, .. } => {
                settings.as_ref().is_some_and(|s| s.accepting_contracts)
            }
            Self::V2 { settings, .. } => {
                settings.as_ref().is_some_and(|s| s.accepting_contracts)
            }
        }
    }

    /// Advertised unused storage in bytes.
    #[must_use]
    pub fn remaining_storage(&self) -> u64 {
        match self {
            Self::V1 { settings, .. } => settings.as_ref().map_or(0, |s| s.remaining_storage),
            Self::V2 { settings, .. } => settings.as_ref().map_or(0, |s| s.remaining_storage),
        }
    }

    /// Advertised total storage in bytes.
    #[must_use]
    pub fn total_storage(&self) -> u64 {
        match self {
            Self::V1 { settings, .. } => settings.as_ref().map_or(0, |s| s.total_storage),
            Self::V2 { settings, .. } => settings.as_ref().map_or(0, |s| s.total_storage),
        }
    }

    /// Price per byte per block of stored data.
    #[must_use]
    pub fn storage_price(&self) -> Currency {
        match self {
            Self::V1 { settings, .. } => {
                settings.as_ref().map_or(Currency::ZERO, |s| s.storage_price)
            }
            Self::V2 { settings, .. } => settings
                .as_ref()
                .map_or(Currency::ZERO, |s| s.prices.storage_price),
        }
    }

    /// Price per byte uploaded to the host.
    #[must_use]
    pub fn upload_price(&self) -> Currency {
        match self {
            Self::V1 { settings, .. } => {
                settings.as_ref().map_or(Currency::ZERO, |s| s.upload_price)
            }
            Self::V2 { settings, .. } => settings
                .as_ref()
                .map_or(Currency::ZERO, |s| s.prices.ingress_price),
        }
    }

    /// Price per byte downloaded from the host.
    #[must_use]
    pub fn download_price(&self) -> Currency {
        match self {
            Self::V1 { settings, .. } => settings
                .as_ref()
                .map_or(Currency::ZERO, |s| s.download_price),
            Self::V2 { settings, .. } => settings
                .as_ref()
                .map_or(Currency::ZERO, |s| s.prices.egress_price),
        }
    }

    /// Collateral per byte per block the host locks for stored data.
    #[must_use]
    pub fn collateral(&self) -> Currency {
        match self {
            Self::V1 { settings, .. } => {
                settings.as_ref().map_or(Currency::ZERO, |s| s.collateral)
            }
            Self::V2 { settings, .. } => settings
                .as_ref()
                .map_or(Currency::ZERO, |s| s.prices.collateral),
        }
    }

    /// Most collateral the host locks into a single contract.
    #[must_use]
    pub fn max_collateral(&self) -> Currency {
        match self {
            Self::V1 { settings, .. } => settings
                .as_ref()
                .map_or(Currency::ZERO, |s| s.max_collateral),
            Self::V2 { settings, .. } => settings
                .as_ref()
                .map_or(Currency::ZERO, |s| s.max_collateral),
        }
    }

    /// Reported daemon version, when the generation carries one.
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        match self {
            Self::V1 { settings, .. } => settings.as_ref().map(|s| s.version.as_str()),
            Self::V2 { .. } => None,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
