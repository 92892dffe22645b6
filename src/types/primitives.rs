//! Validated primitive types for domain entities.
//!
//! These newtypes provide:
//! - Type safety (a host key cannot be passed where a block ID is expected)
//! - Validation at construction time
//! - Domain semantics in function signatures

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sqlx::types::BigDecimal;
use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// NETWORK
// ═══════════════════════════════════════════════════════════════════════════════

/// The marketplace network a host belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// The production network.
    Mainnet,
    /// The long-running test network.
    Zen,
}

impl Network {
    /// Stable lowercase name used in the database and on the wire.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Mainnet => "mainnet",
            Self::Zen => "zen",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mainnet" => Ok(Self::Mainnet),
            "zen" => Ok(Self::Zen),
            other => Err(UnknownNetwork(other.to_owned())),
        }
    }
}

/// Error for unrecognized network names.
#[derive(Debug, Clone, Error)]
#[error("unknown network: {0}")]
pub struct UnknownNetwork(pub String);

// ═══════════════════════════════════════════════════════════════════════════════
// HOST KEY
// ═══════════════════════════════════════════════════════════════════════════════

/// A host's 32-byte ed25519 public key.
///
/// Hosts are addressed by `(network, public_key)` everywhere in the core.
/// Serialized as lowercase hex on the wire and in logs.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct HostKey([u8; 32]);

impl HostKey {
    /// Create from a fixed-size array (infallible).
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Try to create from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidKey::WrongLength` if the slice is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidKey> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| InvalidKey::WrongLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Parse from a hex string, with or without an `ed25519:` prefix.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the string is not valid hex or wrong length.
    pub fn from_hex(s: &str) -> Result<Self, InvalidKey> {
        let s = s.strip_prefix("ed25519:").unwrap_or(s);
        if s.len() != 64 {
            return Err(InvalidKey::WrongLength(s.len() / 2));
        }
        let bytes = hex::decode(s).map_err(|_| InvalidKey::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Get the underlying bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get as a byte slice.
    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Convert to a lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostKey({})", self.to_hex())
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<HostKey> for String {
    fn from(key: HostKey) -> Self {
        key.to_hex()
    }
}

impl TryFrom<String> for HostKey {
    type Error = InvalidKey;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

impl From<[u8; 32]> for HostKey {
    fn from(bytes: [u8; 32]) -> Self {
        Self::new(bytes)
    }
}

/// Error for invalid 32-byte keys and IDs.
#[derive(Debug, Clone, Error)]
pub enum InvalidKey {
    /// Value has wrong byte length.
    #[error("wrong length: expected 32 bytes, got {0}")]
    WrongLength(usize),
    /// Value contains invalid hex characters.
    #[error("invalid hex encoding")]
    InvalidHex,
}

// ═══════════════════════════════════════════════════════════════════════════════
// BLOCK ID
// ═══════════════════════════════════════════════════════════════════════════════

/// A 32-byte block identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BlockId([u8; 32]);

impl BlockId {
    /// Create from a fixed-size array.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Try to create from a byte slice.
    ///
    /// # Errors
    /// Returns `InvalidKey::WrongLength` if the slice is not exactly 32 bytes.
    pub fn from_slice(slice: &[u8]) -> Result<Self, InvalidKey> {
        let bytes: [u8; 32] = slice
            .try_into()
            .map_err(|_| InvalidKey::WrongLength(slice.len()))?;
        Ok(Self(bytes))
    }

    /// Parse from a hex string.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the string is not valid hex or wrong length.
    pub fn from_hex(s: &str) -> Result<Self, InvalidKey> {
        if s.len() != 64 {
            return Err(InvalidKey::WrongLength(s.len() / 2));
        }
        let bytes = hex::decode(s).map_err(|_| InvalidKey::InvalidHex)?;
        Self::from_slice(&bytes)
    }

    /// Get as a byte slice.
    #[must_use]
    pub const fn as_slice(&self) -> &[u8] {
        &self.0
    }

    /// Convert to a lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockId({})", self.to_hex())
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<BlockId> for String {
    fn from(id: BlockId) -> Self {
        id.to_hex()
    }
}

impl TryFrom<String> for BlockId {
    type Error = InvalidKey;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CURRENCY
// ═══════════════════════════════════════════════════════════════════════════════

/// Number of base units in one whole coin (10^24).
const COIN_PRECISION: u128 = 1_000_000_000_000_000_000_000_000;

/// A non-negative currency amount in base units (hastings).
///
/// Backed by `u128`, which covers the full currency range. Arithmetic is
/// saturating: host-supplied prices are untrusted and must never panic the
/// scorer or the gouging checks. Stored as `NUMERIC` via `BigDecimal` at the
/// database boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Currency(u128);

impl Currency {
    /// Zero amount.
    pub const ZERO: Self = Self(0);

    /// Create from raw base units.
    #[must_use]
    pub const fn new(value: u128) -> Self {
        Self(value)
    }

    /// Create from whole coins.
    #[must_use]
    pub const fn coins(n: u64) -> Self {
        Self(n as u128 * COIN_PRECISION)
    }

    /// The raw base-unit value.
    #[must_use]
    pub const fn value(self) -> u128 {
        self.0
    }

    /// Check if zero.
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Saturating addition.
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction (floors at zero).
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Saturating multiplication by a dimensionless factor.
    #[must_use]
    pub const fn saturating_mul(self, factor: u128) -> Self {
        Self(self.0.saturating_mul(factor))
    }

    /// Integer division by a non-zero divisor; division by zero yields zero.
    #[must_use]
    pub const fn div_floor(self, divisor: u128) -> Self {
        if divisor == 0 {
            Self(0)
        } else {
            Self(self.0 / divisor)
        }
    }

    /// Lossy conversion for scoring math.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn to_f64(self) -> f64 {
        self.0 as f64
    }

    /// Convert to `BigDecimal` for database storage.
    #[must_use]
    pub fn to_bigdecimal(self) -> BigDecimal {
        BigDecimal::from(self.0)
    }

    /// Convert from a database `BigDecimal`, truncating any fraction and
    /// clamping negatives to zero.
    #[must_use]
    pub fn from_bigdecimal(value: &BigDecimal) -> Self {
        let s = value.with_scale(0).to_string();
        let digits = s.strip_prefix('-').map_or(s.as_str(), |_| "0");
        Self(digits.parse().unwrap_or(u128::MAX))
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Currency {
    type Err = InvalidCurrency;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u128>()
            .map(Self)
            .map_err(|_| InvalidCurrency(s.to_owned()))
    }
}

impl Serialize for Currency {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        // Base units exceed every JSON number type; always a decimal string.
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Currency {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error for unparseable currency strings.
#[derive(Debug, Clone, Error)]
#[error("invalid currency value: {0}")]
pub struct InvalidCurrency(pub String);

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH ID
// ═══════════════════════════════════════════════════════════════════════════════

/// The 8-byte random identifier of an update batch.
///
/// A fresh ID is drawn for every [`crate::store::UpdateFeed::recent_updates`]
/// call; the portal echoes it back to finalize the batch.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BatchId([u8; 8]);

impl BatchId {
    /// Draw a fresh random batch ID.
    #[must_use]
    pub fn random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 8];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Parse from a 16-character hex string.
    ///
    /// # Errors
    /// Returns `InvalidKey` if the string is not valid hex or wrong length.
    pub fn from_hex(s: &str) -> Result<Self, InvalidKey> {
        if s.len() != 16 {
            return Err(InvalidKey::WrongLength(s.len() / 2));
        }
        let bytes = hex::decode(s).map_err(|_| InvalidKey::InvalidHex)?;
        let arr: [u8; 8] = bytes
            .try_into()
            .map_err(|_| InvalidKey::WrongLength(s.len() / 2))?;
        Ok(Self(arr))
    }

    /// Convert to a lowercase hex string.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchId({})", self.to_hex())
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<BatchId> for String {
    fn from(id: BatchId) -> Self {
        id.to_hex()
    }
}

impl TryFrom<String> for BatchId {
    type Error = InvalidKey;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════
