//! Port for the IP geolocation service.
//!
//! Geolocation is best-effort metadata: lookups run after a host's address
//! set changes, failures are logged at debug level, and nothing ever blocks
//! a scan on them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A resolved location.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    /// ISO country code.
    pub country: String,
    /// Region or state.
    pub region: String,
    /// City name.
    pub city: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

/// Port for the geolocation fetcher.
#[async_trait]
pub trait GeoLocator: Send + Sync {
    /// Locate a hostname or IP.
    ///
    /// # Errors
    /// Returns an error if the service is unreachable or knows nothing
    /// about the address.
    async fn locate(&self, host: &str) -> Result<GeoLocation>;
}
