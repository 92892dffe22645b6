//! Best-effort IP geolocation client with a long-lived cache.
//!
//! Lookups run after a host's address set changes; results are cached for
//! a day per hostname so the service is only asked about genuinely new
//! addresses. Failures never propagate beyond a debug log at the caller.

use std::time::Duration;

use async_trait::async_trait;
use moka::sync::Cache as MokaCache;
use serde::Deserialize;
use tracing::debug;

use crate::error::{InfraError, Result};
use crate::ports::geo::{GeoLocation, GeoLocator};

/// Cached lookups live this long.
const CACHE_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Most hostnames kept in the cache.
const CACHE_CAPACITY: u64 = 50_000;

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    country: String,
    #[serde(default)]
    region: String,
    #[serde(default)]
    city: String,
    /// `"lat,lon"` pair.
    #[serde(default)]
    loc: String,
}

impl IpInfoResponse {
    fn into_location(self) -> GeoLocation {
        let (latitude, longitude) = self
            .loc
            .split_once(',')
            .and_then(|(lat, lon)| Some((lat.trim().parse().ok()?, lon.trim().parse().ok()?)))
            .unwrap_or((0.0, 0.0));
        GeoLocation {
            country: self.country,
            region: self.region,
            city: self.city,
            latitude,
            longitude,
        }
    }
}

/// ipinfo-style geolocation client.
#[derive(Debug)]
pub struct IpInfoLocator {
    client: reqwest::Client,
    base_url: String,
    token: String,
    cache: MokaCache<String, GeoLocation>,
}

impl IpInfoLocator {
    /// Create a locator over a service base URL and access token.
    #[must_use]
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            token: token.into(),
            cache: MokaCache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
        }
    }
}

#[async_trait]
impl GeoLocator for IpInfoLocator {
    async fn locate(&self, host: &str) -> Result<GeoLocation> {
        if let Some(cached) = self.cache.get(host) {
            return Ok(cached);
        }

        let mut url = format!("{}/{host}/json", self.base_url);
        if !self.token.is_empty() {
            url.push_str(&format!("?token={}", self.token));
        }
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(InfraError::Http)?
            .error_for_status()
            .map_err(InfraError::Http)?;
        let body: IpInfoResponse = response.json().await.map_err(InfraError::Http)?;
        let location = body.into_location();

        debug!(host, country = %location.country, "Located host");
        self.cache.insert(host.to_owned(), location.clone());
        Ok(location)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::clients::http_client;

    #[tokio::test]
    async fn lookup_parses_the_loc_pair() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/1.2.3.4/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "country": "DE",
                "region": "Hesse",
                "city": "Frankfurt",
                "loc": "50.1109,8.6821",
            })))
            .expect(1)
            .mount(&server)
            .await;

        let locator = IpInfoLocator::new(http_client().unwrap(), server.uri(), "");
        let location = locator.locate("1.2.3.4").await.unwrap();
        assert_eq!(location.country, "DE");
        assert!((location.latitude - 50.1109).abs() < 1e-9);

        // Second lookup hits the cache: the mock expects exactly one call.
        let cached = locator.locate("1.2.3.4").await.unwrap();
        assert_eq!(cached, location);
    }

    #[tokio::test]
    async fn missing_loc_defaults_to_zero() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/somewhere.example/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "country": "US",
            })))
            .mount(&server)
            .await;

        let locator = IpInfoLocator::new(http_client().unwrap(), server.uri(), "");
        let location = locator.locate("somewhere.example").await.unwrap();
        assert_eq!(location.country, "US");
        assert!((location.latitude - 0.0).abs() < f64::EPSILON);
    }
}
